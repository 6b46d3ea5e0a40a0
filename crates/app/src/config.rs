//! Deployment settings, taken from the build environment.
//!
//! Set these in the `env` section of `.cargo/config.toml` or export them before building.
//! Numeric settings that are missing or do not parse fall back to the defaults.

use core::net::Ipv4Addr;
use core::str::FromStr;

use log::warn;
use temperature_node_core::config::{NetworkConfig, NodeConfig, Topics};
use thiserror::Error;

use crate::broker::Credentials;

/// SSID for WiFi network
const WIFI_SSID: &str = env!("WIFI_SSID");

/// Password for WiFi network
const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");

/// IPv4 address of the MQTT broker
const MQTT_BROKER: &str = env!("MQTT_BROKER");

/// Client identifier announced to the broker, also used as the DHCP host name
const MQTT_CLIENT_ID: &str = env!("MQTT_CLIENT_ID");

/// DHCP option 12 value
pub const DHCP_HOST_NAME: &[u8] = MQTT_CLIENT_ID.as_bytes();

const MQTT_PORT: Option<&str> = option_env!("MQTT_PORT");
const MQTT_USER: Option<&str> = option_env!("MQTT_USER");
const MQTT_PASSWORD: Option<&str> = option_env!("MQTT_PASSWORD");

/// Prefix for every published topic, e.g. `sensors/home/office`
const TOPIC_PREFIX: Option<&str> = option_env!("TOPIC_PREFIX");

/// IPv4 address of the NTP server. Defaults to time.cloudflare.com.
const NTP_SERVER: Option<&str> = option_env!("NTP_SERVER");

/// Offset of local time from UTC in seconds
const TZ_OFFSET: Option<&str> = option_env!("TZ_OFFSET");
const SLEEP_MINUTES: Option<&str> = option_env!("SLEEP_MINUTES");

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_NTP_SERVER: Ipv4Addr = Ipv4Addr::new(162, 159, 200, 1);

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// The broker address is not an IPv4 address
    #[error("The MQTT broker address is not a valid IPv4 address.")]
    InvalidBrokerAddress,
}

/// Where the broker lives and how to log in
#[derive(Clone, Debug)]
pub struct BrokerSettings {
    pub address: Ipv4Addr,
    pub port: u16,
    pub client_id: &'static str,
    pub credentials: Option<Credentials>,
}

/// Everything the firmware needs beyond the node settings
#[derive(Clone, Debug)]
pub struct FirmwareConfig {
    pub node: NodeConfig,
    pub broker: BrokerSettings,
    pub ntp_server: Ipv4Addr,
}

/// Parse an optional numeric setting, warning when it is present but invalid
fn parse_or<T: FromStr + Copy>(name: &str, value: Option<&str>, default: T) -> T {
    match value.map(T::from_str) {
        Some(Ok(parsed)) => parsed,
        Some(Err(_)) => {
            warn!("Ignoring invalid value for {name}");
            default
        }
        None => default,
    }
}

/// Build the topics from the prefix. The strings live for the lifetime of the firmware.
fn topics() -> Topics {
    let Some(prefix) = TOPIC_PREFIX else {
        return Topics::default();
    };

    let leak = |suffix: &str| -> &'static str {
        let topic = alloc::format!("{prefix}/{suffix}");
        alloc::boxed::Box::leak(topic.into_boxed_str())
    };

    Topics {
        temperature: leak("temperature_C"),
        supply_voltage: leak("vsys"),
        error_record: leak("last_error"),
        checkpoint: leak("feeder"),
    }
}

pub fn load() -> Result<FirmwareConfig, Error> {
    let address = Ipv4Addr::from_str(MQTT_BROKER).map_err(|_| Error::InvalidBrokerAddress)?;

    let credentials = match (MQTT_USER, MQTT_PASSWORD) {
        (Some(user), Some(password)) => Some(Credentials { user, password }),
        _ => None,
    };

    let defaults = NodeConfig::default();
    let node = NodeConfig {
        network: NetworkConfig {
            ssid: WIFI_SSID,
            password: WIFI_PASSWORD,
            ..NetworkConfig::default()
        },
        topics: topics(),
        utc_offset_seconds: parse_or(
            "TZ_OFFSET",
            TZ_OFFSET,
            defaults.utc_offset_seconds,
        ),
        sleep_minutes: parse_or("SLEEP_MINUTES", SLEEP_MINUTES, defaults.sleep_minutes),
        ..defaults
    };

    let ntp_server = match NTP_SERVER.map(Ipv4Addr::from_str) {
        Some(Ok(address)) => address,
        Some(Err(_)) => {
            warn!("Ignoring invalid NTP server address");
            DEFAULT_NTP_SERVER
        }
        None => DEFAULT_NTP_SERVER,
    };

    Ok(FirmwareConfig {
        node,
        broker: BrokerSettings {
            address,
            port: parse_or("MQTT_PORT", MQTT_PORT, DEFAULT_MQTT_PORT),
            client_id: MQTT_CLIENT_ID,
            credentials,
        },
        ntp_server,
    })
}
