//! Deployment settings for the node.
//!
//! The firmware fills these in from compile time environment variables. `Default` gives
//! the reference deployment with empty credentials.

/// WiFi settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfig {
    /// SSID of the network to join
    pub ssid: &'static str,

    /// Password of the network to join
    pub password: &'static str,

    /// Number of times the association status is polled before giving up
    pub association_attempts: u8,

    /// Time between association status polls
    pub association_poll_ms: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: "",
            password: "",
            association_attempts: 10,
            association_poll_ms: 1_000,
        }
    }
}

/// MQTT topics that readings and diagnostics are published to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    /// Temperature in degrees Celsius, one decimal
    pub temperature: &'static str,

    /// Supply voltage in volts, two decimals
    pub supply_voltage: &'static str,

    /// Packed error record in hex, only published when non-zero
    pub error_record: &'static str,

    /// Last watchdog checkpoint in hex, only published when non-zero
    pub checkpoint: &'static str,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            temperature: "sensors/home/BadgerW/P/C1/temperature_C",
            supply_voltage: "sensors/home/BadgerW/P/C1/vsys",
            error_record: "sensors/home/BadgerW/P/C1/last_error",
            checkpoint: "sensors/home/BadgerW/P/C1/feeder",
        }
    }
}

/// Pauses around the broker disconnect, giving the radio time to drain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SettleDelays {
    /// After publishing, before the broker disconnect
    pub before_disconnect_ms: u32,

    /// After the broker disconnect, before the network teardown
    pub after_disconnect_ms: u32,

    /// After the network teardown
    pub after_network_down_ms: u32,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            before_disconnect_ms: 750,
            after_disconnect_ms: 500,
            after_network_down_ms: 750,
        }
    }
}

/// All settings of the node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeConfig {
    /// WiFi settings
    pub network: NetworkConfig,

    /// Published topics
    pub topics: Topics,

    /// Offset of local time from UTC, used for the on-screen clock
    pub utc_offset_seconds: i32,

    /// Time between cycles
    pub sleep_minutes: u8,

    /// Pause before a deliberate restart, and after a watchdog reset
    pub cooldown_ms: u32,

    /// Hardware watchdog timeout
    pub watchdog_timeout_ms: u32,

    /// Pauses around the broker disconnect
    pub settle: SettleDelays,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            topics: Topics::default(),
            utc_offset_seconds: 0,
            sleep_minutes: 1,
            cooldown_ms: 60_000,
            watchdog_timeout_ms: 8_388,
            settle: SettleDelays::default(),
        }
    }
}
