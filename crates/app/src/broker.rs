//! The connection to the message broker: an MQTT v5 client over the broker socket.
//!
//! The client is async, the rest of the firmware is not. Every call runs to completion on
//! the blocking socket, so the futures are driven with `block_on`.

use blocking_network_stack::IoError;
use embassy_futures::block_on;
use log::{debug, info, warn};
use rust_mqtt::{
    client::{
        client::MqttClient,
        client_config::{ClientConfig, MqttVersion},
    },
    packet::v5::{publish_packet::QualityOfService, reason_codes::ReasonCode},
    utils::rng_generator::CountingRng,
};
use temperature_node_core::devices::MessageBroker;
use thiserror::Error;

use crate::wifi::BrokerSocket;

/// Size of the MQTT packet buffers
const BUFFER_SIZE: usize = 512;

/// Properties the client may attach to a packet
const MAX_PROPERTIES: usize = 5;

/// Keep-alive announced to the broker
const KEEP_ALIVE_SECONDS: u16 = 60;

/// User name and password sent when connecting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub user: &'static str,
    pub password: &'static str,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The TCP connection to the broker failed
    #[error("The connection to the broker failed: {0:?}")]
    Socket(IoError),

    /// The broker or the client reported an error
    #[error("MQTT error: {0:?}")]
    Mqtt(ReasonCode),

    /// A publish was attempted without a connection
    #[error("Not connected to the broker.")]
    NotConnected,
}

/// Publishes the readings over MQTT
pub struct MqttBroker {
    socket: BrokerSocket,
    client_id: &'static str,
    credentials: Option<Credentials>,
    tx_buffer: [u8; BUFFER_SIZE],
    rx_buffer: [u8; BUFFER_SIZE],
    connected: bool,
}

impl MqttBroker {
    pub fn new(
        socket: BrokerSocket,
        client_id: &'static str,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            socket,
            client_id,
            credentials,
            tx_buffer: [0; BUFFER_SIZE],
            rx_buffer: [0; BUFFER_SIZE],
            connected: false,
        }
    }

    /// A client over the socket. Publishing at QoS 0 keeps no session state in the client,
    /// so one is built for every exchange.
    fn client(&mut self) -> MqttClient<'_, &mut BrokerSocket, MAX_PROPERTIES, CountingRng> {
        let mut config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20000));
        config.add_client_id(self.client_id);
        if let Some(credentials) = self.credentials {
            config.add_username(credentials.user);
            config.add_password(credentials.password);
        }
        config.keep_alive = KEEP_ALIVE_SECONDS;
        config.max_packet_size = BUFFER_SIZE as u32;

        MqttClient::<_, MAX_PROPERTIES, _>::new(
            &mut self.socket,
            &mut self.tx_buffer,
            BUFFER_SIZE,
            &mut self.rx_buffer,
            BUFFER_SIZE,
            config,
        )
    }
}

impl MessageBroker for MqttBroker {
    type Error = BrokerError;

    fn connect(&mut self) -> Result<(), Self::Error> {
        self.socket.open().map_err(BrokerError::Socket)?;

        let result = block_on(self.client().connect_to_broker());
        if let Err(code) = result {
            warn!("MQTT connect error: {code:?}");
            self.socket.close();
            return Err(BrokerError::Mqtt(code));
        }

        info!("Connected to the MQTT broker as {}", self.client_id);
        self.connected = true;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }

        let result = block_on(self.client().send_message(
            topic,
            payload,
            QualityOfService::QoS0,
            false,
        ));
        match result {
            Ok(()) | Err(ReasonCode::NoMatchingSubscribers) => {
                debug!("Published {} bytes to {topic}", payload.len());
                Ok(())
            }
            Err(code) => Err(BrokerError::Mqtt(code)),
        }
    }

    fn disconnect(&mut self) -> Result<(), Self::Error> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        let result = block_on(self.client().disconnect()).map_err(BrokerError::Mqtt);
        if let Err(error) = &result {
            warn!("MQTT disconnect error: {error:?}");
        }
        self.socket.close();
        result
    }
}
