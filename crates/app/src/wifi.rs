//! The WiFi interface and the sockets that run over it.
//!
//! The radio, the network stack and the sockets all use the blocking stack. DHCP runs
//! whenever the stack is worked, which happens while polling the link status.

use core::cell::RefCell;
use core::net::{IpAddr, Ipv4Addr, SocketAddr};

use blocking_network_stack::{IoError, Socket, Stack, UdpSocket};
use embedded_io::{Read as _, Write as _};
use esp_hal::time::{now, Duration};
use esp_wifi::wifi::{
    ClientConfiguration, Configuration, WifiController, WifiDevice, WifiError, WifiStaDevice,
};
use log::{debug, info, warn};
use smoltcp::wire::IpAddress;
use sntpc::{NtpContext, NtpTimestampGenerator, NtpUdpSocket};
use temperature_node_core::devices::{LinkStatus, NetworkInterface};
use thiserror::Error;
use time::{OffsetDateTime, PrimitiveDateTime};

/// The network stack over the station interface
pub type WifiStack = Stack<'static, WifiDevice<'static, WifiStaDevice>>;

const NTP_PORT: u16 = 123;

/// Local port for the NTP exchange
const NTP_LOCAL_PORT: u16 = 50_123;

/// How long to wait for the NTP reply
const NTP_TIMEOUT: Duration = Duration::secs(5);

/// Error within the WiFi interface
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The SSID does not fit into the client configuration
    #[error("The provided Wifi SSID is not a valid string.")]
    InvalidWifiSsid,

    /// The password does not fit into the client configuration
    #[error("The provided Wifi password is not a valid string.")]
    InvalidWifiPassword,

    /// Error from the WiFi controller
    #[error("An error occured with the Wifi: {0:?}")]
    Wifi(WifiError),

    #[error("Failed to bind the UDP socket: {0:?}")]
    UdpBind(IoError),

    #[error("Invalid NTP time: {0:?}")]
    InvalidNtpTime(sntpc::Error),

    /// The NTP server answered with a time that cannot be represented
    #[error("The NTP time is out of range.")]
    TimeOutOfRange,
}

impl From<WifiError> for NetworkError {
    fn from(error: WifiError) -> Self {
        NetworkError::Wifi(error)
    }
}

impl From<sntpc::Error> for NetworkError {
    fn from(error: sntpc::Error) -> Self {
        NetworkError::InvalidNtpTime(error)
    }
}

/// The station interface of the ESP32
pub struct WifiNetwork {
    controller: WifiController<'static>,
    stack: &'static WifiStack,
    ntp_server: Ipv4Addr,
    started: bool,
}

impl WifiNetwork {
    pub fn new(
        controller: WifiController<'static>,
        stack: &'static WifiStack,
        ntp_server: Ipv4Addr,
    ) -> Self {
        Self {
            controller,
            stack,
            ntp_server,
            started: false,
        }
    }
}

impl NetworkInterface for WifiNetwork {
    type Error = NetworkError;

    fn activate(&mut self, ssid: &str, password: &str) -> Result<(), Self::Error> {
        let client_config = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| NetworkError::InvalidWifiSsid)?,
            password: password
                .try_into()
                .map_err(|_| NetworkError::InvalidWifiPassword)?,
            ..Default::default()
        });

        self.controller.set_configuration(&client_config)?;
        self.controller.start()?;
        self.started = true;
        debug!("Wifi started, connecting to {ssid}");

        self.controller.connect()?;
        Ok(())
    }

    fn status(&mut self) -> LinkStatus {
        if !self.started {
            return LinkStatus::Down;
        }

        // DHCP only makes progress while the stack is worked
        self.stack.work();
        match self.controller.is_connected() {
            Ok(true) if self.stack.is_iface_up() => LinkStatus::Up,
            Ok(true) => LinkStatus::AwaitingAddress,
            Ok(false) => LinkStatus::Joining,
            Err(WifiError::Disconnected) => LinkStatus::NoNetwork,
            Err(error) => {
                warn!("Wifi status error: {error:?}");
                LinkStatus::Failed
            }
        }
    }

    fn fetch_time(&mut self) -> Result<PrimitiveDateTime, Self::Error> {
        let mut rx_meta = [smoltcp::socket::udp::PacketMetadata::EMPTY; 4];
        let mut rx_buffer = [0_u8; 256];
        let mut tx_meta = [smoltcp::socket::udp::PacketMetadata::EMPTY; 4];
        let mut tx_buffer = [0_u8; 256];

        let mut socket =
            self.stack
                .get_udp_socket(&mut rx_meta, &mut rx_buffer, &mut tx_meta, &mut tx_buffer);
        socket.bind(NTP_LOCAL_PORT).map_err(NetworkError::UdpBind)?;

        let socket = NtpSocket {
            socket: RefCell::new(socket),
        };
        let context = NtpContext::new(Timestamp::default());
        let server = SocketAddr::new(IpAddr::V4(self.ntp_server), NTP_PORT);

        let result = sntpc::sync::get_time(server, &socket, context)?;
        info!("Time: {:?}", result);

        let utc = OffsetDateTime::from_unix_timestamp(i64::from(result.seconds))
            .map_err(|_| NetworkError::TimeOutOfRange)?;
        Ok(PrimitiveDateTime::new(utc.date(), utc.time()))
    }

    fn deactivate(&mut self) -> Result<(), Self::Error> {
        if !self.started {
            return Ok(());
        }

        if matches!(self.controller.is_connected(), Ok(true)) {
            self.controller.disconnect()?;
        }
        self.controller.stop()?;
        self.started = false;

        debug!("Wifi stopped");
        Ok(())
    }
}

/// Timestamps for the NTP exchange, taken from the time since boot
#[derive(Copy, Clone, Default)]
struct Timestamp {
    micros: u64,
}

impl NtpTimestampGenerator for Timestamp {
    fn init(&mut self) {
        self.micros = now().ticks();
    }

    fn timestamp_sec(&self) -> u64 {
        self.micros / 1_000_000
    }

    fn timestamp_subsec_micros(&self) -> u32 {
        (self.micros % 1_000_000) as u32
    }
}

/// Adapts the blocking UDP socket to the NTP client
struct NtpSocket<'s, 'n> {
    socket: RefCell<UdpSocket<'s, 'n, WifiDevice<'static, WifiStaDevice>>>,
}

impl NtpUdpSocket for NtpSocket<'_, '_> {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, sntpc::Error> {
        let IpAddr::V4(address) = addr.ip() else {
            return Err(sntpc::Error::Network);
        };

        self.socket
            .borrow_mut()
            .send(IpAddress::Ipv4(address), addr.port(), buf)
            .map_err(|_| sntpc::Error::Network)?;
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), sntpc::Error> {
        let deadline = now() + NTP_TIMEOUT;
        let mut socket = self.socket.borrow_mut();

        while now() < deadline {
            socket.work();
            if let Ok((len, IpAddress::Ipv4(address), port)) = socket.receive(buf) {
                return Ok((len, SocketAddr::new(IpAddr::V4(address), port)));
            }
        }

        Err(sntpc::Error::Network)
    }
}

/// A TCP connection to the broker over the WiFi stack
pub struct BrokerSocket {
    socket: Socket<'static, 'static, WifiDevice<'static, WifiStaDevice>>,
    address: Ipv4Addr,
    port: u16,
}

impl BrokerSocket {
    pub fn new(
        stack: &'static WifiStack,
        rx_buffer: &'static mut [u8],
        tx_buffer: &'static mut [u8],
        address: Ipv4Addr,
        port: u16,
    ) -> Self {
        Self {
            socket: stack.get_socket(rx_buffer, tx_buffer),
            address,
            port,
        }
    }
}

impl BrokerSocket {
    /// Open the TCP connection to the broker
    pub fn open(&mut self) -> Result<(), IoError> {
        self.socket.work();
        self.socket.open(IpAddress::Ipv4(self.address), self.port)?;
        debug!("Connected to {}:{}", self.address, self.port);
        Ok(())
    }

    /// Close the connection. Errors are not interesting at this point.
    pub fn close(&mut self) {
        self.socket.disconnect();

        // Give the stack a moment to send the FIN
        let deadline = now() + Duration::millis(100);
        while now() < deadline {
            self.socket.work();
        }
    }
}

impl embedded_io_async::ErrorType for BrokerSocket {
    type Error = IoError;
}

// The blocking socket finishes each call before returning, so these futures are ready
// the first time they are polled.
impl embedded_io_async::Read for BrokerSocket {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.socket.read(buf)
    }
}

impl embedded_io_async::Write for BrokerSocket {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.socket.write(buf)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket.flush()
    }
}
