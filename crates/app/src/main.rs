#![no_std]
#![no_main]

extern crate alloc;

use core::cell::RefCell;

use embedded_hal_bus::i2c::RefCellDevice;
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_alloc::heap_allocator;
use esp_backtrace as _;
use esp_hal::{
    analog::adc::{Adc, AdcConfig, Attenuation},
    delay::Delay,
    gpio::{GpioPin, Input, Level, Output, Pull},
    i2c::master::{Config as I2cConfig, I2c},
    prelude::*,
    reset,
    rng::Rng,
    rtc_cntl::Rtc,
    spi::master::{Config as SpiConfig, Spi},
    time::{self, Duration},
    timer::timg::TimerGroup,
    Blocking,
};
use esp_storage::FlashStorage;
use esp_wifi::wifi::{utils::create_network_interface, WifiStaDevice};
use esp_wifi::EspWifiController;
use log::{error, info};
use smoltcp::{
    iface::{SocketSet, SocketStorage},
    wire::DhcpOption,
};
use static_cell::StaticCell;
use temperature_node_core::drivers::{mcp9808, Mcp9808, Pcf85063a};
use temperature_node_core::storage::FlashSlots;
use temperature_node_core::{Devices, Hardware, Session};
use thiserror::Error;

mod board;
use board::{PowerLatch, RtcWatchdog, SupplyAdc, SystemClock};

mod broker;
use broker::MqttBroker;

mod config;

mod epd;
use epd::Uc8151;

mod logging;
use logging::setup as setup_logging;

mod wifi;
use wifi::{BrokerSocket, WifiNetwork, WifiStack};

// Application flow
// - Startup. Either the backup clock alarm closed the power latch, a button was pressed,
//   or the watchdog reset the processor.
// - Hold the power latch, then hand everything to the session. The session interprets the
//   reset, then loops: synchronize the clocks, measure, decide, report, persist, sleep.
// - Sleeping releases the power latch. On battery that is the end of this run. On external
//   power the session keeps polling the buttons until the next cycle is due.

// Physical pin connections
// -----------------------------------
// GPIO6 / GPIO7   = i2c bus (SDA / SCL) for the MCP9808 and the PCF85063A
// GPIO21 / GPIO20 = spi bus (SCK / MOSI) for the e-paper panel
// GPIO18          = panel chip select
// GPIO22 / GPIO23 = panel data-command / reset
// GPIO15          = panel busy
// GPIO2           = supply voltage divider (ADC1)
// GPIO3           = supply voltage divider enable
// GPIO10          = power latch
// GPIO4 / GPIO5   = wake buttons

// CONSTANTS

/// Size of heap for dynamically-allocated memory
const HEAP_MEMORY_SIZE: usize = 72 * 1024;

/// Start of the flash region that holds the state slots, the default `nvs` partition
const STATE_FLASH_OFFSET: u32 = 0x9000;

/// One erase sector per slot
const STATE_SLOT_SIZE: u32 = 0x1000;

/// Size of each of the broker socket buffers
const SOCKET_BUFFER_SIZE: usize = 1536;

static I2C_BUS: StaticCell<RefCell<I2c<'static, Blocking>>> = StaticCell::new();
static WIFI_CONTROLLER: StaticCell<EspWifiController<'static>> = StaticCell::new();
static SOCKET_STORAGE: StaticCell<[SocketStorage<'static>; 3]> = StaticCell::new();
static NETWORK_STACK: StaticCell<WifiStack> = StaticCell::new();
static BROKER_RX_BUFFER: StaticCell<[u8; SOCKET_BUFFER_SIZE]> = StaticCell::new();
static BROKER_TX_BUFFER: StaticCell<[u8; SOCKET_BUFFER_SIZE]> = StaticCell::new();

type SharedI2c = RefCellDevice<'static, I2c<'static, Blocking>>;
type PanelSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>;

/// The peripherals of the node
struct Board;

impl Hardware for Board {
    type Display = Uc8151<PanelSpi, Input<'static>, Output<'static>, Output<'static>, Delay>;
    type Sensor = Mcp9808<SharedI2c>;
    type Supply = SupplyAdc<GpioPin<2>, ()>;
    type BackupClock = Pcf85063a<SharedI2c>;
    type PrimaryClock = SystemClock;
    type Network = WifiNetwork;
    type Broker = MqttBroker;
    type Watchdog = RtcWatchdog;
    type Storage = FlashSlots<FlashStorage>;
    type Power = PowerLatch;
    type Delay = Delay;
}

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The build time configuration is invalid
    #[error("The configuration is invalid: {0}")]
    Configuration(config::Error),

    /// Indicates that a bus or pin could not be configured
    #[error("Failed to configure the {0} peripheral.")]
    PeripheralConfiguration(&'static str),

    /// Indicates that we couldn't initialize the onboard wifi device.
    #[error("Failed to initialize the onboard Wifi device.")]
    FailedToInitializeWifiDevice,

    /// The temperature sensor did not identify itself
    #[error("Failed to initialize the temperature sensor.")]
    FailedToInitializeSensor,

    /// The backup clock did not respond
    #[error("Failed to initialize the backup clock.")]
    FailedToInitializeBackupClock,

    /// The state storage region does not fit into the flash
    #[error("Failed to initialize the state storage.")]
    FailedToInitializeStorage,

    /// The persisted state could not be loaded or initialized
    #[error("Failed to load the persisted state.")]
    FailedToLoadState,
}

#[entry]
fn main() -> ! {
    if let Err(error) = setup_logging() {
        esp_println::println!("{error}");
    }

    if let Err(error) = main_fallible() {
        error!("Error while running firmware: {error:?}");
    }

    let deadline = time::now() + Duration::secs(10);
    let delay = Delay::new();
    while time::now() < deadline {
        // Reset the device here because we are in an error state
        let diff = deadline - time::now();
        info!("Resetting device in: {} seconds", diff.to_secs());
        delay.delay_millis(1000);
    }

    reset::software_reset();

    loop {
        // Trick the compiler into thinking we're still here ...
    }
}

/// Sets up the peripherals and hands them to the session, which never returns.
fn main_fallible() -> Result<(), Error> {
    let peripherals = esp_hal::init({
        let mut config = esp_hal::Config::default();
        config.cpu_clock = CpuClock::max();
        config
    });

    heap_allocator!(HEAP_MEMORY_SIZE);

    let config = config::load().map_err(Error::Configuration)?;

    // Hold the power on before anything else
    let power = PowerLatch::new(
        Output::new(peripherals.GPIO10, Level::High),
        [
            Input::new(peripherals.GPIO4, Pull::Down),
            Input::new(peripherals.GPIO5, Pull::Down),
        ],
    );

    let watchdog = RtcWatchdog::new(
        Rtc::new(peripherals.LPWR),
        config.node.watchdog_timeout_ms,
    );

    //
    // I2C devices
    //

    let i2c = I2c::new(peripherals.I2C0, I2cConfig::default())
        .map_err(|_| Error::PeripheralConfiguration("I2C"))?
        .with_sda(peripherals.GPIO6)
        .with_scl(peripherals.GPIO7);
    let i2c_bus: &'static RefCell<_> = I2C_BUS.init(RefCell::new(i2c));

    let sensor = Mcp9808::new(RefCellDevice::new(i2c_bus), mcp9808::DEFAULT_ADDRESS).map_err(
        |error| {
            error!("Temperature sensor: {error:?}");
            Error::FailedToInitializeSensor
        },
    )?;

    let backup_clock = Pcf85063a::new(RefCellDevice::new(i2c_bus)).map_err(|error| {
        error!("Backup clock: {error:?}");
        Error::FailedToInitializeBackupClock
    })?;

    //
    // Display
    //

    let spi = Spi::new(peripherals.SPI2, SpiConfig::default())
        .map_err(|_| Error::PeripheralConfiguration("SPI"))?
        .with_sck(peripherals.GPIO21)
        .with_mosi(peripherals.GPIO20);
    let panel_spi = ExclusiveDevice::new(
        spi,
        Output::new(peripherals.GPIO18, Level::High),
        Delay::new(),
    )
    .map_err(|_| Error::PeripheralConfiguration("panel chip select"))?;
    let display = Uc8151::new(
        panel_spi,
        Input::new(peripherals.GPIO15, Pull::None),
        Output::new(peripherals.GPIO22, Level::Low),
        Output::new(peripherals.GPIO23, Level::High),
        Delay::new(),
    );

    //
    // Supply voltage
    //

    let mut adc_config = AdcConfig::new();
    let supply_pin = adc_config.enable_pin(peripherals.GPIO2, Attenuation::_11dB);
    let supply = SupplyAdc::new(
        Adc::new(peripherals.ADC1, adc_config),
        supply_pin,
        Output::new(peripherals.GPIO3, Level::Low),
    );

    //
    // Wifi
    //

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let mut rng = Rng::new(peripherals.RNG);
    let random_value = rng.random();

    let wifi_controller = esp_wifi::init(timg0.timer0, rng, peripherals.RADIO_CLK)
        .map_err(|_| Error::FailedToInitializeWifiDevice)?;
    let wifi_controller = WIFI_CONTROLLER.init(wifi_controller);

    let (iface, device, controller) =
        create_network_interface(wifi_controller, peripherals.WIFI, WifiStaDevice)
            .map_err(|_| Error::FailedToInitializeWifiDevice)?;

    let socket_storage = SOCKET_STORAGE.init(Default::default());
    let mut socket_set = SocketSet::new(&mut socket_storage[..]);
    let mut dhcp_socket = smoltcp::socket::dhcpv4::Socket::new();

    // we can set a hostname here (or add other DHCP options. See: https://en.wikipedia.org/wiki/Dynamic_Host_Configuration_Protocol#Options)
    dhcp_socket.set_outgoing_options(&[DhcpOption {
        kind: 12, // DHCP option 12 sets the hostname
        data: config::DHCP_HOST_NAME,
    }]);
    socket_set.add(dhcp_socket);

    let now = || time::now().duration_since_epoch().to_millis();
    let stack: &'static WifiStack =
        NETWORK_STACK.init(WifiStack::new(iface, device, socket_set, now, random_value));

    let network = WifiNetwork::new(controller, stack, config.ntp_server);
    let broker_socket = BrokerSocket::new(
        stack,
        BROKER_RX_BUFFER.init([0; SOCKET_BUFFER_SIZE]),
        BROKER_TX_BUFFER.init([0; SOCKET_BUFFER_SIZE]),
        config.broker.address,
        config.broker.port,
    );
    let broker = MqttBroker::new(
        broker_socket,
        config.broker.client_id,
        config.broker.credentials,
    );

    //
    // State
    //

    let storage = FlashSlots::new(FlashStorage::new(), STATE_FLASH_OFFSET, STATE_SLOT_SIZE)
        .map_err(|error| {
            error!("State storage: {error:?}");
            Error::FailedToInitializeStorage
        })?;

    let devices = Devices::<Board> {
        display,
        sensor,
        supply,
        backup_clock,
        primary_clock: SystemClock::default(),
        network,
        broker,
        watchdog,
        power,
        delay: Delay::new(),
    };

    let session = Session::boot(devices, storage, config.node).map_err(|error| {
        error!("{error}");
        Error::FailedToLoadState
    })?;

    session.run()
}
