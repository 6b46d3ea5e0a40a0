//! Interfaces to the hardware the node drives.
//!
//! Each trait is a narrow view of one collaborator. The firmware implements them on top of
//! the real peripherals, tests implement them with recording mocks.

use core::fmt::Debug;

use embedded_hal::delay::DelayNs;
use time::PrimitiveDateTime;
use uom::si::f32::ElectricPotential as Voltage;
use uom::si::f64::ThermodynamicTemperature as Temperature;

use crate::storage::StateStorage;
use crate::watchdog::WatchdogTimer;

/// Refresh speed of the e-ink panel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdateSpeed {
    /// Full refresh with the cleanest image
    Normal,
    /// Faster refresh with some ghosting
    #[default]
    Medium,
    /// Fastest refresh
    Fast,
}

/// Pen colour for the following drawing operations
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Pen {
    /// Paper colour
    White,
    /// Ink colour
    #[default]
    Black,
}

/// Drawing parameters applied to subsequent display operations
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawingParams {
    /// Refresh speed for the next [`Display::update`]
    pub speed: UpdateSpeed,

    /// Pen for the next clear or text operation
    pub pen: Pen,
}

/// An e-ink panel with a text-only drawing interface
pub trait Display {
    type Error: Debug;

    /// Width and height of the panel in pixels
    fn size(&self) -> (u32, u32);

    /// Set pen and refresh speed
    fn set_drawing_params(&mut self, params: DrawingParams);

    /// Fill the frame buffer with the current pen
    fn clear(&mut self) -> Result<(), Self::Error>;

    /// Draw text with its top left corner at `(x, y)`, clipped to `bound_width` pixels
    fn draw_text(
        &mut self,
        content: &str,
        x: i32,
        y: i32,
        bound_width: u32,
        size: u8,
    ) -> Result<(), Self::Error>;

    /// Width in pixels of the given text at the given size
    fn measure_text(&self, content: &str, size: u8) -> u32;

    /// Push the frame buffer to the panel
    fn update(&mut self) -> Result<(), Self::Error>;
}

/// The temperature sensor
pub trait TemperatureSensor {
    type Error: Debug;

    fn read(&mut self) -> Result<Temperature, Self::Error>;
}

/// Measures the supply voltage.
///
/// The measurement shares a pin with the radio, so it is only valid while the network
/// interface is down.
pub trait SupplyMonitor {
    type Error: Debug;

    fn read(&mut self) -> Result<Voltage, Self::Error>;
}

/// The battery backed real time clock that wakes the node up
pub trait BackupClock {
    type Error: Debug;

    fn read_datetime(&mut self) -> Result<PrimitiveDateTime, Self::Error>;

    fn write_datetime(&mut self, datetime: PrimitiveDateTime) -> Result<(), Self::Error>;

    /// Program the alarm to fire at the given second, minute and hour of the day
    fn set_alarm(&mut self, second: u8, minute: u8, hour: u8) -> Result<(), Self::Error>;

    fn clear_alarm_flag(&mut self) -> Result<(), Self::Error>;

    fn enable_alarm_interrupt(&mut self, enable: bool) -> Result<(), Self::Error>;

    /// Read the battery backed scratch byte
    fn get_byte(&mut self) -> Result<u8, Self::Error>;

    /// Write the battery backed scratch byte
    fn set_byte(&mut self, value: u8) -> Result<(), Self::Error>;
}

/// The processor's own clock, which does not survive power down
pub trait PrimaryClock {
    type Error: Debug;

    /// Current UTC time
    fn now(&self) -> PrimitiveDateTime;

    fn set(&mut self, datetime: PrimitiveDateTime) -> Result<(), Self::Error>;
}

/// Association state of the network interface
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    /// Not associated
    Down,
    /// Association in progress
    Joining,
    /// Associated, waiting for an address
    AwaitingAddress,
    /// Associated and addressed
    Up,
    /// Association failed
    Failed,
    /// The network was not found
    NoNetwork,
    /// The network rejected the credentials
    BadAuth,
}

impl LinkStatus {
    /// Returns true if waiting longer cannot change the outcome
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Down | Self::Joining | Self::AwaitingAddress)
    }
}

/// The WiFi interface
pub trait NetworkInterface {
    type Error: Debug;

    /// Power up the radio and start associating
    fn activate(&mut self, ssid: &str, password: &str) -> Result<(), Self::Error>;

    fn status(&mut self) -> LinkStatus;

    /// Fetch the current UTC time from the network
    fn fetch_time(&mut self) -> Result<PrimitiveDateTime, Self::Error>;

    /// Disassociate and power down the radio
    fn deactivate(&mut self) -> Result<(), Self::Error>;
}

/// A connection to the message broker
pub trait MessageBroker {
    type Error: Debug;

    fn connect(&mut self) -> Result<(), Self::Error>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error>;

    fn disconnect(&mut self) -> Result<(), Self::Error>;
}

/// Board level power control
pub trait PowerControl {
    /// Cut power to everything but the backup clock.
    ///
    /// Does not return when running from battery. Returns when the board is powered
    /// externally and cannot switch itself off.
    fn power_off(&mut self);

    /// Returns true if the user asked for an early wake up, e.g. by pressing a button
    fn wake_requested(&mut self) -> bool;

    /// Reset the processor
    fn restart(&mut self) -> !;
}

/// The set of collaborators a [`Session`](crate::Session) drives
pub trait Hardware {
    type Display: Display;
    type Sensor: TemperatureSensor;
    type Supply: SupplyMonitor;
    type BackupClock: BackupClock;
    type PrimaryClock: PrimaryClock;
    type Network: NetworkInterface;
    type Broker: MessageBroker;
    type Watchdog: WatchdogTimer;
    type Storage: StateStorage;
    type Power: PowerControl;
    type Delay: DelayNs;
}

/// Owned instances of every collaborator
pub struct Devices<H: Hardware> {
    pub display: H::Display,
    pub sensor: H::Sensor,
    pub supply: H::Supply,
    pub backup_clock: H::BackupClock,
    pub primary_clock: H::PrimaryClock,
    pub network: H::Network,
    pub broker: H::Broker,
    pub watchdog: H::Watchdog,
    pub power: H::Power,
    pub delay: H::Delay,
}
