//! Recording stand-ins for the hardware, shared through a single [`World`].

use std::cell::RefCell;
use std::rc::Rc;
use std::string::String;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use time::macros::datetime;
use time::PrimitiveDateTime;
use uom::si::electric_potential::volt;
use uom::si::f32::ElectricPotential as Voltage;
use uom::si::f64::ThermodynamicTemperature as Temperature;
use uom::si::thermodynamic_temperature::degree_celsius;

use crate::checkpoint::ResetReason;
use crate::devices::{
    BackupClock, Devices, Display, DrawingParams, Hardware, LinkStatus, MessageBroker,
    NetworkInterface, PowerControl, PrimaryClock, SupplyMonitor, TemperatureSensor,
};
use crate::storage::StateStorage;
use crate::watchdog::WatchdogTimer;

pub type Shared = Rc<RefCell<World>>;

/// Error returned by every failing mock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockError;

/// Observable side effects, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    WatchdogEnable,
    WatchdogDisable,
    WatchdogFeed,
    Checkpoint(u8),
    StateWrite,
    SupplyRead,
    NetworkActivate,
    NetworkDeactivate,
    TimeFetch,
    BrokerConnect,
    Publish(String, String),
    BrokerDisconnect,
    DisplayUpdate,
    AlarmSet(u8, u8, u8),
    PowerOff,
    Delay(u32),
}

/// Everything the mocks know, plus the switches that make them fail
pub struct World {
    pub events: Vec<Event>,

    pub reset_reason: ResetReason,
    pub watchdog_enabled: bool,
    pub feeds: u32,

    pub backup_time: PrimitiveDateTime,
    pub backup_clock_fails: bool,
    pub backup_reads: u32,
    pub scratch: u8,
    pub alarm: Option<(u8, u8, u8)>,
    pub alarm_interrupt: bool,
    pub alarm_flag_cleared: bool,

    pub primary_time: PrimitiveDateTime,

    pub temperature: f64,
    pub sensor_fails: bool,
    pub supply_volts: f32,

    pub network_up: bool,
    pub link_statuses: Vec<LinkStatus>,
    pub network_time: PrimitiveDateTime,
    pub activate_fails: bool,
    pub fetch_fails: bool,
    pub deactivate_fails: bool,

    pub broker_connected: bool,
    pub connect_fails: bool,
    pub publish_fails: bool,
    pub disconnect_fails: bool,
    pub published: Vec<(String, String)>,

    pub drawn: Vec<(String, i32, i32, u8)>,
    pub params: Vec<DrawingParams>,
    pub display_fails: bool,

    pub stored: Option<Vec<u8>>,
    pub storage_read_fails: bool,
    pub storage_write_fails: bool,

    pub wake_after_polls: Option<u32>,
    pub wake_polls: u32,

    pub elapsed_ms: u64,
}

impl World {
    pub fn shared() -> Shared {
        Rc::new(RefCell::new(Self {
            events: Vec::new(),
            reset_reason: ResetReason::PowerOn,
            watchdog_enabled: false,
            feeds: 0,
            backup_time: datetime!(2024-03-09 14:27:31),
            backup_clock_fails: false,
            backup_reads: 0,
            scratch: 0,
            alarm: None,
            alarm_interrupt: false,
            alarm_flag_cleared: false,
            primary_time: datetime!(2000-01-01 00:00:00),
            temperature: 20.0,
            sensor_fails: false,
            supply_volts: 4.12,
            network_up: false,
            link_statuses: vec![LinkStatus::Joining, LinkStatus::Up],
            network_time: datetime!(2024-03-09 14:27:45),
            activate_fails: false,
            fetch_fails: false,
            deactivate_fails: false,
            broker_connected: false,
            connect_fails: false,
            publish_fails: false,
            disconnect_fails: false,
            published: Vec::new(),
            drawn: Vec::new(),
            params: Vec::new(),
            display_fails: false,
            stored: None,
            storage_read_fails: false,
            storage_write_fails: false,
            wake_after_polls: None,
            wake_polls: 0,
            elapsed_ms: 0,
        }))
    }

    pub fn watchdog(world: &Shared) -> MockWatchdog {
        MockWatchdog(world.clone())
    }

    pub fn backup_clock(world: &Shared) -> MockBackupClock {
        MockBackupClock(world.clone())
    }

    pub fn storage(world: &Shared) -> MockStorage {
        MockStorage(world.clone())
    }

    pub fn devices(world: &Shared) -> Devices<MockHardware> {
        Devices {
            display: MockDisplay(world.clone()),
            sensor: MockSensor(world.clone()),
            supply: MockSupply(world.clone()),
            backup_clock: MockBackupClock(world.clone()),
            primary_clock: MockPrimaryClock(world.clone()),
            network: MockNetwork(world.clone()),
            broker: MockBroker(world.clone()),
            watchdog: MockWatchdog(world.clone()),
            power: MockPower(world.clone()),
            delay: MockDelay(world.clone()),
        }
    }

    /// Index of the first event equal to `event`
    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events.iter().position(|e| e == event)
    }

    /// Topics published, in order
    pub fn topics(&self) -> Vec<&str> {
        self.published.iter().map(|(t, _)| t.as_str()).collect()
    }

    /// The checkpoint tags written, in order
    pub fn checkpoints(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Checkpoint(tag) => Some(*tag),
                _ => None,
            })
            .collect()
    }

    fn push(&mut self, event: Event) {
        self.events.push(event);
    }
}

pub struct MockHardware;

impl Hardware for MockHardware {
    type Display = MockDisplay;
    type Sensor = MockSensor;
    type Supply = MockSupply;
    type BackupClock = MockBackupClock;
    type PrimaryClock = MockPrimaryClock;
    type Network = MockNetwork;
    type Broker = MockBroker;
    type Watchdog = MockWatchdog;
    type Storage = MockStorage;
    type Power = MockPower;
    type Delay = MockDelay;
}

pub struct MockWatchdog(Shared);

impl WatchdogTimer for MockWatchdog {
    fn enable(&mut self) {
        let mut world = self.0.borrow_mut();
        world.watchdog_enabled = true;
        world.push(Event::WatchdogEnable);
    }

    fn disable(&mut self) {
        let mut world = self.0.borrow_mut();
        world.watchdog_enabled = false;
        world.push(Event::WatchdogDisable);
    }

    fn feed(&mut self) {
        let mut world = self.0.borrow_mut();
        world.feeds += 1;
        world.push(Event::WatchdogFeed);
    }

    fn reset_reason(&self) -> ResetReason {
        self.0.borrow().reset_reason
    }
}

pub struct MockBackupClock(Shared);

impl MockBackupClock {
    fn check(&self) -> Result<(), MockError> {
        if self.0.borrow().backup_clock_fails {
            Err(MockError)
        } else {
            Ok(())
        }
    }
}

impl BackupClock for MockBackupClock {
    type Error = MockError;

    fn read_datetime(&mut self) -> Result<PrimitiveDateTime, Self::Error> {
        self.0.borrow_mut().backup_reads += 1;
        self.check()?;
        Ok(self.0.borrow().backup_time)
    }

    fn write_datetime(&mut self, datetime: PrimitiveDateTime) -> Result<(), Self::Error> {
        self.check()?;
        self.0.borrow_mut().backup_time = datetime;
        Ok(())
    }

    fn set_alarm(&mut self, second: u8, minute: u8, hour: u8) -> Result<(), Self::Error> {
        self.check()?;
        let mut world = self.0.borrow_mut();
        world.alarm = Some((second, minute, hour));
        world.push(Event::AlarmSet(second, minute, hour));
        Ok(())
    }

    fn clear_alarm_flag(&mut self) -> Result<(), Self::Error> {
        self.check()?;
        self.0.borrow_mut().alarm_flag_cleared = true;
        Ok(())
    }

    fn enable_alarm_interrupt(&mut self, enable: bool) -> Result<(), Self::Error> {
        self.check()?;
        self.0.borrow_mut().alarm_interrupt = enable;
        Ok(())
    }

    fn get_byte(&mut self) -> Result<u8, Self::Error> {
        self.check()?;
        Ok(self.0.borrow().scratch)
    }

    fn set_byte(&mut self, value: u8) -> Result<(), Self::Error> {
        self.check()?;
        let mut world = self.0.borrow_mut();
        world.scratch = value;
        world.push(Event::Checkpoint(value));
        Ok(())
    }
}

pub struct MockPrimaryClock(Shared);

impl PrimaryClock for MockPrimaryClock {
    type Error = MockError;

    fn now(&self) -> PrimitiveDateTime {
        self.0.borrow().primary_time
    }

    fn set(&mut self, datetime: PrimitiveDateTime) -> Result<(), Self::Error> {
        self.0.borrow_mut().primary_time = datetime;
        Ok(())
    }
}

pub struct MockSensor(Shared);

impl TemperatureSensor for MockSensor {
    type Error = MockError;

    fn read(&mut self) -> Result<Temperature, Self::Error> {
        let world = self.0.borrow();
        if world.sensor_fails {
            return Err(MockError);
        }
        Ok(Temperature::new::<degree_celsius>(world.temperature))
    }
}

pub struct MockSupply(Shared);

impl SupplyMonitor for MockSupply {
    type Error = MockError;

    fn read(&mut self) -> Result<Voltage, Self::Error> {
        let mut world = self.0.borrow_mut();
        assert!(
            !world.network_up,
            "The supply voltage must only be read while the network is down"
        );
        world.push(Event::SupplyRead);
        Ok(Voltage::new::<volt>(world.supply_volts))
    }
}

pub struct MockNetwork(Shared);

impl NetworkInterface for MockNetwork {
    type Error = MockError;

    fn activate(&mut self, _ssid: &str, _password: &str) -> Result<(), Self::Error> {
        let mut world = self.0.borrow_mut();
        world.push(Event::NetworkActivate);
        if world.activate_fails {
            return Err(MockError);
        }
        world.network_up = true;
        Ok(())
    }

    fn status(&mut self) -> LinkStatus {
        let mut world = self.0.borrow_mut();
        if world.link_statuses.len() > 1 {
            world.link_statuses.remove(0)
        } else {
            world.link_statuses.first().copied().unwrap_or(LinkStatus::Down)
        }
    }

    fn fetch_time(&mut self) -> Result<PrimitiveDateTime, Self::Error> {
        let mut world = self.0.borrow_mut();
        world.push(Event::TimeFetch);
        if world.fetch_fails {
            return Err(MockError);
        }
        Ok(world.network_time)
    }

    fn deactivate(&mut self) -> Result<(), Self::Error> {
        let mut world = self.0.borrow_mut();
        world.push(Event::NetworkDeactivate);
        if world.deactivate_fails {
            return Err(MockError);
        }
        world.network_up = false;
        Ok(())
    }
}

pub struct MockBroker(Shared);

impl MessageBroker for MockBroker {
    type Error = MockError;

    fn connect(&mut self) -> Result<(), Self::Error> {
        let mut world = self.0.borrow_mut();
        world.push(Event::BrokerConnect);
        if world.connect_fails || !world.network_up {
            return Err(MockError);
        }
        world.broker_connected = true;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        let mut world = self.0.borrow_mut();
        if world.publish_fails || !world.broker_connected {
            return Err(MockError);
        }
        let payload = String::from_utf8(payload.to_vec()).map_err(|_| MockError)?;
        world.push(Event::Publish(topic.into(), payload.clone()));
        world.published.push((topic.into(), payload));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), Self::Error> {
        let mut world = self.0.borrow_mut();
        world.push(Event::BrokerDisconnect);
        world.broker_connected = false;
        if world.disconnect_fails {
            return Err(MockError);
        }
        Ok(())
    }
}

/// A 296 by 128 panel with an 8 pixel wide font per size step
pub struct MockDisplay(Shared);

impl Display for MockDisplay {
    type Error = MockError;

    fn size(&self) -> (u32, u32) {
        (296, 128)
    }

    fn set_drawing_params(&mut self, params: DrawingParams) {
        self.0.borrow_mut().params.push(params);
    }

    fn clear(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().drawn.clear();
        Ok(())
    }

    fn draw_text(
        &mut self,
        content: &str,
        x: i32,
        y: i32,
        _bound_width: u32,
        size: u8,
    ) -> Result<(), Self::Error> {
        self.0.borrow_mut().drawn.push((content.into(), x, y, size));
        Ok(())
    }

    fn measure_text(&self, content: &str, size: u8) -> u32 {
        content.len() as u32 * 8 * u32::from(size)
    }

    fn update(&mut self) -> Result<(), Self::Error> {
        let mut world = self.0.borrow_mut();
        if world.display_fails {
            return Err(MockError);
        }
        world.push(Event::DisplayUpdate);
        Ok(())
    }
}

pub struct MockStorage(Shared);

impl StateStorage for MockStorage {
    type Error = MockError;

    fn read(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        let world = self.0.borrow();
        if world.storage_read_fails {
            return Err(MockError);
        }
        match &world.stored {
            Some(bytes) => {
                buffer[..bytes.len()].copy_from_slice(bytes);
                Ok(Some(bytes.len()))
            }
            None => Ok(None),
        }
    }

    fn write(&mut self, record: &[u8]) -> Result<(), Self::Error> {
        let mut world = self.0.borrow_mut();
        if world.storage_write_fails {
            return Err(MockError);
        }
        world.stored = Some(record.to_vec());
        world.push(Event::StateWrite);
        Ok(())
    }
}

pub struct MockPower(Shared);

impl PowerControl for MockPower {
    fn power_off(&mut self) {
        self.0.borrow_mut().push(Event::PowerOff);
    }

    fn wake_requested(&mut self) -> bool {
        let mut world = self.0.borrow_mut();
        world.wake_polls += 1;
        let polls = world.wake_polls;
        world.wake_after_polls.is_some_and(|after| polls >= after)
    }

    fn restart(&mut self) -> ! {
        panic!("The mock board cannot restart");
    }
}

/// Advances simulated time instead of sleeping. Only millisecond delays are logged.
pub struct MockDelay(Shared);

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().elapsed_ms += u64::from(ns / 1_000_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        let mut world = self.0.borrow_mut();
        world.elapsed_ms += u64::from(ms);
        world.push(Event::Delay(ms));
    }
}

/// Encode a state record the way the store does
pub fn encode(state: &crate::state::PersistedState) -> Vec<u8> {
    let mut buffer = [0_u8; crate::state::RECORD_CAPACITY];
    let length = serde_json_core::to_slice(state, &mut buffer).unwrap();
    buffer[..length].to_vec()
}

/// Decode the stored record
pub fn decode(world: &Shared) -> crate::state::PersistedState {
    let world = world.borrow();
    let bytes = world.stored.as_ref().expect("nothing stored");
    serde_json_core::from_slice(bytes).unwrap().0
}
