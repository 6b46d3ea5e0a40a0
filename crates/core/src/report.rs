//! The report pipeline: supply voltage, display, network and broker.

use core::fmt::{self, Write};

use embedded_hal::delay::DelayNs;
use heapless::String;
use log::{info, warn};
use uom::si::electric_potential::volt;

use crate::checkpoint::Checkpoint;
use crate::devices::{Hardware, MessageBroker, SupplyMonitor};
use crate::error_record::FailureCause;
use crate::render::{render, Readout};
use crate::session::{CycleError, Session};

/// Longest published value
const PAYLOAD_CAPACITY: usize = 16;

type Payload = String<PAYLOAD_CAPACITY>;

impl<H: Hardware> Session<H> {
    /// Show and publish a new reading. Returns the measured supply voltage.
    pub(crate) fn report(&mut self, temperature: f64) -> Result<f32, CycleError> {
        // The supply shares a pin with the radio, read it before the network comes up
        let supply_voltage = match self.supply.read() {
            Ok(voltage) => voltage.get::<volt>(),
            Err(error) => {
                warn!("Could not read the supply voltage: {error:?}");
                return Err(self.fail(FailureCause::SupplyMonitor));
            }
        };
        self.checkpoint(Checkpoint::SupplyRead);

        let readout = Readout {
            temperature,
            supply_voltage,
            error_record: self.store.error_record().pack(),
            watchdog_checkpoint: self.store.watchdog_checkpoint(),
            local_time: self.local_time(),
        };

        let Self {
            display,
            monitor,
            backup_clock,
            ..
        } = &mut *self;
        if let Err(error) = render(display, &readout, |checkpoint| {
            monitor.feed(checkpoint, backup_clock)
        }) {
            warn!("Could not update the display: {error:?}");
            return Err(self.fail(FailureCause::Display));
        }

        self.checkpoint(Checkpoint::ReportNetworkUp);
        self.bring_network_up()?;

        self.checkpoint(Checkpoint::BrokerConnect);
        if let Err(error) = self.broker.connect() {
            warn!("Could not connect to the broker: {error:?}");
            return Err(self.fail(FailureCause::BrokerConnect));
        }

        self.checkpoint(Checkpoint::Publish);
        self.publish(&readout)?;

        self.checkpoint(Checkpoint::BrokerDisconnect);
        self.delay.delay_ms(self.config.settle.before_disconnect_ms);
        if let Err(error) = self.broker.disconnect() {
            warn!("Could not disconnect from the broker: {error:?}");
            return Err(self.fail(FailureCause::BrokerDisconnect));
        }
        self.delay.delay_ms(self.config.settle.after_disconnect_ms);

        self.checkpoint(Checkpoint::ReportNetworkDown);
        self.bring_network_down()?;
        self.delay.delay_ms(self.config.settle.after_network_down_ms);

        info!("Reported {temperature:.1} C at {supply_voltage:.2} V");
        Ok(supply_voltage)
    }

    /// Publish the readings, and the diagnostics if there are any
    fn publish(&mut self, readout: &Readout) -> Result<(), CycleError> {
        let topics = self.config.topics.clone();

        let payload = self.payload(format_args!("{:.1}", readout.temperature))?;
        self.publish_one(topics.temperature, &payload)?;

        let payload = self.payload(format_args!("{:.2}", readout.supply_voltage))?;
        self.publish_one(topics.supply_voltage, &payload)?;

        if readout.error_record != 0 {
            let payload = self.payload(format_args!("{:#x}", readout.error_record))?;
            self.publish_one(topics.error_record, &payload)?;
        }

        if readout.watchdog_checkpoint != 0 {
            let payload = self.payload(format_args!("{:#x}", readout.watchdog_checkpoint))?;
            self.publish_one(topics.checkpoint, &payload)?;
        }
        Ok(())
    }

    /// Format a payload. A value that does not fit fails the publish.
    fn payload(&mut self, args: fmt::Arguments<'_>) -> Result<Payload, CycleError> {
        let mut payload = Payload::new();
        match payload.write_fmt(args) {
            Ok(()) => Ok(payload),
            Err(_) => {
                warn!("Payload does not fit into {PAYLOAD_CAPACITY} bytes: {args}");
                Err(self.fail(FailureCause::BrokerPublish))
            }
        }
    }

    fn publish_one(&mut self, topic: &str, payload: &str) -> Result<(), CycleError> {
        match self.broker.publish(topic, payload.as_bytes()) {
            Ok(()) => Ok(()),
            Err(error) => {
                warn!("Could not publish to {topic}: {error:?}");
                Err(self.fail(FailureCause::BrokerPublish))
            }
        }
    }
}
