//! The session context and the control loop.
//!
//! A [`Session`] owns every collaborator, the liveness monitor and the state store for
//! the lifetime of the firmware. Each phase of a cycle is a method on the session that
//! returns `Result<_, CycleError>`; the only recovery point is [`Session::run`].

use core::fmt::Debug;

use embedded_hal::delay::DelayNs;
use log::{debug, error, info, warn};
use thiserror::Error;
use uom::si::thermodynamic_temperature::degree_celsius;

use crate::checkpoint::{self, BootAction, Checkpoint};
use crate::config::NodeConfig;
use crate::decision::{decide, Decision};
use crate::devices::{BackupClock as _, Devices, Hardware, PowerControl, TemperatureSensor};
use crate::error_record::FailureCause;
use crate::sleep::{self, WaitOutcome};
use crate::state::{PersistedState, StateStore, StoreError};
use crate::storage::StateStorage;
use crate::watchdog::LivenessMonitor;

/// Outcome of a failed phase. Interpreted only by the top level loop.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CycleError {
    /// The failure has been recorded; the node must restart
    #[error("Restart needed after: {cause}")]
    Restart { cause: FailureCause },
}

/// Errors that prevent a session from starting
#[derive(Debug, Error)]
pub enum BootError<E: Debug> {
    /// The state store could not be initialized
    #[error("The state store could not be initialized: {0}")]
    State(StoreError<E>),
}

impl<E: Debug> From<StoreError<E>> for BootError<E> {
    fn from(error: StoreError<E>) -> Self {
        Self::State(error)
    }
}

/// What a completed cycle did
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CycleSummary {
    /// The reading taken this cycle, in degrees Celsius
    pub temperature: f64,

    pub decision: Decision,

    /// The supply voltage, measured on report cycles only
    pub supply_voltage: Option<f32>,

    /// Quiet cycles after this one
    pub quiet_cycle_count: u32,
}

/// Session context of the node
pub struct Session<H: Hardware> {
    pub(crate) display: H::Display,
    pub(crate) sensor: H::Sensor,
    pub(crate) supply: H::Supply,
    pub(crate) backup_clock: H::BackupClock,
    pub(crate) primary_clock: H::PrimaryClock,
    pub(crate) network: H::Network,
    pub(crate) broker: H::Broker,
    pub(crate) power: H::Power,
    pub(crate) delay: H::Delay,
    pub(crate) monitor: LivenessMonitor<H::Watchdog>,
    pub(crate) store: StateStore<H::Storage>,
    pub(crate) config: NodeConfig,
}

impl<H: Hardware> Session<H> {
    /// Take over the hardware, load the state and interpret the reset that started this run.
    ///
    /// After a watchdog reset the failure is recorded together with the checkpoint that
    /// was reached, and the node cools down before continuing.
    pub fn boot(
        devices: Devices<H>,
        storage: H::Storage,
        config: NodeConfig,
    ) -> Result<Self, BootError<<H::Storage as StateStorage>::Error>> {
        let Devices {
            display,
            sensor,
            supply,
            mut backup_clock,
            primary_clock,
            network,
            broker,
            watchdog,
            power,
            delay,
        } = devices;

        let monitor = LivenessMonitor::new(watchdog);
        let reason = monitor.reset_reason();
        let last_checkpoint = if monitor.caused_reboot() {
            match backup_clock.get_byte() {
                Ok(tag) => Some(tag),
                Err(error) => {
                    warn!("Could not read the last checkpoint: {error:?}");
                    None
                }
            }
        } else {
            None
        };

        let store = StateStore::load(storage)?;
        let mut session = Self {
            display,
            sensor,
            supply,
            backup_clock,
            primary_clock,
            network,
            broker,
            power,
            delay,
            monitor,
            store,
            config,
        };

        info!("Booting after {reason:?} reset");
        match checkpoint::diagnose(reason, last_checkpoint) {
            BootAction::Resume => session.store.set_watchdog_checkpoint(0),
            BootAction::RecoverFromHang { checkpoint } => session.recover_from_hang(checkpoint),
        }

        Ok(session)
    }

    fn recover_from_hang(&mut self, checkpoint: Option<u8>) {
        match checkpoint.and_then(Checkpoint::from_tag) {
            Some(known) => error!("Watchdog reset, the previous run hung after {known}"),
            None => error!("Watchdog reset after unknown checkpoint {checkpoint:?}"),
        }

        if let Some(tag) = checkpoint {
            self.store.set_watchdog_checkpoint(tag);
        }
        self.store.record_failure(FailureCause::WatchdogRestart);
        if let Err(error) = self.store.flush() {
            warn!("Could not persist the watchdog failure: {error:?}");
        }

        info!("Cooling down for {} ms", self.config.cooldown_ms);
        self.delay.delay_ms(self.config.cooldown_ms);
    }

    /// The in-memory state
    pub fn state(&self) -> &PersistedState {
        self.store.state()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Prove liveness and record that `checkpoint` has been reached
    pub(crate) fn checkpoint(&mut self, checkpoint: Checkpoint) {
        self.monitor.feed(checkpoint, &mut self.backup_clock);
    }

    /// The failure funnel.
    ///
    /// Disarms the watchdog, records the cause and persists the record, then hands back
    /// the error that unwinds the cycle.
    pub(crate) fn fail(&mut self, cause: FailureCause) -> CycleError {
        self.monitor.disarm();
        self.store.record_failure(cause);
        error!(
            "Failure: {cause}, error record now {:#010x}",
            self.store.error_record().pack()
        );

        if let Err(error) = self.store.flush() {
            warn!("Could not persist the failure: {error:?}");
        }
        CycleError::Restart { cause }
    }

    /// Run one cycle from clock synchronization up to, but not including, the sleep.
    pub fn run_cycle(&mut self) -> Result<CycleSummary, CycleError> {
        self.monitor.arm(&mut self.backup_clock);
        self.checkpoint(Checkpoint::CycleStart);

        self.synchronize_clock()?;

        self.checkpoint(Checkpoint::Measure);
        let temperature = self.measure()?;

        let decision = decide(
            self.store.last_temperature(),
            self.store.quiet_cycle_count(),
            temperature,
        );

        let supply_voltage = match decision {
            Decision::Report => {
                let supply_voltage = self.report(temperature)?;
                self.store.set_last_temperature(temperature);
                self.store.set_quiet_cycle_count(0);
                Some(supply_voltage)
            }
            Decision::Quiet => {
                let count = self.store.quiet_cycle_count().saturating_add(1);
                self.store.set_quiet_cycle_count(count);
                None
            }
        };

        self.checkpoint(Checkpoint::PersistState);
        if let Err(error) = self.store.flush() {
            warn!("Could not persist the state: {error:?}");
            return Err(self.fail(FailureCause::Storage));
        }

        let summary = CycleSummary {
            temperature,
            decision,
            supply_voltage,
            quiet_cycle_count: self.store.quiet_cycle_count(),
        };
        log_summary(&summary);
        Ok(summary)
    }

    fn measure(&mut self) -> Result<f64, CycleError> {
        let temperature = match self.sensor.read() {
            Ok(temperature) => temperature.get::<degree_celsius>(),
            Err(error) => {
                warn!("Could not read the temperature: {error:?}");
                return Err(self.fail(FailureCause::Sensor));
            }
        };

        if !temperature.is_finite() {
            warn!("The sensor returned {temperature}");
            return Err(self.fail(FailureCause::Sensor));
        }
        Ok(temperature)
    }

    /// Arm the wake up alarm and power down.
    ///
    /// Returns only when the board runs from external power, after the simulated sleep.
    pub fn sleep(&mut self) -> Result<WaitOutcome, CycleError> {
        self.checkpoint(Checkpoint::Sleep);
        let result = sleep::sleep_for(
            &mut self.backup_clock,
            &mut self.power,
            &mut self.delay,
            &mut self.monitor,
            self.config.sleep_minutes,
        );

        match result {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                warn!("Could not arm the wake up alarm: {error:?}");
                Err(self.fail(FailureCause::BackupClock))
            }
        }
    }

    /// Get ready for a deliberate restart: disarm, persist once more and cool down.
    pub fn prepare_restart(&mut self, cause: FailureCause) {
        self.monitor.disarm();
        error!("Restarting after failure: {cause}");

        if let Err(error) = self.store.flush() {
            warn!("Could not persist the state before restarting: {error:?}");
        }

        info!("Restarting in {} ms", self.config.cooldown_ms);
        self.delay.delay_ms(self.config.cooldown_ms);
    }

    /// The control loop. Never returns; failures end in a restart.
    pub fn run(mut self) -> ! {
        loop {
            let result = self.run_cycle().and_then(|_| self.sleep());
            match result {
                Ok(outcome) => debug!("Sleep ended: {outcome:?}"),
                Err(CycleError::Restart { cause }) => {
                    self.prepare_restart(cause);
                    self.power.restart();
                }
            }
        }
    }
}

/// Print a cycle summary to the log
fn log_summary(summary: &CycleSummary) {
    info!("Cycle complete: {:?}", summary.decision);
    info!(" ┣ Temperature: {:.2} C", summary.temperature);
    match summary.supply_voltage {
        Some(volts) => info!(" ┣ Supply:      {volts:.2} V"),
        None => info!(" ┣ Supply:      not measured"),
    }
    info!(" ┗ Quiet:       {} cycles", summary.quiet_cycle_count);
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;
