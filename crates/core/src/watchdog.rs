//! The liveness monitor: a hardware watchdog that is only armed while the node runs a
//! bounded cycle, plus a checkpoint tag written to the backup clock on every feed.

use log::{debug, warn};

use crate::checkpoint::{Checkpoint, ResetReason};
use crate::devices::BackupClock;

/// The hardware watchdog timer
pub trait WatchdogTimer {
    /// Start the countdown. The device resets if it is not fed within the timeout.
    fn enable(&mut self);

    /// Stop the countdown
    fn disable(&mut self);

    /// Restart the countdown
    fn feed(&mut self);

    /// The reason the processor last came out of reset
    fn reset_reason(&self) -> ResetReason;
}

/// Wraps the watchdog timer and records where the cycle got to.
pub struct LivenessMonitor<W> {
    timer: W,
    armed: bool,
    last: Option<Checkpoint>,
}

impl<W: WatchdogTimer> LivenessMonitor<W> {
    /// Take over the watchdog. It starts disarmed.
    pub fn new(mut timer: W) -> Self {
        timer.disable();
        Self {
            timer,
            armed: false,
            last: None,
        }
    }

    /// Returns true if the watchdog expired and caused the current run
    pub fn caused_reboot(&self) -> bool {
        self.timer.reset_reason() == ResetReason::Watchdog
    }

    /// The reason the processor last came out of reset
    pub fn reset_reason(&self) -> ResetReason {
        self.timer.reset_reason()
    }

    /// Returns true while the watchdog is counting down
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// The checkpoint most recently written during this run
    pub fn last_checkpoint(&self) -> Option<Checkpoint> {
        self.last
    }

    /// Feed and then start the watchdog, so the first phase gets a full timeout.
    pub fn arm<C: BackupClock>(&mut self, scratch: &mut C) {
        self.feed(Checkpoint::Armed, scratch);
        self.timer.enable();
        self.armed = true;
        debug!("Watchdog armed");
    }

    /// Stop the watchdog before anything whose duration cannot be bounded
    pub fn disarm(&mut self) {
        self.timer.disable();
        if self.armed {
            debug!("Watchdog disarmed");
        }
        self.armed = false;
    }

    /// Prove liveness and record that `checkpoint` has been reached.
    ///
    /// A failure to store the tag is logged only. The tag is a diagnostic aid and must
    /// not turn into a failure of its own.
    pub fn feed<C: BackupClock>(&mut self, checkpoint: Checkpoint, scratch: &mut C) {
        self.timer.feed();
        self.last = Some(checkpoint);
        if let Err(error) = scratch.set_byte(checkpoint.tag()) {
            warn!("Could not store checkpoint {checkpoint}: {error:?}");
        }
    }
}
