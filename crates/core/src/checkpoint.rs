//! Checkpoint tags and the interpretation of the reset that started this run.

use core::fmt;

/// Tag written to the backup clock scratch byte each time the watchdog is fed.
///
/// The values only need to be distinct. They are grouped by phase to make a raw byte
/// easy to read off the display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Checkpoint {
    /// The watchdog has just been armed
    Armed = 0x00,
    /// A cycle has started, clock validation is next
    CycleStart = 0x01,
    /// Network is up for a time fetch
    TimeFetchNetworkUp = 0x02,
    /// Network time has been fetched
    TimeFetched = 0x03,
    /// Network is down after the time fetch
    TimeFetchNetworkDown = 0x04,
    /// The backup clock has been written from the primary clock
    BackupClockSeeded = 0x05,
    /// The primary clock is about to be seeded from the backup clock
    PrimaryClockSeeded = 0x06,
    /// About to read the temperature sensor
    Measure = 0x07,
    /// The supply voltage has been read
    SupplyRead = 0x08,
    /// About to bring up the network for a report
    ReportNetworkUp = 0x09,
    /// About to connect to the broker
    BrokerConnect = 0x0a,
    /// About to publish
    Publish = 0x0b,
    /// About to disconnect from the broker
    BrokerDisconnect = 0x0c,
    /// About to tear down the network after a report
    ReportNetworkDown = 0x0d,
    /// About to persist the state
    PersistState = 0x0e,
    /// About to arm the alarm and power down
    Sleep = 0x0f,
    /// Polling during a sleep on external power
    SleepPoll = 0x10,
    /// Display prepared, fields next
    RenderPrepared = 0x21,
    /// Fields drawn, date and time next
    RenderFieldsDrawn = 0x22,
    /// About to refresh the panel
    RenderCommit = 0x23,
    /// About to activate the network interface
    NetworkActivate = 0xf0,
    /// Association has been requested
    NetworkAssociate = 0xf1,
    /// Waiting for association
    NetworkWait = 0xf2,
    /// Association wait finished, checking the status
    NetworkStatus = 0xf3,
}

impl Checkpoint {
    const ALL: [Checkpoint; 24] = [
        Self::Armed,
        Self::CycleStart,
        Self::TimeFetchNetworkUp,
        Self::TimeFetched,
        Self::TimeFetchNetworkDown,
        Self::BackupClockSeeded,
        Self::PrimaryClockSeeded,
        Self::Measure,
        Self::SupplyRead,
        Self::ReportNetworkUp,
        Self::BrokerConnect,
        Self::Publish,
        Self::BrokerDisconnect,
        Self::ReportNetworkDown,
        Self::PersistState,
        Self::Sleep,
        Self::SleepPoll,
        Self::RenderPrepared,
        Self::RenderFieldsDrawn,
        Self::RenderCommit,
        Self::NetworkActivate,
        Self::NetworkAssociate,
        Self::NetworkWait,
        Self::NetworkStatus,
    ];

    /// The raw tag stored in the scratch byte
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Look up the checkpoint for a raw tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.tag() == tag)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02x})", self, self.tag())
    }
}

/// Why the processor came out of reset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetReason {
    /// Power was applied, including the backup clock alarm closing the power latch
    PowerOn,

    /// The watchdog expired
    Watchdog,

    /// The firmware asked for a reset
    Software,

    /// Anything else, e.g. the reset pin or a brown-out
    Other,
}

/// What the boot sequence should do before starting the first cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootAction {
    /// The previous run ended in a controlled way. Clear the stored checkpoint.
    Resume,

    /// The previous run hung and the watchdog reset the device. Record the failure,
    /// keep the checkpoint that was reached and cool down before resuming.
    RecoverFromHang {
        /// The last checkpoint written, if the scratch byte could be read
        checkpoint: Option<u8>,
    },
}

/// Decide how to boot from the reset reason and the last checkpoint byte.
pub fn diagnose(reason: ResetReason, last_checkpoint: Option<u8>) -> BootAction {
    match reason {
        ResetReason::Watchdog => BootAction::RecoverFromHang {
            checkpoint: last_checkpoint,
        },
        ResetReason::PowerOn | ResetReason::Software | ResetReason::Other => BootAction::Resume,
    }
}
