//! The packed failure history that survives resets.
//!
//! On disk the record is a single 32 bit word:
//!
//! * bits 0 to 23 are a sticky mask with one bit per [`FailureCause`] seen since the
//!   store was created,
//! * bits 24 to 30 count the failures, wrapping from 127 back to 0,
//! * bit 31 is always clear.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Number of bits available for the cause mask
pub const MASK_BITS: u32 = 24;

/// Mask selecting the cause bits of the packed word
const MASK: u32 = (1 << MASK_BITS) - 1;

/// Largest value the failure counter holds before wrapping
pub const MAX_COUNT: u8 = 0x7f;

/// Identifies where a failure happened. The discriminant is the bit position in the mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FailureCause {
    /// The previous run was ended by the watchdog
    WatchdogRestart = 0,

    /// The network could not be brought up
    NetworkConnect = 1,

    /// The network could not be torn down
    NetworkDisconnect = 2,

    /// The MQTT broker refused or did not answer the connection
    BrokerConnect = 3,

    /// Publishing a topic failed
    BrokerPublish = 4,

    /// The network time could not be fetched
    TimeSync = 5,

    /// The temperature sensor could not be read
    Sensor = 6,

    /// The backup clock could not be read or written
    BackupClock = 7,

    /// The display could not be updated
    Display = 8,

    /// The persisted state could not be written
    Storage = 9,

    /// The supply voltage could not be measured
    SupplyMonitor = 10,

    /// Disconnecting from the broker failed
    BrokerDisconnect = 11,
}

impl FailureCause {
    /// Bit position of the cause in the error mask
    pub const fn bit(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::WatchdogRestart => "watchdog restart",
            Self::NetworkConnect => "network connect failed",
            Self::NetworkDisconnect => "network disconnect failed",
            Self::BrokerConnect => "broker connect failed",
            Self::BrokerPublish => "broker publish failed",
            Self::TimeSync => "network time fetch failed",
            Self::Sensor => "sensor read failed",
            Self::BackupClock => "backup clock access failed",
            Self::Display => "display update failed",
            Self::Storage => "state flush failed",
            Self::SupplyMonitor => "supply voltage read failed",
            Self::BrokerDisconnect => "broker disconnect failed",
        };
        f.write_str(text)
    }
}

/// Failure history: the set of causes seen and how many failures occurred.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct ErrorRecord {
    mask: u32,
    count: u8,
}

impl ErrorRecord {
    /// Create a record from its parts. Out of range bits are dropped.
    pub const fn new(mask: u32, count: u8) -> Self {
        Self {
            mask: mask & MASK,
            count: count & MAX_COUNT,
        }
    }

    /// Unpack a record from its persisted 32 bit form
    pub const fn unpack(raw: u32) -> Self {
        Self::new(raw, ((raw >> MASK_BITS) & MAX_COUNT as u32) as u8)
    }

    /// Pack the record into its persisted 32 bit form
    pub const fn pack(&self) -> u32 {
        ((self.count as u32) << MASK_BITS) | self.mask
    }

    /// The set of causes seen, one bit per [`FailureCause`]
    pub const fn mask(&self) -> u32 {
        self.mask
    }

    /// The number of failures seen, modulo 128
    pub const fn count(&self) -> u8 {
        self.count
    }

    /// Returns true if no failure has been recorded
    pub const fn is_clear(&self) -> bool {
        self.pack() == 0
    }

    /// Returns true if the given cause has been recorded at least once
    pub const fn contains(&self, cause: FailureCause) -> bool {
        self.mask & (1 << cause.bit()) != 0
    }

    /// Add a failure. The cause bit is set and the counter advances, wrapping at 127.
    pub fn record(&mut self, cause: FailureCause) {
        self.mask = (self.mask | (1 << cause.bit())) & MASK;
        self.count = self.count.wrapping_add(1) & MAX_COUNT;
    }
}

impl From<u32> for ErrorRecord {
    fn from(raw: u32) -> Self {
        Self::unpack(raw)
    }
}

impl From<ErrorRecord> for u32 {
    fn from(record: ErrorRecord) -> Self {
        record.pack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_clear() {
        let record = ErrorRecord::default();
        assert!(record.is_clear());
        assert_eq!(record.pack(), 0);
    }

    #[test]
    fn test_two_failures_accumulate() {
        let mut record = ErrorRecord::default();
        record.record(FailureCause::NetworkConnect);
        record.record(FailureCause::BrokerConnect);

        assert_eq!(record.mask(), 0b1010);
        assert_eq!(record.count(), 2);
        assert_eq!(record.pack(), (2 << 24) | 0b1010);
    }

    #[test]
    fn test_repeated_cause_only_counts() {
        let mut record = ErrorRecord::default();
        record.record(FailureCause::BrokerPublish);
        record.record(FailureCause::BrokerPublish);
        record.record(FailureCause::BrokerPublish);

        assert_eq!(record.mask(), 1 << 4);
        assert_eq!(record.count(), 3);
    }

    #[test]
    fn test_count_wraps_to_zero_after_127() {
        let mut record = ErrorRecord::new(0, MAX_COUNT);
        record.record(FailureCause::Sensor);

        assert_eq!(record.count(), 0, "The counter must wrap, not overflow into bit 31");
        assert!(record.contains(FailureCause::Sensor));
        assert_eq!(record.pack() & 0x8000_0000, 0);
    }

    #[test]
    fn test_mask_only_grows() {
        let causes = [
            FailureCause::WatchdogRestart,
            FailureCause::Storage,
            FailureCause::NetworkConnect,
            FailureCause::WatchdogRestart,
            FailureCause::BrokerDisconnect,
        ];

        let mut record = ErrorRecord::default();
        let mut previous = record.mask();
        for cause in causes {
            record.record(cause);
            assert_eq!(record.mask() & previous, previous, "A cause bit was cleared");
            previous = record.mask();
        }
        assert_eq!(previous, 0b1010_0000_0011);
    }

    #[test]
    fn test_unpack_drops_bit_31() {
        let record = ErrorRecord::unpack(0xffff_ffff);
        assert_eq!(record.mask(), 0x00ff_ffff);
        assert_eq!(record.count(), 0x7f);
        assert_eq!(record.pack(), 0x7fff_ffff);
    }

    #[test]
    fn test_pack_unpack_preserves_value() {
        for raw in [0_u32, 1, 0x0100_0001, 0x0200_000a, 0x7f00_0fff, 0x3a12_3456] {
            assert_eq!(ErrorRecord::unpack(raw).pack(), raw);
        }
    }
}
