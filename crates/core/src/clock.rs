//! Clock synchronization between the backup clock, the network and the primary clock.

use log::{debug, info, warn};
use time::{Duration, PrimitiveDateTime};

use crate::checkpoint::Checkpoint;
use crate::devices::{BackupClock, Hardware, NetworkInterface, PrimaryClock};
use crate::error_record::FailureCause;
use crate::session::{CycleError, Session};

/// Backup clock readings before this year are treated as unset
pub const PLAUSIBLE_YEAR: i32 = 2022;

/// Returns true if the time looks like it has been set at some point
pub fn is_plausible(datetime: PrimitiveDateTime) -> bool {
    datetime.year() >= PLAUSIBLE_YEAR
}

impl<H: Hardware> Session<H> {
    /// Make sure both clocks hold the current time.
    ///
    /// A plausible backup clock seeds the primary clock. Otherwise the time is fetched
    /// from the network and written to both.
    pub(crate) fn synchronize_clock(&mut self) -> Result<(), CycleError> {
        if let Some(datetime) = self.valid_backup_time() {
            self.checkpoint(Checkpoint::PrimaryClockSeeded);
            self.set_primary(datetime);
            return Ok(());
        }

        info!("Backup clock is not set, fetching the time from the network");
        self.bring_network_up()?;
        self.checkpoint(Checkpoint::TimeFetchNetworkUp);

        let now = match self.network.fetch_time() {
            Ok(now) => now,
            Err(error) => {
                warn!("Could not fetch the network time: {error:?}");
                return Err(self.fail(FailureCause::TimeSync));
            }
        };
        if let Err(error) = self.primary_clock.set(now) {
            warn!("Could not set the primary clock: {error:?}");
            return Err(self.fail(FailureCause::TimeSync));
        }
        self.checkpoint(Checkpoint::TimeFetched);

        self.bring_network_down()?;
        self.checkpoint(Checkpoint::TimeFetchNetworkDown);

        self.set_backup_from_primary()?;
        self.checkpoint(Checkpoint::BackupClockSeeded);
        Ok(())
    }

    /// The backup clock time, if it can be read and is plausible
    fn valid_backup_time(&mut self) -> Option<PrimitiveDateTime> {
        match self.backup_clock.read_datetime() {
            Ok(datetime) if is_plausible(datetime) => {
                debug!("Backup clock reads {datetime}");
                Some(datetime)
            }
            Ok(datetime) => {
                info!("Backup clock reads {datetime}, which is not plausible");
                None
            }
            Err(error) => {
                warn!("Could not read the backup clock: {error:?}");
                None
            }
        }
    }

    /// Seed the primary clock from the backup clock reading. Failures are logged only.
    fn set_primary(&mut self, datetime: PrimitiveDateTime) {
        if let Err(error) = self.primary_clock.set(datetime) {
            warn!("Could not set the primary clock to {datetime}: {error:?}");
        }
    }

    fn set_backup_from_primary(&mut self) -> Result<(), CycleError> {
        let now = self.primary_clock.now();
        match self.backup_clock.write_datetime(now) {
            Ok(()) => {
                info!("Backup clock set to {now}");
                Ok(())
            }
            Err(error) => {
                warn!("Could not set the backup clock: {error:?}");
                Err(self.fail(FailureCause::BackupClock))
            }
        }
    }

    /// The primary clock shifted into local time
    pub(crate) fn local_time(&self) -> PrimitiveDateTime {
        let now = self.primary_clock.now();
        let offset = Duration::seconds(i64::from(self.config.utc_offset_seconds));
        now.checked_add(offset).unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_plausible_year_boundary() {
        assert!(!is_plausible(datetime!(2021-12-31 23:59:59)));
        assert!(is_plausible(datetime!(2022-01-01 00:00:00)));
        assert!(!is_plausible(datetime!(2000-01-01 00:00:00)));
    }
}
