//! Functions for module sleep
//!
//! The node sleeps by arming the backup clock alarm and cutting its own power. When the
//! board runs from an external supply the power cannot be cut, and the same sleep is
//! simulated by a one second poll loop that keeps the watchdog fed and stops early if a
//! button is pressed.

use embedded_hal::delay::DelayNs;
use log::{debug, info};
use time::{Duration, PrimitiveDateTime, Time};

use crate::checkpoint::Checkpoint;
use crate::devices::{BackupClock, PowerControl};
use crate::watchdog::{LivenessMonitor, WatchdogTimer};

/// Seconds into a minute after which the alarm moves to the following minute
const LATE_SECOND: u8 = 55;

/// Interval of the simulated sleep loop
const POLL_INTERVAL_MS: u32 = 1_000;

/// How a simulated sleep ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full duration passed
    Elapsed,

    /// The cancel predicate returned true after the given number of whole seconds
    Cancelled { after_seconds: u32 },
}

/// Compute the wall clock time at which the alarm should fire.
///
/// The alarm fires on the full minute, `minutes` after the current one. Close to the
/// end of a minute one more minute is added so the alarm is not armed for a moment
/// that has effectively already passed. Wraps around midnight.
pub fn alarm_time(now: PrimitiveDateTime, minutes: u8) -> Time {
    let mut minute_start = now.time().replace_second(0).unwrap_or(Time::MIDNIGHT);
    if now.second() >= LATE_SECOND {
        minute_start += Duration::minutes(1);
    }

    minute_start + Duration::minutes(i64::from(minutes))
}

/// Wait for `seconds` one second at a time.
///
/// `tick` runs before every interval and `cancel` after it; the wait ends as soon as
/// `cancel` returns true.
pub fn wait<D, T, C>(delay: &mut D, seconds: u32, mut tick: T, mut cancel: C) -> WaitOutcome
where
    D: DelayNs,
    T: FnMut(),
    C: FnMut() -> bool,
{
    for elapsed in 0..seconds {
        tick();
        delay.delay_ms(POLL_INTERVAL_MS);
        if cancel() {
            return WaitOutcome::Cancelled {
                after_seconds: elapsed,
            };
        }
    }

    WaitOutcome::Elapsed
}

/// Sleep for `minutes`.
///
/// On battery power this does not return. On external power it returns once the
/// simulated sleep has ended.
pub fn sleep_for<C, P, D, W>(
    clock: &mut C,
    power: &mut P,
    delay: &mut D,
    monitor: &mut LivenessMonitor<W>,
    minutes: u8,
) -> Result<WaitOutcome, C::Error>
where
    C: BackupClock,
    P: PowerControl,
    D: DelayNs,
    W: WatchdogTimer,
{
    let now = clock.read_datetime()?;
    let alarm = alarm_time(now, minutes);

    clock.clear_alarm_flag()?;
    clock.set_alarm(0, alarm.minute(), alarm.hour())?;
    clock.enable_alarm_interrupt(true)?;

    info!(
        "Sleeping until {:02}:{:02}:00 (now {now})",
        alarm.hour(),
        alarm.minute()
    );
    power.power_off();

    debug!("Still powered, simulating sleep");
    let outcome = wait(
        delay,
        u32::from(minutes) * 60,
        || monitor.feed(Checkpoint::SleepPoll, clock),
        || power.wake_requested(),
    );

    if let WaitOutcome::Cancelled { after_seconds } = outcome {
        info!("Woken early after {after_seconds} s");
    }
    Ok(outcome)
}
