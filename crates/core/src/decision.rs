//! The adaptive hysteresis rule that decides whether a cycle reports.

/// Quiet cycles after which the threshold tightens
pub const TIGHTEN_AFTER_QUIET_CYCLES: u32 = 5;

/// Quiet cycles after which a report is forced regardless of the reading
pub const FORCE_AFTER_QUIET_CYCLES: u32 = 10;

/// Change in degrees Celsius needed to report while the node has reported recently
pub const COARSE_THRESHOLD_CELSIUS: f64 = 0.19;

/// Change in degrees Celsius needed to report once several quiet cycles have passed
pub const FINE_THRESHOLD_CELSIUS: f64 = 0.09;

/// Outcome of the sampling decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Render, publish and store the new reading
    Report,

    /// Do nothing but count the cycle
    Quiet,
}

/// Decide whether a new reading should be reported.
///
/// * fewer than 5 quiet cycles: report if the change exceeds 0.19 °C
/// * 5 or more quiet cycles: report if the change exceeds 0.09 °C
/// * 10 or more quiet cycles: always report
///
/// The change is computed in `f64`. For example 20.09 after 20.0 is a change of 0.0899…,
/// which stays quiet even from 5 quiet cycles on.
pub fn decide(last_temperature: f64, quiet_cycle_count: u32, temperature: f64) -> Decision {
    let delta = libm::fabs(temperature - last_temperature);

    let coarse = quiet_cycle_count < TIGHTEN_AFTER_QUIET_CYCLES && delta > COARSE_THRESHOLD_CELSIUS;
    let fine = quiet_cycle_count >= TIGHTEN_AFTER_QUIET_CYCLES && delta > FINE_THRESHOLD_CELSIUS;
    let forced = quiet_cycle_count >= FORCE_AFTER_QUIET_CYCLES;

    if coarse || fine || forced {
        Decision::Report
    } else {
        Decision::Quiet
    }
}

#[cfg(test)]
#[path = "decision_tests.rs"]
mod decision_tests;
