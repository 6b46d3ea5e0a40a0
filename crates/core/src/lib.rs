//! Control logic for a battery powered temperature sensor node.
//!
//! The node wakes, measures, decides whether the reading is worth reporting, optionally
//! renders it and publishes it over MQTT, persists its state and powers down until the
//! backup clock alarm fires. Every phase is guarded by a hardware watchdog and leaves a
//! checkpoint tag behind so that a reset can be traced back to the phase that hung.
//!
//! The hardware is reached only through the traits in [`devices`], which keeps the whole
//! cycle testable on the host.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod checkpoint;
pub mod config;
pub mod decision;
pub mod devices;
pub mod drivers;
pub mod error_record;
pub mod render;
pub mod session;
pub mod sleep;
pub mod state;
pub mod storage;
pub mod watchdog;

mod clock;
mod network;
mod report;

#[cfg(test)]
mod mock;

pub use checkpoint::{BootAction, Checkpoint, ResetReason};
pub use config::NodeConfig;
pub use decision::Decision;
pub use devices::{Devices, Hardware};
pub use error_record::{ErrorRecord, FailureCause};
pub use session::{BootError, CycleError, CycleSummary, Session};
pub use state::{PersistedState, StateStore};
