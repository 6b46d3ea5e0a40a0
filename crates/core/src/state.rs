//! The single state record that carries the node across resets.

use core::fmt::Debug;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error_record::{ErrorRecord, FailureCause};
use crate::storage::StateStorage;

/// Size of the buffer the encoded record is built in
pub const RECORD_CAPACITY: usize = 128;

/// Everything the node remembers between cycles.
///
/// Encoded as a JSON object with the keys `temp`, `error`, `feeder` and `count`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// The most recently reported reading in degrees Celsius
    #[serde(rename = "temp")]
    pub last_temperature: f64,

    /// Failure history since the store was created
    #[serde(rename = "error")]
    pub error_record: ErrorRecord,

    /// The checkpoint reached before the last watchdog reset, 0 after a clean run
    #[serde(rename = "feeder")]
    pub watchdog_checkpoint: u8,

    /// Consecutive cycles without a report
    #[serde(rename = "count")]
    pub quiet_cycle_count: u32,
}

/// Errors of the state store
#[derive(Debug, Error)]
pub enum StoreError<E: Debug> {
    /// The state did not fit into the encoding buffer
    #[error("The state could not be encoded.")]
    Encode,

    /// The storage refused the write
    #[error("The state could not be written: {0:?}")]
    Storage(E),
}

/// In-memory copy of the persisted state plus the storage it is flushed to.
pub struct StateStore<S> {
    storage: S,
    state: PersistedState,
}

impl<S: StateStorage> StateStore<S> {
    /// Load the stored record.
    ///
    /// A missing, unreadable or undecodable record is replaced by the default state,
    /// which is flushed straight away so the store always holds a complete record.
    pub fn load(mut storage: S) -> Result<Self, StoreError<S::Error>> {
        let mut buffer = [0_u8; RECORD_CAPACITY];
        let loaded = match storage.read(&mut buffer) {
            Ok(Some(length)) => match serde_json_core::from_slice::<PersistedState>(&buffer[..length]) {
                Ok((state, _)) => Some(state),
                Err(error) => {
                    warn!("Stored state is corrupt ({error:?}), starting from defaults");
                    None
                }
            },
            Ok(None) => {
                info!("No stored state, starting from defaults");
                None
            }
            Err(error) => {
                warn!("Stored state is unreadable ({error:?}), starting from defaults");
                None
            }
        };

        match loaded {
            Some(state) => {
                debug!("Loaded state {state:?}");
                Ok(Self { storage, state })
            }
            None => {
                let mut store = Self {
                    storage,
                    state: PersistedState::default(),
                };
                store.flush()?;
                Ok(store)
            }
        }
    }

    /// Write the whole record to storage
    pub fn flush(&mut self) -> Result<(), StoreError<S::Error>> {
        let mut buffer = [0_u8; RECORD_CAPACITY];
        let length =
            serde_json_core::to_slice(&self.state, &mut buffer).map_err(|_| StoreError::Encode)?;

        self.storage
            .write(&buffer[..length])
            .map_err(StoreError::Storage)?;

        debug!("Flushed state {:?}", self.state);
        Ok(())
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    pub fn last_temperature(&self) -> f64 {
        self.state.last_temperature
    }

    pub fn set_last_temperature(&mut self, temperature: f64) {
        self.state.last_temperature = temperature;
    }

    pub fn error_record(&self) -> ErrorRecord {
        self.state.error_record
    }

    /// Add a failure to the error record. Nothing is flushed.
    pub fn record_failure(&mut self, cause: FailureCause) {
        self.state.error_record.record(cause);
    }

    pub fn watchdog_checkpoint(&self) -> u8 {
        self.state.watchdog_checkpoint
    }

    pub fn set_watchdog_checkpoint(&mut self, checkpoint: u8) {
        self.state.watchdog_checkpoint = checkpoint;
    }

    pub fn quiet_cycle_count(&self) -> u32 {
        self.state.quiet_cycle_count
    }

    pub fn set_quiet_cycle_count(&mut self, count: u32) {
        self.state.quiet_cycle_count = count;
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod state_tests;
