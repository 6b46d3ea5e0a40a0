//! Durable storage for the encoded state record.

mod flash;
pub use flash::{FlashSlots, FlashSlotsError, SLOT_HEADER_LEN};

#[cfg(any(test, feature = "std"))]
mod file;
#[cfg(any(test, feature = "std"))]
pub use file::FileStorage;

use core::fmt::Debug;

/// Holds a single encoded record.
///
/// A write replaces the whole record. Implementations should make sure an interrupted
/// write leaves either the previous or the new record readable.
pub trait StateStorage {
    type Error: Debug;

    /// Copy the stored record into `buffer` and return its length, or `None` if nothing
    /// has been stored yet.
    fn read(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, Self::Error>;

    /// Replace the stored record
    fn write(&mut self, record: &[u8]) -> Result<(), Self::Error>;
}
