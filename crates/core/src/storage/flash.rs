//! Record storage on NOR flash using two alternating slots.
//!
//! Each slot starts with a header that is written last. A flush first invalidates the
//! older slot, writes the payload behind it and only then writes the header, so a power
//! loss at any point leaves the other slot as the newest valid record.

use core::fmt::Debug;

use embedded_storage::{ReadStorage, Storage};
use log::{debug, warn};
use thiserror::Error;

use super::StateStorage;

/// "TNS1"
const SLOT_MAGIC: u32 = 0x3153_4e54;

/// Length of the header at the start of each slot
pub const SLOT_HEADER_LEN: usize = 12;

/// Errors of the flash slot storage
#[derive(Debug, Error)]
pub enum FlashSlotsError<E: Debug> {
    /// The flash could not be read or written
    #[error("The flash operation failed: {0:?}")]
    Flash(E),

    /// The two slots do not fit into the flash
    #[error("The slots do not fit into the flash.")]
    OutOfBounds,

    /// The record is larger than a slot can hold
    #[error("The record of {0} bytes does not fit into a slot.")]
    RecordTooLarge(usize),

    /// The stored record is larger than the read buffer
    #[error("The stored record of {0} bytes does not fit into the read buffer.")]
    BufferTooSmall(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SlotHeader {
    sequence: u32,
    length: u16,
}

impl SlotHeader {
    fn encode(&self) -> [u8; SLOT_HEADER_LEN] {
        let mut bytes = [0_u8; SLOT_HEADER_LEN];
        bytes[0..4].copy_from_slice(&SLOT_MAGIC.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.length.to_le_bytes());
        bytes[10..12].copy_from_slice(&(!self.length).to_le_bytes());
        bytes
    }

    fn decode(bytes: &[u8; SLOT_HEADER_LEN]) -> Option<Self> {
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let sequence = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let length = u16::from_le_bytes([bytes[8], bytes[9]]);
        let check = u16::from_le_bytes([bytes[10], bytes[11]]);

        if magic != SLOT_MAGIC || check != !length {
            return None;
        }

        Some(Self { sequence, length })
    }

    /// Returns true if this header was written after `other`, allowing for wraparound
    fn is_newer_than(&self, other: &Self) -> bool {
        (self.sequence.wrapping_sub(other.sequence) as i32) > 0
    }
}

/// Two slot record storage on any [`Storage`].
///
/// The slots should each cover whole erase sectors so that rewriting one never touches
/// the other.
pub struct FlashSlots<F> {
    flash: F,
    base: u32,
    slot_size: u32,
}

impl<F> FlashSlots<F>
where
    F: Storage,
    F::Error: Debug,
{
    /// Use the two slots at `base` and `base + slot_size`
    pub fn new(flash: F, base: u32, slot_size: u32) -> Result<Self, FlashSlotsError<F::Error>> {
        let end = u64::from(base) + 2 * u64::from(slot_size);
        if end > flash.capacity() as u64 || (slot_size as usize) <= SLOT_HEADER_LEN {
            return Err(FlashSlotsError::OutOfBounds);
        }

        Ok(Self {
            flash,
            base,
            slot_size,
        })
    }

    /// Release the underlying flash
    pub fn release(self) -> F {
        self.flash
    }

    fn slot_offset(&self, slot: usize) -> u32 {
        self.base + slot as u32 * self.slot_size
    }

    fn capacity(&self) -> usize {
        self.slot_size as usize - SLOT_HEADER_LEN
    }

    fn read_header(&mut self, slot: usize) -> Result<Option<SlotHeader>, FlashSlotsError<F::Error>> {
        let mut bytes = [0_u8; SLOT_HEADER_LEN];
        self.flash
            .read(self.slot_offset(slot), &mut bytes)
            .map_err(FlashSlotsError::Flash)?;

        let header = SlotHeader::decode(&bytes)
            .filter(|header| usize::from(header.length) <= self.capacity());
        Ok(header)
    }

    /// Find the slot holding the newest valid record
    fn newest(&mut self) -> Result<Option<(usize, SlotHeader)>, FlashSlotsError<F::Error>> {
        let first = self.read_header(0)?;
        let second = self.read_header(1)?;

        let newest = match (first, second) {
            (Some(a), Some(b)) if b.is_newer_than(&a) => Some((1, b)),
            (Some(a), _) => Some((0, a)),
            (None, Some(b)) => Some((1, b)),
            (None, None) => None,
        };
        Ok(newest)
    }
}

impl<F> StateStorage for FlashSlots<F>
where
    F: Storage,
    F::Error: Debug,
{
    type Error = FlashSlotsError<F::Error>;

    fn read(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        let Some((slot, header)) = self.newest()? else {
            debug!("No record in either flash slot");
            return Ok(None);
        };

        let length = usize::from(header.length);
        if length > buffer.len() {
            return Err(FlashSlotsError::BufferTooSmall(length));
        }

        let offset = self.slot_offset(slot) + SLOT_HEADER_LEN as u32;
        self.flash
            .read(offset, &mut buffer[..length])
            .map_err(FlashSlotsError::Flash)?;

        debug!(
            "Read {length} bytes from flash slot {slot} (sequence {})",
            header.sequence
        );
        Ok(Some(length))
    }

    fn write(&mut self, record: &[u8]) -> Result<(), Self::Error> {
        if record.len() > self.capacity() || record.len() > usize::from(u16::MAX) {
            return Err(FlashSlotsError::RecordTooLarge(record.len()));
        }

        let (slot, sequence) = match self.newest()? {
            Some((current, header)) => (1 - current, header.sequence.wrapping_add(1)),
            None => (0, 1),
        };

        let offset = self.slot_offset(slot);
        let header = SlotHeader {
            sequence,
            length: record.len() as u16,
        };

        if let Err(error) = self.flash.write(offset, &[0_u8; SLOT_HEADER_LEN]) {
            warn!("Could not invalidate flash slot {slot}: {error:?}");
            return Err(FlashSlotsError::Flash(error));
        }
        self.flash
            .write(offset + SLOT_HEADER_LEN as u32, record)
            .map_err(FlashSlotsError::Flash)?;
        self.flash
            .write(offset, &header.encode())
            .map_err(FlashSlotsError::Flash)?;

        debug!(
            "Wrote {} bytes to flash slot {slot} (sequence {sequence})",
            record.len()
        );
        Ok(())
    }
}
