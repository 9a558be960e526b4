//! On-flash layout of a settings record.
//!
//! ```text
//! offset 0      magic    u32 = 0x584E504F ("OPNX")
//! offset 4      length   u16, whole record including header and crc
//! offset 6      counter  u16
//! offset 8      payload  SETTINGS_SIZE bytes
//! offset 8 + N  crc      u16, CRC-16/CCITT over bytes [0, length - 2)
//! ```
//!
//! All fields are little-endian and packed. Records written by older firmware carry a shorter
//! payload, `length` tells how many bytes of it exist on the medium.

use crate::error::Error;
use crate::nvm::NvmTable;
use crate::settings::{SETTINGS_SIZE, Settings};
use crc::{CRC_16_IBM_3740, Crc};
#[cfg(feature = "defmt")]
use defmt::trace;

/// "OPNX"
pub(crate) const RECORD_MAGIC: u32 = 0x584E504F;
/// Erased NOR flash reads as all ones.
pub(crate) const ERASED_WORD: u32 = u32::MAX;
pub(crate) const ERASED_BYTE: u8 = 0xFF;

pub(crate) const HEADER_SIZE: usize = 8;
pub(crate) const CRC_SIZE: usize = 2;
/// Magic and length, the part of a header the scanner looks at.
pub(crate) const PEEK_SIZE: usize = 6;
pub(crate) const RECORD_SIZE: usize = HEADER_SIZE + SETTINGS_SIZE + CRC_SIZE;
/// A record without any payload, the smallest length a valid record can declare.
pub(crate) const MIN_RECORD_SIZE: usize = HEADER_SIZE + CRC_SIZE;

const _: () = assert!(
    RECORD_SIZE <= u16::MAX as usize,
    "Record length has to fit into the u16 length field"
);

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, not reflected, no final xor.
const CRC16_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

pub(crate) fn crc16_ccitt(data: &[u8]) -> u16 {
    CRC16_CCITT.checksum(data)
}

/// Outcome of [`Record::check_integrity`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Integrity {
    Invalid,
    /// Valid record written by an older firmware with a shorter payload.
    ValidStale,
    ValidCurrent,
}

/// One persisted snapshot of the settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Record {
    pub(crate) magic: u32,
    pub(crate) length: u16,
    pub(crate) counter: u16,
    pub(crate) payload: [u8; SETTINGS_SIZE],
    pub(crate) crc: u16,
}

impl Record {
    /// A current record with counter 0 holding the default settings.
    pub(crate) fn default_record() -> Self {
        let mut record = Self {
            magic: RECORD_MAGIC,
            length: RECORD_SIZE as u16,
            counter: 0,
            payload: Settings::DEFAULT.to_bytes(),
            crc: 0,
        };
        record.crc = record.calculate_crc();
        record
    }

    /// Replaces the payload and bumps the counter. The record is rewritten in the current format.
    pub(crate) fn refresh(&mut self, payload: &[u8; SETTINGS_SIZE]) {
        self.counter = self.counter.wrapping_add(1);
        self.length = RECORD_SIZE as u16;
        self.payload = *payload;
        self.crc = self.calculate_crc();
    }

    pub(crate) fn check_integrity(&self) -> Integrity {
        if self.magic != RECORD_MAGIC {
            return Integrity::Invalid;
        }

        let length = self.length as usize;
        if !(MIN_RECORD_SIZE..=RECORD_SIZE).contains(&length) {
            return Integrity::Invalid;
        }

        if self.crc != self.calculate_crc() {
            return Integrity::Invalid;
        }

        if length == RECORD_SIZE {
            Integrity::ValidCurrent
        } else {
            Integrity::ValidStale
        }
    }

    /// CRC over the first `length - 2` bytes of the record as laid out on flash.
    pub(crate) fn calculate_crc(&self) -> u16 {
        let buf = self.to_bytes();
        let covered = (self.length as usize)
            .clamp(MIN_RECORD_SIZE, RECORD_SIZE)
            .saturating_sub(CRC_SIZE);
        crc16_ccitt(&buf[..covered])
    }

    /// Serializes a current format record.
    pub(crate) fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.length.to_le_bytes());
        buf[6..8].copy_from_slice(&self.counter.to_le_bytes());
        buf[HEADER_SIZE..HEADER_SIZE + SETTINGS_SIZE].copy_from_slice(&self.payload);
        buf[RECORD_SIZE - CRC_SIZE..].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    /// Reads the record starting at `offset`. Shorter records from older firmware get the payload
    /// bytes they lack filled from the default settings. The integrity is not checked.
    ///
    /// Returns [`Error::TooLarge`] if the declared length exceeds the record size or the record
    /// would run past the end of the partition.
    pub(crate) fn read(
        table: &mut NvmTable<'_>,
        area: usize,
        part: usize,
        offset: usize,
    ) -> Result<Self, Error> {
        #[cfg(feature = "defmt")]
        trace!("read record @{:#x}", offset);

        let size = table.partition(area, part)?.size;
        if offset.saturating_add(HEADER_SIZE) > size {
            return Err(Error::TooLarge);
        }

        let mut header = [0u8; HEADER_SIZE];
        table.read(area, part, offset, &mut header)?;

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let length = u16::from_le_bytes([header[4], header[5]]);
        let counter = u16::from_le_bytes([header[6], header[7]]);

        let len = length as usize;
        if len > RECORD_SIZE {
            return Err(Error::TooLarge);
        }
        if len < MIN_RECORD_SIZE {
            return Err(Error::MalformedLog);
        }
        if offset + len > size {
            return Err(Error::TooLarge);
        }

        let mut payload = Settings::DEFAULT.to_bytes();
        let stored = len - MIN_RECORD_SIZE;
        table.read(area, part, offset + HEADER_SIZE, &mut payload[..stored])?;

        let mut crc = [0u8; CRC_SIZE];
        table.read(area, part, offset + len - CRC_SIZE, &mut crc)?;

        Ok(Self {
            magic,
            length,
            counter,
            payload,
            crc: u16::from_le_bytes(crc),
        })
    }
}
