#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use nvm_settings::error::Error;
use nvm_settings::nvm::{AreaDescriptor, NvmTable, Partition};
use nvm_settings::platform::{DeviceInfo, NorFlashDevice, NvmDevice};

pub const FLASH_SECTOR_SIZE: usize = 4096;
pub const PARTITION_A: usize = 1;
pub const PARTITION_B: usize = 2;

pub const MAGIC: [u8; 4] = *b"OPNX";
pub const HEADER_SIZE: usize = 8;
pub const SETTINGS_SIZE: usize = 31;
pub const RECORD_SIZE: usize = HEADER_SIZE + SETTINGS_SIZE + 2;

/// NOR flash over a `Vec<u8>`: writes can only clear bits, erase sets whole sectors to 0xFF.
#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    /// A failing write still programs this many bytes, like a power loss in the middle of it.
    pub torn_write_len: usize,
    pub operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    pub fn new(sectors: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(sectors: usize, fail_after_operation: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            fail_after_operation,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    /// Fail the next operation. If it is a write, `torn_write_len` bytes still get programmed.
    pub fn fail_next_operation(&mut self, torn_write_len: usize) {
        self.fail_after_operation = self.operations.len();
        self.torn_write_len = torn_write_len;
    }

    pub fn writes(&self) -> Vec<(u32, usize)> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::Write { offset, len } => Some((*offset, *len)),
                _ => None,
            })
            .collect()
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }

    /// Partition A and B are one sector each, the rest of the flash is unused.
    pub fn table(&mut self) -> NvmTable<'_> {
        let size = self.len();
        let mut table = NvmTable::new();
        let device = table.add_device(NorFlashDevice::new(self));
        table
            .add_area(AreaDescriptor {
                name: "settings flash",
                device,
                base_address: 0,
                size,
                partitions: vec![
                    Partition::new(0, FLASH_SECTOR_SIZE),
                    Partition::new(FLASH_SECTOR_SIZE, FLASH_SECTOR_SIZE),
                ],
            })
            .unwrap();
        table
    }

    pub fn partition(&self, part: usize) -> &[u8] {
        let start = (part - 1) * FLASH_SECTOR_SIZE;
        &self.buf[start..start + FLASH_SECTOR_SIZE]
    }

    pub fn partition_mut(&mut self, part: usize) -> &mut [u8] {
        let start = (part - 1) * FLASH_SECTOR_SIZE;
        &mut self.buf[start..start + FLASH_SECTOR_SIZE]
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        println!(
            "    flash: read:  0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );
        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = 1;

    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));

        println!(
            "    flash: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        println!(
            "    flash: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );

        let len = if self.operations.len() >= self.fail_after_operation {
            self.torn_write_len.min(bytes.len())
        } else {
            bytes.len()
        };

        let offset = offset as usize;
        for (i, &val) in bytes[..len].iter().enumerate() {
            // NOR flash can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }

        if len < bytes.len() {
            println!("    flash: FAULT after {len} bytes");
            return Err(FlashError);
        }

        self.operations.push(Operation::Write {
            offset: offset as u32,
            len: bytes.len(),
        });
        Ok(())
    }
}

/// File like device: plain overwrites, no native erase, optional sync counter.
pub struct RamDevice {
    pub buf: Vec<u8>,
    pub write_size: Option<usize>,
    pub erase_size: Option<usize>,
    pub writes: usize,
    pub syncs: usize,
}

impl RamDevice {
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0u8; size],
            write_size: Some(1),
            erase_size: None,
            writes: 0,
            syncs: 0,
        }
    }
}

impl NvmDevice for RamDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            write_size: self.write_size,
            erase_size: self.erase_size,
        }
    }

    fn read(&mut self, address: u32, bytes: &mut [u8]) -> Result<(), Error> {
        let address = address as usize;
        bytes.copy_from_slice(&self.buf[address..address + bytes.len()]);
        Ok(())
    }

    fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), Error> {
        let address = address as usize;
        self.buf[address..address + bytes.len()].copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), Error> {
        self.syncs += 1;
        Ok(())
    }
}

/// Builds a record the way the firmware lays it out on flash, `payload` may be shorter than the
/// current payload to mimic an older firmware.
pub fn raw_record(counter: u16, payload: &[u8]) -> Vec<u8> {
    let length = (HEADER_SIZE + payload.len() + 2) as u16;
    let mut raw = Vec::with_capacity(length as usize);
    raw.extend_from_slice(&MAGIC);
    raw.extend_from_slice(&length.to_le_bytes());
    raw.extend_from_slice(&counter.to_le_bytes());
    raw.extend_from_slice(payload);
    let crc = crc16_ccitt(&raw);
    raw.extend_from_slice(&crc.to_le_bytes());
    raw
}

/// Bitwise CRC-16/CCITT-FALSE, independent from the implementation under test.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc = 0xFFFFu16;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
