//! NVM addressing layer.
//!
//! Translates an abstract `(area, partition, offset, length)` access into a concrete device access.
//! Partition `0` always denotes the whole area, partitions `1..=n` index into the partition table
//! of the area. Every access is bounds checked against the partition before it reaches the device.

use crate::error::Error;
use crate::platform::{DeviceInfo, NvmDevice};
use alloc::boxed::Box;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::trace;

/// Handle returned by [`NvmTable::add_device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceId(usize);

/// A sub-range of an area, relative to the area base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Partition {
    pub offset: usize,
    pub size: usize,
}

impl Partition {
    pub const fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }
}

/// Describes one physical NVM region, e.g. a flash chip or a memory-mapped range.
#[derive(Debug, Clone)]
pub struct AreaDescriptor {
    pub name: &'static str,
    pub device: DeviceId,
    pub base_address: u32,
    pub size: usize,
    pub partitions: Vec<Partition>,
}

/// Registry of NVM devices and the areas mapped onto them. Built once at startup and handed by
/// reference to whoever needs NVM access. The table performs no locking, callers have to
/// serialize accesses to the same device.
#[derive(Default)]
pub struct NvmTable<'d> {
    devices: Vec<Box<dyn NvmDevice + 'd>>,
    areas: Vec<AreaDescriptor>,
}

impl<'d> NvmTable<'d> {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            areas: Vec::new(),
        }
    }

    pub fn add_device<D: NvmDevice + 'd>(&mut self, device: D) -> DeviceId {
        self.devices.push(Box::new(device));
        DeviceId(self.devices.len() - 1)
    }

    /// Registers an area and returns its index. The device has to be known and report nonzero
    /// granularities, and every partition has to lie within the area.
    pub fn add_area(&mut self, area: AreaDescriptor) -> Result<usize, Error> {
        let info = self
            .devices
            .get(area.device.0)
            .ok_or(Error::InvalidArgument)?
            .info();
        // a granularity of zero bytes is meaningless and would break the alignment math
        if info.write_size == Some(0) || info.erase_size == Some(0) {
            return Err(Error::InvalidArgument);
        }

        // the whole area has to be addressable with 32 bit device addresses
        if area.base_address as u64 + area.size as u64 > u32::MAX as u64 + 1 {
            return Err(Error::InvalidArgument);
        }

        let fits = area.partitions.iter().all(|p| {
            p.offset
                .checked_add(p.size)
                .is_some_and(|end| end <= area.size)
        });
        if !fits {
            return Err(Error::InvalidArgument);
        }

        self.areas.push(area);
        Ok(self.areas.len() - 1)
    }

    pub fn descriptor(&self, area: usize) -> Option<&AreaDescriptor> {
        self.areas.get(area)
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    pub fn device_info(&self, area: usize) -> Result<DeviceInfo, Error> {
        let desc = self.areas.get(area).ok_or(Error::InvalidArgument)?;
        Ok(self.devices[desc.device.0].info())
    }

    /// Resolves a partition of an area. Partition `0` spans the whole area.
    pub fn partition(&self, area: usize, part: usize) -> Result<Partition, Error> {
        let desc = self.areas.get(area).ok_or(Error::InvalidArgument)?;

        if part == 0 {
            return Ok(Partition::new(0, desc.size));
        }

        desc.partitions
            .get(part - 1)
            .copied()
            .ok_or(Error::InvalidArgument)
    }

    pub fn read(
        &mut self,
        area: usize,
        part: usize,
        offset: usize,
        bytes: &mut [u8],
    ) -> Result<(), Error> {
        let (device, address) = self.resolve(area, part, offset, bytes.len())?;
        self.devices[device].read(address, bytes)
    }

    pub fn write(
        &mut self,
        area: usize,
        part: usize,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), Error> {
        let (device, address) = self.resolve(area, part, offset, bytes.len())?;
        let device = &mut self.devices[device];

        let write_size = device.info().write_size.ok_or(Error::NotSupported)?;
        if !(address as usize).is_multiple_of(write_size) || !bytes.len().is_multiple_of(write_size)
        {
            return Err(Error::InvalidArgument);
        }

        #[cfg(feature = "defmt")]
        trace!("write @{:#x}[{}]", address, bytes.len());

        device.write(address, bytes)
    }

    pub fn erase(&mut self, area: usize, part: usize, offset: usize, len: usize) -> Result<(), Error> {
        let (device, address) = self.resolve(area, part, offset, len)?;
        let device = &mut self.devices[device];

        let erase_size = device.info().erase_size.ok_or(Error::NotSupported)?;
        if !(address as usize).is_multiple_of(erase_size) || !len.is_multiple_of(erase_size) {
            return Err(Error::InvalidArgument);
        }

        #[cfg(feature = "defmt")]
        trace!("erase @{:#x}[{}]", address, len);

        device.erase(address, len)
    }

    /// Flushes the device backing the given area.
    pub fn sync(&mut self, area: usize) -> Result<(), Error> {
        let desc = self.areas.get(area).ok_or(Error::InvalidArgument)?;
        self.devices[desc.device.0].sync()
    }

    /// Bounds checks an access and returns the device index and absolute device address.
    fn resolve(
        &self,
        area: usize,
        part: usize,
        offset: usize,
        len: usize,
    ) -> Result<(usize, u32), Error> {
        let partition = self.partition(area, part)?;

        // Accesses beyond the area are caught here too, add_area guarantees that partitions fit.
        let end = offset.checked_add(len).ok_or(Error::InvalidArgument)?;
        if end > partition.size {
            return Err(Error::InvalidArgument);
        }

        let desc = &self.areas[area];
        let address = (desc.base_address as usize)
            .checked_add(partition.offset + offset)
            .and_then(|address| u32::try_from(address).ok())
            .ok_or(Error::InvalidArgument)?;

        Ok((desc.device.0, address))
    }
}
