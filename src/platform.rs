use crate::error::{DeviceErrorKind, Error};
use embedded_storage::nor_flash::{NorFlash, NorFlashError};

/// Geometry and capabilities of an NVM device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
    /// Write granularity in bytes, `None` if the device can't be written.
    pub write_size: Option<usize>,
    /// Erase granularity in bytes, `None` if the device has no native erase.
    pub erase_size: Option<usize>,
}

/// Capability contract of a nonvolatile memory device. Addresses are absolute device addresses.
///
/// Only `read` is mandatory. Alignment against [`DeviceInfo`] is enforced by
/// [`NvmTable`](crate::nvm::NvmTable) before any call reaches the device, so implementations
/// may assume aligned arguments for `write` and `erase`.
pub trait NvmDevice {
    fn info(&self) -> DeviceInfo;

    fn read(&mut self, address: u32, bytes: &mut [u8]) -> Result<(), Error>;

    fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), Error> {
        let _ = (address, bytes);
        Err(Error::NotSupported)
    }

    fn erase(&mut self, address: u32, len: usize) -> Result<(), Error> {
        let _ = (address, len);
        Err(Error::NotSupported)
    }

    /// Flush device caches to the underlying hardware.
    fn sync(&mut self) -> Result<(), Error> {
        Err(Error::NotSupported)
    }
}

impl<T: NvmDevice + ?Sized> NvmDevice for &mut T {
    fn info(&self) -> DeviceInfo {
        (**self).info()
    }

    fn read(&mut self, address: u32, bytes: &mut [u8]) -> Result<(), Error> {
        (**self).read(address, bytes)
    }

    fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), Error> {
        (**self).write(address, bytes)
    }

    fn erase(&mut self, address: u32, len: usize) -> Result<(), Error> {
        (**self).erase(address, len)
    }

    fn sync(&mut self) -> Result<(), Error> {
        (**self).sync()
    }
}

/// Exposes any `embedded-storage` NOR flash driver as an [`NvmDevice`].
///
/// Usage: `NorFlashDevice::new(FlashStorage::new(peripherals.FLASH))`
pub struct NorFlashDevice<F> {
    inner: F,
}

impl<F: NorFlash> NorFlashDevice<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

#[inline(always)]
fn device_error<E: NorFlashError>(e: E) -> Error {
    Error::DeviceIo(DeviceErrorKind::from(e.kind()))
}

impl<F: NorFlash> NvmDevice for NorFlashDevice<F> {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            write_size: Some(F::WRITE_SIZE),
            erase_size: Some(F::ERASE_SIZE),
        }
    }

    fn read(&mut self, address: u32, bytes: &mut [u8]) -> Result<(), Error> {
        if address as usize % F::READ_SIZE == 0 && bytes.len() % F::READ_SIZE == 0 {
            return self.inner.read(address, bytes).map_err(device_error);
        }

        // widen unaligned reads to the read granularity of the driver
        let start = align_floor(address as usize, F::READ_SIZE);
        let end = align_ceil(address as usize + bytes.len(), F::READ_SIZE);
        let skip = address as usize - start;

        let mut chunk = [0u8; 64];
        let step = align_floor(chunk.len(), F::READ_SIZE).max(F::READ_SIZE);
        if step > chunk.len() {
            return Err(Error::NotSupported);
        }

        let mut filled = 0;
        let mut cursor = start;
        while cursor < end {
            let len = step.min(end - cursor);
            self.inner
                .read(cursor as u32, &mut chunk[..len])
                .map_err(device_error)?;

            let window_start = if cursor == start { skip } else { 0 };
            let take = (len - window_start).min(bytes.len() - filled);
            bytes[filled..filled + take]
                .copy_from_slice(&chunk[window_start..window_start + take]);
            filled += take;
            cursor += len;
        }

        Ok(())
    }

    fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), Error> {
        self.inner.write(address, bytes).map_err(device_error)
    }

    fn erase(&mut self, address: u32, len: usize) -> Result<(), Error> {
        let to = address
            .checked_add(len as u32)
            .ok_or(Error::InvalidArgument)?;
        self.inner.erase(address, to).map_err(device_error)
    }

    fn sync(&mut self) -> Result<(), Error> {
        // NOR flash writes are committed once the driver returns
        Ok(())
    }
}

#[inline(always)]
pub(crate) const fn align_ceil(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size.saturating_add(alignment - 1) & !(alignment - 1)
    } else {
        size.saturating_add(alignment - 1) / alignment * alignment
    }
}

#[inline(always)]
pub(crate) const fn align_floor(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}
