use embedded_storage::nor_flash::NorFlashErrorKind;
use thiserror::Error;

/// Errors that can occur during NVM and settings operations. Marked as non-exhaustive to allow
/// for future additions without breaking the API. `InvalidArgument`, `NotSupported` and `TooLarge`
/// are detected from metadata alone and never leave a partial write behind.
#[derive(Error, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Unknown area or partition index, misaligned access or an access exceeding the bounds of
    /// the partition.
    #[error("invalid argument")]
    InvalidArgument,

    /// The device does not implement the requested operation (write, erase or sync).
    #[error("operation not supported by device")]
    NotSupported,

    /// A record on the medium declares a length exceeding the record size of this firmware, or
    /// one that runs past the end of its partition.
    #[error("record too large")]
    TooLarge,

    /// The log of a partition contains data that is neither a record nor erased flash.
    #[error("malformed log")]
    MalformedLog,

    /// The error reported by the underlying device driver.
    #[error("device I/O error: {0}")]
    DeviceIo(DeviceErrorKind),
}

/// Device error classification, mirrors [`NorFlashErrorKind`] so drivers built on
/// `embedded-storage` map one to one.
#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceErrorKind {
    /// The arguments are not properly aligned.
    #[strum(to_string = "not aligned")]
    NotAligned,

    /// The arguments are out of bounds of the device.
    #[strum(to_string = "out of bounds")]
    OutOfBounds,

    /// Any other driver failure (timeout, write protection, verify mismatch, ...).
    #[strum(to_string = "other")]
    Other,
}

impl From<NorFlashErrorKind> for DeviceErrorKind {
    fn from(kind: NorFlashErrorKind) -> Self {
        match kind {
            NorFlashErrorKind::NotAligned => DeviceErrorKind::NotAligned,
            NorFlashErrorKind::OutOfBounds => DeviceErrorKind::OutOfBounds,
            _ => DeviceErrorKind::Other,
        }
    }
}
