//! Storage types.
//!
//! The boot core never talks to hardware directly.  Flash is reached through
//! the [`Flash`] capability and retained (RTC) memory through [`Retained`].
//! Both are handed in by the caller so a simulator can stand in for the real
//! device.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

use core::fmt;

#[cfg(feature = "embedded-storage")]
mod nor;

#[cfg(feature = "embedded-storage")]
pub use nor::NorAdapter;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    NotAligned,
    OutOfBounds,
    /// Read of a location that has never been programmed.
    NotWritten,
    /// Write to a location that has not been erased since it was last written.
    NotErased,
    /// The device reported a failure of the operation itself.
    Failed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NotAligned => "misaligned flash access",
            Error::OutOfBounds => "flash access out of bounds",
            Error::NotWritten => "read of unprogrammed flash",
            Error::NotErased => "write to flash that is not erased",
            Error::Failed => "flash operation failed",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

/// Read only interface into flash.
pub trait ReadFlash {
    /// What is the read size (alignment and size multiple).
    fn read_size(&self) -> usize;
    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()>;
    fn capacity(&self) -> usize;
}

/// Flash that can be written to.
pub trait Flash: ReadFlash {
    /// Write size (alignment and size multiple).
    fn write_size(&self) -> usize;
    /// Erase size (alignment and size multiple).  This is the sector size.
    fn erase_size(&self) -> usize;

    fn erase(&mut self, from: usize, to: usize) -> Result<()>;
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()>;

    /// Erase a single sector, given by index.
    fn erase_sector(&mut self, sector: usize) -> Result<()> {
        let size = self.erase_size();
        let from = sector.checked_mul(size).ok_or(Error::OutOfBounds)?;
        let to = from.checked_add(size).ok_or(Error::OutOfBounds)?;
        self.erase(from, to)
    }
}

/// Memory that survives a warm reset but not a loss of power, such as the
/// user area of an RTC block.  Contents after a cold boot are arbitrary.
pub trait Retained {
    fn capacity(&self) -> usize;
    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()>;
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()>;
}

// Utilities taken from embedded-storage for validating arguments.
pub fn check_read<T: ReadFlash>(
    flash: &T,
    offset: usize,
    length: usize,
) -> Result<()> {
    check_slice(flash.capacity(), flash.read_size(), offset, length)
}

pub fn check_erase<T: Flash>(
    flash: &T,
    from: usize,
    to: usize,
) -> Result<()> {
    if from > to || to > flash.capacity() {
        return Err(Error::OutOfBounds);
    }
    if from % flash.erase_size() != 0 || to % flash.erase_size() != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

pub fn check_write<T: Flash>(
    flash: &T,
    offset: usize,
    length: usize,
) -> Result<()> {
    check_slice(flash.capacity(), flash.write_size(), offset, length)
}

/// Bounds check for retained memory, which has no alignment rules.
pub fn check_retained<T: Retained>(
    mem: &T,
    offset: usize,
    length: usize,
) -> Result<()> {
    check_slice(mem.capacity(), 1, offset, length)
}

pub fn check_slice(
    capacity: usize,
    align: usize,
    offset: usize,
    length: usize,
) -> Result<()> {
    if length > capacity || offset > capacity - length {
        return Err(Error::OutOfBounds);
    }
    if offset % align != 0 || length % align != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_bounds() {
        assert_eq!(check_slice(4096, 4, 0, 4096), Ok(()));
        assert_eq!(check_slice(4096, 4, 4092, 4), Ok(()));
        assert_eq!(check_slice(4096, 4, 4092, 8), Err(Error::OutOfBounds));
        assert_eq!(check_slice(4096, 4, 0, 8192), Err(Error::OutOfBounds));
        assert_eq!(check_slice(4096, 4, usize::MAX, 4), Err(Error::OutOfBounds));
    }

    #[test]
    fn slice_alignment() {
        assert_eq!(check_slice(4096, 4, 2, 4), Err(Error::NotAligned));
        assert_eq!(check_slice(4096, 4, 4, 3), Err(Error::NotAligned));
        assert_eq!(check_slice(4096, 1, 3, 5), Ok(()));
    }
}
