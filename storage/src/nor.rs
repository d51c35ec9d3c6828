//! Bridge from `embedded_storage::nor_flash` drivers.
//!
//! Most HAL flash drivers implement `ReadNorFlash` and `NorFlash`.  Wrapping
//! one in [`NorAdapter`] makes it usable wherever the boot core expects a
//! [`Flash`](crate::Flash).

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

use crate::{Error, Flash, ReadFlash, Result};

pub struct NorAdapter<T> {
    inner: T,
}

impl<T> NorAdapter<T> {
    pub fn new(inner: T) -> Self {
        NorAdapter { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn map_err<E: NorFlashError>(e: E) -> Error {
    match e.kind() {
        NorFlashErrorKind::NotAligned => Error::NotAligned,
        NorFlashErrorKind::OutOfBounds => Error::OutOfBounds,
        _ => Error::Failed,
    }
}

fn offset32(offset: usize) -> Result<u32> {
    u32::try_from(offset).map_err(|_| Error::OutOfBounds)
}

impl<T: ReadNorFlash> ReadFlash for NorAdapter<T> {
    fn read_size(&self) -> usize {
        T::READ_SIZE
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()> {
        self.inner.read(offset32(offset)?, bytes).map_err(map_err)
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl<T: NorFlash> Flash for NorAdapter<T> {
    fn write_size(&self) -> usize {
        T::WRITE_SIZE
    }

    fn erase_size(&self) -> usize {
        T::ERASE_SIZE
    }

    fn erase(&mut self, from: usize, to: usize) -> Result<()> {
        self.inner
            .erase(offset32(from)?, offset32(to)?)
            .map_err(map_err)
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.inner.write(offset32(offset)?, bytes).map_err(map_err)
    }
}
