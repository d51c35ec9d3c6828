//! The simulator seen through `embedded_storage::nor_flash`.
//!
//! HAL drivers describe their geometry with associated constants, so the
//! read, write and erase sizes become const parameters here.  Wrapping a [`NorSim`] in
//! `storage::NorAdapter` gives the same path a real driver takes into the boot
//! core.

use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};
use storage::{Flash, ReadFlash};

use crate::SimFlash;

/// The richer error type used in the simulator.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SimError {
    Inner(NorFlashErrorKind),
    Storage(storage::Error),
}

impl From<NorFlashErrorKind> for SimError {
    fn from(inner: NorFlashErrorKind) -> Self {
        SimError::Inner(inner)
    }
}

impl From<storage::Error> for SimError {
    fn from(e: storage::Error) -> Self {
        SimError::Storage(e)
    }
}

impl NorFlashError for SimError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            SimError::Inner(inner) => *inner,
            SimError::Storage(storage::Error::NotAligned) => NorFlashErrorKind::NotAligned,
            SimError::Storage(storage::Error::OutOfBounds) => NorFlashErrorKind::OutOfBounds,
            SimError::Storage(_) => NorFlashErrorKind::Other,
        }
    }
}

type Result<T> = core::result::Result<T, SimError>;

pub struct NorSim<const READ_SIZE: usize, const WRITE_SIZE: usize, const ERASE_SIZE: usize> {
    flash: SimFlash,
}

impl<const READ_SIZE: usize, const WRITE_SIZE: usize, const ERASE_SIZE: usize> NorSim<READ_SIZE, WRITE_SIZE, ERASE_SIZE> {
    pub fn new(sectors: usize) -> anyhow::Result<Self> {
        let flash = SimFlash::new(READ_SIZE, WRITE_SIZE, ERASE_SIZE, sectors)?;
        Ok(NorSim { flash })
    }

    pub fn sim(&self) -> &SimFlash {
        &self.flash
    }

    pub fn sim_mut(&mut self) -> &mut SimFlash {
        &mut self.flash
    }
}

impl<const READ_SIZE: usize, const WRITE_SIZE: usize, const ERASE_SIZE: usize> ErrorType for NorSim<READ_SIZE, WRITE_SIZE, ERASE_SIZE> {
    type Error = SimError;
}

impl<const READ_SIZE: usize, const WRITE_SIZE: usize, const ERASE_SIZE: usize> ReadNorFlash for NorSim<READ_SIZE, WRITE_SIZE, ERASE_SIZE> {
    const READ_SIZE: usize = READ_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<()> {
        Ok(self.flash.read(offset as usize, bytes)?)
    }

    fn capacity(&self) -> usize {
        self.flash.capacity()
    }
}

impl<const READ_SIZE: usize, const WRITE_SIZE: usize, const ERASE_SIZE: usize> NorFlash for NorSim<READ_SIZE, WRITE_SIZE, ERASE_SIZE> {
    const WRITE_SIZE: usize = WRITE_SIZE;
    const ERASE_SIZE: usize = ERASE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<()> {
        embedded_storage::nor_flash::check_erase(self, from, to)?;
        Ok(self.flash.erase(from as usize, to as usize)?)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        embedded_storage::nor_flash::check_write(self, offset, bytes.len())?;
        Ok(self.flash.write(offset as usize, bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::NorAdapter;

    type EspNor = NorSim<4, 4, 4096>;

    #[test]
    fn through_adapter() {
        let mut flash = NorAdapter::new(EspNor::new(4).unwrap());
        assert_eq!(flash.erase_size(), 4096);
        assert_eq!(flash.write_size(), 4);
        assert_eq!(flash.capacity(), 4 * 4096);

        flash.erase_sector(1).unwrap();
        flash.write(4096, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        flash.read(4096, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        let sim = flash.into_inner();
        assert_eq!(sim.sim().sector_erase_count(1), 1);
    }

    #[test]
    fn errors_map_back() {
        let mut flash = NorAdapter::new(EspNor::new(1).unwrap());
        assert_eq!(flash.write(2, &[0; 4]), Err(storage::Error::NotAligned));
        assert_eq!(flash.erase(0, 8192), Err(storage::Error::OutOfBounds));
        flash.write(0, &[0; 4]).unwrap();
        // Not erased has no counterpart in the nor_flash kinds.
        assert_eq!(flash.write(0, &[0xff; 4]), Err(storage::Error::Failed));
    }

    #[test]
    fn image_over_nor() {
        let img = crate::gen::GenBuilder::default()
            .segments(&[0x123, 0x45])
            .build()
            .unwrap();
        let mut nor = EspNor::new(16).unwrap();
        nor.sim_mut().install(&img.data, 0x2000).unwrap();
        let mut flash = NorAdapter::new(nor);
        assert_eq!(flash.read_size(), 4);
        assert_eq!(rboot::verify_image(&mut flash, 0x2000), Ok(img.data.len()));
    }

    #[test]
    fn boot_config_over_nor() {
        let mut flash = NorAdapter::new(EspNor::new(4).unwrap());
        let store = rboot::ConfigStore::default();
        let config = rboot::Config::new(&[0x2000, 0x3000]).unwrap();
        store.set_config(&mut flash, &config).unwrap();
        assert_eq!(store.get_config(&mut flash).unwrap(), config);
    }
}
