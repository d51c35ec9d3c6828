//! Boot configuration
//!
//! The configuration block sits at the start of a reserved flash sector.  It
//! records how many slots exist, where each one starts, which one boots by
//! default, and the GPIO boot policy.  The rest of the sector belongs to the
//! application, so every store is a read-modify-write of the whole sector:
//!
//! +--------+-----------------------------------------+
//! | 0      | magic, version, mode, current, gpio,    |
//! |        | count, 2 unused                          |
//! | 8      | slot offsets, MAX_SLOTS words            |
//! | 24     | checksum + padding                       |
//! +--------+-----------------------------------------+
//! | 28     | application data, preserved              |
//! | ...    |                                          |
//! +--------+-----------------------------------------+

use core::mem::{offset_of, size_of};

use asraw::{AsMutRaw, AsRaw};
use heapless::Vec;
use storage::Flash;

use crate::{chksum, Error, Result};

/// Number of slot offsets the block has room for.
pub const MAX_SLOTS: usize = 4;

pub const BOOT_CONFIG_MAGIC: u8 = 0xe1;
pub const BOOT_CONFIG_VERSION: u8 = 0x01;

/// Sector used when the store is built with `ConfigStore::default()`.
pub const DEFAULT_CONFIG_SECTOR: usize = 1;

/// The whole sector is buffered on the stack during a store, which bounds the
/// sector size we can handle.
pub const MAX_SECTOR_SIZE: usize = 4096;

/// Mode flag: a GPIO trigger at reset boots `gpio_slot`.
pub const MODE_GPIO_SLOT: u8 = 0x01;
/// Mode flag: a GPIO boot also wipes the SDK configuration area.
pub const MODE_GPIO_ERASES_SDKCONFIG: u8 = 0x04;
/// Mode flag: a GPIO trigger boots the slot after `current_slot`.
pub const MODE_GPIO_SKIP: u8 = 0x08;

/// The decoded configuration block.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Config {
    /// Combination of the `MODE_*` flags.
    pub mode: u8,
    /// Slot booted by a standard boot.
    pub current_slot: u8,
    /// Slot booted when the GPIO trigger is active.
    pub gpio_slot: u8,
    /// Flash byte offset of each slot.
    pub slots: Vec<u32, MAX_SLOTS>,
}

impl Config {
    /// A fresh configuration booting slot 0, for provisioning.
    pub fn new(offsets: &[u32]) -> Result<Config> {
        let slots = Vec::from_slice(offsets).map_err(|_| Error::InvalidConfig)?;
        Ok(Config {
            mode: 0,
            current_slot: 0,
            gpio_slot: 0,
            slots,
        })
    }

    pub fn slot_count(&self) -> u8 {
        self.slots.len() as u8
    }

    /// Flash offset of `slot`, or None if there is no such slot.
    pub fn slot_offset(&self, slot: u8) -> Option<u32> {
        self.slots.get(slot as usize).copied()
    }

    pub fn has_mode(&self, flag: u8) -> bool {
        self.mode & flag != 0
    }

    fn encode(&self) -> RawConfig {
        let mut raw = RawConfig {
            magic: BOOT_CONFIG_MAGIC,
            version: BOOT_CONFIG_VERSION,
            mode: self.mode,
            current_slot: self.current_slot,
            gpio_slot: self.gpio_slot,
            count: self.slot_count(),
            ..RawConfig::default()
        };
        raw.slots[..self.slots.len()].copy_from_slice(&self.slots);
        raw.chksum = raw.calc_chksum();
        raw
    }

    fn decode(raw: &RawConfig) -> Result<Config> {
        if raw.magic != BOOT_CONFIG_MAGIC || raw.version != BOOT_CONFIG_VERSION {
            return Err(Error::InvalidConfig);
        }
        if raw.chksum != raw.calc_chksum() {
            warn!("config checksum mismatch");
            return Err(Error::InvalidConfig);
        }
        let count = raw.count as usize;
        if count > MAX_SLOTS {
            return Err(Error::InvalidConfig);
        }
        let slots = Vec::from_slice(&raw.slots[..count]).map_err(|_| Error::InvalidConfig)?;
        Ok(Config {
            mode: raw.mode,
            current_slot: raw.current_slot,
            gpio_slot: raw.gpio_slot,
            slots,
        })
    }
}

/// The configuration block as it is laid out in flash.
#[derive(Debug, Default)]
#[repr(C)]
struct RawConfig {
    magic: u8,
    version: u8,
    mode: u8,
    current_slot: u8,
    gpio_slot: u8,
    count: u8,
    unused: [u8; 2],
    slots: [u32; MAX_SLOTS],
    chksum: u8,
    pad: [u8; 3],
}

impl RawConfig {
    fn calc_chksum(&self) -> u8 {
        chksum(&self.as_raw()[..offset_of!(RawConfig, chksum)])
    }
}

impl AsRaw for RawConfig {}
unsafe impl AsMutRaw for RawConfig {}

/// Access to the configuration block in a given sector.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ConfigStore {
    sector: usize,
}

impl Default for ConfigStore {
    fn default() -> Self {
        ConfigStore::new(DEFAULT_CONFIG_SECTOR)
    }
}

impl ConfigStore {
    pub const fn new(sector: usize) -> ConfigStore {
        ConfigStore { sector }
    }

    pub fn sector(&self) -> usize {
        self.sector
    }

    fn base<F: Flash>(&self, flash: &F) -> Result<usize> {
        self.sector
            .checked_mul(flash.erase_size())
            .ok_or(Error::Flash(storage::Error::OutOfBounds))
    }

    /// Read the configuration block.
    pub fn get_config<F: Flash>(&self, flash: &mut F) -> Result<Config> {
        let base = self.base(flash)?;
        let raw = RawConfig::read_from(|buf| flash.read(base, buf))?;
        Config::decode(&raw)
    }

    /// Write the configuration block, keeping the rest of its sector intact.
    /// This always erases and rewrites the whole sector.
    pub fn set_config<F: Flash>(&self, flash: &mut F, config: &Config) -> Result<()> {
        let size = flash.erase_size();
        if size > MAX_SECTOR_SIZE || size < size_of::<RawConfig>() {
            return Err(Error::Unsupported);
        }
        let base = self.base(flash)?;

        let mut buffer = [0u8; MAX_SECTOR_SIZE];
        let sector = &mut buffer[..size];
        flash.read(base, sector)?;

        let raw = config.encode();
        sector[..size_of::<RawConfig>()].copy_from_slice(raw.as_raw());

        flash.erase_sector(self.sector)?;
        flash.write(base, sector)?;
        debug!("config written, current slot {}", config.current_slot);
        Ok(())
    }

    /// The slot a standard boot will pick.
    pub fn get_current_slot<F: Flash>(&self, flash: &mut F) -> Result<u8> {
        Ok(self.get_config(flash)?.current_slot)
    }

    /// Change the slot for standard boots.  This rewrites the whole
    /// configuration sector, not just the one field.
    pub fn set_current_slot<F: Flash>(&self, flash: &mut F, slot: u8) -> Result<()> {
        let mut config = self.get_config(flash)?;
        if slot >= config.slot_count() {
            return Err(Error::InvalidSlot(slot));
        }
        config.current_slot = slot;
        self.set_config(flash, &config)
    }

    /// Flash offset of `slot` according to the stored configuration.
    pub fn slot_offset<F: Flash>(&self, flash: &mut F, slot: u8) -> Result<Option<u32>> {
        Ok(self.get_config(flash)?.slot_offset(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simflash::styles;

    fn two_slot() -> Config {
        Config::new(&[0x1000, 0x81000]).unwrap()
    }

    #[test]
    fn layout() {
        assert_eq!(size_of::<RawConfig>(), 28);
        assert_eq!(offset_of!(RawConfig, slots), 8);
        assert_eq!(offset_of!(RawConfig, chksum), 24);
    }

    #[test]
    fn round_trip() {
        let mut flash = styles::ESP_1M.build().unwrap();
        let store = ConfigStore::default();

        let mut config = Config::new(&[0x2000, 0x82000, 0x102000]).unwrap();
        config.mode = MODE_GPIO_SLOT | MODE_GPIO_SKIP;
        config.current_slot = 2;
        config.gpio_slot = 1;
        store.set_config(&mut flash, &config).unwrap();

        assert_eq!(store.get_config(&mut flash).unwrap(), config);
        assert_eq!(flash.sector_erase_count(1), 1);
    }

    #[test]
    fn preserves_sector() {
        let mut flash = styles::ESP_1M.build().unwrap();
        let app: std::vec::Vec<u8> = (0..4096u32).map(|i| (i * 7) as u8).collect();
        flash.install(&app, 0x1000).unwrap();

        let store = ConfigStore::default();
        store.set_config(&mut flash, &two_slot()).unwrap();

        let data = flash.contents();
        assert_eq!(&data[0x1000 + 28..0x2000], &app[28..]);
        // The neighbouring sectors were never touched.
        assert!(data[..0x1000].iter().all(|&b| b == 0xff));
        assert!(data[0x2000..0x3000].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn switch_slot() {
        let mut flash = styles::ESP_1M.build().unwrap();
        let store = ConfigStore::default();
        store.set_config(&mut flash, &two_slot()).unwrap();

        store.set_current_slot(&mut flash, 1).unwrap();
        assert_eq!(store.get_current_slot(&mut flash).unwrap(), 1);
        assert_eq!(store.get_config(&mut flash).unwrap().slots, two_slot().slots);
    }

    #[test]
    fn bad_slot() {
        let mut flash = styles::ESP_1M.build().unwrap();
        let store = ConfigStore::default();
        store.set_config(&mut flash, &two_slot()).unwrap();
        let erases = flash.erase_count();

        assert_eq!(store.set_current_slot(&mut flash, 2), Err(Error::InvalidSlot(2)));
        assert_eq!(flash.erase_count(), erases);

        assert_eq!(store.slot_offset(&mut flash, 1).unwrap(), Some(0x81000));
        assert_eq!(store.slot_offset(&mut flash, 2).unwrap(), None);
        assert_eq!(store.slot_offset(&mut flash, 255).unwrap(), None);
    }

    #[test]
    fn blank_or_corrupt() {
        let mut flash = styles::ESP_1M.build().unwrap();
        let store = ConfigStore::default();
        assert_eq!(store.get_config(&mut flash), Err(Error::InvalidConfig));

        store.set_config(&mut flash, &two_slot()).unwrap();
        // Offset of slot 1 lives at byte 12 of the block.
        flash.flip(0x1000 + 12, 0x01);
        assert_eq!(store.get_config(&mut flash), Err(Error::InvalidConfig));
    }

    #[test]
    fn too_many_slots() {
        assert_eq!(Config::new(&[0; MAX_SLOTS + 1]), Err(Error::InvalidConfig));
    }

    #[test]
    fn erase_failure() {
        let mut flash = styles::ESP_1M.build().unwrap();
        flash.fail_erase(1);
        let store = ConfigStore::default();
        assert_eq!(
            store.set_config(&mut flash, &two_slot()),
            Err(Error::Flash(storage::Error::Failed))
        );
    }

    #[test]
    fn other_sector() {
        let mut flash = styles::ESP_1M.build().unwrap();
        let store = ConfigStore::new(3);
        assert_eq!(store.sector(), 3);
        assert_eq!(ConfigStore::default().sector(), DEFAULT_CONFIG_SECTOR);
        store.set_config(&mut flash, &two_slot()).unwrap();
        assert_eq!(flash.sector_erase_count(3), 1);
        assert_eq!(ConfigStore::default().get_config(&mut flash), Err(Error::InvalidConfig));
        assert_eq!(store.get_config(&mut flash).unwrap(), two_slot());
    }
}
