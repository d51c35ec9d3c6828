//! Flash styles
//!
//! The parts this boot core targets use SPI NOR flash with uniform 4k sectors.
//! They differ in total size and in how finely the flash can be programmed.

use crate::SimFlash;
use anyhow::Result;

/// The configuration of a single flash device.
pub struct AreaLayout {
    pub read_size: usize,
    pub write_size: usize,
    pub erase_size: usize,
    pub sectors: usize,
}

impl AreaLayout {
    pub fn build(&self) -> Result<SimFlash> {
        SimFlash::new(
            self.read_size,
            self.write_size,
            self.erase_size,
            self.sectors,
        )
    }
}

/// ESP8266 module with 1MB of flash, read and programmed a word at a time.
/// Room for the bootloader, the config sector and two slots of just under 512k.
pub static ESP_1M: AreaLayout = AreaLayout {
    read_size: 4,
    write_size: 4,
    erase_size: 4*1024,
    sectors: 256,
};

/// ESP8266 module with 4MB of flash.  Slots can be a full megabyte.
pub static ESP_4M: AreaLayout = AreaLayout {
    read_size: 4,
    write_size: 4,
    erase_size: 4*1024,
    sectors: 1024,
};

/// Generic SPI NOR that can be programmed a byte at a time.  Word writes still
/// work, they are just not required.
pub static SPI_NOR_2M: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 1,
    erase_size: 4*1024,
    sectors: 512,
};

/// All of the flash devices.
pub static ALL_FLASHES: [&'static AreaLayout; 3] = [
    &ESP_1M,
    &ESP_4M,
    &SPI_NOR_2M,
];

/// An iterator that returns each of the devices on each iteration.
pub fn all_flashes() -> impl Iterator<Item = Result<SimFlash>> {
    ALL_FLASHES.iter().map(|layout| layout.build())
}
