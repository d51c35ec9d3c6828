//! Simulated flash
//!
//! The NOR-type flashes used in microcontrollers differs quite a bit in terms
//! of capabilities provided.  This simulator attempts to capture the parts the
//! boot core depends on:
//!
//! - Programming can only clear bits.  Setting a bit needs an erase of the
//!   whole sector, which returns it to 0xff.  Writing over programmed data is
//!   reported as `NotErased` instead of silently merging.
//! - Reads, writes and erases must respect the device's alignment.
//! - Every erase is counted, per sector, so tests can check how often sectors
//!   were erased.
//! - Failures can be injected for erases of a given sector, after a number of
//!   writes, or for all reads.
//!
//! [`SimRetained`] plays the same role for retained RTC memory, and starts out
//! full of noise the way it would after a cold boot.

use anyhow::{anyhow, Result};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use storage::{Error, Flash, ReadFlash, Retained};

pub mod gen;
pub mod nor;
pub mod styles;

pub struct SimFlash {
    data: Vec<u8>,
    read_size: usize,
    write_size: usize,
    erase_size: usize,
    /// Number of erases of each sector.
    erases: Vec<usize>,
    writes: usize,
    fail_erase: Option<usize>,
    fail_writes_after: Option<usize>,
    fail_reads: bool,
}

impl SimFlash {
    /// A fully erased device.
    pub fn new(
        read_size: usize,
        write_size: usize,
        erase_size: usize,
        sectors: usize,
    ) -> Result<SimFlash> {
        for size in [read_size, write_size, erase_size] {
            if !size.is_power_of_two() {
                return Err(anyhow!("Size {} is not a power of two", size));
            }
        }
        if erase_size % write_size != 0 || erase_size % read_size != 0 {
            return Err(anyhow!("Erase size {} is not a multiple of read/write size", erase_size));
        }
        if sectors == 0 {
            return Err(anyhow!("Flash must have at least one sector"));
        }
        Ok(SimFlash {
            data: vec![0xff; erase_size * sectors],
            read_size,
            write_size,
            erase_size,
            erases: vec![0; sectors],
            writes: 0,
            fail_erase: None,
            fail_writes_after: None,
            fail_reads: false,
        })
    }

    /// Place data directly into the flash, bypassing erase and alignment
    /// rules.  Used to set up a scenario.
    pub fn install(&mut self, data: &[u8], offset: usize) -> Result<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| anyhow!("Install of {} bytes at {:#x} past end of flash", data.len(), offset))?;
        self.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// The raw contents of the device.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Invert the bits of `mask` in the byte at `offset`.
    pub fn flip(&mut self, offset: usize, mask: u8) {
        self.data[offset] ^= mask;
    }

    /// Total number of sector erases.
    pub fn erase_count(&self) -> usize {
        self.erases.iter().sum()
    }

    pub fn sector_erase_count(&self, sector: usize) -> usize {
        self.erases[sector]
    }

    /// Number of successful write calls.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Make any erase touching `sector` fail.
    pub fn fail_erase(&mut self, sector: usize) {
        self.fail_erase = Some(sector);
    }

    /// Let `count` more writes succeed, then fail every write.
    pub fn fail_writes_after(&mut self, count: usize) {
        self.fail_writes_after = Some(count);
    }

    pub fn fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }
}

impl ReadFlash for SimFlash {
    fn read_size(&self) -> usize {
        self.read_size
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> storage::Result<()> {
        storage::check_read(self, offset, bytes.len())?;
        if self.fail_reads {
            return Err(Error::Failed);
        }
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Flash for SimFlash {
    fn write_size(&self) -> usize {
        self.write_size
    }

    fn erase_size(&self) -> usize {
        self.erase_size
    }

    fn erase(&mut self, from: usize, to: usize) -> storage::Result<()> {
        storage::check_erase(self, from, to)?;
        let sectors = from / self.erase_size..to / self.erase_size;
        if let Some(bad) = self.fail_erase {
            if sectors.contains(&bad) {
                return Err(Error::Failed);
            }
        }
        self.data[from..to].fill(0xff);
        for sector in sectors {
            self.erases[sector] += 1;
        }
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> storage::Result<()> {
        storage::check_write(self, offset, bytes.len())?;
        if let Some(left) = self.fail_writes_after.as_mut() {
            if *left == 0 {
                return Err(Error::Failed);
            }
            *left -= 1;
        }
        let target = &mut self.data[offset..offset + bytes.len()];
        if target.iter().zip(bytes).any(|(&old, &new)| old & new != new) {
            return Err(Error::NotErased);
        }
        target.copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }
}

/// Simulated retained memory.
pub struct SimRetained {
    data: Vec<u8>,
}

/// Size of the user area of the ESP8266 RTC memory.
pub const RETAINED_SIZE: usize = 768;

impl SimRetained {
    /// Memory as found after power-on: arbitrary, but reproducible from the
    /// seed.
    pub fn cold(seed: u64) -> SimRetained {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let mut data = vec![0u8; RETAINED_SIZE];
        rng.fill_bytes(&mut data);
        SimRetained { data }
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn flip(&mut self, offset: usize, mask: u8) {
        self.data[offset] ^= mask;
    }
}

impl Retained for SimRetained {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> storage::Result<()> {
        storage::check_retained(self, offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> storage::Result<()> {
        storage::check_retained(self, offset, bytes.len())?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}
