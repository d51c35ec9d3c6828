//! Image generation.
//!
//! Builds images in the layout the boot core verifies: a header, segment
//! descriptors each followed by random payload, and the metadata checksum in
//! the last byte of the final 16 byte block.  The checksum is computed here
//! independently of the verifier.

use std::ops::Range;

use anyhow::{anyhow, Result};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

const MAGIC: u8 = 0xe9;
const MAGIC_TWO_STAGE: u8 = 0xea;
const CHKSUM_INIT: u8 = 0xef;

pub struct GeneratedImage {
    pub data: Vec<u8>,
    /// Position of the checksum byte within `data`.
    pub checksum_offset: usize,
    /// Where each segment's payload sits within `data`, in order.  For a two
    /// stage image the flash mapped segment comes first.
    pub payloads: Vec<Range<usize>>,
}

#[derive(Clone)]
pub struct GenBuilder {
    /// Payload size of each segment.
    segments: Vec<usize>,
    /// Seed for the PRNG
    seed: u64,
    /// Entry point written to the header.
    entry: u32,
    /// Size of the flash mapped segment, if this is a two stage image.
    two_stage: Option<usize>,
}

impl Default for GenBuilder {
    fn default() -> Self {
        GenBuilder {
            segments: vec![0x4a8c, 0x530, 0x1d0],
            seed: 1,
            entry: 0x4010_0004,
            two_stage: None,
        }
    }
}

impl GenBuilder {
    pub fn segments(&mut self, sizes: &[usize]) -> &mut Self {
        self.segments = sizes.to_vec();
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn entry(&mut self, entry: u32) -> &mut Self {
        self.entry = entry;
        self
    }

    /// Put a flash mapped segment of `size` bytes in front, two stage style.
    pub fn two_stage(&mut self, size: usize) -> &mut Self {
        self.two_stage = Some(size);
        self
    }

    pub fn build(&self) -> Result<GeneratedImage> {
        let count = u8::try_from(self.segments.len())
            .map_err(|_| anyhow!("Too many segments: {}", self.segments.len()))?;

        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed);
        let mut gen = Generator {
            data: Vec::new(),
            sum: CHKSUM_INIT,
            payloads: Vec::new(),
        };

        if let Some(size) = self.two_stage {
            gen.meta(&[MAGIC_TWO_STAGE, 4, 0, 0]);
            gen.meta(&self.entry.to_le_bytes());
            gen.segment(&mut rng, 0x4020_0010, size)?;
        }

        gen.meta(&[MAGIC, count, 0, 0]);
        gen.meta(&self.entry.to_le_bytes());
        let mut load = 0x4010_0000u32;
        for &size in &self.segments {
            gen.segment(&mut rng, load, size)?;
            load = load.wrapping_add(size as u32);
        }

        // Zero pad, leaving the checksum as the last byte of a 16 byte block.
        let end = (gen.data.len() + 1 + 15) & !15;
        gen.data.resize(end, 0);
        let checksum_offset = end - 1;
        gen.data[checksum_offset] = gen.sum;

        Ok(GeneratedImage {
            data: gen.data,
            checksum_offset,
            payloads: gen.payloads,
        })
    }
}

struct Generator {
    data: Vec<u8>,
    sum: u8,
    payloads: Vec<Range<usize>>,
}

impl Generator {
    fn meta(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.sum ^= b;
        }
        self.data.extend_from_slice(bytes);
    }

    fn segment(&mut self, rng: &mut Xoshiro256Plus, load: u32, size: usize) -> Result<()> {
        let length = u32::try_from(size).map_err(|_| anyhow!("Segment too large: {}", size))?;
        self.meta(&load.to_le_bytes());
        self.meta(&length.to_le_bytes());
        let start = self.data.len();
        self.data.resize(start + size, 0);
        rng.fill_bytes(&mut self.data[start..]);
        self.payloads.push(start..start + size);
        Ok(())
    }
}
