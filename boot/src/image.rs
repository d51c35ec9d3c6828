//! Boot image support
//!
//! An image starts with a small header followed by a list of segments, each a
//! descriptor (load address and length) and its payload.  After the last
//! payload the image is padded so that the following byte lands on a 16 byte
//! boundary, and the last byte of that padding holds an XOR checksum:
//!
//! +--------------------------+
//! | header                   |  magic 0xe9, count, mode, size/freq, entry
//! | segment 0 descriptor     |  load address, length
//! | segment 0 payload        |
//! | ...                      |
//! | segment n-1 descriptor   |
//! | segment n-1 payload      |
//! | padding .. checksum      |  checksum is the final byte
//! +--------------------------+
//!
//! The two stage variant begins with a 0xea header and a single flash mapped
//! segment, followed by a regular 0xe9 header and its segments.
//!
//! The checksum covers the headers and descriptors only.  It catches a torn
//! or misplaced image cheaply; the payload itself has to be checked with a
//! digest.

use core::{fmt, mem::size_of};

use asraw::{AsMutRaw, AsRaw};
use storage::ReadFlash;

use crate::{chksum_update, Result, CHKSUM_INIT, WORD_SIZE};

/// The image header contains the following magic value, indicating the
/// interpretation of the rest of the image header.
pub const IMAGE_MAGIC: u8 = 0xe9;

/// First header of a two stage image.
pub const IMAGE_MAGIC_TWO_STAGE: u8 = 0xea;

/// A two stage header always declares this many segments.
pub const TWO_STAGE_SEGMENTS: u8 = 4;

/// Sanity limit on how far past its start an image may reach.
pub const MAX_IMAGE_SIZE: usize = 0x10_0000;

pub const MAX_SEGMENTS: u8 = 16;

/// The checksum byte ends a block of this alignment.
const CHKSUM_ALIGN: usize = 16;

/// Headers can sit at any byte offset, so they are fetched through an aligned
/// read of at most this many bytes.
const BOUNCE_SIZE: usize = 32;

/// Why an image was rejected.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ImageError {
    Unaligned,
    MissingMagic,
    MissingSecondMagic,
    NoSegments,
    TooManySegments,
    /// A header or segment runs past the image limit or the end of flash.
    Truncated,
    BadChecksum,
}

impl ImageError {
    /// A short fixed description, suitable for a log line.
    pub fn message(&self) -> &'static str {
        match self {
            ImageError::Unaligned => "Unaligned flash offset",
            ImageError::MissingMagic => "Missing initial magic",
            ImageError::MissingSecondMagic => "Missing second magic",
            ImageError::NoSegments => "Image has no segments",
            ImageError::TooManySegments => "Too many segments",
            ImageError::Truncated => "Image truncated",
            ImageError::BadChecksum => "Invalid checksum",
        }
    }
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// The image begins with the following header.  This is intended to be
/// interpreted as a C struct.
#[derive(Debug, Default)]
#[repr(C)]
pub struct ImageHeader {
    /// Magic number, indicates this particular header.
    pub magic: u8,
    /// Number of segments following this header.
    pub segment_count: u8,
    /// SPI mode the image expects.  Not interpreted here.
    pub flash_mode: u8,
    /// Flash size and clock the image expects.  Not interpreted here.
    pub flash_size_freq: u8,
    /// Entry point of the image.
    pub entry: u32,
}

impl AsRaw for ImageHeader {}
unsafe impl AsMutRaw for ImageHeader {}

/// Each segment's payload is preceded by this descriptor.
#[derive(Debug, Default)]
#[repr(C)]
pub struct SegmentHeader {
    /// The address to load this segment to.
    pub load_addr: u32,
    /// Size of the payload, not counting this descriptor.
    pub length: u32,
}

impl AsRaw for SegmentHeader {}
unsafe impl AsMutRaw for SegmentHeader {}

/// Check the structure and checksum of the image at `offset`, returning its
/// total length in bytes, checksum included.
///
/// Nothing is written.  A bad image is reported as `Error::InvalidImage`,
/// distinct from a failure of the flash itself.
pub fn verify_image<F: ReadFlash>(flash: &mut F, offset: usize) -> Result<usize> {
    let result = walk(flash, offset);
    match &result {
        Ok(length) => debug!("image at {:#x} valid, {} bytes", offset, *length),
        Err(crate::Error::InvalidImage(e)) => {
            warn!("image at {:#x}: {}", offset, e.message())
        }
        Err(_) => warn!("image at {:#x}: flash failure", offset),
    }
    result
}

fn walk<F: ReadFlash>(flash: &mut F, start: usize) -> Result<usize> {
    if start % WORD_SIZE != 0 {
        return Err(ImageError::Unaligned.into());
    }

    let limit = start.saturating_add(MAX_IMAGE_SIZE).min(flash.capacity());
    let mut cursor = Cursor {
        pos: start,
        limit,
        sum: CHKSUM_INIT,
    };

    let mut header: ImageHeader = cursor.read_meta(flash)?;
    match header.magic {
        IMAGE_MAGIC => (),
        IMAGE_MAGIC_TWO_STAGE if header.segment_count == TWO_STAGE_SEGMENTS => {
            // The flash mapped segment comes first, then the regular header.
            let mapped: SegmentHeader = cursor.read_meta(flash)?;
            cursor.skip(mapped.length as usize)?;
            header = cursor.read_meta(flash)?;
            if header.magic != IMAGE_MAGIC {
                return Err(ImageError::MissingSecondMagic.into());
            }
        }
        _ => return Err(ImageError::MissingMagic.into()),
    }

    if header.segment_count == 0 {
        return Err(ImageError::NoSegments.into());
    }
    if header.segment_count > MAX_SEGMENTS {
        return Err(ImageError::TooManySegments.into());
    }

    for _ in 0..header.segment_count {
        let segment: SegmentHeader = cursor.read_meta(flash)?;
        cursor.skip(segment.length as usize)?;
    }

    // The checksum is the last byte of the aligned block after the payload.
    let end = cursor
        .pos
        .checked_add(CHKSUM_ALIGN)
        .map(|p| p & !(CHKSUM_ALIGN - 1))
        .ok_or(ImageError::Truncated)?;
    if end > limit {
        return Err(ImageError::Truncated.into());
    }
    let mut stored = [0u8; 1];
    read_unaligned(flash, end - 1, &mut stored)?;
    if stored[0] != cursor.sum {
        return Err(ImageError::BadChecksum.into());
    }

    Ok(end - start)
}

/// Read `bytes` from `pos`, which need not meet the device's read alignment,
/// by reading the aligned span around it.
fn read_unaligned<F: ReadFlash>(flash: &mut F, pos: usize, bytes: &mut [u8]) -> Result<()> {
    let align = flash.read_size();
    let start = pos - pos % align;
    let end = pos
        .checked_add(bytes.len() + align - 1)
        .map(|e| e - e % align)
        .ok_or(ImageError::Truncated)?;
    if end - start > BOUNCE_SIZE {
        return Err(crate::Error::Unsupported);
    }

    let mut buffer = [0u8; BOUNCE_SIZE];
    let span = &mut buffer[..end - start];
    flash.read(start, span)?;
    let skip = pos - start;
    bytes.copy_from_slice(&span[skip..skip + bytes.len()]);
    Ok(())
}

/// Position within an image being walked, and the checksum of the metadata
/// seen so far.
struct Cursor {
    pos: usize,
    limit: usize,
    sum: u8,
}

impl Cursor {
    fn read_meta<F: ReadFlash, T: AsRaw + AsMutRaw + Default>(&mut self, flash: &mut F) -> Result<T> {
        let next = self.advance(size_of::<T>())?;
        let pos = self.pos;
        let item = T::read_from(|buf| read_unaligned(flash, pos, buf))?;
        self.sum = chksum_update(self.sum, item.as_raw());
        self.pos = next;
        Ok(item)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.pos = self.advance(len)?;
        Ok(())
    }

    fn advance(&self, len: usize) -> Result<usize> {
        match self.pos.checked_add(len) {
            Some(next) if next <= self.limit => Ok(next),
            _ => Err(ImageError::Truncated.into()),
        }
    }
}
