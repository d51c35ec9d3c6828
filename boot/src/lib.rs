//! Runtime side of a multi-slot bootloader.
//!
//! Firmware images live in flash "slots".  A small configuration block in a
//! reserved sector says which slot boots by default.  This crate reads and
//! rewrites that block, streams new images into an inactive slot, checks the
//! structure of an image, and feeds flash regions to a digest.  On platforms
//! with retained memory it also keeps a one-shot boot override that survives a
//! warm reset.
//!
//! Flash is always handed in as a [`storage::Flash`]; nothing here holds a
//! global device handle.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[macro_use]
mod macros;

pub mod config;
pub mod digest;
pub mod image;
#[cfg(feature = "rtc")]
pub mod rtc;
#[cfg(feature = "rtc")]
pub mod select;
pub mod write;

use core::fmt;

pub use config::{Config, ConfigStore, MAX_SLOTS};
pub use digest::{digest_image, sha256_image, DigestSink, FnSink, DIGEST_CHUNK};
pub use image::{verify_image, ImageError};
#[cfg(feature = "rtc")]
pub use rtc::{BootMode, RtcData, RtcStore};
#[cfg(feature = "rtc")]
pub use select::{select_boot_slot, BootChoice};
pub use write::WriteStatus;

pub type Result<T> = core::result::Result<T, Error>;

// Use the error kind to avoid this depending on the particular flash.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    /// The flash or retained memory device failed.
    Flash(storage::Error),
    /// Structure or checksum of an image is wrong.
    InvalidImage(ImageError),
    /// The configuration sector does not hold a valid configuration block.
    InvalidConfig,
    /// Slot index past the configured slot count.
    InvalidSlot(u8),
    /// No slot holds an image that passes verification.
    NoBootableSlot,
    /// The flash geometry is not one this code can work with.
    Unsupported,
}

impl Error {
    /// True for failures caused by bad data rather than a failing device.
    /// These are worth retrying with fresh data.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::InvalidImage(_) | Error::InvalidConfig)
    }
}

/// Convert the flash error into our error type.
impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        Error::Flash(e)
    }
}

impl From<ImageError> for Error {
    fn from(e: ImageError) -> Self {
        Error::InvalidImage(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Flash(e) => write!(f, "flash: {}", e),
            Error::InvalidImage(e) => write!(f, "invalid image: {}", e.message()),
            Error::InvalidConfig => f.write_str("invalid boot configuration"),
            Error::InvalidSlot(slot) => write!(f, "invalid slot {}", slot),
            Error::NoBootableSlot => f.write_str("no bootable slot"),
            Error::Unsupported => f.write_str("unsupported flash geometry"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Flash is programmed in words of this many bytes.
pub const WORD_SIZE: usize = 4;

/// Seed of the XOR checksums used by the configuration block, the retained
/// control block and image metadata.
pub const CHKSUM_INIT: u8 = 0xef;

/// Fold `bytes` into a running XOR checksum.
pub fn chksum_update(sum: u8, bytes: &[u8]) -> u8 {
    bytes.iter().fold(sum, |acc, b| acc ^ b)
}

/// XOR checksum of `bytes`, seeded with [`CHKSUM_INIT`].
pub fn chksum(bytes: &[u8]) -> u8 {
    chksum_update(CHKSUM_INIT, bytes)
}
