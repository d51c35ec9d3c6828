//! Digests over flash.
//!
//! [`digest_image`] knows nothing about image formats: it reads a region of
//! flash in fixed chunks and hands each to a [`DigestSink`].  Combine it with
//! the length from [`verify_image`](crate::verify_image) to cover exactly the
//! image bytes, then compare the result against a trusted digest.

use sha2::digest::Update;
use sha2::Sha256;
use storage::ReadFlash;

use crate::Result;

/// Size of the reads made by [`digest_image`].  Each call to
/// [`DigestSink::accept`] gets at most this many bytes.
pub const DIGEST_CHUNK: usize = 128;

/// Consumer of the chunks of a digest.  Cannot fail; a sink that needs to
/// report an error has to keep it in its own state.
pub trait DigestSink {
    fn accept(&mut self, chunk: &[u8]);
}

/// Any of the RustCrypto hashers.
impl<D: Update> DigestSink for D {
    fn accept(&mut self, chunk: &[u8]) {
        Update::update(self, chunk);
    }
}

/// Wraps a closure so it can be used as a sink.
pub struct FnSink<F>(pub F);

impl<F: FnMut(&[u8])> DigestSink for FnSink<F> {
    fn accept(&mut self, chunk: &[u8]) {
        (self.0)(chunk)
    }
}

/// Feed `[offset, offset + length)` through `sink`, in order, in chunks of
/// [`DIGEST_CHUNK`] bytes.  `offset` and `length` should be word aligned.
pub fn digest_image<F, S>(flash: &mut F, offset: usize, length: usize, sink: &mut S) -> Result<()>
where
    F: ReadFlash,
    S: DigestSink + ?Sized,
{
    let mut buffer = [0u8; DIGEST_CHUNK];
    let mut pos = 0;
    while pos < length {
        let todo = (length - pos).min(buffer.len());
        let buf = &mut buffer[..todo];
        flash.read(offset + pos, buf)?;
        sink.accept(buf);
        pos += todo;
    }
    Ok(())
}

/// The result of a SHA256 hash, appropriate for stack allocation.
pub type Hash256 = [u8; 32];

/// SHA256 of a region of flash.
pub fn sha256_image<F: ReadFlash>(flash: &mut F, offset: usize, length: usize) -> Result<Hash256> {
    use sha2::Digest;

    let mut hasher = Sha256::new();
    digest_image(flash, offset, length, &mut hasher)?;
    let mut result = [0u8; 32];
    result.copy_from_slice(hasher.finalize().as_slice());
    Ok(result)
}
