//! Streaming writes into a slot.
//!
//! Update data arrives in chunks of whatever size the transport hands over.
//! Flash, on the other hand, is programmed in whole words and only after the
//! sector has been erased.  A [`WriteStatus`] bridges the two: it carries up to
//! three bytes that did not complete a word over to the next call, and erases
//! each sector once, just before the first write that lands in it.
//!
//! There is no close operation.  Bytes still pending after the last call stay
//! in the status unless the caller asks for [`WriteStatus::flush`].

use storage::Flash;

use crate::{Error, Result, WORD_SIZE};

/// Cursor of a single write session.  Owned by the caller and dropped at the
/// end of the session; nothing about it is persisted.
#[derive(Debug, Clone)]
pub struct WriteStatus {
    /// Flash address the next whole word goes to.
    start_addr: usize,
    /// Sector that held `start_addr` when the session began.
    start_sector: usize,
    /// Highest sector erased so far in this session.
    last_sector_erased: Option<usize>,
    /// Bytes carried over from the previous call, waiting for a full word.
    extra_bytes: [u8; WORD_SIZE],
    extra_count: u8,
    sector_size: usize,
}

impl WriteStatus {
    /// Begin a session at `start_addr`, which should be word aligned.  Note
    /// that the first write erases the whole sector containing `start_addr`.
    ///
    /// Flash that cannot be programmed in whole words is `Error::Unsupported`.
    pub fn new<F: Flash>(flash: &F, start_addr: usize) -> Result<WriteStatus> {
        if WORD_SIZE % flash.write_size() != 0 {
            return Err(Error::Unsupported);
        }
        let sector_size = flash.erase_size();
        Ok(WriteStatus {
            start_addr,
            start_sector: start_addr / sector_size,
            last_sector_erased: None,
            extra_bytes: [0; WORD_SIZE],
            extra_count: 0,
            sector_size,
        })
    }

    /// Address of the next word to be programmed.  Pending bytes belong here.
    pub fn position(&self) -> usize {
        self.start_addr
    }

    /// Bytes received but not yet written, always fewer than a word.
    pub fn pending(&self) -> &[u8] {
        &self.extra_bytes[..self.extra_count as usize]
    }

    pub fn start_sector(&self) -> usize {
        self.start_sector
    }

    pub fn last_sector_erased(&self) -> Option<usize> {
        self.last_sector_erased
    }

    /// Append `data` to the stream.
    ///
    /// On error some of the data may already be in flash and the session
    /// should be abandoned.
    pub fn write<F: Flash>(&mut self, flash: &mut F, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let extra = self.extra_count as usize;
        let total = extra + data.len();
        let len = total - total % WORD_SIZE;
        if len == 0 {
            self.extra_bytes[extra..total].copy_from_slice(data);
            self.extra_count = total as u8;
            return Ok(());
        }

        self.erase_through(flash, self.start_addr + len - 1)?;

        let mut pos = self.start_addr;
        let mut data = data;

        // Complete the word started by the previous call.
        if extra > 0 {
            let (head, rest) = data.split_at(WORD_SIZE - extra);
            let mut word = self.extra_bytes;
            word[extra..].copy_from_slice(head);
            flash.write(pos, &word)?;
            pos += WORD_SIZE;
            data = rest;
        }

        let body = data.len() - data.len() % WORD_SIZE;
        if body > 0 {
            flash.write(pos, &data[..body])?;
            pos += body;
        }

        let tail = &data[body..];
        self.extra_bytes[..tail.len()].copy_from_slice(tail);
        self.extra_count = tail.len() as u8;
        self.start_addr = pos;
        Ok(())
    }

    /// Write out any pending bytes, padded to a word with the erased value.
    pub fn flush<F: Flash>(&mut self, flash: &mut F) -> Result<()> {
        let extra = self.extra_count as usize;
        if extra == 0 {
            return Ok(());
        }
        let mut word = [0xff; WORD_SIZE];
        word[..extra].copy_from_slice(self.pending());
        self.extra_count = 0;
        self.write(flash, &word)
    }

    /// Erase every sector up to and including the one holding `last_byte` that
    /// this session has not erased yet.
    fn erase_through<F: Flash>(&mut self, flash: &mut F, last_byte: usize) -> Result<()> {
        let last_sector = last_byte / self.sector_size;
        let mut next = match self.last_sector_erased {
            Some(sector) => sector + 1,
            None => self.start_sector,
        };
        while next <= last_sector {
            debug!("erase sector {:#x}", next);
            flash.erase_sector(next)?;
            self.last_sector_erased = Some(next);
            next += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, RngCore, SeedableRng};
    use rand_xoshiro::Xoshiro256Plus;
    use simflash::{styles, SimFlash};

    const BASE: usize = 0x10000;

    fn stream(len: usize, seed: u64) -> std::vec::Vec<u8> {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let mut data = vec![0u8; len];
        rng.fill_bytes(&mut data);
        data
    }

    fn write_chunks(flash: &mut SimFlash, chunks: &[&[u8]]) -> WriteStatus {
        let mut status = WriteStatus::new(&*flash, BASE).unwrap();
        for chunk in chunks {
            status.write(flash, chunk).unwrap();
            assert!(status.pending().len() < WORD_SIZE);
        }
        status
    }

    #[test]
    fn ten_and_ten() {
        let data = stream(20, 1);

        let mut split = styles::ESP_1M.build().unwrap();
        let status = write_chunks(&mut split, &[&data[..10], &data[10..]]);
        assert_eq!(status.pending(), &[] as &[u8]);
        assert_eq!(status.position(), BASE + 20);

        let mut whole = styles::ESP_1M.build().unwrap();
        write_chunks(&mut whole, &[&data[..]]);

        assert_eq!(&split.contents()[BASE..BASE + 20], &data[..]);
        assert_eq!(split.contents(), whole.contents());
    }

    #[test]
    fn any_chunking() {
        let data = stream(3 * 4096 + 1000, 7);
        let mut whole = styles::ESP_1M.build().unwrap();
        let whole_status = write_chunks(&mut whole, &[&data[..]]);

        for seed in 0..16 {
            let mut rng = Xoshiro256Plus::seed_from_u64(seed);
            let mut flash = styles::ESP_1M.build().unwrap();
            let mut status = WriteStatus::new(&flash, BASE).unwrap();
            let mut pos = 0;
            while pos < data.len() {
                let n = rng.gen_range(0..=700).min(data.len() - pos);
                status.write(&mut flash, &data[pos..pos + n]).unwrap();
                assert!(status.pending().len() < WORD_SIZE);
                pos += n;
            }
            assert_eq!(flash.contents(), whole.contents());
            assert_eq!(status.position(), whole_status.position());
            assert_eq!(status.pending(), whole_status.pending());
            assert_eq!(status.last_sector_erased(), whole_status.last_sector_erased());
            assert_eq!(flash.erase_count(), 4);
        }
    }

    #[test]
    fn residue_carried() {
        let mut flash = styles::ESP_1M.build().unwrap();
        let mut status = WriteStatus::new(&flash, BASE).unwrap();

        status.write(&mut flash, &[1, 2, 3]).unwrap();
        assert_eq!(status.pending(), &[1, 2, 3]);
        assert_eq!(status.position(), BASE);
        assert_eq!(flash.erase_count(), 0);

        status.write(&mut flash, &[4, 5]).unwrap();
        assert_eq!(status.pending(), &[5]);
        assert_eq!(status.position(), BASE + 4);
        assert_eq!(&flash.contents()[BASE..BASE + 5], &[1, 2, 3, 4, 0xff]);

        status.write(&mut flash, &[]).unwrap();
        assert_eq!(status.pending(), &[5]);
    }

    #[test]
    fn erase_once_per_sector() {
        let data = stream(4000, 3);
        let mut flash = styles::ESP_1M.build().unwrap();
        let chunks: std::vec::Vec<&[u8]> = data.chunks(13).collect();
        write_chunks(&mut flash, &chunks);
        assert_eq!(flash.erase_count(), 1);
        assert_eq!(flash.sector_erase_count(BASE / 4096), 1);
    }

    #[test]
    fn erase_spans() {
        let data = stream(4096 * 2 + 4, 4);
        let mut flash = styles::ESP_1M.build().unwrap();
        let status = write_chunks(&mut flash, &[&data[..4096], &data[4096..]]);
        let first = BASE / 4096;
        assert_eq!(status.start_sector(), first);
        assert_eq!(status.last_sector_erased(), Some(first + 2));
        for sector in first..first + 3 {
            assert_eq!(flash.sector_erase_count(sector), 1);
        }
        assert_eq!(flash.sector_erase_count(first + 3), 0);
    }

    #[test]
    fn mid_sector_start() {
        let mut flash = styles::ESP_1M.build().unwrap();
        flash.install(&[0u8; 16], BASE).unwrap();
        let mut status = WriteStatus::new(&flash, BASE + 8).unwrap();
        status.write(&mut flash, &[0xaa; 8]).unwrap();
        assert_eq!(flash.sector_erase_count(BASE / 4096), 1);
        assert_eq!(&flash.contents()[BASE..BASE + 16], &[
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa,
        ]);
    }

    #[test]
    fn flush_pads() {
        let mut flash = styles::ESP_1M.build().unwrap();
        let mut status = WriteStatus::new(&flash, BASE).unwrap();
        status.write(&mut flash, &[9, 8, 7, 6, 5, 4]).unwrap();
        status.flush(&mut flash).unwrap();
        assert_eq!(status.pending(), &[] as &[u8]);
        assert_eq!(status.position(), BASE + 8);
        assert_eq!(&flash.contents()[BASE..BASE + 8], &[9, 8, 7, 6, 5, 4, 0xff, 0xff]);

        // Nothing left, so a second flush does nothing.
        status.flush(&mut flash).unwrap();
        assert_eq!(status.position(), BASE + 8);
    }

    #[test]
    fn write_failure() {
        let mut flash = styles::ESP_1M.build().unwrap();
        let mut status = WriteStatus::new(&flash, BASE).unwrap();
        status.write(&mut flash, &[1, 2]).unwrap();
        flash.fail_writes_after(0);
        assert_eq!(
            status.write(&mut flash, &[3, 4, 5, 6, 7, 8]),
            Err(crate::Error::Flash(storage::Error::Failed))
        );
    }

    #[test]
    fn wide_writes_unsupported() {
        let flash = SimFlash::new(4, 8, 4096, 32).unwrap();
        assert_eq!(WriteStatus::new(&flash, BASE).unwrap_err(), Error::Unsupported);

        let bytewise = styles::SPI_NOR_2M.build().unwrap();
        assert!(WriteStatus::new(&bytewise, BASE).is_ok());
    }

    #[test]
    fn erase_failure() {
        let mut flash = styles::ESP_1M.build().unwrap();
        flash.fail_erase(BASE / 4096 + 1);
        let mut status = WriteStatus::new(&flash, BASE).unwrap();
        status.write(&mut flash, &[0; 4096]).unwrap();
        assert_eq!(
            status.write(&mut flash, &[0; 4]),
            Err(crate::Error::Flash(storage::Error::Failed))
        );
    }
}
