//! Boot control block in retained memory.
//!
//! Some parts keep a small memory alive across a warm reset.  The bootloader
//! leaves a note there about how it booted, and the firmware can leave a note
//! asking for a one-off boot of another slot.  After a cold boot the region
//! holds garbage, which the magic and checksum weed out.

use core::mem::{offset_of, size_of};

use asraw::{AsMutRaw, AsRaw};
use storage::Retained;

use crate::{chksum, Result};

pub const RTC_MAGIC: u32 = 0x2334ae68;

/// Byte offset of the control block used by `RtcStore::default()`.
pub const DEFAULT_RTC_OFFSET: usize = 0x6c * 4;

/// How a boot was, or will be, chosen.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum BootMode {
    /// The configured current slot.
    Standard = 0x00,
    /// The GPIO trigger was active at reset.
    GpioSlot = 0x01,
    /// A one-off boot of `temp_slot`.
    TempSlot = 0x02,
}

impl BootMode {
    fn from_raw(value: u8) -> Option<BootMode> {
        match value {
            0x00 => Some(BootMode::Standard),
            0x01 => Some(BootMode::GpioSlot),
            0x02 => Some(BootMode::TempSlot),
            _ => None,
        }
    }
}

/// Contents of the control block.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RtcData {
    /// Mode requested for the next boot.
    pub next_mode: BootMode,
    /// Mode of the boot that started the running firmware.
    pub last_mode: BootMode,
    /// Slot the running firmware was booted from.
    pub last_slot: u8,
    /// Slot for the next boot when `next_mode` is `TempSlot`.
    pub temp_slot: u8,
}

impl Default for RtcData {
    fn default() -> Self {
        RtcData {
            next_mode: BootMode::Standard,
            last_mode: BootMode::Standard,
            last_slot: 0,
            temp_slot: 0,
        }
    }
}

#[derive(Debug, Default)]
#[repr(C)]
struct RawRtcData {
    magic: u32,
    next_mode: u8,
    last_mode: u8,
    last_slot: u8,
    temp_slot: u8,
    chksum: u8,
    pad: [u8; 3],
}

impl RawRtcData {
    fn calc_chksum(&self) -> u8 {
        chksum(&self.as_raw()[..offset_of!(RawRtcData, chksum)])
    }
}

impl AsRaw for RawRtcData {}
unsafe impl AsMutRaw for RawRtcData {}

/// Where in retained memory the control block lives.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RtcStore {
    offset: usize,
}

impl Default for RtcStore {
    fn default() -> Self {
        RtcStore::new(DEFAULT_RTC_OFFSET)
    }
}

impl RtcStore {
    pub const fn new(offset: usize) -> RtcStore {
        RtcStore { offset }
    }

    /// Size of the block in retained memory.
    pub const fn size() -> usize {
        size_of::<RawRtcData>()
    }

    /// Read the control block.  None means there is nothing trustworthy
    /// there: never written, lost with power, or corrupted.
    pub fn get_rtc_data<M: Retained>(&self, mem: &mut M) -> Result<Option<RtcData>> {
        storage::check_retained(mem, self.offset, Self::size())?;
        let raw = RawRtcData::read_from(|buf| mem.read(self.offset, buf))?;

        if raw.magic != RTC_MAGIC || raw.chksum != raw.calc_chksum() || raw.pad != [0; 3] {
            return Ok(None);
        }
        let (Some(next_mode), Some(last_mode)) =
            (BootMode::from_raw(raw.next_mode), BootMode::from_raw(raw.last_mode))
        else {
            return Ok(None);
        };
        Ok(Some(RtcData {
            next_mode,
            last_mode,
            last_slot: raw.last_slot,
            temp_slot: raw.temp_slot,
        }))
    }

    /// Write the whole control block, with a fresh checksum.
    pub fn set_rtc_data<M: Retained>(&self, mem: &mut M, data: &RtcData) -> Result<()> {
        storage::check_retained(mem, self.offset, Self::size())?;
        let mut raw = RawRtcData {
            magic: RTC_MAGIC,
            next_mode: data.next_mode as u8,
            last_mode: data.last_mode as u8,
            last_slot: data.last_slot,
            temp_slot: data.temp_slot,
            ..RawRtcData::default()
        };
        raw.chksum = raw.calc_chksum();
        mem.write(self.offset, raw.as_raw())?;
        Ok(())
    }

    /// Ask for `slot` to be booted on the next reset only.  The configuration
    /// in flash is left alone, so the reset after that boots as before.
    pub fn set_temp_slot<M: Retained>(&self, mem: &mut M, slot: u8) -> Result<()> {
        let mut data = self.get_rtc_data(mem)?.unwrap_or_default();
        data.next_mode = BootMode::TempSlot;
        data.temp_slot = slot;
        debug!("temporary boot of slot {} requested", slot);
        self.set_rtc_data(mem, &data)
    }

    /// The slot the running firmware came from, even if it was a temporary
    /// boot.
    pub fn get_last_boot_slot<M: Retained>(&self, mem: &mut M) -> Result<Option<u8>> {
        Ok(self.get_rtc_data(mem)?.map(|d| d.last_slot))
    }

    pub fn get_last_boot_mode<M: Retained>(&self, mem: &mut M) -> Result<Option<BootMode>> {
        Ok(self.get_rtc_data(mem)?.map(|d| d.last_mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simflash::SimRetained;

    fn sample() -> RtcData {
        RtcData {
            next_mode: BootMode::Standard,
            last_mode: BootMode::TempSlot,
            last_slot: 2,
            temp_slot: 2,
        }
    }

    #[test]
    fn layout() {
        assert_eq!(RtcStore::size(), 12);
        assert_eq!(offset_of!(RawRtcData, chksum), 8);
    }

    #[test]
    fn round_trip() {
        let mut mem = SimRetained::cold(1);
        let store = RtcStore::default();
        store.set_rtc_data(&mut mem, &sample()).unwrap();
        assert_eq!(store.get_rtc_data(&mut mem).unwrap(), Some(sample()));
        assert_eq!(store.get_last_boot_slot(&mut mem).unwrap(), Some(2));
        assert_eq!(store.get_last_boot_mode(&mut mem).unwrap(), Some(BootMode::TempSlot));
    }

    #[test]
    fn cold_boot_is_absent() {
        for seed in 0..8 {
            let mut mem = SimRetained::cold(seed);
            let store = RtcStore::default();
            assert_eq!(store.get_rtc_data(&mut mem).unwrap(), None);
            assert_eq!(store.get_last_boot_slot(&mut mem).unwrap(), None);
            assert_eq!(store.get_last_boot_mode(&mut mem).unwrap(), None);
        }
    }

    #[test]
    fn any_corruption() {
        let store = RtcStore::default();
        for byte in 0..RtcStore::size() {
            for bit in 0..8 {
                let mut mem = SimRetained::cold(3);
                store.set_rtc_data(&mut mem, &sample()).unwrap();
                mem.flip(DEFAULT_RTC_OFFSET + byte, 1 << bit);
                assert_eq!(store.get_rtc_data(&mut mem).unwrap(), None, "byte {} bit {}", byte, bit);
            }
        }
    }

    #[test]
    fn unknown_mode() {
        let mut mem = SimRetained::cold(4);
        let store = RtcStore::default();
        let mut raw = RawRtcData {
            magic: RTC_MAGIC,
            next_mode: 7,
            ..RawRtcData::default()
        };
        raw.chksum = raw.calc_chksum();
        mem.write(DEFAULT_RTC_OFFSET, raw.as_raw()).unwrap();
        assert_eq!(store.get_rtc_data(&mut mem).unwrap(), None);
    }

    #[test]
    fn temp_slot_from_nothing() {
        let mut mem = SimRetained::cold(5);
        let store = RtcStore::default();
        store.set_temp_slot(&mut mem, 3).unwrap();
        let data = store.get_rtc_data(&mut mem).unwrap().unwrap();
        assert_eq!(data, RtcData {
            next_mode: BootMode::TempSlot,
            last_mode: BootMode::Standard,
            last_slot: 0,
            temp_slot: 3,
        });
    }

    #[test]
    fn temp_slot_keeps_history() {
        let mut mem = SimRetained::cold(6);
        let store = RtcStore::default();
        store.set_rtc_data(&mut mem, &sample()).unwrap();
        store.set_temp_slot(&mut mem, 1).unwrap();
        let data = store.get_rtc_data(&mut mem).unwrap().unwrap();
        assert_eq!(data.next_mode, BootMode::TempSlot);
        assert_eq!(data.temp_slot, 1);
        assert_eq!(data.last_mode, BootMode::TempSlot);
        assert_eq!(data.last_slot, 2);
    }

    #[test]
    fn out_of_range() {
        let mut mem = SimRetained::cold(7);
        let store = RtcStore::new(mem.capacity() - 4);
        assert_eq!(
            store.set_rtc_data(&mut mem, &sample()),
            Err(crate::Error::Flash(storage::Error::OutOfBounds))
        );
    }
}
