//! Choosing the slot to boot.
//!
//! This is what the bootloader itself runs at reset.  It combines the flash
//! configuration, the retained control block and the GPIO trigger into a
//! candidate slot, and refuses to hand over to anything that fails
//! verification.  When the candidate is bad the other slots are tried in turn,
//! starting after the current one.

use storage::{Flash, Retained};

use crate::config::{Config, ConfigStore, MODE_GPIO_ERASES_SDKCONFIG, MODE_GPIO_SKIP, MODE_GPIO_SLOT};
use crate::rtc::{BootMode, RtcData, RtcStore};
use crate::{verify_image, Error, Result};

/// The outcome of boot selection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootChoice {
    pub slot: u8,
    /// Flash offset of the image.
    pub offset: u32,
    /// Verified length of the image.
    pub length: usize,
    pub mode: BootMode,
    /// A GPIO boot was asked to wipe the SDK configuration area as well.
    pub erase_sdk_config: bool,
}

/// Pick and verify the slot to boot, and record the decision in the control
/// block.  A temporary boot request is consumed by this.
///
/// If the candidate fails verification and a standard boot ends up on another
/// slot, that slot becomes the configured current slot.
pub fn select_boot_slot<F: Flash, M: Retained>(
    flash: &mut F,
    mem: &mut M,
    config_store: &ConfigStore,
    rtc_store: &RtcStore,
    gpio: bool,
) -> Result<BootChoice> {
    let mut config = config_store.get_config(flash)?;
    let count = config.slot_count();
    if count == 0 {
        return Err(Error::NoBootableSlot);
    }
    let rtc = rtc_store.get_rtc_data(mem)?;
    let current = if config.current_slot < count {
        config.current_slot
    } else {
        0
    };

    let (slot, mode) = candidate(&config, current, rtc.as_ref(), gpio);
    debug!("boot candidate slot {}", slot);

    let (slot, mode, length) = match try_slot(flash, &config, slot)? {
        Some(length) => (slot, mode, length),
        None => {
            warn!("slot {} not bootable, searching", slot);
            let (found, length) = (0..count)
                .map(|step| (current + step) % count)
                .filter(|&s| s != slot)
                .find_map(|s| match try_slot(flash, &config, s) {
                    Ok(Some(length)) => Some(Ok((s, length))),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                })
                .ok_or(Error::NoBootableSlot)??;
            if found != config.current_slot {
                config.current_slot = found;
                config_store.set_config(flash, &config)?;
            }
            (found, BootMode::Standard, length)
        }
    };

    let offset = config.slot_offset(slot).ok_or(Error::InvalidSlot(slot))?;
    let record = RtcData {
        next_mode: BootMode::Standard,
        last_mode: mode,
        last_slot: slot,
        temp_slot: rtc.map(|d| d.temp_slot).unwrap_or(0),
    };
    rtc_store.set_rtc_data(mem, &record)?;

    debug!("booting slot {} at {:#x}", slot, offset);
    Ok(BootChoice {
        slot,
        offset,
        length,
        mode,
        erase_sdk_config: mode == BootMode::GpioSlot && config.has_mode(MODE_GPIO_ERASES_SDKCONFIG),
    })
}

fn candidate(config: &Config, current: u8, rtc: Option<&RtcData>, gpio: bool) -> (u8, BootMode) {
    let count = config.slot_count();
    if let Some(rtc) = rtc {
        if rtc.next_mode == BootMode::TempSlot && rtc.temp_slot < count {
            return (rtc.temp_slot, BootMode::TempSlot);
        }
    }
    if gpio {
        if config.has_mode(MODE_GPIO_SKIP) {
            return ((current + 1) % count, BootMode::GpioSlot);
        }
        if config.has_mode(MODE_GPIO_SLOT) && config.gpio_slot < count {
            return (config.gpio_slot, BootMode::GpioSlot);
        }
    }
    (current, BootMode::Standard)
}

/// Verified length of the image in `slot`, or None if it is not bootable.
/// Flash failures are passed up rather than treated as a bad image.
fn try_slot<F: Flash>(flash: &mut F, config: &Config, slot: u8) -> Result<Option<usize>> {
    let Some(offset) = config.slot_offset(slot) else {
        return Ok(None);
    };
    match verify_image(flash, offset as usize) {
        Ok(length) => Ok(Some(length)),
        Err(e) if e.is_integrity() => Ok(None),
        Err(e) => Err(e),
    }
}
