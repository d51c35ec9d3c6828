//! AsRaw provides a safe way to view a structure as its bytes, and an unsafe
//! way to have this as a mutable view.  Generally, this is safe and meaningful
//! for structures that are repr(C) with no implicit padding.  `as_mut_raw` is
//! only safe in this case.
//!
//! The on-flash and retained-memory records of the boot core are all declared
//! this way, with explicit padding fields, so they can be read and written
//! directly.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

use core::{mem, slice};

pub trait AsRaw : Sized {
    fn as_raw(&self) -> &[u8] {
        unsafe {
            slice::from_raw_parts(self as *const _ as *const u8,
                                  mem::size_of::<Self>())
        }
    }
}

/// Provide a view into a structure.  This is an unsafe trait, because, in
/// general, it isn't safe to interpret arbitrary bytes as another type.
/// However, if the struct is `repr(C)`, and all types used are valid for all
/// possible values, this will be safe.
pub unsafe trait AsMutRaw : Sized {
    fn as_mut_raw(&mut self) -> &mut [u8] {
        unsafe {
            slice::from_raw_parts_mut(self as *mut _ as *mut u8,
                                      mem::size_of::<Self>())
        }
    }

    /// Build a value by letting `fill` supply its bytes, typically a read
    /// from a device.
    fn read_from<E>(fill: impl FnOnce(&mut [u8]) -> Result<(), E>) -> Result<Self, E>
    where
        Self: Default,
    {
        let mut item = Self::default();
        fill(item.as_mut_raw())?;
        Ok(item)
    }
}
