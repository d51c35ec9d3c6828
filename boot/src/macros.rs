//! Logging.
//!
//! On target, logging goes through `defmt` when the `defmt` feature is on.  On
//! a host build with `std` it goes to stderr, which makes the simulator tests
//! readable.  Otherwise the macros vanish, only touching their arguments to
//! keep them used.
//!
//! Format strings must stay within what both `defmt` and `core::fmt` accept:
//! plain `{}` and `{:#x}` of integers and `&str`.

#[cfg(feature = "defmt")]
macro_rules! debug {
    ($($arg:tt)+) => { defmt::debug!($($arg)+) };
}

#[cfg(feature = "defmt")]
macro_rules! warn {
    ($($arg:tt)+) => { defmt::warn!($($arg)+) };
}

#[cfg(all(feature = "std", not(feature = "defmt")))]
macro_rules! debug {
    ($($arg:tt)+) => { std::eprintln!("rboot: {}", format_args!($($arg)+)) };
}

#[cfg(all(feature = "std", not(feature = "defmt")))]
macro_rules! warn {
    ($($arg:tt)+) => { std::eprintln!("rboot: warning: {}", format_args!($($arg)+)) };
}

#[cfg(not(any(feature = "std", feature = "defmt")))]
macro_rules! debug {
    ($fmt:literal $(, $arg:expr)* $(,)?) => { { $( let _ = &$arg; )* } };
}

#[cfg(not(any(feature = "std", feature = "defmt")))]
macro_rules! warn {
    ($fmt:literal $(, $arg:expr)* $(,)?) => { { $( let _ = &$arg; )* } };
}
