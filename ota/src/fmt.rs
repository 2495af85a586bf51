//! Logging shim.  `log` on hosted builds, `defmt` on targets that carry it,
//! and nothing at all otherwise.

#[cfg(feature = "defmt")]
pub(crate) use defmt::{debug, error, info, warn};

#[cfg(all(feature = "log", not(feature = "defmt")))]
pub(crate) use log::{debug, error, info, warn};

#[cfg(not(any(feature = "log", feature = "defmt")))]
mod quiet {
    macro_rules! debug {
        ($($t:tt)*) => {{}};
    }
    macro_rules! info {
        ($($t:tt)*) => {{}};
    }
    macro_rules! warner {
        ($($t:tt)*) => {{}};
    }
    macro_rules! error {
        ($($t:tt)*) => {{}};
    }
    pub(crate) use {debug, error, info, warner as warn};
}

#[cfg(not(any(feature = "log", feature = "defmt")))]
pub(crate) use quiet::{debug, error, info, warn};
