//! OTA slot bookkeeping for flash based devices.
//!
//! Two questions have to be answered correctly no matter when the power goes
//! away: which application slot boots next, and whether the image running
//! now is allowed to stay.  The answer lives in two small records at the
//! start of two erase blocks of the OTA data partition.  Each names a slot
//! through a sequence number, and whichever valid record holds the higher
//! sequence wins.  Updating only ever rewrites the losing record, so the
//! winner survives an interrupted erase or write.
//!
//! The pieces, leaves first:
//!
//! - `record`: the 32 byte selection record and its checksum.
//! - `otadata`: the pair of records on flash.
//! - `select`: resolving the boot slot, and allocating the next sequence.
//! - `rollback`: the per record validity state machine.
//! - `session`: streaming a new image into a spare slot.
//! - `Ota`: everything above behind one handle.
//!
//! Nothing in here locks.  Every mutating call takes `&mut Ota`, so a caller
//! sharing it between tasks has to hold its own lock around an update.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod fmt;

pub mod config;
pub mod image;
mod manager;
pub mod otadata;
pub mod partition;
pub mod record;
pub mod rollback;
pub mod select;
pub mod session;

pub use config::OtaConfig;
pub use image::{AcceptAll, ImageVerifier, Sha256Tlv};
pub use manager::Ota;
pub use partition::{Partition, PartitionFlash, PartitionKind, PartitionTable};
pub use record::{Record, RecordLayout, RollbackState};
pub use session::{SessionHandle, SizeHint};

pub type Result<T> = core::result::Result<T, Error>;

/// Largest device write size we will pad records and stream tails out to.
pub const MAX_WRITE_SIZE: usize = 512;

/// Most rotating update slots a device can have.
pub const MAX_OTA_SLOTS: u8 = 16;

// Use the error kind to avoid this depending on the particular flash.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Flash(storage::Error),
    InvalidArgument,
    NoMemory,
    NotFound,
    /// Neither selection record can be used, and they are not simply erased.
    SelectionInvalid,
    /// The image verifier rejected the image.
    ValidationFailed,
    /// The record layout carries no rollback state.
    NotSupported,
    /// The target slot is the one we are running from.
    PartitionConflict,
    /// The running image has not been confirmed yet.
    RollbackInvalidState,
    /// There is nothing to roll back to.
    RollbackFailed,
    /// The sequence counter would run into the erased value.
    SequenceOverflow,
}

/// Convert the flash error into our error type.
impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        Error::Flash(e)
    }
}

/// Whatever is able to reset the device.
pub trait System {
    /// Restart the device.  Called after a rollback has been recorded.
    fn restart(&mut self) -> !;
}
