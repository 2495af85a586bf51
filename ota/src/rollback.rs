//! Validity and rollback tracking.
//!
//! The state travels with whichever record currently names a slot:
//!
//! ```text
//! NEW --boot--> PENDING_VERIFY --confirm--> VALID
//!                     |
//!                     +--reject--> INVALID
//!                     +--next boot, still pending--> ABORTED
//! ```
//!
//! Records without a state word (`UNDEFINED`) are outside all of this: they
//! are always bootable and cannot be confirmed or rejected.

use crate::record::{Record, RollbackState};
use crate::{Error, Result};

/// What booting a record did to it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootTransition {
    /// Nothing to record.
    Unchanged,
    /// First boot of a fresh update; now waiting for confirmation.
    Pending,
    /// The previous boot never confirmed; the record is now rejected.
    Aborted,
}

/// Apply the boot-time transition to the record that is about to boot.
pub fn on_boot(record: &mut Record) -> BootTransition {
    match record.state() {
        RollbackState::New => {
            record.set_state(RollbackState::PendingVerify);
            BootTransition::Pending
        }
        RollbackState::PendingVerify => {
            record.set_state(RollbackState::Aborted);
            BootTransition::Aborted
        }
        _ => BootTransition::Unchanged,
    }
}

/// Mark the record's image as good.  Returns whether anything changed.
pub fn confirm(record: &mut Record) -> Result<bool> {
    match record.state() {
        RollbackState::Undefined => Err(Error::NotSupported),
        RollbackState::Valid => Ok(false),
        RollbackState::Invalid | RollbackState::Aborted => Err(Error::RollbackInvalidState),
        RollbackState::New | RollbackState::PendingVerify => {
            record.set_state(RollbackState::Valid);
            Ok(true)
        }
    }
}

/// Mark the record's image as rejected by the image itself.
pub fn reject(record: &mut Record) -> Result<()> {
    match record.state() {
        RollbackState::Undefined => Err(Error::NotSupported),
        _ => {
            record.set_state(RollbackState::Invalid);
            Ok(())
        }
    }
}

/// Region of the most recently rejected record, if any.
pub fn last_rejected_region(records: &[Record; 2]) -> Option<usize> {
    (0..2)
        .filter(|r| records[*r].is_rejected())
        .max_by_key(|r| records[*r].sequence)
}

/// The newest intact record naming `slot`.
pub fn record_for_slot(records: &[Record; 2], slot: u8, slot_count: u8) -> Option<usize> {
    (0..2)
        .filter(|r| records[*r].is_intact() && records[*r].slot(slot_count) == slot)
        .max_by_key(|r| records[*r].sequence)
}

/// State of `slot` as far as the records know it.
pub fn state_of(records: &[Record; 2], slot: u8, slot_count: u8) -> Result<RollbackState> {
    let region = record_for_slot(records, slot, slot_count).ok_or(Error::NotFound)?;
    match records[region].state() {
        RollbackState::Undefined => Err(Error::NotSupported),
        state => Ok(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(seq: u32, state: RollbackState) -> Record {
        let mut r = Record::erased();
        r.set_sequence(seq);
        r.set_state(state);
        r
    }

    #[test]
    fn boot_transitions() {
        let mut r = rec(1, RollbackState::New);
        assert_eq!(on_boot(&mut r), BootTransition::Pending);
        assert_eq!(r.state(), RollbackState::PendingVerify);
        assert_eq!(on_boot(&mut r), BootTransition::Aborted);
        assert_eq!(r.state(), RollbackState::Aborted);
        assert!(!r.is_valid());

        for state in [RollbackState::Valid, RollbackState::Undefined] {
            let mut r = rec(1, state);
            assert_eq!(on_boot(&mut r), BootTransition::Unchanged);
            assert_eq!(r.state(), state);
        }
    }

    #[test]
    fn confirm_rules() {
        let mut r = rec(2, RollbackState::PendingVerify);
        assert_eq!(confirm(&mut r), Ok(true));
        assert_eq!(r.state(), RollbackState::Valid);
        assert_eq!(confirm(&mut r), Ok(false));

        let mut r = rec(2, RollbackState::Undefined);
        assert_eq!(confirm(&mut r), Err(Error::NotSupported));
        let mut r = rec(2, RollbackState::Aborted);
        assert_eq!(confirm(&mut r), Err(Error::RollbackInvalidState));
    }

    #[test]
    fn reject_rules() {
        let mut r = rec(2, RollbackState::PendingVerify);
        reject(&mut r).unwrap();
        assert_eq!(r.state(), RollbackState::Invalid);
        let mut r = rec(2, RollbackState::Undefined);
        assert_eq!(reject(&mut r), Err(Error::NotSupported));
    }

    #[test]
    fn last_rejected() {
        let records = [rec(3, RollbackState::Invalid), rec(4, RollbackState::Aborted)];
        assert_eq!(last_rejected_region(&records), Some(1));
        let records = [rec(3, RollbackState::Invalid), rec(4, RollbackState::Valid)];
        assert_eq!(last_rejected_region(&records), Some(0));
        let records = [rec(3, RollbackState::Valid), Record::erased()];
        assert_eq!(last_rejected_region(&records), None);
    }

    #[test]
    fn state_lookup() {
        let records = [rec(1, RollbackState::Valid), rec(2, RollbackState::PendingVerify)];
        assert_eq!(state_of(&records, 0, 2), Ok(RollbackState::Valid));
        assert_eq!(state_of(&records, 1, 2), Ok(RollbackState::PendingVerify));
        assert_eq!(state_of(&records, 1, 3), Ok(RollbackState::PendingVerify));
        assert_eq!(state_of(&records, 2, 3), Err(Error::NotFound));

        // Both records naming the same slot: the newer one speaks.
        let records = [rec(2, RollbackState::Invalid), rec(4, RollbackState::New)];
        assert_eq!(state_of(&records, 1, 2), Ok(RollbackState::New));

        let records = [rec(1, RollbackState::Undefined), Record::erased()];
        assert_eq!(state_of(&records, 0, 2), Err(Error::NotSupported));
    }
}
