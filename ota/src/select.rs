//! Boot target resolution and update target allocation.
//!
//! Sequence numbers only ever grow, while slot indices wrap: the slot named
//! by a record is `(sequence - 1) % slot_count`.  Allocating slot `t` means
//! finding the smallest sequence above everything currently valid that maps
//! to `t`, and writing it over whichever record is not the current winner.

use crate::record::{Record, SEQ_ERASED};
use crate::{Error, Result};

/// Outcome of reading the two records.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Selection {
    /// Both regions erased: nothing has ever been selected.
    Virgin,
    /// `region` holds the winning record, which names `slot`.
    Active { region: usize, sequence: u32, slot: u8 },
}

/// Region holding the valid record with the highest sequence.  Ties go to
/// region 0.
pub fn active_region(records: &[Record; 2]) -> Option<usize> {
    match (records[0].is_valid(), records[1].is_valid()) {
        (true, true) if records[1].sequence > records[0].sequence => Some(1),
        (true, _) => Some(0),
        (false, true) => Some(1),
        (false, false) => None,
    }
}

/// Decide which slot should boot.
pub fn resolve(records: &[Record; 2], slot_count: u8) -> Result<Selection> {
    if slot_count == 0 {
        return Err(Error::InvalidArgument);
    }
    if records[0].is_erased() && records[1].is_erased() {
        return Ok(Selection::Virgin);
    }
    let region = active_region(records).ok_or(Error::SelectionInvalid)?;
    let record = &records[region];
    Ok(Selection::Active {
        region,
        sequence: record.sequence,
        slot: record.slot(slot_count),
    })
}

/// Where and what the next record goes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Allocation {
    pub region: usize,
    pub sequence: u32,
}

/// Work out the record that makes `target` the boot slot.
///
/// The region written is never the one holding the current winner, so an
/// interrupted write still resolves to the previous slot.
pub fn allocate(records: &[Record; 2], target: u8, slot_count: u8) -> Result<Allocation> {
    if target >= slot_count {
        return Err(Error::InvalidArgument);
    }

    if let Some(active) = active_region(records) {
        let sequence = next_sequence(records[active].sequence, target, slot_count)?;
        return Ok(Allocation {
            region: 1 - active,
            sequence,
        });
    }

    if records[0].is_erased() && records[1].is_erased() {
        return Ok(Allocation {
            region: 0,
            sequence: u32::from(target) + 1,
        });
    }

    // Nothing valid, but every record that is present is intact and was only
    // turned down.  That is still well defined: stay above all of them and
    // overwrite the lower one.
    if records.iter().all(|r| r.is_erased() || r.is_intact()) {
        let seq = |r: &Record| if r.is_erased() { 0 } else { r.sequence };
        let (low, high) = if seq(&records[1]) < seq(&records[0]) {
            (1, 0)
        } else {
            (0, 1)
        };
        let sequence = next_sequence(seq(&records[high]), target, slot_count)?;
        return Ok(Allocation {
            region: low,
            sequence,
        });
    }

    Err(Error::SelectionInvalid)
}

/// Smallest sequence above `floor` that maps to `target`.
///
/// Equivalent to starting at `target + 1` and adding `slot_count` until the
/// floor is passed.
pub fn next_sequence(floor: u32, target: u8, slot_count: u8) -> Result<u32> {
    let first = u64::from(target) + 1;
    let step = u64::from(slot_count);
    let floor = u64::from(floor);
    let sequence = if floor < first {
        first
    } else {
        first + ((floor - first) / step + 1) * step
    };
    if sequence >= u64::from(SEQ_ERASED) {
        return Err(Error::SequenceOverflow);
    }
    Ok(sequence as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RollbackState;

    fn rec(seq: u32) -> Record {
        let mut r = Record::erased();
        r.set_sequence(seq);
        r
    }

    fn rejected(seq: u32) -> Record {
        let mut r = rec(seq);
        r.set_state(RollbackState::Aborted);
        r
    }

    fn corrupt(seq: u32) -> Record {
        let mut r = rec(seq);
        r.checksum ^= 0x100;
        r
    }

    const E: Record = Record::erased();

    #[test]
    fn resolve_cases() {
        assert_eq!(resolve(&[E, E], 2), Ok(Selection::Virgin));
        assert_eq!(
            resolve(&[rec(1), E], 2),
            Ok(Selection::Active { region: 0, sequence: 1, slot: 0 })
        );
        assert_eq!(
            resolve(&[rec(3), rec(4)], 2),
            Ok(Selection::Active { region: 1, sequence: 4, slot: 1 })
        );
        assert_eq!(
            resolve(&[rec(6), corrupt(7)], 3),
            Ok(Selection::Active { region: 0, sequence: 6, slot: 2 })
        );
        assert_eq!(
            resolve(&[rejected(9), rec(8)], 4),
            Ok(Selection::Active { region: 1, sequence: 8, slot: 3 })
        );
        assert_eq!(resolve(&[corrupt(1), corrupt(2)], 2), Err(Error::SelectionInvalid));
        assert_eq!(resolve(&[corrupt(1), E], 2), Err(Error::SelectionInvalid));
        assert_eq!(resolve(&[E, E], 0), Err(Error::InvalidArgument));
    }

    #[test]
    fn first_allocation() {
        assert_eq!(allocate(&[E, E], 0, 2), Ok(Allocation { region: 0, sequence: 1 }));
        assert_eq!(allocate(&[E, E], 3, 4), Ok(Allocation { region: 0, sequence: 4 }));
        assert_eq!(allocate(&[E, E], 2, 2), Err(Error::InvalidArgument));
    }

    #[test]
    fn rotate_to_other_region() {
        // Slot 0 active at seq 1; switching to slot 1 writes seq 2 next door.
        assert_eq!(allocate(&[rec(1), E], 1, 2), Ok(Allocation { region: 1, sequence: 2 }));
        // Same target again still moves forward.
        assert_eq!(allocate(&[rec(1), rec(2)], 1, 2), Ok(Allocation { region: 0, sequence: 4 }));
        // The lower sequence is always the one overwritten.
        assert_eq!(allocate(&[rec(10), rec(9)], 0, 3), Ok(Allocation { region: 1, sequence: 13 }));
        // A corrupt neighbour is simply overwritten.
        assert_eq!(
            allocate(&[corrupt(50), rec(5)], 0, 2),
            Ok(Allocation { region: 0, sequence: 7 })
        );
    }

    #[test]
    fn allocation_past_rejected_records() {
        assert_eq!(
            allocate(&[rejected(5), E], 0, 2),
            Ok(Allocation { region: 1, sequence: 7 })
        );
        assert_eq!(
            allocate(&[rejected(5), rejected(6)], 1, 2),
            Ok(Allocation { region: 0, sequence: 8 })
        );
        assert_eq!(allocate(&[corrupt(3), E], 0, 2), Err(Error::SelectionInvalid));
        assert_eq!(allocate(&[corrupt(3), rejected(2)], 0, 2), Err(Error::SelectionInvalid));
    }

    #[test]
    fn next_sequence_matches_search() {
        for n in 1..=16u8 {
            for t in 0..n {
                for floor in 0..64u32 {
                    let mut seq = u32::from(t) + 1;
                    while seq <= floor {
                        seq += u32::from(n);
                    }
                    assert_eq!(next_sequence(floor, t, n), Ok(seq));
                }
            }
        }
    }

    #[test]
    fn sequence_overflow() {
        assert_eq!(next_sequence(SEQ_ERASED - 1, 0, 1), Err(Error::SequenceOverflow));
        assert_eq!(next_sequence(SEQ_ERASED - 3, 0, 2), Ok(SEQ_ERASED - 2));
    }
}
