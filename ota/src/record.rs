//! Selection records.
//!
//! A record is 32 bytes, little endian:
//!
//! ```text
//! legacy:   | seq: u32 | label: [u8; 24]                 | crc: u32 |
//! rollback: | seq: u32 | label: [u8; 20] | state: u32    | crc: u32 |
//! ```
//!
//! The checksum only covers `seq`.  A record is therefore exactly as tamper
//! evident as its sequence number, which is all the selection logic reads.

use byteorder::{ByteOrder, LittleEndian};
use crc::{Algorithm, Crc};

/// Sequence (and state) value of erased flash.
pub const SEQ_ERASED: u32 = u32::MAX;

/// Encoded size of every record layout.
pub const RECORD_SIZE: usize = 32;

/// Label capacity of the legacy layout.  The rollback layout gives up the
/// last four bytes for the state word.
pub const LABEL_LEN: usize = 24;

/// CRC-32 (reflected 0x04c11db7) with the register starting at zero and the
/// result inverted.  This is what `crc32_le(0xffffffff, ..)` computes in the
/// boot ROMs that first used this record.
const CRC_32_SEQ: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04c1_1db7,
    init: 0x0000_0000,
    refin: true,
    refout: true,
    xorout: 0xffff_ffff,
    check: 0xd202_d277,
    residue: 0xdebb_20e3,
};

static CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_SEQ);

/// Checksum stored alongside `sequence`.
pub fn sequence_checksum(sequence: u32) -> u32 {
    CRC.checksum(&sequence.to_le_bytes())
}

/// Validity of the image named by a record.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RollbackState {
    /// Written by an update, never booted.
    New,
    /// Booted once, waiting for the image to confirm itself.
    PendingVerify,
    /// Confirmed by the running image.
    Valid,
    /// Rejected by the running image.
    Invalid,
    /// Still unconfirmed when the next boot came around.
    Aborted,
    /// The record does not track rollback at all.
    Undefined,
}

impl RollbackState {
    pub fn from_raw(raw: u32) -> RollbackState {
        match raw {
            0 => RollbackState::New,
            1 => RollbackState::PendingVerify,
            2 => RollbackState::Valid,
            3 => RollbackState::Invalid,
            4 => RollbackState::Aborted,
            _ => RollbackState::Undefined,
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            RollbackState::New => 0,
            RollbackState::PendingVerify => 1,
            RollbackState::Valid => 2,
            RollbackState::Invalid => 3,
            RollbackState::Aborted => 4,
            RollbackState::Undefined => SEQ_ERASED,
        }
    }

    /// Images in these states must not be booted.
    pub fn is_rejected(self) -> bool {
        matches!(self, RollbackState::Invalid | RollbackState::Aborted)
    }
}

/// Which of the two on-flash shapes the records use.  The configuration asks
/// for one; records already on flash can overrule it (see `detect`).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordLayout {
    /// No state word; every intact record counts as valid.
    Legacy,
    /// Label trimmed to 20 bytes to make room for the state word.
    Rollback,
}

impl RecordLayout {
    pub fn supports_rollback(self) -> bool {
        self == RecordLayout::Rollback
    }

    pub fn label_len(self) -> usize {
        match self {
            RecordLayout::Legacy => LABEL_LEN,
            RecordLayout::Rollback => LABEL_LEN - 4,
        }
    }

    /// Settle on a layout for records that are already on flash.
    ///
    /// A legacy record keeps label text where the rollback layout has its
    /// state word.  An intact record whose word there is not a state we know
    /// was therefore written without state tracking, and the store stays
    /// legacy.  A legacy label that happens to spell a known state cannot be
    /// told apart and is read as `wanted`.
    pub fn detect(wanted: RecordLayout, raws: &[[u8; RECORD_SIZE]]) -> RecordLayout {
        if wanted == RecordLayout::Legacy {
            return wanted;
        }
        let foreign = raws.iter().any(|raw| {
            let rec = RecordLayout::Rollback.decode(raw);
            rec.is_intact() && !rec.has_known_state()
        });
        if foreign {
            RecordLayout::Legacy
        } else {
            wanted
        }
    }

    pub fn decode(self, raw: &[u8; RECORD_SIZE]) -> Record {
        let mut label = [0xff; LABEL_LEN];
        let label_len = self.label_len();
        label[..label_len].copy_from_slice(&raw[4..4 + label_len]);
        let state = match self {
            RecordLayout::Legacy => SEQ_ERASED,
            RecordLayout::Rollback => LittleEndian::read_u32(&raw[24..28]),
        };
        Record {
            sequence: LittleEndian::read_u32(&raw[0..4]),
            label,
            state,
            checksum: LittleEndian::read_u32(&raw[28..32]),
        }
    }

    pub fn encode(self, record: &Record) -> [u8; RECORD_SIZE] {
        let mut raw = [0xff; RECORD_SIZE];
        let label_len = self.label_len();
        LittleEndian::write_u32(&mut raw[0..4], record.sequence);
        raw[4..4 + label_len].copy_from_slice(&record.label[..label_len]);
        if self == RecordLayout::Rollback {
            LittleEndian::write_u32(&mut raw[24..28], record.state);
        }
        LittleEndian::write_u32(&mut raw[28..32], record.checksum);
        raw
    }
}

/// One selection record, independent of layout.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Record {
    pub sequence: u32,
    /// Opaque tag, kept for diagnostics only.
    pub label: [u8; LABEL_LEN],
    /// Raw state word, kept raw so an unknown value survives a rewrite.
    state: u32,
    pub checksum: u32,
}

impl Record {
    /// What an erased region decodes to.
    pub const fn erased() -> Record {
        Record {
            sequence: SEQ_ERASED,
            label: [0xff; LABEL_LEN],
            state: SEQ_ERASED,
            checksum: SEQ_ERASED,
        }
    }

    /// Stand-in for a region that could not be read.  Not erased, and its
    /// checksum never matches.
    pub const fn unreadable() -> Record {
        Record {
            sequence: 0,
            label: [0xff; LABEL_LEN],
            state: SEQ_ERASED,
            checksum: 0,
        }
    }

    pub fn state(&self) -> RollbackState {
        RollbackState::from_raw(self.state)
    }

    pub fn set_state(&mut self, state: RollbackState) {
        self.state = state.to_raw();
    }

    fn has_known_state(&self) -> bool {
        self.state == SEQ_ERASED || RollbackState::from_raw(self.state) != RollbackState::Undefined
    }

    /// Does this record carry rollback tracking?
    pub fn is_tracked(&self) -> bool {
        self.state() != RollbackState::Undefined
    }

    /// Take a new sequence number, keeping the label and state.
    pub fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence;
        self.checksum = sequence_checksum(sequence);
    }

    pub fn is_erased(&self) -> bool {
        self.sequence == SEQ_ERASED
    }

    /// Written, and the checksum agrees with the sequence.
    pub fn is_intact(&self) -> bool {
        !self.is_erased() && self.checksum == sequence_checksum(self.sequence)
    }

    pub fn is_valid(&self) -> bool {
        self.is_intact() && !self.state().is_rejected()
    }

    /// Intact, but the image it names has been turned down.
    pub fn is_rejected(&self) -> bool {
        self.is_intact() && self.state().is_rejected()
    }

    /// The zero based slot this record names.  Sequence one is slot zero.
    /// With no slots at all there is nothing to name, and the answer is 0.
    pub fn slot(&self, slot_count: u8) -> u8 {
        match slot_count {
            0 => 0,
            n => (self.sequence.wrapping_sub(1) % u32::from(n)) as u8,
        }
    }
}
