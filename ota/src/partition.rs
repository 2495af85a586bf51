//! Partition descriptors.
//!
//! Parsing the partition table is somebody else's job.  What arrives here is
//! a list of descriptors, which we check for the few properties the rest of
//! the crate relies on: erase alignment, no overlaps, and no duplicate roles.

use storage::{check_erase, check_read, check_write, Flash, ReadFlash};

use crate::{Error, Result, MAX_OTA_SLOTS};

/// Most partitions a table may hold.
pub const MAX_PARTITIONS: usize = 24;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PartitionKind {
    /// The image the device shipped with.  Never rotated.
    Factory,
    /// A test image, only ever booted as a last resort.
    Test,
    /// Rotating update slot `n`.
    Ota(u8),
    /// The two-sector selection record area.
    OtaData,
    /// Anything else; the OTA code leaves it alone.
    Other,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Partition {
    pub kind: PartitionKind,
    /// Offset of the partition on the flash device.
    pub address: usize,
    pub size: usize,
    pub erase_size: usize,
    pub encrypted: bool,
    pub label: &'static str,
}

impl Partition {
    pub const fn new(
        kind: PartitionKind,
        address: usize,
        size: usize,
        erase_size: usize,
        label: &'static str,
    ) -> Partition {
        Partition {
            kind,
            address,
            size,
            erase_size,
            encrypted: false,
            label,
        }
    }

    pub fn end(&self) -> usize {
        self.address + self.size
    }

    /// The rotating slot index, if this is an update slot.
    pub fn slot(&self) -> Option<u8> {
        match self.kind {
            PartitionKind::Ota(n) => Some(n),
            _ => None,
        }
    }

    /// Partitions that hold something bootable.
    pub fn is_app(&self) -> bool {
        matches!(
            self.kind,
            PartitionKind::Factory | PartitionKind::Test | PartitionKind::Ota(_)
        )
    }

    fn overlaps(&self, other: &Partition) -> bool {
        self.address < other.end() && other.address < self.end()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PartitionTable {
    parts: heapless::Vec<Partition, MAX_PARTITIONS>,
}

impl PartitionTable {
    pub fn new() -> PartitionTable {
        PartitionTable {
            parts: heapless::Vec::new(),
        }
    }

    pub fn from_slice(parts: &[Partition]) -> Result<PartitionTable> {
        let mut table = PartitionTable::new();
        for part in parts {
            table.push(*part)?;
        }
        Ok(table)
    }

    pub fn push(&mut self, part: Partition) -> Result<()> {
        if part.size == 0
            || part.erase_size == 0
            || part.address % part.erase_size != 0
            || part.size % part.erase_size != 0
        {
            return Err(Error::InvalidArgument);
        }
        if let PartitionKind::Ota(n) = part.kind {
            if n >= MAX_OTA_SLOTS {
                return Err(Error::InvalidArgument);
            }
        }
        for have in &self.parts {
            let same_role = have.kind == part.kind && part.kind != PartitionKind::Other;
            if same_role || have.overlaps(&part) {
                return Err(Error::InvalidArgument);
            }
        }
        self.parts.push(part).map_err(|_| Error::NoMemory)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.parts.iter()
    }

    pub fn find(&self, kind: PartitionKind) -> Option<&Partition> {
        self.parts.iter().find(|p| p.kind == kind)
    }

    pub fn ota_slot(&self, slot: u8) -> Option<&Partition> {
        self.find(PartitionKind::Ota(slot))
    }

    pub fn ota_data(&self) -> Option<&Partition> {
        self.find(PartitionKind::OtaData)
    }

    pub fn factory(&self) -> Option<&Partition> {
        self.find(PartitionKind::Factory)
    }

    pub fn test(&self) -> Option<&Partition> {
        self.find(PartitionKind::Test)
    }

    /// Number of update slots numbered contiguously from zero.
    pub fn ota_slot_count(&self) -> u8 {
        (0..MAX_OTA_SLOTS)
            .take_while(|n| self.ota_slot(*n).is_some())
            .count() as u8
    }

    /// Is this exact descriptor part of the table?
    pub fn contains(&self, part: &Partition) -> bool {
        self.parts.iter().any(|p| p == part)
    }
}

/// A single flash partition.  References the parent device and confines
/// every access to the partition's bounds.
pub struct PartitionFlash<'a, F> {
    flash: &'a mut F,
    base: usize,
    length: usize,
}

impl<'a, F: Flash> PartitionFlash<'a, F> {
    pub fn new(flash: &'a mut F, part: &Partition) -> Result<Self> {
        let end = part.address.checked_add(part.size).ok_or(Error::InvalidArgument)?;
        if end > flash.capacity() {
            return Err(Error::Flash(storage::Error::OutOfBounds));
        }
        Ok(PartitionFlash {
            flash,
            base: part.address,
            length: part.size,
        })
    }
}

impl<'a, F: Flash> ReadFlash for PartitionFlash<'a, F> {
    fn read_size(&self) -> usize {
        self.flash.read_size()
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> storage::Result<()> {
        check_read(self, offset, bytes.len())?;
        self.flash.read(self.base + offset, bytes)
    }

    fn capacity(&self) -> usize {
        self.length
    }
}

impl<'a, F: Flash> Flash for PartitionFlash<'a, F> {
    fn write_size(&self) -> usize {
        self.flash.write_size()
    }

    fn erase_size(&self) -> usize {
        self.flash.erase_size()
    }

    fn erase(&mut self, from: usize, to: usize) -> storage::Result<()> {
        check_erase(self, from, to)?;
        self.flash.erase(self.base + from, self.base + to)
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> storage::Result<()> {
        check_write(self, offset, bytes.len())?;
        self.flash.write(self.base + offset, bytes)
    }
}
