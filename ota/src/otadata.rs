//! The dual-sector record store.
//!
//! The OTA data partition holds two regions, each one erase block long, with
//! a record at the start of each.  A write erases and rewrites exactly one
//! region, leaving the other as it was.

use storage::{Flash, ReadFlash};

use crate::fmt::{debug, warn};
use crate::partition::{Partition, PartitionFlash};
use crate::record::{Record, RecordLayout, RECORD_SIZE};
use crate::{Error, Result, MAX_WRITE_SIZE};

pub struct OtaData {
    part: Partition,
    /// The layout asked for by the configuration.
    wanted: RecordLayout,
    /// The layout records are read and written in.
    layout: RecordLayout,
}

impl OtaData {
    pub fn new(part: Partition, layout: RecordLayout) -> Result<OtaData> {
        if part.size < 2 * part.erase_size || part.erase_size < RECORD_SIZE {
            return Err(Error::InvalidArgument);
        }
        Ok(OtaData {
            part,
            wanted: layout,
            layout,
        })
    }

    /// Look at the records already on flash and switch to the layout they
    /// were written in.  Legacy records keep the store legacy until the
    /// partition is erased.
    pub fn adopt_layout<F: Flash>(&mut self, flash: &mut F) {
        // An unreadable region says nothing about the layout.
        let mut raws = [[0xff; RECORD_SIZE]; 2];
        for (region, raw) in raws.iter_mut().enumerate() {
            if let Ok(bytes) = self.read_raw(flash, region) {
                *raw = bytes;
            }
        }
        let layout = RecordLayout::detect(self.wanted, &raws);
        if layout != self.layout {
            warn!("otadata holds {:?} records, using that layout", layout);
            self.layout = layout;
        }
    }

    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    pub fn partition(&self) -> &Partition {
        &self.part
    }

    fn region_offset(&self, region: usize) -> Result<usize> {
        match region {
            0 | 1 => Ok(region * self.part.erase_size),
            _ => Err(Error::InvalidArgument),
        }
    }

    fn read_raw<F: Flash>(&self, flash: &mut F, region: usize) -> Result<[u8; RECORD_SIZE]> {
        let offset = self.region_offset(region)?;
        let mut raw = [0u8; RECORD_SIZE];
        PartitionFlash::new(flash, &self.part)?.read(offset, &mut raw)?;
        Ok(raw)
    }

    /// Read and decode a single region.
    pub fn read<F: Flash>(&self, flash: &mut F, region: usize) -> Result<Record> {
        Ok(self.layout.decode(&self.read_raw(flash, region)?))
    }

    /// Read both regions.  A region that cannot be read comes back as a
    /// record that is neither erased nor valid.
    pub fn read_both<F: Flash>(&self, flash: &mut F) -> [Record; 2] {
        let mut records = [Record::unreadable(); 2];
        for (region, record) in records.iter_mut().enumerate() {
            match self.read(flash, region) {
                Ok(rec) => *record = rec,
                Err(e) => warn!("otadata region {} unreadable: {:?}", region, e),
            }
        }
        records
    }

    /// Erase one region and write `record` into it.
    pub fn write<F: Flash>(&self, flash: &mut F, region: usize, record: &Record) -> Result<()> {
        let offset = self.region_offset(region)?;
        let mut view = PartitionFlash::new(flash, &self.part)?;

        let write_size = view.write_size();
        if write_size > MAX_WRITE_SIZE {
            return Err(Error::InvalidArgument);
        }
        let len = storage::align_up(RECORD_SIZE, write_size);
        let mut buf = [0xff; MAX_WRITE_SIZE];
        buf[..RECORD_SIZE].copy_from_slice(&self.layout.encode(record));

        debug!(
            "otadata region {} <- seq {} state {:?}",
            region,
            record.sequence,
            record.state()
        );
        view.erase(offset, offset + self.part.erase_size)?;
        view.write(offset, &buf[..len])?;
        Ok(())
    }

    /// Erase a single region, leaving it reading as erased.
    pub fn erase_region<F: Flash>(&self, flash: &mut F, region: usize) -> Result<()> {
        let offset = self.region_offset(region)?;
        PartitionFlash::new(flash, &self.part)?.erase(offset, offset + self.part.erase_size)?;
        Ok(())
    }

    /// Erase the whole partition.  Both regions read as erased afterwards,
    /// and new records use the configured layout again.
    pub fn erase_all<F: Flash>(&mut self, flash: &mut F) -> Result<()> {
        PartitionFlash::new(flash, &self.part)?.erase(0, self.part.size)?;
        self.layout = self.wanted;
        Ok(())
    }
}
