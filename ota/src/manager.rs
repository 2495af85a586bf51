use core::convert::Infallible;

use storage::{Flash, ReadFlash};

use crate::config::OtaConfig;
use crate::fmt::{debug, error, info, warn};
use crate::image::{AcceptAll, ImageVerifier};
use crate::otadata::OtaData;
use crate::partition::{Partition, PartitionFlash, PartitionKind, PartitionTable};
use crate::record::{Record, RollbackState};
use crate::rollback::{self, BootTransition};
use crate::select::{self, Selection};
use crate::session::{SessionHandle, Sessions, SizeHint};
use crate::{Error, Result, System, MAX_WRITE_SIZE};

/// The OTA state of one flash device.
///
/// Owns the flash driver, the partition table and any open write sessions.
/// Both the bootloader side (`boot`) and the application side (updates,
/// confirmation, rollback) go through here.
pub struct Ota<F, V = AcceptAll> {
    flash: F,
    table: PartitionTable,
    config: OtaConfig,
    otadata: OtaData,
    verifier: V,
    sessions: Sessions,
    running: Option<Partition>,
}

impl<F: Flash, V: ImageVerifier> Ota<F, V> {
    /// Take over `flash`.  The record layout follows the configuration,
    /// unless the records already on flash were written without state
    /// tracking; then rollback stays unsupported until the OTA data is
    /// erased.
    pub fn new(mut flash: F, table: PartitionTable, config: OtaConfig, verifier: V) -> Result<Self> {
        config.validate(&table)?;
        if flash.write_size() > MAX_WRITE_SIZE {
            return Err(Error::InvalidArgument);
        }
        for part in table.iter() {
            if part.erase_size % flash.erase_size() != 0 || part.end() > flash.capacity() {
                error!("partition {} does not fit the flash device", part.label);
                return Err(Error::InvalidArgument);
            }
        }
        let ota_data = *table.ota_data().ok_or(Error::NotFound)?;
        let mut otadata = OtaData::new(ota_data, config.record_layout())?;
        otadata.adopt_layout(&mut flash);
        debug!(
            "ota: {} slots, layout {:?}",
            config.slot_count,
            otadata.layout()
        );

        Ok(Ota {
            flash,
            table,
            config,
            otadata,
            verifier,
            sessions: Sessions::new(),
            running: None,
        })
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    pub fn table(&self) -> &PartitionTable {
        &self.table
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_flash(self) -> F {
        self.flash
    }

    /// Both selection records as they are on flash right now.
    pub fn records(&mut self) -> [Record; 2] {
        self.otadata.read_both(&mut self.flash)
    }

    /// Tell us which image is executing.  The bootloader hands this over to
    /// the application; `boot` sets it itself.
    pub fn assume_running(&mut self, part: &Partition) -> Result<()> {
        if !part.is_app() || !self.table.contains(part) {
            return Err(Error::InvalidArgument);
        }
        self.running = Some(*part);
        Ok(())
    }

    pub fn get_running_target(&self) -> Option<Partition> {
        self.running
    }

    /// Start writing a new image into `part`.
    pub fn begin_update(&mut self, part: &Partition, hint: SizeHint) -> Result<SessionHandle> {
        self.update_slot(part)?;
        if self.running == Some(*part) {
            return Err(Error::PartitionConflict);
        }
        if self.otadata.layout().supports_rollback()
            && self.running_state() == Some(RollbackState::PendingVerify)
        {
            error!("running image is not confirmed yet");
            return Err(Error::RollbackInvalidState);
        }
        self.sessions.begin(&mut self.flash, part, hint)
    }

    pub fn write_update(&mut self, handle: SessionHandle, bytes: &[u8]) -> Result<()> {
        self.sessions
            .write(&mut self.flash, &self.verifier, handle, bytes)
    }

    pub fn write_update_at(
        &mut self,
        handle: SessionHandle,
        offset: usize,
        bytes: &[u8],
    ) -> Result<()> {
        self.sessions
            .write_at(&mut self.flash, &self.verifier, handle, offset, bytes)
    }

    /// Close the session and verify what was written.  Returns the slot,
    /// ready to be passed to `set_boot_target`.
    pub fn end_update(&mut self, handle: SessionHandle) -> Result<Partition> {
        self.sessions.end(&mut self.flash, &self.verifier, handle)
    }

    pub fn abort_update(&mut self, handle: SessionHandle) -> Result<()> {
        self.sessions.abort(handle)
    }

    /// Make `part` the image that boots next.
    ///
    /// An update slot gets a new record written over the losing region.  The
    /// factory image is selected by erasing the OTA data altogether.
    pub fn set_boot_target(&mut self, part: &Partition) -> Result<()> {
        if !self.table.contains(part) {
            return Err(Error::InvalidArgument);
        }
        let slot = match part.kind {
            PartitionKind::Ota(slot) if slot < self.config.slot_count => Some(slot),
            PartitionKind::Factory => None,
            PartitionKind::Test => return Err(Error::NotSupported),
            _ => return Err(Error::InvalidArgument),
        };
        verify_image(&mut self.flash, &self.verifier, part)?;

        let Some(slot) = slot else {
            info!("boot target: factory, erasing otadata");
            return self.otadata.erase_all(&mut self.flash);
        };

        let records = self.records();
        let alloc = select::allocate(&records, slot, self.config.slot_count)?;
        let mut record = records[alloc.region];
        record.set_sequence(alloc.sequence);
        record.set_state(if self.otadata.layout().supports_rollback() {
            RollbackState::New
        } else {
            RollbackState::Undefined
        });
        info!(
            "boot target: {} (seq {}, region {})",
            part.label, alloc.sequence, alloc.region
        );
        self.otadata.write(&mut self.flash, alloc.region, &record)
    }

    /// The partition that will boot next, going by the records alone.
    pub fn get_boot_target(&mut self) -> Option<Partition> {
        let records = self.records();
        match select::resolve(&records, self.config.slot_count) {
            Ok(Selection::Virgin) => self.factory_or_first(),
            Ok(Selection::Active { slot, .. }) => self.table.ota_slot(slot).copied(),
            Err(e) => {
                warn!("no usable selection record: {:?}", e);
                self.table.factory().copied()
            }
        }
    }

    /// The slot an update should go to, following `start` (the running
    /// image if `None`).  Never the running image.
    pub fn get_next_update_target(&self, start: Option<&Partition>) -> Option<Partition> {
        let from = start.copied().or(self.running);
        let slot = match from.and_then(|p| p.slot()) {
            Some(slot) => (slot + 1) % self.config.slot_count,
            None => 0,
        };
        let next = self.table.ota_slot(slot).copied()?;
        if self.running == Some(next) {
            return None;
        }
        Some(next)
    }

    /// Record that the running image works.
    pub fn confirm_valid(&mut self) -> Result<()> {
        if !self.otadata.layout().supports_rollback() {
            return Err(Error::NotSupported);
        }
        let (region, mut record) = self.running_record()?;
        if rollback::confirm(&mut record)? {
            info!("slot {} confirmed", record.slot(self.config.slot_count));
            self.otadata.write(&mut self.flash, region, &record)?;
        }
        Ok(())
    }

    /// Mark the running image invalid, so the next boot picks the previous
    /// one.  Does not restart.
    pub fn invalidate_running(&mut self) -> Result<()> {
        if !self.otadata.layout().supports_rollback() {
            return Err(Error::NotSupported);
        }
        let (region, mut record) = self.running_record()?;
        if !self.check_rollback_is_possible() {
            error!("nothing to roll back to");
            return Err(Error::RollbackFailed);
        }
        rollback::reject(&mut record)?;
        warn!(
            "slot {} marked invalid, rolling back",
            record.slot(self.config.slot_count)
        );
        self.otadata.write(&mut self.flash, region, &record)
    }

    /// Reject the running image and restart into the previous one.  Only
    /// returns if the rejection could not be recorded.
    pub fn reject_and_rollback<S: System>(&mut self, system: &mut S) -> Result<Infallible> {
        self.invalidate_running()?;
        system.restart()
    }

    /// Rollback state of an update slot.
    pub fn get_state(&mut self, part: &Partition) -> Result<RollbackState> {
        let slot = part.slot().ok_or(Error::NotSupported)?;
        if !self.table.contains(part) {
            return Err(Error::InvalidArgument);
        }
        if !self.otadata.layout().supports_rollback() {
            return Err(Error::NotSupported);
        }
        let records = self.records();
        rollback::state_of(&records, slot, self.config.slot_count)
    }

    /// The most recently rejected slot.
    pub fn last_invalid_target(&mut self) -> Option<Partition> {
        let records = self.records();
        let region = rollback::last_rejected_region(&records)?;
        let slot = records[region].slot(self.config.slot_count);
        self.table.ota_slot(slot).copied()
    }

    /// Is there anything to fall back to if the running image is rejected?
    /// Either the other record names a different slot holding a good image,
    /// or there is a good factory image.
    pub fn check_rollback_is_possible(&mut self) -> bool {
        let n = self.config.slot_count;
        let records = self.records();
        if let Some(active) = select::active_region(&records) {
            let other = &records[1 - active];
            if other.is_valid() {
                if let Some(part) = self.table.ota_slot(other.slot(n)).copied() {
                    if self.running != Some(part)
                        && verify_image(&mut self.flash, &self.verifier, &part).is_ok()
                    {
                        return true;
                    }
                }
            }
        }
        match self.table.factory().copied() {
            Some(factory) => verify_image(&mut self.flash, &self.verifier, &factory).is_ok(),
            None => false,
        }
    }

    /// Erase the slot named by the losing record, along with the record.
    /// Used to make sure an old image cannot come back.
    pub fn erase_last_boot_target(&mut self) -> Result<Partition> {
        let records = self.records();
        let active = select::active_region(&records).ok_or(Error::SelectionInvalid)?;
        let inactive = 1 - active;
        if !records[inactive].is_intact() {
            return Err(Error::NotFound);
        }
        let slot = records[inactive].slot(self.config.slot_count);
        let part = *self.table.ota_slot(slot).ok_or(Error::NotFound)?;
        if self.running.map_or(true, |r| r == part) {
            return Err(Error::PartitionConflict);
        }
        info!("erasing last boot target {}", part.label);
        let mut view = PartitionFlash::new(&mut self.flash, &part)?;
        let size = view.capacity();
        view.erase(0, size)?;
        self.otadata.erase_region(&mut self.flash, inactive)?;
        Ok(part)
    }

    /// Pick the image to start, as a bootloader would.
    ///
    /// A fresh update is moved to pending on its first boot.  One that is
    /// still pending on the boot after that never confirmed itself, so it is
    /// aborted and the choice made again.  When the records give no answer,
    /// or the chosen image does not verify, the factory image and then the
    /// test image are tried.
    pub fn boot(&mut self) -> Result<Partition> {
        let n = self.config.slot_count;
        // Every retry rejects one record, so this ends.
        loop {
            let mut records = self.records();
            let (region, slot) = match select::resolve(&records, n) {
                Ok(Selection::Virgin) => {
                    info!("otadata is blank");
                    let first = self.factory_or_first();
                    return self.boot_fallback(first, Error::NotFound);
                }
                Ok(Selection::Active { region, slot, .. }) => (region, slot),
                Err(e) => {
                    warn!("no usable selection record: {:?}", e);
                    return self.boot_fallback(None, e);
                }
            };
            let Some(part) = self.table.ota_slot(slot).copied() else {
                error!("record names slot {}, which does not exist", slot);
                return self.boot_fallback(None, Error::NotFound);
            };

            let record = &mut records[region];
            if record.state() == RollbackState::PendingVerify {
                rollback::on_boot(record);
                warn!("{} was never confirmed, aborting it", part.label);
                self.otadata.write(&mut self.flash, region, record)?;
                continue;
            }

            if let Err(e) = verify_image(&mut self.flash, &self.verifier, &part) {
                warn!("{} failed verification: {:?}", part.label, e);
                return self.boot_fallback(None, e);
            }
            if rollback::on_boot(record) == BootTransition::Pending {
                info!("first boot of {}, pending verify", part.label);
                self.otadata.write(&mut self.flash, region, record)?;
            }
            info!("booting {}", part.label);
            self.running = Some(part);
            return Ok(part);
        }
    }

    /// Try `first`, then the factory image, then the test image.  If none of
    /// them verifies, report `err`.
    fn boot_fallback(&mut self, first: Option<Partition>, err: Error) -> Result<Partition> {
        let candidates = [first, self.table.factory().copied(), self.table.test().copied()];
        for part in candidates.into_iter().flatten() {
            match verify_image(&mut self.flash, &self.verifier, &part) {
                Ok(()) => {
                    info!("booting {}", part.label);
                    self.running = Some(part);
                    return Ok(part);
                }
                Err(e) => warn!("{} failed verification: {:?}", part.label, e),
            }
        }
        error!("nothing bootable: {:?}", err);
        Err(err)
    }

    fn factory_or_first(&self) -> Option<Partition> {
        self.table
            .factory()
            .or_else(|| self.table.ota_slot(0))
            .copied()
    }

    /// Check that `part` is one of our update slots.
    fn update_slot(&self, part: &Partition) -> Result<u8> {
        match part.slot() {
            Some(slot) if slot < self.config.slot_count && self.table.contains(part) => Ok(slot),
            _ => Err(Error::InvalidArgument),
        }
    }

    fn running_state(&mut self) -> Option<RollbackState> {
        let slot = self.running?.slot()?;
        let records = self.records();
        rollback::state_of(&records, slot, self.config.slot_count).ok()
    }

    /// The active record, provided it names the running slot.
    fn running_record(&mut self) -> Result<(usize, Record)> {
        let slot = self
            .running
            .and_then(|p| p.slot())
            .ok_or(Error::NotFound)?;
        let records = self.records();
        let region = select::active_region(&records).ok_or(Error::SelectionInvalid)?;
        if records[region].slot(self.config.slot_count) != slot {
            return Err(Error::NotFound);
        }
        Ok((region, records[region]))
    }
}

/// Run the verifier over one partition.  Anything other than a flash error
/// comes back as `ValidationFailed`.
fn verify_image<F: Flash, V: ImageVerifier>(
    flash: &mut F,
    verifier: &V,
    part: &Partition,
) -> Result<()> {
    let mut view = PartitionFlash::new(flash, part)?;
    verifier.verify(&mut view).map_err(|e| match e {
        Error::Flash(_) => e,
        _ => Error::ValidationFailed,
    })
}
