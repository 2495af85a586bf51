//! Runtime configuration.

use crate::partition::PartitionTable;
use crate::record::RecordLayout;
use crate::{Error, Result, MAX_OTA_SLOTS};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OtaConfig {
    /// Track image validity and roll back unconfirmed updates.  Selects the
    /// record layout with a state word.
    pub rollback_enabled: bool,
    pub has_factory_slot: bool,
    pub has_test_slot: bool,
    /// Number of rotating update slots, `1..=16`.
    pub slot_count: u8,
}

impl Default for OtaConfig {
    fn default() -> Self {
        OtaConfig {
            rollback_enabled: false,
            has_factory_slot: true,
            has_test_slot: false,
            slot_count: 2,
        }
    }
}

impl OtaConfig {
    pub fn rollback(mut self, enabled: bool) -> Self {
        self.rollback_enabled = enabled;
        self
    }

    pub fn factory(mut self, present: bool) -> Self {
        self.has_factory_slot = present;
        self
    }

    pub fn test_slot(mut self, present: bool) -> Self {
        self.has_test_slot = present;
        self
    }

    pub fn slots(mut self, count: u8) -> Self {
        self.slot_count = count;
        self
    }

    pub fn record_layout(&self) -> RecordLayout {
        if self.rollback_enabled {
            RecordLayout::Rollback
        } else {
            RecordLayout::Legacy
        }
    }

    /// Check the configuration against the partitions that actually exist.
    pub fn validate(&self, table: &PartitionTable) -> Result<()> {
        if self.slot_count == 0 || self.slot_count > MAX_OTA_SLOTS {
            return Err(Error::InvalidArgument);
        }
        if self.slot_count > table.ota_slot_count() {
            return Err(Error::InvalidArgument);
        }
        if table.ota_data().is_none() {
            return Err(Error::NotFound);
        }
        if self.has_factory_slot != table.factory().is_some()
            || self.has_test_slot != table.test().is_some()
        {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}
