// Updates running on top of an `embedded_storage` NOR driver.

mod common;

use common::image;
use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash};
use ota::{
    Ota, OtaConfig, Partition, PartitionKind, PartitionTable, RollbackState, Sha256Tlv, SizeHint,
};
use storage::NorFlashAdapter;

const ERASE: usize = 4096;
const SLOT: usize = 4 * ERASE;

/// NOR flash in memory: erase sets bits, programming can only clear them.
struct RamNor(Vec<u8>);

impl ErrorType for RamNor {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for RamNor {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let src = self
            .0
            .get(start..start + bytes.len())
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        bytes.copy_from_slice(src);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.0.len()
    }
}

impl NorFlash for RamNor {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = ERASE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from as usize % ERASE != 0 || to as usize % ERASE != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        self.0
            .get_mut(from as usize..to as usize)
            .ok_or(NorFlashErrorKind::OutOfBounds)?
            .fill(0xff);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        if start % 4 != 0 || bytes.len() % 4 != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        let dst = self
            .0
            .get_mut(start..start + bytes.len())
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        for (d, s) in dst.iter_mut().zip(bytes) {
            *d &= *s;
        }
        Ok(())
    }
}

#[test]
fn update_through_nor_driver() {
    let config = OtaConfig::default().factory(false).rollback(true);
    let mut table = PartitionTable::new();
    table
        .push(Partition::new(PartitionKind::OtaData, 0, 2 * ERASE, ERASE, "otadata"))
        .unwrap();
    table
        .push(Partition::new(PartitionKind::Ota(0), 2 * ERASE, SLOT, ERASE, "ota_0"))
        .unwrap();
    table
        .push(Partition::new(PartitionKind::Ota(1), 2 * ERASE + SLOT, SLOT, ERASE, "ota_1"))
        .unwrap();

    let flash = NorFlashAdapter::new(RamNor(vec![0xff; 2 * ERASE + 2 * SLOT]));
    let mut ota = Ota::new(flash, table, config, Sha256Tlv).unwrap();
    let slot0 = *ota.table().ota_slot(0).unwrap();

    let data = image(11);
    let handle = ota.begin_update(&slot0, SizeHint::Exact(data.len())).unwrap();
    for chunk in data.chunks(333) {
        ota.write_update(handle, chunk).unwrap();
    }
    assert_eq!(ota.end_update(handle), Ok(slot0));
    ota.set_boot_target(&slot0).unwrap();

    assert_eq!(ota.boot(), Ok(slot0));
    assert_eq!(ota.get_state(&slot0), Ok(RollbackState::PendingVerify));
    ota.confirm_valid().unwrap();
    let record = ota.records()[0];
    assert_eq!(record.sequence, 1);
    assert_eq!(record.state(), RollbackState::Valid);

    let raw = ota.into_flash().into_inner().0;
    assert_eq!(&raw[2 * ERASE..2 * ERASE + data.len()], &data[..]);
}
