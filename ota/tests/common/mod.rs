//! Shared setup for the integration tests: a partition table laid out for
//! each simulated device style, and images to put in it.

#![allow(dead_code)]

use ota::{
    Ota, OtaConfig, Partition, PartitionKind, PartitionTable, SessionHandle, Sha256Tlv, SizeHint,
};
use simflash::gen::GenBuilder;
use simflash::styles::{AreaLayout, ALL_FLASHES};
use simflash::SimFlash;

/// Room for an update image, before rounding up to erase blocks.
pub const SLOT_BYTES: usize = 16 * 1024;

/// Size of the generated test images.
pub const IMAGE_BYTES: usize = 9000;

const SLOT_LABELS: [&str; 16] = [
    "ota_0", "ota_1", "ota_2", "ota_3", "ota_4", "ota_5", "ota_6", "ota_7", "ota_8", "ota_9",
    "ota_10", "ota_11", "ota_12", "ota_13", "ota_14", "ota_15",
];

pub type TestOta = Ota<SimFlash, Sha256Tlv>;

/// OTA data in the first two sectors, then the factory image, the update
/// slots and the test image, in that order.
pub fn table_for(layout: &AreaLayout, config: &OtaConfig) -> PartitionTable {
    let erase = layout.erase_size;
    let slot_len = layout.sectors_for(SLOT_BYTES) * erase;
    let mut table = PartitionTable::new();
    table
        .push(Partition::new(PartitionKind::OtaData, 0, 2 * erase, erase, "otadata"))
        .unwrap();
    let mut addr = 2 * erase;
    let mut add = |kind, label| {
        table
            .push(Partition::new(kind, addr, slot_len, erase, label))
            .unwrap();
        addr += slot_len;
    };
    if config.has_factory_slot {
        add(PartitionKind::Factory, "factory");
    }
    for n in 0..config.slot_count {
        add(PartitionKind::Ota(n), SLOT_LABELS[n as usize]);
    }
    if config.has_test_slot {
        add(PartitionKind::Test, "test");
    }
    assert!(addr <= layout.capacity(), "{} is too small", layout.name);
    table
}

/// A freshly erased device with a good factory image, if it has one.
pub fn open(layout: &AreaLayout, config: OtaConfig) -> TestOta {
    let flash = layout.build().unwrap();
    let table = table_for(layout, &config);
    let mut ota = Ota::new(flash, table, config, Sha256Tlv).unwrap();
    if let Some(factory) = ota.table().factory().copied() {
        install(&mut ota, &factory, 100);
    }
    ota
}

/// Run `check` against every device style.
pub fn each_device(config: OtaConfig, mut check: impl FnMut(&AreaLayout, TestOta)) {
    for layout in ALL_FLASHES {
        check(layout, open(layout, config));
    }
}

pub fn image(seed: usize) -> Vec<u8> {
    GenBuilder::default()
        .size(IMAGE_BYTES)
        .seed(seed)
        .build()
        .unwrap()
        .data
}

/// Put an image straight into a partition, behind the OTA code's back.
pub fn install(ota: &mut TestOta, part: &Partition, seed: usize) {
    ota.flash_mut().install(&image(seed), part.address).unwrap();
}

pub fn slot(ota: &TestOta, n: u8) -> Partition {
    *ota.table().ota_slot(n).unwrap()
}

pub fn factory(ota: &TestOta) -> Partition {
    *ota.table().factory().unwrap()
}

/// Stream an image into `part` in awkward chunk sizes.
pub fn stage(ota: &mut TestOta, part: &Partition, seed: usize) -> SessionHandle {
    let handle = ota.begin_update(part, SizeHint::Unknown).unwrap();
    for chunk in image(seed).chunks(1000 + 3) {
        ota.write_update(handle, chunk).unwrap();
    }
    handle
}

/// The whole update: stream, verify, select.
pub fn update(ota: &mut TestOta, part: &Partition, seed: usize) {
    let handle = stage(ota, part, seed);
    assert_eq!(ota.end_update(handle).unwrap(), *part);
    ota.set_boot_target(part).unwrap();
}

/// Flash offset of a record region.
pub fn region_offset(ota: &TestOta, region: usize) -> usize {
    let otadata = ota.table().ota_data().unwrap();
    otadata.address + region * otadata.erase_size
}
