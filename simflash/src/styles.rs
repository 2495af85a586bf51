//! Flash styles
//!
//! Various microcontrollers have various types of flash memories available to
//! them.  Each style here describes a whole device, big enough to hold the
//! two-sector OTA data area, a factory image and a handful of update slots.

use crate::Result;
use crate::SimFlash;

/// The configuration of a single flash device.
#[derive(Debug)]
pub struct AreaLayout {
    pub name: &'static str,
    pub read_size: usize,
    pub write_size: usize,
    pub erase_size: usize,
    pub sectors: usize,
}

impl AreaLayout {
    pub fn build(&self) -> Result<SimFlash> {
        SimFlash::new(
            self.read_size,
            self.write_size,
            self.erase_size,
            self.sectors,
        )
    }

    /// Number of sectors needed to hold `bytes`, never less than one.
    pub fn sectors_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.erase_size).max(1)
    }

    pub fn capacity(&self) -> usize {
        self.erase_size * self.sectors
    }
}

/// SPI NOR, as found next to most Wi-Fi parts.  Byte writable, small uniform
/// sectors.
pub static SPI_NOR: AreaLayout = AreaLayout {
    name: "spi-nor",
    read_size: 1,
    write_size: 1,
    erase_size: 4 * 1024,
    sectors: 64,
};

/// K64-style.
/// These devices have small uniform sectors.
pub static K64: AreaLayout = AreaLayout {
    name: "k64",
    read_size: 1,
    write_size: 8,
    erase_size: 4 * 1024,
    sectors: 64,
};

/// External flash with a large write alignment.
pub static EXT: AreaLayout = AreaLayout {
    name: "ext",
    read_size: 1,
    write_size: 256,
    erase_size: 4 * 1024,
    sectors: 64,
};

/// Page-style devices.  Based on the LPC55S69.
pub static LPC: AreaLayout = AreaLayout {
    name: "lpc",
    read_size: 1,
    write_size: 512,
    erase_size: 512,
    sectors: 512,
};

/// Large write and very large sectors, based on the STM32H745.
pub static STM32H: AreaLayout = AreaLayout {
    name: "stm32h",
    read_size: 1,
    write_size: 32,
    erase_size: 128 * 1024,
    sectors: 8,
};

/// All of the flash devices.
pub static ALL_FLASHES: [&AreaLayout; 5] = [&SPI_NOR, &K64, &EXT, &LPC, &STM32H];

/// An iterator that returns each of the device styles, freshly erased.
pub fn all_flashes() -> impl Iterator<Item = (&'static AreaLayout, Result<SimFlash>)> {
    ALL_FLASHES.iter().map(|layout| (*layout, layout.build()))
}
