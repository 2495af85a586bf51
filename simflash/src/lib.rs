//! Simulated flash
//!
//! The NOR-type flashes used in microcontrollers differs quite a bit in terms
//! of capabilities provided.  This simulator attempts to capture the diversity
//! of these devices, and to make the unpleasant parts of them (power loss in
//! the middle of an erase, bits that rot, pages that cannot be read back)
//! reproducible in a test.
//!
//! The device is described by a read size, a write size and an erase size.
//! We require that the erase size be a multiple of the write size (they can be
//! the same).  Every write unit may be programmed once after being erased,
//! which matches parts that carry ECC with each write unit.
//!
//! Fault injection:
//!
//! - `set_power_budget(n)` allows `n` more erase/write operations.  The next
//!   one is cut in half and fails, and every operation after that fails until
//!   `power_cycle` is called.
//! - `fail_reads(range)` makes any read touching the range fail.
//! - `corrupt(offset, mask)` flips bits behind the device's back.

use std::ops::Range;

use storage::{check_erase, check_read, check_write, Error, Flash, ReadFlash};

pub mod gen;
pub mod styles;

pub type Result<T> = storage::Result<T>;

/// A RAM-backed flash device.
#[derive(Debug, Clone)]
pub struct SimFlash {
    read_size: usize,
    write_size: usize,
    erase_size: usize,
    data: Vec<u8>,
    /// One entry per write unit, set once the unit has been programmed.
    written: Vec<bool>,
    /// Number of erases per sector.
    wear: Vec<usize>,
    budget: Option<usize>,
    powered: bool,
    read_faults: Vec<Range<usize>>,
    writes: usize,
}

impl SimFlash {
    pub fn new(
        read_size: usize,
        write_size: usize,
        erase_size: usize,
        sectors: usize,
    ) -> Result<SimFlash> {
        if !read_size.is_power_of_two()
            || !write_size.is_power_of_two()
            || !erase_size.is_power_of_two()
            || erase_size % write_size != 0
        {
            return Err(Error::NotAligned);
        }
        let capacity = erase_size * sectors;
        Ok(SimFlash {
            read_size,
            write_size,
            erase_size,
            data: vec![0xff; capacity],
            written: vec![false; capacity / write_size],
            wear: vec![0; sectors],
            budget: None,
            powered: true,
            read_faults: Vec::new(),
            writes: 0,
        })
    }

    /// Place data directly into the flash, erasing what is needed first.  The
    /// tail is padded out to the write size.
    pub fn install(&mut self, data: &[u8], offset: usize) -> Result<()> {
        let end = storage::align_up(offset + data.len(), self.erase_size);
        let start = offset - offset % self.erase_size;
        self.erase(start, end)?;

        let full = data.len() - data.len() % self.write_size;
        self.write(offset, &data[..full])?;
        if full < data.len() {
            let mut tail = vec![0xff; self.write_size];
            tail[..data.len() - full].copy_from_slice(&data[full..]);
            self.write(offset + full, &tail)?;
        }
        Ok(())
    }

    /// Allow `ops` more erase or write operations before the power goes out.
    pub fn set_power_budget(&mut self, ops: usize) {
        self.budget = Some(ops);
    }

    /// Restore power, and forget any pending power budget.
    pub fn power_cycle(&mut self) {
        self.budget = None;
        self.powered = true;
    }

    pub fn fail_reads(&mut self, range: Range<usize>) {
        self.read_faults.push(range);
    }

    pub fn clear_read_faults(&mut self) {
        self.read_faults.clear();
    }

    /// XOR `mask` into the byte at `offset`.
    pub fn corrupt(&mut self, offset: usize, mask: u8) {
        self.data[offset] ^= mask;
    }

    /// The raw contents, for inspection.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// How many times the sector holding `offset` has been erased.
    pub fn erase_count(&self, offset: usize) -> usize {
        self.wear[offset / self.erase_size]
    }

    /// Total number of successful write operations.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Consume one unit of power budget.  Returns false if this operation
    /// is the one that gets interrupted.
    fn spend(&mut self) -> Result<bool> {
        if !self.powered {
            return Err(Error::Io);
        }
        match self.budget {
            Some(0) => {
                self.powered = false;
                Ok(false)
            }
            Some(ref mut n) => {
                *n -= 1;
                Ok(true)
            }
            None => Ok(true),
        }
    }
}

impl ReadFlash for SimFlash {
    fn read_size(&self) -> usize {
        self.read_size
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()> {
        check_read(self, offset, bytes.len())?;
        if !self.powered {
            return Err(Error::Io);
        }
        let end = offset + bytes.len();
        if self
            .read_faults
            .iter()
            .any(|f| f.start < end && offset < f.end)
        {
            return Err(Error::Io);
        }
        bytes.copy_from_slice(&self.data[offset..end]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Flash for SimFlash {
    fn write_size(&self) -> usize {
        self.write_size
    }

    fn erase_size(&self) -> usize {
        self.erase_size
    }

    fn erase(&mut self, from: usize, to: usize) -> Result<()> {
        check_erase(self, from, to)?;
        let complete = self.spend()?;
        // An interrupted erase only gets through the first half.
        let stop = if complete {
            to
        } else {
            from + (to - from) / 2
        };
        self.data[from..stop].fill(0xff);
        self.written[from / self.write_size..stop / self.write_size].fill(false);
        let first = from / self.erase_size;
        let last = to.div_ceil(self.erase_size);
        for wear in &mut self.wear[first..last] {
            *wear += 1;
        }
        if complete {
            Ok(())
        } else {
            Err(Error::Io)
        }
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        check_write(self, offset, bytes.len())?;
        let units = offset / self.write_size..(offset + bytes.len()) / self.write_size;
        if self.written[units.clone()].iter().any(|w| *w) {
            return Err(Error::NotErased);
        }
        let complete = self.spend()?;
        let len = if complete {
            bytes.len()
        } else {
            let half = bytes.len() / 2;
            half - half % self.write_size
        };
        self.data[offset..offset + len].copy_from_slice(&bytes[..len]);
        let done = units.start..units.start + len / self.write_size;
        self.written[done].fill(true);
        if complete {
            self.writes += 1;
            Ok(())
        } else {
            Err(Error::Io)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SimFlash {
        SimFlash::new(1, 8, 256, 4).unwrap()
    }

    #[test]
    fn starts_erased() {
        let mut flash = small();
        let mut buf = [0u8; 16];
        flash.read(100, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0xff));
        assert_eq!(flash.capacity(), 1024);
    }

    #[test]
    fn write_once_per_erase() {
        let mut flash = small();
        flash.write(0, &[1; 8]).unwrap();
        assert_eq!(flash.write(0, &[2; 8]), Err(Error::NotErased));
        flash.erase(0, 256).unwrap();
        flash.write(0, &[2; 8]).unwrap();
        assert_eq!(&flash.contents()[..8], &[2; 8]);
        assert_eq!(flash.erase_count(0), 1);
        assert_eq!(flash.erase_count(256), 0);
    }

    #[test]
    fn alignment_enforced() {
        let mut flash = small();
        assert_eq!(flash.write(4, &[0; 8]), Err(Error::NotAligned));
        assert_eq!(flash.erase(0, 100), Err(Error::NotAligned));
        assert_eq!(flash.erase(0, 2048), Err(Error::OutOfBounds));
    }

    #[test]
    fn power_loss_mid_erase() {
        let mut flash = small();
        flash.write(0, &[0; 8]).unwrap();
        flash.write(248, &[0; 8]).unwrap();
        flash.set_power_budget(0);
        assert_eq!(flash.erase(0, 256), Err(Error::Io));
        // Everything is dead until the power comes back.
        let mut buf = [0u8; 8];
        assert_eq!(flash.read(0, &mut buf), Err(Error::Io));
        flash.power_cycle();
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xff; 8]);
        flash.read(248, &mut buf).unwrap();
        assert_eq!(buf, [0; 8]);
    }

    #[test]
    fn power_loss_mid_write() {
        let mut flash = small();
        flash.set_power_budget(1);
        flash.write(0, &[0x11; 32]).unwrap();
        assert_eq!(flash.write(32, &[0x22; 32]), Err(Error::Io));
        flash.power_cycle();
        assert_eq!(&flash.contents()[32..48], &[0x22; 16]);
        assert_eq!(&flash.contents()[48..64], &[0xff; 16]);
    }

    #[test]
    fn read_faults() {
        let mut flash = small();
        flash.fail_reads(256..512);
        let mut buf = [0u8; 4];
        assert_eq!(flash.read(300, &mut buf), Err(Error::Io));
        flash.read(0, &mut buf).unwrap();
        flash.clear_read_faults();
        flash.read(300, &mut buf).unwrap();
    }

    #[test]
    fn install_pads_tail() {
        let mut flash = small();
        flash.install(&[0xaa; 13], 256).unwrap();
        assert_eq!(&flash.contents()[256..269], &[0xaa; 13]);
        assert_eq!(&flash.contents()[269..272], &[0xff; 3]);
    }
}
