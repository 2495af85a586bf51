//! Storage types.
//!
//! This is the seam between the OTA bookkeeping and whatever actually moves
//! bytes on the device.  Offsets are always relative to the start of the
//! device handed in, and every operation may block for as long as the
//! physical erase or program takes.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[cfg(feature = "embedded-storage")]
mod nor;

#[cfg(feature = "embedded-storage")]
pub use nor::NorFlashAdapter;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    NotAligned,
    OutOfBounds,
    NotWritten,
    NotErased,
    /// The device reported a failure it could not classify further.
    Io,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Read only interface into flash.
pub trait ReadFlash {
    /// What is the read size (alignment and size multiple).
    fn read_size(&self) -> usize;
    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()>;
    fn capacity(&self) -> usize;
}

/// Flash that can be written to.
pub trait Flash: ReadFlash {
    /// Write size (alignment and size multiple).
    fn write_size(&self) -> usize;
    /// Erase size (alignment and size multiple).
    fn erase_size(&self) -> usize;

    fn erase(&mut self, from: usize, to: usize) -> Result<()>;
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()>;
}

impl<T: ReadFlash + ?Sized> ReadFlash for &mut T {
    fn read_size(&self) -> usize {
        (**self).read_size()
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()> {
        (**self).read(offset, bytes)
    }

    fn capacity(&self) -> usize {
        (**self).capacity()
    }
}

impl<T: Flash + ?Sized> Flash for &mut T {
    fn write_size(&self) -> usize {
        (**self).write_size()
    }

    fn erase_size(&self) -> usize {
        (**self).erase_size()
    }

    fn erase(&mut self, from: usize, to: usize) -> Result<()> {
        (**self).erase(from, to)
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        (**self).write(offset, bytes)
    }
}

// Utilities taken from embedded-storage for validating arguments.
pub fn check_read<T: ReadFlash>(
    flash: &T,
    offset: usize,
    length: usize,
) -> Result<()> {
    check_slice(flash, flash.read_size(), offset, length)
}

pub fn check_erase<T: Flash>(
    flash: &T,
    from: usize,
    to: usize,
) -> Result<()> {
    if from > to || to > flash.capacity() {
        return Err(Error::OutOfBounds);
    }
    if from % flash.erase_size() != 0 || to % flash.erase_size() != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

pub fn check_write<T: Flash>(
    flash: &T,
    offset: usize,
    length: usize,
) -> Result<()> {
    check_slice(flash, flash.write_size(), offset, length)
}

pub fn check_slice<T: ReadFlash>(
    flash: &T,
    align: usize,
    offset: usize,
    length: usize,
) -> Result<()> {
    if length > flash.capacity() || offset > flash.capacity() - length {
        return Err(Error::OutOfBounds);
    }
    if offset % align != 0 || length % align != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

/// Round `value` up to the next multiple of `align`.
pub fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        capacity: usize,
    }

    impl ReadFlash for Fake {
        fn read_size(&self) -> usize {
            1
        }
        fn read(&mut self, _offset: usize, _bytes: &mut [u8]) -> Result<()> {
            Ok(())
        }
        fn capacity(&self) -> usize {
            self.capacity
        }
    }

    impl Flash for Fake {
        fn write_size(&self) -> usize {
            8
        }
        fn erase_size(&self) -> usize {
            4096
        }
        fn erase(&mut self, _from: usize, _to: usize) -> Result<()> {
            Ok(())
        }
        fn write(&mut self, _offset: usize, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn erase_bounds() {
        let flash = Fake { capacity: 8192 };
        assert_eq!(check_erase(&flash, 0, 8192), Ok(()));
        assert_eq!(check_erase(&flash, 4096, 0), Err(Error::OutOfBounds));
        assert_eq!(check_erase(&flash, 0, 12288), Err(Error::OutOfBounds));
        assert_eq!(check_erase(&flash, 100, 4096), Err(Error::NotAligned));
    }

    #[test]
    fn write_alignment() {
        let flash = Fake { capacity: 8192 };
        assert_eq!(check_write(&flash, 8, 32), Ok(()));
        assert_eq!(check_write(&flash, 4, 32), Err(Error::NotAligned));
        assert_eq!(check_write(&flash, 8184, 16), Err(Error::OutOfBounds));
        assert_eq!(check_read(&flash, 3, 5), Ok(()));
    }

    #[test]
    fn rounding() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
    }
}
