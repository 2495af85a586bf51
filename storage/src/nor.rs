//! Bridge from `embedded_storage` NOR drivers.
//!
//! Board flash drivers generally implement `ReadNorFlash` and `NorFlash`.
//! Wrapping one in a `NorFlashAdapter` makes it usable wherever a `Flash` is
//! expected.

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};

use crate::{Error, Flash, ReadFlash, Result};

pub struct NorFlashAdapter<T> {
    inner: T,
}

impl<T> NorFlashAdapter<T> {
    pub fn new(inner: T) -> Self {
        NorFlashAdapter { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn map_err<E: NorFlashError>(err: E) -> Error {
    match err.kind() {
        NorFlashErrorKind::NotAligned => Error::NotAligned,
        NorFlashErrorKind::OutOfBounds => Error::OutOfBounds,
        _ => Error::Io,
    }
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::OutOfBounds)
}

impl<T: NorFlash> ReadFlash for NorFlashAdapter<T> {
    fn read_size(&self) -> usize {
        T::READ_SIZE
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()> {
        self.inner.read(to_u32(offset)?, bytes).map_err(map_err)
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl<T: NorFlash> Flash for NorFlashAdapter<T> {
    fn write_size(&self) -> usize {
        T::WRITE_SIZE
    }

    fn erase_size(&self) -> usize {
        T::ERASE_SIZE
    }

    fn erase(&mut self, from: usize, to: usize) -> Result<()> {
        self.inner.erase(to_u32(from)?, to_u32(to)?).map_err(map_err)
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.inner.write(to_u32(offset)?, bytes).map_err(map_err)
    }
}
