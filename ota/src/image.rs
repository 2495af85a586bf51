//! Image verification.
//!
//! Deciding whether an image is any good is not the OTA code's business, so
//! it goes through `ImageVerifier`.  Two verifiers come with the crate:
//! `AcceptAll`, and `Sha256Tlv` which understands the signed-image layout: a
//! header, the payload, then a TLV block carrying a SHA-256 over both.

use byteorder::{ByteOrder, LittleEndian};
use sha2::{Digest, Sha256};
use storage::ReadFlash;

use crate::fmt::debug;
use crate::{Error, Result};

/// The image header contains the following magic value, indicating the
/// interpretation of the rest of the image header.
pub const IMAGE_MAGIC: u32 = 0x96f3b83d;

const TLV_INFO_MAGIC: u16 = 0x6907;

// Supported TLVS
const TLV_SHA256: u16 = 0x10;

/// Fixed part of the header we look at.
const HEADER_LEN: usize = 32;

pub trait ImageVerifier {
    /// Look at a chunk of the incoming image before it is written.  `chunk`
    /// lands at `offset` in the slot.  Every chunk comes through here, so a
    /// header split across several short chunks is seen piece by piece.
    fn check_header(&self, offset: usize, chunk: &[u8]) -> Result<()> {
        let _ = (offset, chunk);
        Ok(())
    }

    /// Verify the image held in `flash`, a view of exactly one partition.
    fn verify<R: ReadFlash>(&self, flash: &mut R) -> Result<()>;
}

/// Every image is fine.
#[derive(Debug, Default, Copy, Clone)]
pub struct AcceptAll;

impl ImageVerifier for AcceptAll {
    fn verify<R: ReadFlash>(&self, _flash: &mut R) -> Result<()> {
        Ok(())
    }
}

/// Header + TLV images with a SHA-256 TLV.
#[derive(Debug, Default, Copy, Clone)]
pub struct Sha256Tlv;

/// The parts of the image header needed to find the TLV block.
#[derive(Debug)]
struct ImageHeader {
    magic: u32,
    hdr_size: u16,
    img_size: u32,
}

impl ImageHeader {
    fn parse(raw: &[u8; HEADER_LEN]) -> ImageHeader {
        ImageHeader {
            magic: LittleEndian::read_u32(&raw[0..4]),
            hdr_size: LittleEndian::read_u16(&raw[8..10]),
            img_size: LittleEndian::read_u32(&raw[12..16]),
        }
    }

    /// Offset of the TLV block, just past the payload.
    fn tlv_base(&self) -> Result<usize> {
        (self.img_size as usize)
            .checked_add(self.hdr_size as usize)
            .ok_or(Error::ValidationFailed)
    }
}

impl ImageVerifier for Sha256Tlv {
    fn check_header(&self, offset: usize, chunk: &[u8]) -> Result<()> {
        let magic = IMAGE_MAGIC.to_le_bytes();
        let Some(expect) = magic.get(offset..) else {
            return Ok(());
        };
        let len = chunk.len().min(expect.len());
        if chunk[..len] != expect[..len] {
            debug!("stream does not start with the image magic");
            return Err(Error::ValidationFailed);
        }
        Ok(())
    }

    fn verify<R: ReadFlash>(&self, flash: &mut R) -> Result<()> {
        let mut raw = [0u8; HEADER_LEN];
        flash.read(0, &mut raw)?;
        let header = ImageHeader::parse(&raw);
        if header.magic != IMAGE_MAGIC {
            return Err(Error::ValidationFailed);
        }

        let tlv_base = header.tlv_base()?;
        if tlv_base.checked_add(4).map_or(true, |end| end > flash.capacity()) {
            return Err(Error::ValidationFailed);
        }
        let mut info = [0u8; 4];
        flash.read(tlv_base, &mut info)?;
        if LittleEndian::read_u16(&info[0..2]) != TLV_INFO_MAGIC {
            return Err(Error::ValidationFailed);
        }
        let tlv_end = tlv_base + LittleEndian::read_u16(&info[2..4]) as usize;
        if tlv_end > flash.capacity() {
            return Err(Error::ValidationFailed);
        }

        // Exactly one SHA-256 entry, and nothing we don't understand.
        let mut expected = None;
        let mut pos = tlv_base + 4;
        while pos < tlv_end {
            let mut entry = [0u8; 4];
            flash.read(pos, &mut entry)?;
            let kind = LittleEndian::read_u16(&entry[0..2]);
            let len = LittleEndian::read_u16(&entry[2..4]) as usize;
            let data = pos + 4;
            if kind != TLV_SHA256 || len != 32 || expected.is_some() || data + len > tlv_end {
                debug!("unexpected TLV {:#x} len {}", kind, len);
                return Err(Error::ValidationFailed);
            }
            let mut hash = [0u8; 32];
            flash.read(data, &mut hash)?;
            expected = Some(hash);
            pos = data + len;
        }
        let expected = expected.ok_or(Error::ValidationFailed)?;

        if calculate_sha256(flash, tlv_base)? != expected {
            debug!("image hash mismatch");
            return Err(Error::ValidationFailed);
        }
        Ok(())
    }
}

/// Hash the first `len` bytes of the partition.
fn calculate_sha256<R: ReadFlash>(flash: &mut R, len: usize) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 128];
    let mut pos = 0;
    while pos < len {
        let todo = (len - pos).min(buffer.len());
        let buf = &mut buffer[..todo];
        flash.read(pos, buf)?;
        hasher.update(&*buf);
        pos += todo;
    }
    let mut result = [0u8; 32];
    result.copy_from_slice(hasher.finalize().as_slice());
    Ok(result)
}
