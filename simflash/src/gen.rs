//! Image generation.
//!
//! Builds images in the signed-image layout the bootloader understands: a
//! header padded out to `header_size`, the payload, and a TLV area holding a
//! SHA-256 of everything before it.  The payload is pseudo-random but
//! reproducible from the seed.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use sha2::{Digest, Sha256};

pub const IMAGE_MAGIC: u32 = 0x96f3b83d;
pub const TLV_INFO_MAGIC: u16 = 0x6907;
pub const TLV_SHA256: u16 = 0x10;

/// Size of the fixed part of the header.
const HEADER_LEN: usize = 32;

pub struct GeneratedImage {
    pub data: Vec<u8>,
}

impl GeneratedImage {
    /// Offset of the TLV area.
    pub fn tlv_base(&self) -> usize {
        self.data.len() - (4 + 4 + 32)
    }
}

pub struct GenBuilder {
    /// Size of the zeroed header.
    header_size: usize,
    /// Total size of the image, not counting the TLV.
    size: usize,
    /// Seed for the PRNG
    seed: usize,
    /// Version
    version: String,
}

impl Default for GenBuilder {
    fn default() -> Self {
        GenBuilder {
            header_size: 256,
            size: 7_613,
            seed: 1,
            version: "0.1.0".to_string(),
        }
    }
}

impl GenBuilder {
    pub fn size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    pub fn seed(&mut self, seed: usize) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn version(&mut self, version: &str) -> &mut Self {
        self.version = version.to_string();
        self
    }

    pub fn build(&self) -> Result<GeneratedImage> {
        if self.size < self.header_size || self.header_size < HEADER_LEN {
            return Err(anyhow!(
                "image of {} bytes cannot hold a {} byte header",
                self.size,
                self.header_size
            ));
        }
        let img_size = u32::try_from(self.size - self.header_size)?;
        let hdr_size = u16::try_from(self.header_size)?;
        let (major, minor, revision) = parse_version(&self.version)?;

        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed as u64);
        let mut data = vec![0u8; self.size];
        rng.fill_bytes(&mut data[self.header_size..]);

        let header = &mut data[..HEADER_LEN];
        header.fill(0);
        LittleEndian::write_u32(&mut header[0..4], IMAGE_MAGIC);
        LittleEndian::write_u16(&mut header[8..10], hdr_size);
        LittleEndian::write_u32(&mut header[12..16], img_size);
        header[20] = major;
        header[21] = minor;
        LittleEndian::write_u16(&mut header[22..24], revision);

        let hash = Sha256::digest(&data);

        let mut tlv = [0u8; 4 + 4 + 32];
        let tlv_len = tlv.len() as u16;
        LittleEndian::write_u16(&mut tlv[0..2], TLV_INFO_MAGIC);
        LittleEndian::write_u16(&mut tlv[2..4], tlv_len);
        LittleEndian::write_u16(&mut tlv[4..6], TLV_SHA256);
        LittleEndian::write_u16(&mut tlv[6..8], 32);
        tlv[8..].copy_from_slice(&hash);
        data.extend_from_slice(&tlv);

        Ok(GeneratedImage { data })
    }
}

fn parse_version(text: &str) -> Result<(u8, u8, u16)> {
    let mut parts = text.split('.');
    let mut next = || {
        parts
            .next()
            .ok_or_else(|| anyhow!("version {:?} needs three components", text))
    };
    let major = next()?.parse()?;
    let minor = next()?.parse()?;
    let revision = next()?.parse()?;
    Ok((major, minor, revision))
}
