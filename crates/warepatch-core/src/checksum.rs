//! Checksum engines
//!
//! Each container format has its own checksum, selected by the format tag:
//!
//! - Monolithic: CRC-32 with polynomial 0x04C11DB7, MSB-first, initial
//!   0xFFFFFFFF, fed one little-endian 32-bit word at a time over
//!   `[0, length)` with the `crc` and `length` fields read as 0xFFFFFFFF.
//! - Segmented: standard reflected CRC-32 (zlib) over `[12, len)`.
//!
//! Feeding a little-endian word MSB-first is the same as feeding its bytes
//! in reverse order to the byte-wise MPEG-2 CRC, which is how the
//! monolithic engine is computed.

use crate::container::{mono, seg, Format, Image};
use crate::error::WareError;
use byteorder::{ByteOrder, LittleEndian};
use crc_any::CRCu32;
use log::{debug, info};

/// Blanking value for the monolithic `crc` and `length` fields
const BLANK: u32 = 0xffff_ffff;

/// Bytes fed to the MPEG-2 digest per call
const DIGEST_BLOCK: usize = 64 * 1024;

/// A checksum algorithm bound to one container format
pub trait ChecksumEngine: Send + Sync {
    /// Engine identifier for diagnostics
    fn name(&self) -> &'static str;

    /// Compute the checksum of the image as its header currently declares it
    ///
    /// The image must have passed `Image::validate_bounds`.
    fn compute(&self, image: &Image) -> u32;
}

/// Word-wise CRC-32/MPEG-2 with header field blanking
#[derive(Debug, Clone, Copy, Default)]
pub struct MonolithicCrc;

impl ChecksumEngine for MonolithicCrc {
    fn name(&self) -> &'static str {
        "crc32-words"
    }

    fn compute(&self, image: &Image) -> u32 {
        let data = image.data();
        let length = image.declared_len() as usize;

        // Hash a blanked copy so the image itself never holds the blank values
        let mut header = [0u8; mono::SIZE];
        header.copy_from_slice(&data[..mono::SIZE]);
        LittleEndian::write_u32(&mut header[mono::CRC..mono::CRC + 4], BLANK);
        LittleEndian::write_u32(&mut header[mono::LENGTH..mono::LENGTH + 4], BLANK);

        crc32_words(&[&header, &data[mono::SIZE..length]])
    }
}

/// zlib CRC-32 over everything after the checksum field
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentedCrc;

impl ChecksumEngine for SegmentedCrc {
    fn name(&self) -> &'static str {
        "crc32"
    }

    fn compute(&self, image: &Image) -> u32 {
        let len = image.declared_len() as usize;
        crc32fast::hash(&image.data()[seg::CRC_START..len])
    }
}

/// Select the engine for a container format
pub fn engine_for(format: Format) -> &'static dyn ChecksumEngine {
    match format {
        Format::Monolithic => &MonolithicCrc,
        Format::Segmented => &SegmentedCrc,
    }
}

/// Compute the checksum of an image with its format's engine
pub fn compute(image: &Image) -> Result<u32, WareError> {
    image.validate_bounds()?;
    Ok(engine_for(image.format()).compute(image))
}

/// Check the stored checksum, returning it when it matches
pub fn verify(image: &Image) -> Result<u32, WareError> {
    let stored = image.stored_crc();
    let computed = compute(image)?;

    info!(
        "{} ware CRC 0x{:08x} {}",
        image.format(),
        computed,
        if computed == stored { "OK" } else { "FAIL" }
    );

    if computed != stored {
        return Err(WareError::Checksum { stored, computed });
    }
    Ok(stored)
}

/// Recompute the checksum and write it into the header
pub fn reseal(image: &mut Image) -> Result<u32, WareError> {
    let crc = compute(image)?;
    image.set_crc(crc);
    debug!("resealed {} ware with CRC 0x{:08x}", image.format(), crc);
    Ok(crc)
}

/// Word-wise CRC-32/MPEG-2 over the concatenation of `parts`
///
/// A trailing partial word is padded with zero bytes.
pub fn crc32_words(parts: &[&[u8]]) -> u32 {
    let mut crc = CRCu32::crc32mpeg2();
    let mut block = Vec::with_capacity(DIGEST_BLOCK);
    let mut word = [0u8; 4];
    let mut fill = 0;

    for part in parts {
        for &byte in part.iter() {
            word[fill] = byte;
            fill += 1;
            if fill == word.len() {
                block.extend(word.iter().rev());
                fill = 0;
                if block.len() >= DIGEST_BLOCK {
                    crc.digest(&block);
                    block.clear();
                }
            }
        }
    }

    if fill > 0 {
        word[fill..].fill(0);
        block.extend(word.iter().rev());
    }
    crc.digest(&block);

    crc.get_crc()
}
