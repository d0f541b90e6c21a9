//! Ware container model
//!
//! Two container formats are recognized by probing the magic at offset 0:
//!
//! ```text
//! Monolithic (40 bytes, little-endian):
//!   [magic: u32 = 0xaa55aa55] [version: u32] [crc: u32] [length: u32]
//!   [date: 12 bytes text] [time: 12 bytes text]
//!
//! Segmented (44 bytes, little-endian):
//!   [magic: "OAD NVM1"] [crc: u32] [meta_ver: u8] [bim_ver: u8]
//!   [tech_type: u16] [crc_stat: u8] [img_cp_stat: u8] [img_no: u8]
//!   [img_type: u8] [img_vld: u32] [len: u32] [prg_entry: u32]
//!   [soft_ver: u32] [img_end_addr: u32] [hdr_len: u16] [rfu: u16]
//!   ... segment table from hdr_len to len
//! ```
//!
//! Header fields are read and written in place on the image bytes, so an
//! untouched field always serializes back bit-exact.

use crate::catalog::Fingerprint;
use crate::error::WareError;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::fmt;
use std::io::{Cursor, Read};

/// Magic of the monolithic container (little-endian u32 at offset 0)
pub const WARE_MAGIC: u32 = 0xaa55_aa55;

/// Magic of the segmented container
pub const BLE_WARE_MAGIC: &[u8; 8] = b"OAD NVM1";

/// Load address of byte 0 of a monolithic image
pub const MAINWARE_BASE: u32 = 0x0802_0000;

/// Load address of byte 0 of a segmented image
pub const BLEWARE_BASE: u32 = 0x0000_0000;

/// Byte offsets of monolithic header fields
pub(crate) mod mono {
    pub const VERSION: usize = 4;
    pub const CRC: usize = 8;
    pub const LENGTH: usize = 12;
    pub const DATE: usize = 16;
    pub const TIME: usize = 28;
    pub const STAMP_LEN: usize = 12;
    pub const SIZE: usize = 40;
}

/// Byte offsets of segmented header fields
pub(crate) mod seg {
    pub const CRC: usize = 8;
    /// First byte covered by the segmented checksum
    pub const CRC_START: usize = 12;
    pub const LEN: usize = 24;
    pub const SOFT_VER: usize = 32;
    pub const IMG_END_ADDR: usize = 36;
    pub const HDR_LEN: usize = 40;
    pub const SIZE: usize = 44;
}

/// Container format, selected once by the magic probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Single-region main controller ware
    Monolithic,
    /// Segment-table BLE controller ware
    Segmented,
}

impl Format {
    /// Identify the format from the first bytes of an image
    pub fn probe(data: &[u8]) -> Option<Self> {
        if data.len() >= 4 && LittleEndian::read_u32(&data[0..4]) == WARE_MAGIC {
            return Some(Format::Monolithic);
        }
        if data.len() >= BLE_WARE_MAGIC.len() && &data[..BLE_WARE_MAGIC.len()] == BLE_WARE_MAGIC {
            return Some(Format::Segmented);
        }
        None
    }

    /// Short format identifier
    pub fn name(&self) -> &'static str {
        match self {
            Format::Monolithic => "monolithic",
            Format::Segmented => "segmented",
        }
    }

    /// Absolute load address of file offset 0
    pub fn base_address(&self) -> u32 {
        match self {
            Format::Monolithic => MAINWARE_BASE,
            Format::Segmented => BLEWARE_BASE,
        }
    }

    /// Fixed header size in bytes
    pub fn header_size(&self) -> usize {
        match self {
            Format::Monolithic => mono::SIZE,
            Format::Segmented => seg::SIZE,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded monolithic header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonolithicHeader {
    pub magic: u32,
    pub version: u32,
    pub crc: u32,
    pub length: u32,
    pub date: [u8; mono::STAMP_LEN],
    pub time: [u8; mono::STAMP_LEN],
}

impl MonolithicHeader {
    /// Parse the header from the start of `data`
    pub fn parse(data: &[u8]) -> Result<Self, WareError> {
        let mut cursor = Cursor::new(data);
        let truncated = |e: std::io::Error| WareError::Format(format!("truncated header: {}", e));

        let magic = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let version = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let crc = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let length = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let mut date = [0u8; mono::STAMP_LEN];
        cursor.read_exact(&mut date).map_err(truncated)?;
        let mut time = [0u8; mono::STAMP_LEN];
        cursor.read_exact(&mut time).map_err(truncated)?;

        Ok(Self {
            magic,
            version,
            crc,
            length,
            date,
            time,
        })
    }

    /// Date text up to the first terminator
    pub fn date_text(&self) -> String {
        stamp_text(&self.date)
    }

    /// Time text up to the first terminator
    pub fn time_text(&self) -> String {
        stamp_text(&self.time)
    }
}

/// Decoded segmented header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentedHeader {
    pub magic: [u8; 8],
    pub crc: u32,
    pub meta_ver: u8,
    pub bim_ver: u8,
    pub tech_type: u16,
    pub crc_stat: u8,
    pub img_cp_stat: u8,
    pub img_no: u8,
    pub img_type: u8,
    pub img_vld: u32,
    pub len: u32,
    pub prg_entry: u32,
    pub soft_ver: u32,
    pub img_end_addr: u32,
    pub hdr_len: u16,
    pub rfu: u16,
}

impl SegmentedHeader {
    /// Parse the header from the start of `data`
    pub fn parse(data: &[u8]) -> Result<Self, WareError> {
        let mut cursor = Cursor::new(data);
        let truncated = |e: std::io::Error| WareError::Format(format!("truncated header: {}", e));

        let mut magic = [0u8; 8];
        cursor.read_exact(&mut magic).map_err(truncated)?;

        Ok(Self {
            magic,
            crc: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            meta_ver: cursor.read_u8().map_err(truncated)?,
            bim_ver: cursor.read_u8().map_err(truncated)?,
            tech_type: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            crc_stat: cursor.read_u8().map_err(truncated)?,
            img_cp_stat: cursor.read_u8().map_err(truncated)?,
            img_no: cursor.read_u8().map_err(truncated)?,
            img_type: cursor.read_u8().map_err(truncated)?,
            img_vld: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            len: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            prg_entry: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            soft_ver: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            img_end_addr: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            hdr_len: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            rfu: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
        })
    }
}

/// Decoded header of either format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    Monolithic(MonolithicHeader),
    Segmented(SegmentedHeader),
}

/// A ware image: the whole file, mutated in place during a run
#[derive(Debug, Clone)]
pub struct Image {
    data: Vec<u8>,
    format: Format,
}

impl Image {
    /// Probe the magic and wrap the bytes
    ///
    /// Fails with `WareError::Format` when neither magic is present or the
    /// buffer is too short to hold the header.
    pub fn parse(data: Vec<u8>) -> Result<Self, WareError> {
        let format = Format::probe(&data)
            .ok_or_else(|| WareError::Format("no monolithic or segmented ware magic".into()))?;

        if data.len() < format.header_size() {
            return Err(WareError::Format(format!(
                "{} header needs {} bytes, image has {}",
                format,
                format.header_size(),
                data.len()
            )));
        }

        Ok(Self { data, format })
    }

    /// Check that the declared length fits the physical buffer
    pub fn validate_bounds(&self) -> Result<(), WareError> {
        let declared = self.declared_len();
        if declared as usize > self.data.len() {
            return Err(WareError::Size {
                declared,
                actual: self.data.len(),
            });
        }
        if (declared as usize) < self.format.header_size() {
            return Err(WareError::Format(format!(
                "declared length 0x{:08x} is shorter than the {} header",
                declared, self.format
            )));
        }
        Ok(())
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Physical buffer size
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the full header
    pub fn header(&self) -> Result<Header, WareError> {
        match self.format {
            Format::Monolithic => MonolithicHeader::parse(&self.data).map(Header::Monolithic),
            Format::Segmented => SegmentedHeader::parse(&self.data).map(Header::Segmented),
        }
    }

    /// Firmware version word (`version` or `soft_ver`)
    pub fn version(&self) -> u32 {
        match self.format {
            Format::Monolithic => self.read_u32(mono::VERSION),
            Format::Segmented => self.read_u32(seg::SOFT_VER),
        }
    }

    /// Checksum stored in the header
    pub fn stored_crc(&self) -> u32 {
        match self.format {
            Format::Monolithic => self.read_u32(mono::CRC),
            Format::Segmented => self.read_u32(seg::CRC),
        }
    }

    pub fn set_crc(&mut self, crc: u32) {
        match self.format {
            Format::Monolithic => self.write_u32(mono::CRC, crc),
            Format::Segmented => self.write_u32(seg::CRC, crc),
        }
    }

    /// Total length declared by the header (`length` or `len`)
    pub fn declared_len(&self) -> u32 {
        match self.format {
            Format::Monolithic => self.read_u32(mono::LENGTH),
            Format::Segmented => self.read_u32(seg::LEN),
        }
    }

    pub fn set_declared_len(&mut self, len: u32) {
        match self.format {
            Format::Monolithic => self.write_u32(mono::LENGTH, len),
            Format::Segmented => self.write_u32(seg::LEN, len),
        }
    }

    /// Fingerprint used for catalog lookup
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            format: self.format,
            version: self.version(),
            crc: self.stored_crc(),
            length: self.declared_len(),
        }
    }

    /// Translate an absolute load address into a file offset
    pub fn offset_of(&self, address: u32) -> Option<usize> {
        address
            .checked_sub(self.format.base_address())
            .map(|offset| offset as usize)
    }

    /// Read `count` little-endian 16-bit words at `offset`
    pub fn read_words(&self, offset: usize, count: usize) -> Option<Vec<u16>> {
        let end = offset.checked_add(count.checked_mul(2)?)?;
        let bytes = self.data.get(offset..end)?;
        Some(bytes.chunks_exact(2).map(LittleEndian::read_u16).collect())
    }

    /// Overwrite words at `offset`; the range must already be inside the buffer
    pub(crate) fn write_words(&mut self, offset: usize, words: &[u16]) -> Option<()> {
        let end = offset.checked_add(words.len() * 2)?;
        let bytes = self.data.get_mut(offset..end)?;
        for (chunk, word) in bytes.chunks_exact_mut(2).zip(words) {
            LittleEndian::write_u16(chunk, *word);
        }
        Some(())
    }

    /// Grow the buffer with zero bytes so that `len` bytes are addressable
    pub(crate) fn grow_to(&mut self, len: usize) {
        if len > self.data.len() {
            self.data.resize(len, 0);
        }
    }

    /// Write a date/time stamp into the monolithic header
    ///
    /// Each field is filled with 0xff, then the text and a NUL terminator
    /// (when it fits) are written. No-op for segmented images, which carry
    /// their stamp in the body.
    pub fn set_stamp(&mut self, date: &str, time: &str) {
        if self.format != Format::Monolithic {
            return;
        }
        write_stamp_field(&mut self.data[mono::DATE..mono::DATE + mono::STAMP_LEN], date);
        write_stamp_field(&mut self.data[mono::TIME..mono::TIME + mono::STAMP_LEN], time);
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(crate) fn read_u32(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.data[offset..offset + 4])
    }

    pub(crate) fn write_u32(&mut self, offset: usize, value: u32) {
        LittleEndian::write_u32(&mut self.data[offset..offset + 4], value);
    }

    pub(crate) fn read_u16(&self, offset: usize) -> u16 {
        LittleEndian::read_u16(&self.data[offset..offset + 2])
    }
}

fn write_stamp_field(field: &mut [u8], text: &str) {
    field.fill(0xff);
    let bytes = text.as_bytes();
    let n = bytes.len().min(field.len());
    field[..n].copy_from_slice(&bytes[..n]);
    if n < field.len() {
        field[n] = 0;
    }
}

/// Header stamp text ends at NUL or at the 0xff fill
fn stamp_text(field: &[u8]) -> String {
    let end = field
        .iter()
        .position(|&b| b == 0 || b == 0xff)
        .unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monolithic(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        LittleEndian::write_u32(&mut data[0..4], WARE_MAGIC);
        LittleEndian::write_u32(&mut data[4..8], 0x0109_03f4);
        LittleEndian::write_u32(&mut data[8..12], 0xdead_beef);
        LittleEndian::write_u32(&mut data[12..16], len as u32);
        data[16..27].copy_from_slice(b"Mar 29 2021");
        data[28..36].copy_from_slice(b"14:20:30");
        data
    }

    fn segmented(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        data[0..8].copy_from_slice(BLE_WARE_MAGIC);
        LittleEndian::write_u32(&mut data[8..12], 0x1234_5678);
        data[12] = 1;
        data[13] = 3;
        LittleEndian::write_u16(&mut data[14..16], 0xfe);
        LittleEndian::write_u32(&mut data[24..28], len as u32);
        LittleEndian::write_u32(&mut data[28..32], 0x0000_0100);
        LittleEndian::write_u32(&mut data[32..36], 0x3134_3130);
        LittleEndian::write_u32(&mut data[36..40], len as u32 - 1);
        LittleEndian::write_u16(&mut data[40..42], 0x2c);
        data
    }

    #[test]
    fn test_probe_monolithic() {
        assert_eq!(Format::probe(&monolithic(64)), Some(Format::Monolithic));
    }

    #[test]
    fn test_probe_segmented() {
        assert_eq!(Format::probe(&segmented(64)), Some(Format::Segmented));
    }

    #[test]
    fn test_probe_unknown() {
        assert_eq!(Format::probe(b"PACK\0\0\0\0"), None);
        assert_eq!(Format::probe(&[0x55, 0xaa]), None);
        assert!(matches!(
            Image::parse(vec![0u8; 128]),
            Err(WareError::Format(_))
        ));
    }

    #[test]
    fn test_truncated_header_rejected() {
        let data = monolithic(64)[..20].to_vec();
        assert!(matches!(Image::parse(data), Err(WareError::Format(_))));
    }

    #[test]
    fn test_monolithic_fields() {
        let image = Image::parse(monolithic(0x100)).unwrap();
        assert_eq!(image.format(), Format::Monolithic);
        assert_eq!(image.version(), 0x0109_03f4);
        assert_eq!(image.stored_crc(), 0xdead_beef);
        assert_eq!(image.declared_len(), 0x100);

        let Header::Monolithic(header) = image.header().unwrap() else {
            panic!("expected monolithic header");
        };
        assert_eq!(header.magic, WARE_MAGIC);
        assert_eq!(header.date_text(), "Mar 29 2021");
        assert_eq!(header.time_text(), "14:20:30");
    }

    #[test]
    fn test_segmented_fields() {
        let image = Image::parse(segmented(0x80)).unwrap();
        let Header::Segmented(header) = image.header().unwrap() else {
            panic!("expected segmented header");
        };
        assert_eq!(&header.magic, BLE_WARE_MAGIC);
        assert_eq!(header.crc, 0x1234_5678);
        assert_eq!(header.meta_ver, 1);
        assert_eq!(header.bim_ver, 3);
        assert_eq!(header.tech_type, 0xfe);
        assert_eq!(header.len, 0x80);
        assert_eq!(header.prg_entry, 0x100);
        assert_eq!(header.img_end_addr, 0x7f);
        assert_eq!(header.hdr_len, 0x2c);
        assert_eq!(image.version(), 0x3134_3130);
    }

    #[test]
    fn test_field_writes_are_bit_exact() {
        let original = monolithic(0x100);
        let mut image = Image::parse(original.clone()).unwrap();
        let crc = image.stored_crc();
        let len = image.declared_len();

        image.set_crc(0xffff_ffff);
        image.set_declared_len(0xffff_ffff);
        image.set_crc(crc);
        image.set_declared_len(len);

        assert_eq!(image.data(), &original[..]);
    }

    #[test]
    fn test_validate_bounds() {
        let mut data = monolithic(0x100);
        LittleEndian::write_u32(&mut data[12..16], 0x101);
        let image = Image::parse(data).unwrap();
        assert!(matches!(
            image.validate_bounds(),
            Err(WareError::Size {
                declared: 0x101,
                actual: 0x100
            })
        ));

        let image = Image::parse(monolithic(0x100)).unwrap();
        assert!(image.validate_bounds().is_ok());
    }

    #[test]
    fn test_offset_translation() {
        let image = Image::parse(monolithic(0x100)).unwrap();
        assert_eq!(image.offset_of(0x0802_0010), Some(0x10));
        assert_eq!(image.offset_of(0x0801_ffff), None);

        let image = Image::parse(segmented(0x80)).unwrap();
        assert_eq!(image.offset_of(0x570f), Some(0x570f));
    }

    #[test]
    fn test_words_roundtrip_unaligned() {
        let mut image = Image::parse(monolithic(0x100)).unwrap();
        image.write_words(0x41, &[0x2b05, 0xbf00]).unwrap();
        assert_eq!(image.data()[0x41..0x45], [0x05, 0x2b, 0x00, 0xbf]);
        assert_eq!(image.read_words(0x41, 2), Some(vec![0x2b05, 0xbf00]));
        assert_eq!(image.read_words(0xff, 1), None);
        assert!(image.write_words(0xff, &[0]).is_none());
    }

    #[test]
    fn test_set_stamp_fills_and_terminates() {
        let mut image = Image::parse(monolithic(0x100)).unwrap();
        image.set_stamp("May 12 2025", "09:03:35");

        assert_eq!(&image.data()[16..28], b"May 12 2025\0");
        assert_eq!(&image.data()[28..37], b"09:03:35\0");
        assert_eq!(&image.data()[37..40], &[0xff, 0xff, 0xff]);

        let Header::Monolithic(header) = image.header().unwrap() else {
            panic!("expected monolithic header");
        };
        assert_eq!(header.date_text(), "May 12 2025");
        assert_eq!(header.time_text(), "09:03:35");
    }
}
