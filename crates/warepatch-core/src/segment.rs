//! Segment table of the segmented container
//!
//! The table starts at `hdr_len` and runs to `len`. Each record is
//!
//! ```text
//! [seg_type: u8] [wireless_tech: u16 LE] [rfu: u8] [seg_len: u32 LE]
//! ```
//!
//! followed by `seg_len - 8` bytes of record body. Record lengths must sum
//! exactly to `len - hdr_len`.

use crate::checksum::{ChecksumEngine, SegmentedCrc};
use crate::container::{seg, Format, Image};
use crate::error::WareError;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use log::{debug, info, trace};
use serde::Serialize;
use std::io::Cursor;

/// Size of a segment record header
pub const SEGMENT_RECORD_SIZE: usize = 8;

/// Segment record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SegmentType {
    Boundary = 0,
    Contiguous = 1,
    NonContiguous = 2,
    Security = 3,
    Nvram = 4,
    Delta = 5,
}

impl SegmentType {
    /// Convert from the raw record byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Boundary),
            1 => Some(Self::Contiguous),
            2 => Some(Self::NonContiguous),
            3 => Some(Self::Security),
            4 => Some(Self::Nvram),
            5 => Some(Self::Delta),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Boundary => "boundary",
            Self::Contiguous => "contiguous",
            Self::NonContiguous => "noncontiguous",
            Self::Security => "security",
            Self::Nvram => "nvram",
            Self::Delta => "delta",
        }
    }
}

/// One decoded segment record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentRecord {
    /// File offset of the record header
    pub offset: usize,
    pub seg_type: SegmentType,
    pub wireless_tech: u16,
    pub rfu: u8,
    /// Record size including its own header
    pub seg_len: u32,
}

impl SegmentRecord {
    /// File offset one past the end of the record
    pub fn end(&self) -> usize {
        self.offset + self.seg_len as usize
    }
}

/// Result of a size-extension fixup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FixupSummary {
    /// Bytes appended after the original end of the image
    pub extra_len: u32,
    /// Offsets of contiguous records whose length was extended
    pub extended: Vec<usize>,
    /// Offsets of security records downgraded to noncontiguous
    pub downgraded: Vec<usize>,
    /// Declared length after the fixup
    pub new_len: u32,
    /// Checksum written after the fixup
    pub crc: u32,
}

/// Offset where the segment table begins
pub fn hdr_len(image: &Image) -> u16 {
    image.read_u16(seg::HDR_LEN)
}

/// Image end address field of the segmented header
pub fn img_end_addr(image: &Image) -> u32 {
    image.read_u32(seg::IMG_END_ADDR)
}

/// Walk the segment table from `hdr_len` to the declared length
///
/// Fails unless the records tile `[hdr_len, len)` exactly.
pub fn walk(image: &Image) -> Result<Vec<SegmentRecord>, WareError> {
    if image.format() != Format::Segmented {
        return Err(WareError::Format(format!(
            "{} ware has no segment table",
            image.format()
        )));
    }
    image.validate_bounds()?;

    let start = hdr_len(image) as usize;
    let end = image.declared_len() as usize;

    if start < seg::SIZE || start > end {
        return Err(WareError::SegmentTable(format!(
            "hdr_len 0x{:04x} outside [0x{:04x}, 0x{:08x}]",
            start,
            seg::SIZE,
            end
        )));
    }

    let data = image.data();
    let mut records = Vec::new();
    let mut offset = start;

    while offset < end {
        if offset + SEGMENT_RECORD_SIZE > end {
            return Err(WareError::SegmentTable(format!(
                "record header at 0x{:08x} crosses end of image 0x{:08x}",
                offset, end
            )));
        }

        let record = read_record(&data[offset..offset + SEGMENT_RECORD_SIZE], offset)?;
        trace!(
            "segment at 0x{:08x}: type {} len 0x{:08x}",
            offset,
            record.seg_type.name(),
            record.seg_len
        );

        if (record.seg_len as usize) < SEGMENT_RECORD_SIZE {
            return Err(WareError::SegmentTable(format!(
                "record at 0x{:08x} has length 0x{:x}, shorter than its header",
                offset, record.seg_len
            )));
        }
        if record.end() > end {
            return Err(WareError::SegmentTable(format!(
                "record at 0x{:08x} with length 0x{:08x} overruns end of image 0x{:08x}",
                offset, record.seg_len, end
            )));
        }

        offset = record.end();
        records.push(record);
    }

    Ok(records)
}

fn read_record(bytes: &[u8], offset: usize) -> Result<SegmentRecord, WareError> {
    let mut cursor = Cursor::new(bytes);
    let malformed = |e: std::io::Error| WareError::SegmentTable(e.to_string());

    let raw_type = cursor.read_u8().map_err(malformed)?;
    let seg_type = SegmentType::from_u8(raw_type).ok_or_else(|| {
        WareError::SegmentTable(format!(
            "record at 0x{:08x} has unknown type 0x{:02x}",
            offset, raw_type
        ))
    })?;

    Ok(SegmentRecord {
        offset,
        seg_type,
        wireless_tech: cursor.read_u16::<LittleEndian>().map_err(malformed)?,
        rfu: cursor.read_u8().map_err(malformed)?,
        seg_len: cursor.read_u32::<LittleEndian>().map_err(malformed)?,
    })
}

/// Repair the segment table and header after `extra_len` bytes were appended
///
/// The buffer must already hold the appended bytes. The contiguous record
/// that ends at the original end of image absorbs them, every security
/// record is downgraded to noncontiguous, `len` and `img_end_addr` grow by
/// `extra_len`, and the checksum is rewritten. The table is fully checked
/// before anything is written. `extra_len == 0` is a no-op.
pub fn fixup(image: &mut Image, extra_len: u32) -> Result<FixupSummary, WareError> {
    if extra_len == 0 {
        return Ok(FixupSummary {
            new_len: image.declared_len(),
            crc: image.stored_crc(),
            ..FixupSummary::default()
        });
    }

    let records = walk(image)?;
    let old_len = image.declared_len();
    let new_len = old_len.checked_add(extra_len).ok_or_else(|| {
        WareError::SegmentTable(format!(
            "length 0x{:08x} + 0x{:08x} overflows",
            old_len, extra_len
        ))
    })?;

    if (new_len as usize) > image.len() {
        return Err(WareError::Size {
            declared: new_len,
            actual: image.len(),
        });
    }

    let mut summary = FixupSummary {
        extra_len,
        new_len,
        ..FixupSummary::default()
    };

    for record in &records {
        match record.seg_type {
            SegmentType::Contiguous => {
                if record.end() != old_len as usize {
                    return Err(WareError::SegmentTable(format!(
                        "contiguous record at 0x{:08x} ends at 0x{:08x}, not at end of image 0x{:08x}",
                        record.offset,
                        record.end(),
                        old_len
                    )));
                }
                summary.extended.push(record.offset);
            }
            SegmentType::Security => summary.downgraded.push(record.offset),
            _ => {}
        }
    }

    if summary.extended.is_empty() {
        return Err(WareError::SegmentTable(
            "no contiguous record reaches the end of image".into(),
        ));
    }

    let data = image.data_mut();
    for record in &records {
        let header = &mut data[record.offset..record.offset + SEGMENT_RECORD_SIZE];
        match record.seg_type {
            SegmentType::Contiguous => {
                let seg_len = record.seg_len + extra_len;
                LittleEndian::write_u32(&mut header[4..8], seg_len);
                debug!(
                    "segment at 0x{:08x}: contiguous len 0x{:08x} -> 0x{:08x}",
                    record.offset, record.seg_len, seg_len
                );
            }
            SegmentType::Security => {
                header[0] = SegmentType::NonContiguous as u8;
                debug!(
                    "segment at 0x{:08x}: security -> noncontiguous",
                    record.offset
                );
            }
            _ => {}
        }
    }

    let end_addr = img_end_addr(image).wrapping_add(extra_len);
    image.write_u32(seg::IMG_END_ADDR, end_addr);
    image.set_declared_len(new_len);

    summary.crc = SegmentedCrc.compute(image);
    image.set_crc(summary.crc);

    info!(
        "segment table fixed up: len 0x{:08x} -> 0x{:08x}, CRC 0x{:08x}",
        old_len, new_len, summary.crc
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use crate::container::BLE_WARE_MAGIC;

    const HDR: usize = 0x50;

    /// Build a segmented image with the given (type, length) records after `HDR`
    fn image_with(records: &[(u8, u32)]) -> Image {
        let len = HDR + records.iter().map(|r| r.1 as usize).sum::<usize>();
        let mut data = vec![0u8; len];
        data[0..8].copy_from_slice(BLE_WARE_MAGIC);
        LittleEndian::write_u32(&mut data[24..28], len as u32);
        LittleEndian::write_u32(&mut data[36..40], len as u32 - 1);
        LittleEndian::write_u16(&mut data[40..42], HDR as u16);

        let mut offset = HDR;
        for (i, &(seg_type, seg_len)) in records.iter().enumerate() {
            data[offset] = seg_type;
            LittleEndian::write_u16(&mut data[offset + 1..offset + 3], 0xfe);
            LittleEndian::write_u32(&mut data[offset + 4..offset + 8], seg_len);
            for b in &mut data[offset + 8..offset + seg_len as usize] {
                *b = i as u8 + 1;
            }
            offset += seg_len as usize;
        }

        let mut image = Image::parse(data).unwrap();
        checksum::reseal(&mut image).unwrap();
        image
    }

    fn typical() -> Image {
        image_with(&[(0, 0x18), (3, 0x55), (1, 0x200)])
    }

    fn table_sum(image: &Image) -> usize {
        walk(image)
            .unwrap()
            .iter()
            .map(|r| r.seg_len as usize)
            .sum()
    }

    #[test]
    fn test_walk_records() {
        let image = typical();
        let records = walk(&image).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].seg_type, SegmentType::Boundary);
        assert_eq!(records[0].offset, HDR);
        assert_eq!(records[1].seg_type, SegmentType::Security);
        assert_eq!(records[1].offset, HDR + 0x18);
        assert_eq!(records[2].seg_type, SegmentType::Contiguous);
        assert_eq!(records[2].wireless_tech, 0xfe);
        assert_eq!(records[2].end(), image.declared_len() as usize);
    }

    #[test]
    fn test_sum_invariant_before_fixup() {
        let image = typical();
        assert_eq!(table_sum(&image), image.declared_len() as usize - HDR);
    }

    #[test]
    fn test_walk_rejects_zero_length_record() {
        let image = image_with(&[(0, 0x18), (1, 0x100)]);
        let mut data = image.into_data();
        LittleEndian::write_u32(&mut data[HDR + 4..HDR + 8], 0);
        let image = Image::parse(data).unwrap();
        assert!(matches!(walk(&image), Err(WareError::SegmentTable(_))));
    }

    #[test]
    fn test_walk_rejects_overrun() {
        let image = image_with(&[(0, 0x18), (1, 0x100)]);
        let mut data = image.into_data();
        LittleEndian::write_u32(&mut data[HDR + 0x18 + 4..HDR + 0x18 + 8], 0x101);
        let image = Image::parse(data).unwrap();
        assert!(matches!(walk(&image), Err(WareError::SegmentTable(_))));
    }

    #[test]
    fn test_walk_rejects_unknown_type() {
        let image = image_with(&[(7, 0x18), (1, 0x100)]);
        assert!(matches!(walk(&image), Err(WareError::SegmentTable(_))));
    }

    #[test]
    fn test_walk_rejects_bad_hdr_len() {
        let image = typical();
        let mut data = image.into_data();
        LittleEndian::write_u16(&mut data[40..42], 0x10);
        let image = Image::parse(data).unwrap();
        assert!(matches!(walk(&image), Err(WareError::SegmentTable(_))));
    }

    #[test]
    fn test_fixup_zero_is_noop() {
        let mut image = typical();
        let before = image.data().to_vec();

        let summary = fixup(&mut image, 0).unwrap();

        assert_eq!(image.data(), &before[..]);
        assert!(summary.extended.is_empty());
        assert_eq!(summary.new_len, image.declared_len());
    }

    #[test]
    fn test_fixup_extends_table() {
        let mut image = typical();
        let old_len = image.declared_len();
        let old_end = img_end_addr(&image);
        let old_crc = image.stored_crc();
        let extra = 0x40u32;

        image.grow_to(old_len as usize + extra as usize);
        let summary = fixup(&mut image, extra).unwrap();

        assert_eq!(image.declared_len(), old_len + extra);
        assert_eq!(img_end_addr(&image), old_end + extra);
        assert_eq!(summary.extended, vec![HDR + 0x18 + 0x55]);
        assert_eq!(summary.downgraded, vec![HDR + 0x18]);

        let records = walk(&image).unwrap();
        assert_eq!(records[1].seg_type, SegmentType::NonContiguous);
        assert_eq!(records[2].seg_len, 0x200 + extra);
        assert_eq!(table_sum(&image), image.declared_len() as usize - HDR);

        assert_ne!(image.stored_crc(), old_crc);
        assert_eq!(summary.crc, image.stored_crc());
        assert_eq!(checksum::verify(&image).unwrap(), summary.crc);
    }

    #[test]
    fn test_fixup_requires_grown_buffer() {
        let mut image = typical();
        assert!(matches!(fixup(&mut image, 8), Err(WareError::Size { .. })));
    }

    #[test]
    fn test_fixup_rejects_contiguous_not_at_end() {
        let mut image = image_with(&[(0, 0x18), (1, 0x100), (3, 0x55)]);
        let before = image.data().to_vec();
        image.grow_to(before.len() + 0x10);

        assert!(matches!(
            fixup(&mut image, 0x10),
            Err(WareError::SegmentTable(_))
        ));
        assert_eq!(&image.data()[..before.len()], &before[..]);
    }

    #[test]
    fn test_fixup_rejects_missing_contiguous() {
        let mut image = image_with(&[(0, 0x18), (2, 0x100)]);
        let len = image.len();
        image.grow_to(len + 0x10);
        assert!(matches!(
            fixup(&mut image, 0x10),
            Err(WareError::SegmentTable(_))
        ));
    }

    #[test]
    fn test_fixup_on_monolithic_rejected() {
        let mut data = vec![0u8; 64];
        LittleEndian::write_u32(&mut data[0..4], crate::container::WARE_MAGIC);
        LittleEndian::write_u32(&mut data[12..16], 64);
        let mut image = Image::parse(data).unwrap();
        assert!(matches!(fixup(&mut image, 4), Err(WareError::Format(_))));
    }
}
