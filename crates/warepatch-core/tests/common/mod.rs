//! Synthetic ware images for integration tests
//!
//! Real firmware is not redistributable, so fixtures are built from filler
//! bytes, the expected words of a registered patchset, and a checksum that
//! is forced to the registered value by solving for the last four bytes.

#![allow(dead_code)]

use warepatch_core::{
    Catalog, Format, Payload, PatchSet, Replacement, BLE_WARE_MAGIC, WARE_MAGIC,
};

const MPEG2_POLY: u32 = 0x04c1_1db7;
const ZLIB_POLY_REFLECTED: u32 = 0xedb8_8320;

/// Segment layout of forged segmented images
pub const HDR_LEN: usize = 0x2c;
pub const BOUNDARY_LEN: usize = 0x18;
pub const SECURITY_LEN: usize = 0x55;
pub const CONTIGUOUS_OFFSET: usize = HDR_LEN + BOUNDARY_LEN + SECURITY_LEN;

/// Payload used against the segmented builds
pub const PAYLOAD_LEN: usize = 0x100;
pub const PUTCHAR_OFFSET: u32 = 0x20;

/// Bit-at-a-time word CRC, continuing from `crc`
pub fn reference_words(mut crc: u32, data: &[u8]) -> u32 {
    for chunk in data.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        crc ^= u32::from_le_bytes(word);
        for _ in 0..32 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ MPEG2_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Undo the 32 shift steps of one word
fn unshift_word(mut crc: u32) -> u32 {
    for _ in 0..32 {
        crc = if crc & 1 != 0 {
            ((crc ^ MPEG2_POLY) >> 1) | 0x8000_0000
        } else {
            crc >> 1
        };
    }
    crc
}

fn zlib_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut c = i as u32;
        for _ in 0..8 {
            c = if c & 1 != 0 {
                (c >> 1) ^ ZLIB_POLY_REFLECTED
            } else {
                c >> 1
            };
        }
        *entry = c;
    }
    table
}

/// Four bytes that, appended to `before`, make its zlib CRC-32 `target`
fn forge_zlib(before: &[u8], target: u32) -> [u8; 4] {
    let table = zlib_table();

    // Table entries have distinct top bytes, so walk back from the final
    // register picking the entry each step must have used.
    let mut indices = [0u8; 4];
    let mut x = !target;
    for k in (0..4).rev() {
        let j = table
            .iter()
            .position(|t| t >> 24 == x >> 24)
            .expect("zlib table top bytes are a permutation");
        indices[k] = j as u8;
        x = (x ^ table[j]) << 8;
    }

    let mut reg = !crc32fast::hash(before);
    let mut out = [0u8; 4];
    for k in 0..4 {
        out[k] = (reg as u8) ^ indices[k];
        reg = (reg >> 8) ^ table[indices[k] as usize];
    }
    out
}

fn filler(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

fn write_words(data: &mut [u8], offset: usize, words: &[u16]) {
    for (i, word) in words.iter().enumerate() {
        data[offset + 2 * i..offset + 2 * i + 2].copy_from_slice(&word.to_le_bytes());
    }
}

/// Find a built-in patchset by name
pub fn patchset(name: &str) -> &'static PatchSet {
    Catalog::builtin()
        .iter()
        .find(|set| set.name == name)
        .unwrap_or_else(|| panic!("no builtin patchset {}", name))
}

/// Builder for an image matching a registered build
pub struct Fixture {
    set: &'static PatchSet,
    data: Vec<u8>,
}

impl Fixture {
    /// Filler plus every expected pattern of the patchset and its groups
    pub fn new(set: &'static PatchSet) -> Self {
        let build = set.build;
        let len = build.length as usize;
        let base = build.format.base_address();
        let mut data = filler(len, build.crc);

        match build.format {
            Format::Monolithic => {
                data[0..4].copy_from_slice(&WARE_MAGIC.to_le_bytes());
                data[4..8].copy_from_slice(&build.version.unwrap_or(0).to_le_bytes());
                data[12..16].copy_from_slice(&build.length.to_le_bytes());
                data[16..40].fill(0);
                data[16..27].copy_from_slice(b"Mar 29 2021");
                data[28..36].copy_from_slice(b"14:20:30");
            }
            Format::Segmented => {
                data[0..8].copy_from_slice(BLE_WARE_MAGIC);
                data[12..44].fill(0);
                data[12] = 1;
                data[13] = 3;
                data[14..16].copy_from_slice(&0x00feu16.to_le_bytes());
                data[24..28].copy_from_slice(&build.length.to_le_bytes());
                data[28..32].copy_from_slice(&(CONTIGUOUS_OFFSET as u32).to_le_bytes());
                data[32..36].copy_from_slice(&build.version.unwrap_or(0x0001_0401).to_le_bytes());
                data[36..40].copy_from_slice(&(build.length - 1).to_le_bytes());
                data[40..42].copy_from_slice(&(HDR_LEN as u16).to_le_bytes());

                let records = [
                    (HDR_LEN, 0u8, BOUNDARY_LEN),
                    (HDR_LEN + BOUNDARY_LEN, 3u8, SECURITY_LEN),
                    (CONTIGUOUS_OFFSET, 1u8, len - CONTIGUOUS_OFFSET),
                ];
                for (offset, seg_type, seg_len) in records {
                    data[offset] = seg_type;
                    data[offset + 1..offset + 3].copy_from_slice(&0x00feu16.to_le_bytes());
                    data[offset + 3] = 0;
                    data[offset + 4..offset + 8].copy_from_slice(&(seg_len as u32).to_le_bytes());
                }
            }
        }

        let groups = set.groups.iter().flat_map(|g| g.specs.iter());
        for spec in set.patches.iter().chain(groups) {
            if let Some(expected) = spec.expected {
                let offset = (spec.target_address - base) as usize;
                write_words(&mut data, offset, expected);
            }
        }

        Self { set, data }
    }

    /// Modify the image before its checksum is forged
    pub fn with(mut self, edit: impl FnOnce(&mut Vec<u8>)) -> Self {
        edit(&mut self.data);
        self
    }

    /// Forge the last four bytes so the computed checksum is the registered one
    pub fn build(mut self) -> Vec<u8> {
        let build = self.set.build;
        let len = self.data.len();
        let data = &mut self.data;
        data[8..12].copy_from_slice(&build.crc.to_le_bytes());

        match build.format {
            Format::Monolithic => {
                let mut header = data[..40].to_vec();
                header[8..16].fill(0xff);
                let state = reference_words(reference_words(0xffff_ffff, &header), &data[40..len - 4]);
                let word = unshift_word(build.crc) ^ state;
                data[len - 4..].copy_from_slice(&word.to_le_bytes());
            }
            Format::Segmented => {
                let tail = forge_zlib(&data[12..len - 4], build.crc);
                data[len - 4..].copy_from_slice(&tail);
            }
        }

        self.data
    }
}

/// Forged image of the named built-in build
pub fn pristine(name: &str) -> Vec<u8> {
    Fixture::new(patchset(name)).build()
}

/// Payload with a `putchar` symbol
pub fn payload() -> Payload {
    let data: Vec<u8> = (0..PAYLOAD_LEN).map(|i| (i as u8).wrapping_mul(3)).collect();
    Payload::from_bytes(data)
        .and_then(|p| p.with_symbol("putchar", PUTCHAR_OFFSET))
        .expect("valid payload")
}

/// Load address of the payload in a segmented build
pub fn payload_address(set: &PatchSet) -> u32 {
    set.patches
        .iter()
        .find(|spec| spec.replacement == Replacement::Payload)
        .map(|spec| spec.target_address)
        .expect("patchset appends a payload")
}

