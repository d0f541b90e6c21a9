//! Bootloader binaries
//!
//! A bootloader carries no ware header. Its last four bytes hold the
//! expected word CRC (little-endian) of everything before them, and the
//! three bytes right before the CRC hold its version as ASCII in reverse
//! order.

use crate::checksum::crc32_words;
use crate::error::WareError;
use byteorder::{ByteOrder, LittleEndian};
use log::info;
use serde::Serialize;

/// Smallest binary holding both the version and the CRC trailer
pub const TRAILER_LEN: usize = 8;

/// Result of checking a bootloader binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootloaderCheck {
    pub version: String,
    pub expected_crc: u32,
    pub computed_crc: u32,
}

impl BootloaderCheck {
    pub fn is_ok(&self) -> bool {
        self.expected_crc == self.computed_crc
    }
}

/// Read the trailer and compute the checksum
pub fn inspect(data: &[u8]) -> Result<BootloaderCheck, WareError> {
    if data.len() < TRAILER_LEN {
        return Err(WareError::Format(format!(
            "{} bytes is too short for a bootloader trailer",
            data.len()
        )));
    }

    let body_len = data.len() - 4;
    let expected_crc = LittleEndian::read_u32(&data[body_len..]);
    let tail = &data[data.len() - TRAILER_LEN..];
    let version: String = [tail[3], tail[2], tail[1]]
        .iter()
        .map(|&b| b as char)
        .collect();

    let check = BootloaderCheck {
        version,
        expected_crc,
        computed_crc: crc32_words(&[&data[..body_len]]),
    };

    info!(
        "bootloader version {} CRC 0x{:08x} {}",
        check.version,
        check.computed_crc,
        if check.is_ok() { "OK" } else { "FAIL" }
    );

    Ok(check)
}

/// Check a bootloader binary, failing on a checksum mismatch
pub fn verify(data: &[u8]) -> Result<BootloaderCheck, WareError> {
    let check = inspect(data)?;
    if !check.is_ok() {
        return Err(WareError::Checksum {
            stored: check.expected_crc,
            computed: check.computed_crc,
        });
    }
    Ok(check)
}
