//! Payload supplied by the caller for append-region patches
//!
//! The payload is opaque: its bytes are appended as-is, and its named
//! symbol offsets are only used to compute entry pointers into it.

use crate::error::WareError;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Device-resident code blob to append to an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    data: Vec<u8>,
    symbols: BTreeMap<String, u32>,
}

impl Payload {
    /// Wrap payload bytes; length must be even and nonzero
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, WareError> {
        if data.is_empty() {
            return Err(WareError::Payload("payload is empty".into()));
        }
        if data.len() % 2 != 0 {
            return Err(WareError::Payload(format!(
                "payload length {} is not a whole number of 16-bit words",
                data.len()
            )));
        }
        Ok(Self {
            data,
            symbols: BTreeMap::new(),
        })
    }

    /// Load payload bytes from a file
    pub fn from_file(path: &Path) -> Result<Self, WareError> {
        let data = fs::read(path).map_err(|e| WareError::access(path, e))?;
        Self::from_bytes(data)
    }

    /// Record the offset of a named entry point inside the payload
    pub fn with_symbol(mut self, name: impl Into<String>, offset: u32) -> Result<Self, WareError> {
        let name = name.into();
        if offset as usize >= self.data.len() {
            return Err(WareError::Payload(format!(
                "symbol \"{}\" offset 0x{:x} is outside the {}-byte payload",
                name,
                offset,
                self.data.len()
            )));
        }
        self.symbols.insert(name, offset);
        Ok(self)
    }

    /// Offset of a named entry point
    pub fn symbol(&self, name: &str) -> Result<u32, WareError> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| WareError::Payload(format!("payload has no symbol \"{}\"", name)))
    }

    pub fn symbols(&self) -> impl Iterator<Item = (&str, u32)> {
        self.symbols.iter().map(|(name, offset)| (name.as_str(), *offset))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Payload as little-endian 16-bit words
    pub fn words(&self) -> Vec<u16> {
        self.data.chunks_exact(2).map(LittleEndian::read_u16).collect()
    }
}
