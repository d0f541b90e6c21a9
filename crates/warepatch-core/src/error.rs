//! Error types for warepatch

use crate::pipeline::{Stage, VerificationReport};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for warepatch operations
///
/// Every variant is terminal for the run that produced it.
#[derive(Debug, Error)]
pub enum WareError {
    #[error("Cannot access {}: {source}", path.display())]
    Access {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unrecognized ware: {0}")]
    Format(String),

    #[error("Declared length 0x{declared:08x} extends beyond image size 0x{actual:08x}")]
    Size { declared: u32, actual: usize },

    #[error("Checksum mismatch: stored 0x{stored:08x}, computed 0x{computed:08x}")]
    Checksum { stored: u32, computed: u32 },

    #[error("No patchset for {format} ware version 0x{version:08x} crc 0x{crc:08x} length 0x{length:08x}")]
    CatalogMiss {
        format: &'static str,
        version: u32,
        crc: u32,
        length: u32,
    },

    #[error("Code to patch does not match original: {} of {} patch sites differ", .0.failed_count(), .0.checks.len())]
    Verification(Box<VerificationReport>),

    #[error("Invalid parameter: {0}")]
    Param(#[from] ParamError),

    #[error("Payload error: {0}")]
    Payload(String),

    #[error("Patch \"{name}\" at 0x{address:08x} lies outside the image")]
    Bounds { name: &'static str, address: u32 },

    #[error("Inconsistent patch definition: {0}")]
    Catalog(String),

    #[error("Malformed segment table: {0}")]
    SegmentTable(String),

    #[error("Pipeline step requires stage {expected:?}, but the run is {found:?}")]
    Stage { expected: Stage, found: Stage },
}

/// Errors in user-supplied patch parameters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("fake version \"{0}\" is not MAJOR.MINOR.PATCH")]
    VersionSyntax(String),

    #[error("fake version component {component} = {value} exceeds {max}")]
    VersionRange {
        component: &'static str,
        value: u32,
        max: u32,
    },

    #[error("model descriptor \"{0}\" is not MODEL,SHIFTER,DISPLAY")]
    ModelSyntax(String),

    #[error("{field} \"{value}\" is not one of {allowed}")]
    NotAllowed {
        field: &'static str,
        value: String,
        allowed: &'static str,
    },

    #[error("patchset \"{patchset}\" has no {group} patches")]
    Unsupported {
        patchset: &'static str,
        group: &'static str,
    },
}

impl WareError {
    /// Wrap an I/O error with the path it occurred on
    pub fn access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WareError::Access {
            path: path.into(),
            source,
        }
    }
}
