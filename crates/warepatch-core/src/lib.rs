//! Warepatch Core - Verifying patch engine for firmware ware images
//!
//! This crate recognizes the two ware container formats, checks their
//! checksums, looks the image up in a catalog of known builds by exact
//! fingerprint, verifies every patch site, and only then rewrites the
//! image, extends its declared length and reseals its checksum.

pub mod bootloader;
pub mod builds;
pub mod catalog;
pub mod checksum;
pub mod config;
pub mod container;
pub mod error;
pub mod file;
pub mod params;
pub mod payload;
pub mod pipeline;
pub mod segment;

// Re-export commonly used types
pub use bootloader::BootloaderCheck;
pub use catalog::{
    BuildId, Catalog, Fingerprint, GroupKind, PatchSet, PatchSpec, Replacement, ResolvedPatch,
    ResolvedStamp, Stamp, SubGroup,
};
pub use checksum::{engine_for, ChecksumEngine, MonolithicCrc, SegmentedCrc};
pub use config::PatchOptions;
pub use container::{
    Format, Header, Image, MonolithicHeader, SegmentedHeader, BLEWARE_BASE, BLE_WARE_MAGIC,
    MAINWARE_BASE, WARE_MAGIC,
};
pub use error::{ParamError, WareError};
pub use file::WareFile;
pub use params::{BikeModel, Display, ModelDescriptor, Shifter, WareVersion};
pub use payload::Payload;
pub use pipeline::{
    CheckOutcome, PatchCheck, PatchOutcome, Pipeline, Stage, VerificationReport, VerifiedPlan,
};
pub use segment::{FixupSummary, SegmentRecord, SegmentType, SEGMENT_RECORD_SIZE};
