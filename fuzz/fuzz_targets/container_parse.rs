//! Fuzz target for ware container parsing
//!
//! Tests header decoding, checksums and catalog verification against
//! malformed ware data.

#![no_main]

use libfuzzer_sys::fuzz_target;
use warepatch_core::{bootloader, checksum, Catalog, Image, PatchOptions, Pipeline};

fuzz_target!(|data: &[u8]| {
    let _ = bootloader::inspect(data);

    // Try to parse arbitrary data - should not panic
    let Ok(image) = Image::parse(data.to_vec()) else {
        return;
    };
    let _ = image.header();
    let _ = checksum::compute(&image);

    let _ = Pipeline::new(image, Catalog::builtin(), PatchOptions::new()).check();
});
