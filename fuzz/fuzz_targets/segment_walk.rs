//! Fuzz target for the segment table walk and size fixup

#![no_main]

use libfuzzer_sys::fuzz_target;
use warepatch_core::{segment, Image};

fuzz_target!(|input: (u16, Vec<u8>)| {
    let (extra, data) = input;
    let Ok(mut image) = Image::parse(data) else {
        return;
    };

    if segment::walk(&image).is_err() {
        return;
    }

    // Fixup expects the appended bytes to be present already
    let mut grown = image.clone().into_data();
    grown.resize(image.len() + extra as usize, 0xa5);
    if let Ok(grown) = Image::parse(grown) {
        image = grown;
    }
    let _ = segment::fixup(&mut image, extra as u32);
});
