//! `warepatch check` command implementation

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use warepatch_core::{bootloader, checksum, Format, Image};

pub fn run(path: &Path) -> Result<()> {
    let data = fs::read(path).context("Failed to read ware file")?;

    if Format::probe(&data).is_none() {
        println!("{}: ware magic not found, assuming bootloader binary", path.display());
        let check = bootloader::verify(&data).context("Bootloader check failed")?;
        println!("{}: version {}", path.display(), check.version);
        println!("{}: CRC 0x{:08x} OK", path.display(), check.computed_crc);
        return Ok(());
    }

    let image = Image::parse(data).context("Failed to parse ware file")?;
    println!("{}: {} ware", path.display(), image.format());
    println!("{}: version 0x{:08x}", path.display(), image.version());
    println!("{}: length 0x{:08x}", path.display(), image.declared_len());

    let crc = checksum::verify(&image).context("Checksum check failed")?;
    println!("{}: CRC 0x{:08x} OK", path.display(), crc);

    Ok(())
}
