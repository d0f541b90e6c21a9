//! `warepatch info` command implementation

use anyhow::{Context, Result};
use serde_json::json;
use std::fs;
use std::path::Path;
use warepatch_core::{bootloader, checksum, segment, Catalog, Format, Header, Image};

pub fn run(path: &Path, json: bool) -> Result<()> {
    let data = fs::read(path).context("Failed to read ware file")?;

    if Format::probe(&data).is_none() {
        return bootloader_info(path, &data, json);
    }

    let image = Image::parse(data).context("Failed to parse ware file")?;
    let header = image.header().context("Failed to decode header")?;
    let computed = checksum::compute(&image).ok();
    let records = match image.format() {
        Format::Segmented => Some(segment::walk(&image)),
        Format::Monolithic => None,
    };
    let patchset = Catalog::builtin()
        .lookup(&image.fingerprint())
        .ok()
        .map(|set| set.name);

    if json {
        let segments = match &records {
            Some(Ok(records)) => json!(records),
            Some(Err(e)) => json!({ "error": e.to_string() }),
            None => json!(null),
        };
        let value = json!({
            "file": path.display().to_string(),
            "size": image.len(),
            "format": image.format(),
            "fingerprint": image.fingerprint(),
            "computed_crc": computed,
            "patchset": patchset,
            "segments": segments,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Ware: {}", path.display());
    println!("  Format:        {}", image.format());
    println!("  File size:     0x{:08x} ({} bytes)", image.len(), image.len());

    match &header {
        Header::Monolithic(h) => {
            println!("  Version:       0x{:08x}", h.version);
            println!("  CRC:           0x{:08x}", h.crc);
            println!("  Length:        0x{:08x}", h.length);
            println!("  Date:          {}", h.date_text());
            println!("  Time:          {}", h.time_text());
        }
        Header::Segmented(h) => {
            println!("  CRC:           0x{:08x}", h.crc);
            println!("  Meta version:  {}", h.meta_ver);
            println!("  BIM version:   {}", h.bim_ver);
            println!("  Tech type:     0x{:04x}", h.tech_type);
            println!("  CRC status:    0x{:02x}", h.crc_stat);
            println!("  Copy status:   0x{:02x}", h.img_cp_stat);
            println!("  Image number:  {}", h.img_no);
            println!("  Image type:    0x{:02x}", h.img_type);
            println!("  Image valid:   0x{:08x}", h.img_vld);
            println!("  Length:        0x{:08x}", h.len);
            println!("  Entry:         0x{:08x}", h.prg_entry);
            println!("  Version:       0x{:08x}", h.soft_ver);
            println!("  End address:   0x{:08x}", h.img_end_addr);
            println!("  Header length: 0x{:04x}", h.hdr_len);
        }
    }

    match computed {
        Some(crc) => println!(
            "  Computed CRC:  0x{:08x} {}",
            crc,
            if crc == image.stored_crc() { "OK" } else { "FAIL" }
        ),
        None => println!("  Computed CRC:  n/a (declared length exceeds file)"),
    }

    match patchset {
        Some(name) => println!("  Patchset:      {}", name),
        None => println!("  Patchset:      none (unknown build)"),
    }

    match records {
        Some(Ok(records)) => {
            println!();
            println!("Segments:");
            println!("  {:>10}  {:<14} {:>6}  {:>10}", "Offset", "Type", "Tech", "Length");
            for record in &records {
                println!(
                    "  0x{:08x}  {:<14} 0x{:04x}  0x{:08x}",
                    record.offset,
                    record.seg_type.name(),
                    record.wireless_tech,
                    record.seg_len
                );
            }
        }
        Some(Err(e)) => {
            println!();
            println!("Segments: {}", e);
        }
        None => {}
    }

    Ok(())
}

fn bootloader_info(path: &Path, data: &[u8], json: bool) -> Result<()> {
    let check = bootloader::inspect(data).context("Not a ware file or bootloader binary")?;

    if json {
        let value = json!({
            "file": path.display().to_string(),
            "size": data.len(),
            "format": "bootloader",
            "bootloader": check,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Bootloader: {}", path.display());
    println!("  File size:     0x{:08x} ({} bytes)", data.len(), data.len());
    println!("  Version:       {}", check.version);
    println!("  Expected CRC:  0x{:08x}", check.expected_crc);
    println!(
        "  Computed CRC:  0x{:08x} {}",
        check.computed_crc,
        if check.is_ok() { "OK" } else { "FAIL" }
    );

    Ok(())
}
