//! `warepatch catalog` command implementation

use anyhow::Result;
use serde_json::json;
use warepatch_core::{Catalog, PatchSet};

pub fn run(json: bool) -> Result<()> {
    let catalog = Catalog::builtin();

    if json {
        let sets: Vec<_> = catalog.iter().map(to_json).collect();
        println!("{}", serde_json::to_string_pretty(&sets)?);
        return Ok(());
    }

    println!("Registered builds:");
    println!(
        "  {:<20} {:<11} {:>10}  {:>10}  {:>10}  {:>7}  Groups",
        "Name", "Format", "Version", "CRC", "Length", "Patches"
    );
    for set in catalog.iter() {
        let version = match set.build.version {
            Some(v) => format!("0x{:08x}", v),
            None => "any".to_string(),
        };
        let groups: Vec<&str> = set.groups.iter().map(|g| g.kind.name()).collect();
        println!(
            "  {:<20} {:<11} {:>10}  0x{:08x}  0x{:08x}  {:>7}  {}",
            set.name,
            set.build.format.name(),
            version,
            set.build.crc,
            set.build.length,
            set.patches.len(),
            if groups.is_empty() {
                "-".to_string()
            } else {
                groups.join(", ")
            }
        );
    }

    Ok(())
}

fn to_json(set: &PatchSet) -> serde_json::Value {
    json!({
        "name": set.name,
        "format": set.build.format,
        "version": set.build.version,
        "crc": set.build.crc,
        "length": set.build.length,
        "patches": set.patches.iter().map(|p| json!({
            "name": p.name,
            "address": p.target_address,
            "words": p.expected.map(|e| e.len()),
        })).collect::<Vec<_>>(),
        "groups": set.groups.iter().map(|g| g.kind).collect::<Vec<_>>(),
    })
}
