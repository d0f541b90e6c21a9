//! `warepatch patch` command implementation

use crate::options::PatchArgs;
use anyhow::{Context, Result};
use std::path::Path;
use warepatch_core::{file, Catalog, PatchOutcome, Pipeline, WareFile};

pub fn run(path: &Path, args: &PatchArgs, output: Option<&Path>, json: bool) -> Result<()> {
    let options = args.to_options()?;

    if !json {
        println!("Applying patchset...");
        println!("  Ware:   {}", path.display());
        if let Some(output) = output {
            println!("  Output: {}", output.display());
        }
    }

    let outcome = match output {
        Some(output) => {
            let image = file::read_image(path).context("Failed to load ware file")?;
            let (patched, outcome) = Pipeline::new(image, Catalog::builtin(), options)
                .run()
                .context("Patching failed")?;
            file::write_image(output, &patched).context("Failed to write output file")?;
            outcome
        }
        None => {
            let mut ware = WareFile::open(path).context("Failed to open ware file")?;
            let image = ware.read_image().context("Failed to load ware file")?;
            let (patched, outcome) = Pipeline::new(image, Catalog::builtin(), options)
                .run()
                .context("Patching failed")?;
            ware.commit(&patched).context("Failed to write ware file")?;
            outcome
        }
    };

    if json {
        println!("{}", outcome.to_json()?);
    } else {
        print_outcome(&outcome);
    }

    Ok(())
}

fn print_outcome(outcome: &PatchOutcome) {
    println!("  Patchset: {}", outcome.patchset);
    println!("  Format:   {}", outcome.format);
    println!();

    for name in &outcome.applied {
        println!("  patched {}", name);
    }

    println!();
    println!("Patch summary:");
    println!("  Stamp:      {} {}", outcome.stamp.date, outcome.stamp.time);
    println!("  Appended:   {:>10} bytes", outcome.extra_len);
    println!("  Length:     0x{:08x} -> 0x{:08x}", outcome.old_len, outcome.new_len);
    println!("  CRC:        0x{:08x} -> 0x{:08x}", outcome.old_crc, outcome.new_crc);

    if let Some(segments) = &outcome.segments {
        if !segments.extended.is_empty() {
            println!("  Extended:   {} contiguous segment(s)", segments.extended.len());
        }
        if !segments.downgraded.is_empty() {
            println!("  Downgraded: {} security segment(s)", segments.downgraded.len());
        }
    }

    println!();
    println!("Patch applied successfully!");
}
