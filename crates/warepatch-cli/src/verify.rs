//! `warepatch verify` command implementation

use crate::options::PatchArgs;
use anyhow::{Context, Result};
use std::path::Path;
use warepatch_core::{file, Catalog, CheckOutcome, Pipeline, VerificationReport};

pub fn run(path: &Path, args: &PatchArgs, json: bool) -> Result<()> {
    let options = args.to_options()?;
    let image = file::read_image(path).context("Failed to load ware file")?;

    let report = Pipeline::new(image, Catalog::builtin(), options)
        .check()
        .context("Verification failed")?;

    if json {
        println!("{}", report.to_json()?);
    } else {
        print_report(path, &report);
    }

    if !report.is_clean() {
        anyhow::bail!(
            "{} of {} patch sites do not match patchset \"{}\"",
            report.failed_count(),
            report.checks.len(),
            report.patchset
        );
    }

    Ok(())
}

pub fn print_report(path: &Path, report: &VerificationReport) {
    println!("Verifying patch sites...");
    println!("  Ware:     {}", path.display());
    println!("  Patchset: {}", report.patchset);
    println!();

    for check in &report.checks {
        let status = match &check.outcome {
            CheckOutcome::Match => "OK".to_string(),
            CheckOutcome::Unconditional => "APPEND".to_string(),
            CheckOutcome::Mismatch { found } => format!("MISMATCH (found {})", words(found)),
            CheckOutcome::OutOfBounds { end, limit } => {
                format!("OUT OF BOUNDS (0x{:x} > 0x{:x})", end, limit)
            }
        };
        println!(
            "  {:<16} {:<12} 0x{:08x}  {}",
            check.name,
            check.group.name(),
            check.address,
            status
        );
    }

    println!();
    if report.is_clean() {
        println!("Verification: PASSED");
        if report.extra_len > 0 {
            println!("  Image grows by {} bytes.", report.extra_len);
        }
    } else {
        println!("Verification: FAILED");
        println!("  This ware is not the build the patchset was written for.");
    }
}

fn words(words: &[u16]) -> String {
    words
        .iter()
        .map(|w| format!("{:04x}", w))
        .collect::<Vec<_>>()
        .join(" ")
}
