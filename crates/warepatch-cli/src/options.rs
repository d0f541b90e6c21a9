//! Patch parameters shared by `verify` and `patch`

use anyhow::{Context, Result};
use clap::Args;
use log::debug;
use std::path::PathBuf;
use warepatch_core::{ModelDescriptor, PatchOptions, Payload, WareVersion};

#[derive(Args, Debug, Clone, Default)]
pub struct PatchArgs {
    /// Report this firmware version instead of the real one
    #[arg(long, value_name = "MAJOR.MINOR.PATCH")]
    pub fake_version: Option<WareVersion>,

    /// Report this bike configuration instead of the real one
    #[arg(long, value_name = "MODEL,SHIFTER,DISPLAY")]
    pub fake_model: Option<ModelDescriptor>,

    /// Code blob appended by patchsets that extend the image
    #[arg(long, value_name = "FILE")]
    pub payload: Option<PathBuf>,

    /// Entry point inside the payload (offset in decimal or 0x hex)
    #[arg(long = "symbol", value_name = "NAME=OFFSET", value_parser = parse_symbol)]
    pub symbols: Vec<(String, u32)>,
}

impl PatchArgs {
    /// Build the run options
    pub fn to_options(&self) -> Result<PatchOptions> {
        let mut options = PatchOptions::new();

        if let Some(version) = self.fake_version {
            options = options.with_fake_version(version);
        }
        if let Some(model) = self.fake_model {
            options = options.with_fake_model(model);
        }

        match &self.payload {
            Some(path) => {
                let mut payload = Payload::from_file(path).context("Failed to load payload")?;
                for (name, offset) in &self.symbols {
                    payload = payload
                        .with_symbol(name.clone(), *offset)
                        .context("Invalid payload symbol")?;
                }
                debug!(
                    "payload {}: {} bytes, {} symbol(s)",
                    path.display(),
                    payload.len(),
                    self.symbols.len()
                );
                options = options.with_payload(payload);
            }
            None if !self.symbols.is_empty() => {
                anyhow::bail!("--symbol requires --payload");
            }
            None => {}
        }

        Ok(options)
    }
}

/// Parse `NAME=OFFSET`
fn parse_symbol(s: &str) -> Result<(String, u32), String> {
    let (name, offset) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=OFFSET, got \"{}\"", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing symbol name in \"{}\"", s));
    }

    let offset = offset.trim();
    let parsed = match offset.strip_prefix("0x").or_else(|| offset.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => offset.parse(),
    };
    let offset = parsed.map_err(|e| format!("invalid offset \"{}\": {}", offset, e))?;

    Ok((name.to_string(), offset))
}
