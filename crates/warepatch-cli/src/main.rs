//! Warepatch CLI - Verify and patch firmware ware images

mod catalog;
mod check;
mod info;
mod options;
mod patch;
mod verify;

use clap::{ArgAction, Parser, Subcommand};
use options::PatchArgs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "warepatch")]
#[command(author, version, about = "Verifying binary patcher for firmware ware images")]
#[command(long_about = "Warepatch applies known patchsets to exactly fingerprinted firmware builds.\n\nEvery patch site is checked against its expected words before anything is written; the image is then resealed with a fresh checksum.\n\nSupported containers: monolithic mainware, segmented bleware")]
struct Cli {
    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header fields, segment table and catalog match of a ware file
    Info {
        /// Ware or bootloader file
        ware: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check the stored checksum of a ware or bootloader file
    Check {
        /// Ware or bootloader file
        ware: PathBuf,
    },

    /// Check every patch site without writing anything
    Verify {
        /// Ware file
        ware: PathBuf,

        #[command(flatten)]
        patch: PatchArgs,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify, patch and reseal a ware file
    Patch {
        /// Ware file, patched in place unless --output is given
        ware: PathBuf,

        #[command(flatten)]
        patch: PatchArgs,

        /// Write the patched image here instead
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the registered builds
    Catalog {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { ware, json } => info::run(&ware, json),

        Commands::Check { ware } => check::run(&ware),

        Commands::Verify { ware, patch, json } => verify::run(&ware, &patch, json),

        Commands::Patch {
            ware,
            patch,
            output,
            json,
        } => patch::run(&ware, &patch, output.as_deref(), json),

        Commands::Catalog { json } => catalog::run(json),
    }
}
