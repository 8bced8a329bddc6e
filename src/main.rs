//! unpsp - PlayStation Portable package unpacker
//!
//! Installs PSP disc images, themes and PSX titles from PKG files onto a
//! storage root laid out like a memory stick.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use up_core::config::{ImageFormat, PartialOutputPolicy};
use up_core::{CancelFlag, Config, ExtractContext, TracingProgress};
use up_integration::{InstallOptions, PkgInstaller};
use up_loader::{inspect, PkgContainer};
use up_vfs::LocalStorage;

#[derive(Parser)]
#[command(name = "unpsp", version, about = "PSP package unpacker")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Install the contents of a package
    Extract {
        /// Package file
        pkg: PathBuf,

        /// Write disc images as CSO instead of ISO
        #[arg(long)]
        cso: bool,

        /// Storage root to install to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Leave half-written files behind when an item fails
        #[arg(long)]
        keep_partial: bool,
    },
    /// Show what a package contains
    Info {
        /// Package file
        pkg: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    config.map_err(|e| anyhow!("failed to load configuration: {}", e))
}

fn extract(
    mut config: Config,
    pkg: PathBuf,
    cso: bool,
    output: Option<PathBuf>,
    keep_partial: bool,
) -> Result<()> {
    if let Some(output) = output {
        config.output.root = output;
    }
    if cso {
        config.output.image_format = ImageFormat::Cso;
    }
    if keep_partial {
        config.extract.partial_output = PartialOutputPolicy::Keep;
    }

    // The package is read from its own directory, not from the storage root
    let pkg = std::path::absolute(&pkg).with_context(|| format!("bad package path {:?}", pkg))?;
    let (Some(dir), Some(name)) = (pkg.parent(), pkg.file_name()) else {
        bail!("{:?} is not a package file", pkg);
    };
    let source = LocalStorage::new(dir);

    let storage = LocalStorage::new(&config.output.root);
    let installer = PkgInstaller::new(storage, InstallOptions::from(&config));

    let cancel = CancelFlag::new();
    let ctx = ExtractContext::new(&TracingProgress, &cancel);
    let report = installer
        .install_from(&source, Path::new(name), &ctx)
        .with_context(|| format!("failed to install {:?}", pkg))?;

    for output in &report.outputs {
        println!("{}", config.output.root.join(output).display());
    }
    if !report.is_complete() {
        for failure in &report.failures {
            eprintln!("{}: {}", failure.name, failure.error);
        }
        bail!(
            "{} of {} items could not be extracted",
            report.failures.len(),
            report.failures.len() + report.outputs.len()
        );
    }
    Ok(())
}

fn info(pkg: PathBuf, json: bool) -> Result<()> {
    let file = File::open(&pkg).with_context(|| format!("cannot open {:?}", pkg))?;
    let size = file.metadata()?.len();
    let mut container = PkgContainer::open(BufReader::new(file), size)?;
    let summary = inspect(&mut container)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Content ID:   {}", summary.content_id);
    println!("Title ID:     {}", summary.title_id);
    println!("Label:        {}", summary.label);
    match summary.kind {
        Some(kind) => println!("Content:      {:?} (0x{:x})", kind, summary.content_type),
        None => println!("Content:      unsupported (0x{:x})", summary.content_type),
    }
    if let Some(drm) = summary.drm_type {
        println!("DRM type:     {}", drm);
    }
    println!("Key type:     {}", summary.key_type);
    println!("Items:        {}", summary.item_count);
    println!("Size:         {} bytes", summary.total_size);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    up_core::logging::init(config.logging.level);

    tracing::debug!("storage root {:?}", config.output.root);

    match cli.command {
        Command::Extract {
            pkg,
            cso,
            output,
            keep_partial,
        } => extract(config, pkg, cso, output, keep_partial),
        Command::Info { pkg, json } => info(pkg, json),
    }
}
