// Asset packer - turns a JSON manifest of images into the binary asset archive
//
//   asset-packer assets/manifest.json -o assets/assets.bin
//   asset-packer assets/manifest.json --legacy   (archive without mip fields)

use anyhow::{Context, Result};
use clap::Parser;
use mini_renderer::assets::{pack_manifest, ArchiveVersion, Manifest};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "asset-packer", about = "Pack textures listed in a manifest into an asset archive")]
struct Args {
    /// JSON manifest listing the textures to pack
    manifest: PathBuf,

    /// Archive to write
    #[arg(short, long, default_value = "assets/assets.bin")]
    output: PathBuf,

    /// Write the older archive layout without mip fields
    #[arg(long)]
    legacy: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let version = if args.legacy {
        ArchiveVersion::Legacy
    } else {
        ArchiveVersion::Mipmapped
    };

    let manifest = Manifest::load(&args.manifest)?;
    let (archive, report) = pack_manifest(&manifest, version);

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {:?}", parent))?;
    }
    archive
        .save(&args.output)
        .with_context(|| format!("Failed to write archive {:?}", args.output))?;

    for (name, reason) in &report.skipped {
        log::warn!("Skipped '{}': {}", name, reason);
    }
    log::info!(
        "Wrote {:?} ({:?}): {} packed, {} skipped",
        args.output,
        version,
        report.packed.len(),
        report.skipped.len()
    );

    Ok(())
}
