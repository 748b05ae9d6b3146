// Manifest -> archive
//
// Every texture is decoded to RGBA8. With mipmaps requested, each level is
// resampled from the full-size image and appended after the previous one.

use super::archive::{ArchiveVersion, AssetArchive};
use super::manifest::{Manifest, TextureEntry};
use super::{full_mip_count, TextureAsset};
use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::collections::HashSet;

const CHANNELS: u32 = 4;

/// Outcome of a packing run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackReport {
    pub packed: Vec<String>,
    /// Entry and why it was left out
    pub skipped: Vec<(String, String)>,
}

/// Decode every manifest entry into an archive; bad entries are skipped
pub fn pack_manifest(manifest: &Manifest, version: ArchiveVersion) -> (AssetArchive, PackReport) {
    let mut archive = AssetArchive::new(version);
    let mut report = PackReport::default();
    let mut seen = HashSet::new();

    for skipped in &manifest.skipped {
        report.skipped.push((skipped.clone(), "invalid entry".into()));
    }

    for entry in &manifest.textures {
        if !seen.insert(entry.name.as_str()) {
            log::warn!("Skipping duplicate texture '{}'", entry.name);
            report
                .skipped
                .push((entry.name.clone(), "duplicate name".into()));
            continue;
        }

        match pack_texture(manifest, entry, version) {
            Ok(texture) => {
                log::info!(
                    "Packed '{}' ({}x{}, {} levels, {} bytes)",
                    texture.name,
                    texture.width,
                    texture.height,
                    texture.mip_levels,
                    texture.pixels.len()
                );
                report.packed.push(texture.name.clone());
                archive.textures.push(texture);
            }
            Err(e) => {
                log::warn!("Skipping texture '{}': {:#}", entry.name, e);
                report.skipped.push((entry.name.clone(), format!("{e:#}")));
            }
        }
    }

    (archive, report)
}

fn pack_texture(manifest: &Manifest, entry: &TextureEntry, version: ArchiveVersion) -> Result<TextureAsset> {
    let path = manifest.resolve(entry);
    let image = image::open(&path)
        .with_context(|| format!("Failed to decode {:?}", path))?
        .to_rgba8();

    let mipmaps = match (entry.mipmaps, version) {
        (true, ArchiveVersion::Legacy) => {
            log::warn!("'{}': legacy archives carry no mip levels", entry.name);
            false
        }
        (mipmaps, _) => mipmaps,
    };

    Ok(build_texture(&entry.name, &image, mipmaps))
}

/// Concatenate the base image and, if requested, its full mip chain
pub fn build_texture(name: &str, image: &RgbaImage, mipmaps: bool) -> TextureAsset {
    let (width, height) = image.dimensions();
    let mip_levels = if mipmaps { full_mip_count(width, height) } else { 1 };

    let mut pixels = image.as_raw().clone();
    for level in 1..mip_levels {
        let w = (width >> level).max(1);
        let h = (height >> level).max(1);
        let resized = imageops::resize(image, w, h, FilterType::Triangle);
        pixels.extend_from_slice(resized.as_raw());
    }

    TextureAsset {
        name: name.to_string(),
        width,
        height,
        channels: CHANNELS,
        mip_levels,
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn single_level_keeps_pixels_verbatim() {
        let image = RgbaImage::from_fn(3, 2, |x, y| image::Rgba([x as u8, y as u8, 7, 255]));
        let texture = build_texture("t", &image, false);

        assert_eq!(texture.mip_levels, 1);
        assert_eq!(texture.channels, 4);
        assert_eq!(texture.pixels, image.as_raw().clone());
    }

    #[test]
    fn mip_chain_is_concatenated_down_to_one_pixel() {
        let image = RgbaImage::from_pixel(8, 4, image::Rgba([200, 100, 50, 255]));
        let texture = build_texture("t", &image, true);

        assert_eq!(texture.mip_levels, 4);
        // 8x4 + 4x2 + 2x1 + 1x1
        assert_eq!(texture.pixels.len(), (32 + 8 + 2 + 1) * 4);
        assert_eq!(Some(texture.pixels.len() as u64), texture.expected_len());
        // A flat color stays flat at every level
        assert_eq!(&texture.pixels[texture.pixels.len() - 4..], &[200, 100, 50, 255]);
    }

    #[test]
    fn unreadable_sources_are_skipped() {
        let manifest = Manifest {
            base_dir: PathBuf::from("definitely/not/here"),
            textures: vec![TextureEntry {
                name: "ghost".into(),
                path: "ghost.png".into(),
                mipmaps: false,
            }],
            skipped: vec!["textures[1]: missing field `name`".into()],
        };

        let (archive, report) = pack_manifest(&manifest, ArchiveVersion::Mipmapped);
        assert!(archive.textures.is_empty());
        assert!(report.packed.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[1].0, "ghost");
    }
}
