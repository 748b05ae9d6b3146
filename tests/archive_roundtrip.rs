use image::{Rgba, RgbaImage};
use mini_renderer::assets::{pack_manifest, ArchiveError, ArchiveVersion, AssetArchive, Manifest};
use std::path::PathBuf;

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mini-renderer-{}-{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(dir.join("textures")).unwrap();
    dir
}

fn write_checker(dir: &PathBuf) -> RgbaImage {
    let image = RgbaImage::from_fn(4, 4, |x, y| {
        if (x + y) % 2 == 0 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    });
    image.save(dir.join("textures/checker.png")).unwrap();
    image
}

#[test]
fn packed_manifest_loads_back() {
    let dir = scratch_dir("roundtrip");
    let image = write_checker(&dir);

    std::fs::write(
        dir.join("manifest.json"),
        r#"{
            "textures": [
                { "name": "checker", "path": "textures/checker.png", "generateMipMaps": true },
                { "name": "flat", "path": "textures/checker.png" },
                { "name": "ghost", "path": "textures/ghost.png" },
                { "path": "textures/no-name.png" }
            ]
        }"#,
    )
    .unwrap();

    let manifest = Manifest::load(&dir.join("manifest.json")).unwrap();
    let (archive, report) = pack_manifest(&manifest, ArchiveVersion::Mipmapped);

    assert_eq!(report.packed, vec!["checker".to_string(), "flat".to_string()]);
    assert_eq!(report.skipped.len(), 2);

    let path = dir.join("assets.bin");
    archive.save(&path).unwrap();
    let loaded = AssetArchive::load(&path, ArchiveVersion::Mipmapped).unwrap();
    assert_eq!(loaded, archive);

    let checker = loaded.texture("checker").unwrap();
    assert_eq!((checker.width, checker.height, checker.channels), (4, 4, 4));
    assert_eq!(checker.mip_levels, 3);
    assert_eq!(checker.pixels.len(), (16 + 4 + 1) * 4);
    assert_eq!(&checker.pixels[..64], image.as_raw().as_slice());

    let flat = loaded.texture("flat").unwrap();
    assert_eq!(flat.mip_levels, 1);
    assert_eq!(flat.pixels, image.as_raw().clone());

    assert!(loaded.texture("missing").is_none());
    assert!(loaded.model("checker").is_none());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn legacy_archive_needs_legacy_reader() {
    let dir = scratch_dir("legacy");
    write_checker(&dir);
    std::fs::write(
        dir.join("manifest.json"),
        r#"{ "textures": [ { "name": "checker", "path": "textures/checker.png", "mipmaps": true } ] }"#,
    )
    .unwrap();

    let manifest = Manifest::load(&dir.join("manifest.json")).unwrap();
    let (archive, report) = pack_manifest(&manifest, ArchiveVersion::Legacy);
    assert_eq!(report.packed.len(), 1);

    let path = dir.join("legacy.bin");
    archive.save(&path).unwrap();

    let loaded = AssetArchive::load(&path, ArchiveVersion::Legacy).unwrap();
    let checker = loaded.texture("checker").unwrap();
    assert_eq!(checker.mip_levels, 1);
    assert_eq!(checker.pixels.len(), 64);

    let err = AssetArchive::load(&path, ArchiveVersion::Mipmapped).unwrap_err();
    assert!(matches!(err, ArchiveError::Malformed(_) | ArchiveError::Truncated(_)));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn missing_manifest_is_an_error() {
    let err = Manifest::load(&std::env::temp_dir().join("mini-renderer-no-manifest.json")).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to read manifest"));
}
