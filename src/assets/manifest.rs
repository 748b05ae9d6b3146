// Packing manifest
//
// {
//   "textures": [
//     { "name": "tex0", "path": "textures/tex0.png", "mipmaps": true }
//   ]
// }
//
// Entries are decoded one at a time so a single bad entry is skipped with a
// warning instead of failing the whole manifest. Paths are relative to the
// manifest's directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextureEntry {
    pub name: String,
    pub path: PathBuf,
    #[serde(default, alias = "generateMipMaps")]
    pub mipmaps: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// Directory entry paths are resolved against
    pub base_dir: PathBuf,
    pub textures: Vec<TextureEntry>,
    /// Entries that could not be decoded, with the reason
    pub skipped: Vec<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {:?}", path))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Self::parse(&text, base_dir).with_context(|| format!("Failed to parse manifest {:?}", path))
    }

    pub fn parse(text: &str, base_dir: PathBuf) -> Result<Self> {
        let root: serde_json::Value = serde_json::from_str(text)?;

        let entries = match root.get("textures") {
            Some(serde_json::Value::Array(entries)) => entries.as_slice(),
            Some(_) => anyhow::bail!("\"textures\" must be an array"),
            None => &[],
        };

        let mut manifest = Manifest {
            base_dir,
            ..Default::default()
        };

        for (i, entry) in entries.iter().enumerate() {
            match TextureEntry::deserialize(entry) {
                Ok(texture) => manifest.textures.push(texture),
                Err(e) => {
                    log::warn!("Skipping texture entry {}: {}", i, e);
                    manifest.skipped.push(format!("textures[{i}]: {e}"));
                }
            }
        }

        Ok(manifest)
    }

    /// Entry path resolved against the manifest directory
    pub fn resolve(&self, entry: &TextureEntry) -> PathBuf {
        self.base_dir.join(&entry.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_and_mipmap_alias() {
        let manifest = Manifest::parse(
            r#"{
                "textures": [
                    { "name": "a", "path": "a.png" },
                    { "name": "b", "path": "sub/b.png", "mipmaps": true },
                    { "name": "c", "path": "c.png", "generateMipMaps": true }
                ],
                "shaders": []
            }"#,
            PathBuf::from("assets"),
        )
        .unwrap();

        assert_eq!(manifest.textures.len(), 3);
        assert!(!manifest.textures[0].mipmaps);
        assert!(manifest.textures[1].mipmaps);
        assert!(manifest.textures[2].mipmaps);
        assert_eq!(
            manifest.resolve(&manifest.textures[1]),
            Path::new("assets").join("sub/b.png")
        );
    }

    #[test]
    fn bad_entry_is_skipped_not_fatal() {
        let manifest = Manifest::parse(
            r#"{ "textures": [ { "name": "ok", "path": "ok.png" }, { "path": "noname.png" }, 7 ] }"#,
            PathBuf::new(),
        )
        .unwrap();

        assert_eq!(manifest.textures.len(), 1);
        assert_eq!(manifest.textures[0].name, "ok");
        assert_eq!(manifest.skipped.len(), 2);
    }

    #[test]
    fn missing_texture_section_is_empty() {
        let manifest = Manifest::parse("{}", PathBuf::new()).unwrap();
        assert!(manifest.textures.is_empty());
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(Manifest::parse("{ textures: ", PathBuf::new()).is_err());
        assert!(Manifest::parse(r#"{ "textures": 3 }"#, PathBuf::new()).is_err());
    }
}
