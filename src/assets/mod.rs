// Asset pipeline: archive codec, packing manifest, and the packer itself
//
// The renderer only ever sees the decoded records below; how they got into the
// archive is the packer's business.

pub mod archive;
pub mod manifest;
pub mod packer;

pub use archive::{ArchiveError, ArchiveVersion, AssetArchive};
pub use manifest::{Manifest, TextureEntry};
pub use packer::{pack_manifest, PackReport};

/// Decoded texture: tightly packed pixels, mip levels stored back to back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureAsset {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Number of stored levels, at least 1
    pub mip_levels: u32,
    pub pixels: Vec<u8>,
}

impl TextureAsset {
    /// Byte length of all stored levels together; `None` if it overflows
    pub fn expected_len(&self) -> Option<u64> {
        chain_len(self.width, self.height, self.channels, self.mip_levels)
    }
}

/// Full mip chain length for a `width` x `height` image: down to 1x1
pub fn full_mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Byte size of one level, `None` if it does not fit in a u64
pub(crate) fn level_len(width: u32, height: u32, channels: u32, level: u32) -> Option<u64> {
    let w = u64::from(width.checked_shr(level).unwrap_or(0).max(1));
    let h = u64::from(height.checked_shr(level).unwrap_or(0).max(1));
    w.checked_mul(h)?.checked_mul(u64::from(channels))
}

pub(crate) fn chain_len(width: u32, height: u32, channels: u32, levels: u32) -> Option<u64> {
    (0..levels.max(1)).try_fold(0u64, |total, level| {
        total.checked_add(level_len(width, height, channels, level)?)
    })
}

/// One mesh: interleaved vertex floats and 16-bit indices
#[derive(Debug, Clone, PartialEq)]
pub struct MeshAsset {
    pub name: String,
    pub vertices: Vec<f32>,
    pub indices: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelAsset {
    pub name: String,
    pub is_static: bool,
    pub meshes: Vec<MeshAsset>,
}
