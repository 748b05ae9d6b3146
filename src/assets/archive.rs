// Binary asset archive
//
// Little-endian. Layout:
//
//   u32 textureCount
//   textureCount x texture
//   model* until end of stream
//
// texture (Mipmapped):
//   u64 nameLen, name, u32 width, u32 height, u32 channels,
//   u32 mipmapFlag, u32 mipmapCount, u64 bufferSize, pixels
// texture (Legacy): same without the two mip fields
//
// model:
//   u64 nameLen, name, u32 isStatic, u32 meshCount, meshCount x
//   (u64 nameLen, name, u64 vertexCount, f32 x vertexCount,
//    u64 indexCount, u16 x indexCount)

use super::{chain_len, full_mip_count, MeshAsset, ModelAsset, TextureAsset};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Names longer than this are treated as a misparse
const MAX_NAME_LEN: u64 = 4096;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive ended while reading {0}")]
    Truncated(&'static str),

    #[error("Malformed archive: {0}")]
    Malformed(String),
}

/// Which revision of the texture record an archive uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveVersion {
    /// No mip fields in texture records
    Legacy,
    /// `mipmapFlag` and `mipmapCount` after the channel count
    #[default]
    Mipmapped,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetArchive {
    pub version: ArchiveVersion,
    pub textures: Vec<TextureAsset>,
    pub models: Vec<ModelAsset>,
}

impl AssetArchive {
    pub fn new(version: ArchiveVersion) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    /// Open and decode an archive file
    pub fn load(path: &Path, version: ArchiveVersion) -> Result<Self, ArchiveError> {
        let file = File::open(path)?;
        let archive = Self::read_from(BufReader::new(file), version)?;
        log::info!(
            "Loaded asset archive {:?}: {} textures, {} models",
            path,
            archive.textures.len(),
            archive.models.len()
        );
        Ok(archive)
    }

    pub fn save(&self, path: &Path) -> Result<(), ArchiveError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut reader: R, version: ArchiveVersion) -> Result<Self, ArchiveError> {
        let texture_count = read_u32(&mut reader, "texture count")?;

        let textures = (0..texture_count)
            .map(|_| read_texture(&mut reader, version))
            .collect::<Result<Vec<_>, _>>()?;

        let mut models = Vec::new();
        while let Some(name_len) = read_u64_or_eof(&mut reader)? {
            models.push(read_model(&mut reader, name_len)?);
        }

        Ok(Self {
            version,
            textures,
            models,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ArchiveError> {
        let count = u32::try_from(self.textures.len())
            .map_err(|_| ArchiveError::Malformed("too many textures".into()))?;
        writer.write_all(&count.to_le_bytes())?;

        for texture in &self.textures {
            write_texture(writer, texture, self.version)?;
        }
        for model in &self.models {
            write_model(writer, model)?;
        }

        Ok(())
    }

    /// Exact-name lookup
    pub fn texture(&self, name: &str) -> Option<&TextureAsset> {
        self.textures.iter().find(|t| t.name == name)
    }

    pub fn model(&self, name: &str) -> Option<&ModelAsset> {
        self.models.iter().find(|m| m.name == name)
    }
}

// =============================================================================
// Records
// =============================================================================

fn read_texture<R: Read>(reader: &mut R, version: ArchiveVersion) -> Result<TextureAsset, ArchiveError> {
    let name_len = read_u64(reader, "texture name length")?;
    let name = read_name(reader, name_len)?;
    let width = read_u32(reader, "texture width")?;
    let height = read_u32(reader, "texture height")?;
    let channels = read_u32(reader, "texture channels")?;

    if width == 0 || height == 0 || !(1..=4).contains(&channels) {
        return Err(ArchiveError::Malformed(format!(
            "texture '{name}' has size {width}x{height} with {channels} channels"
        )));
    }

    let mip_levels = match version {
        ArchiveVersion::Legacy => 1,
        ArchiveVersion::Mipmapped => {
            let flag = read_u32(reader, "mipmap flag")?;
            let count = read_u32(reader, "mipmap count")?;
            mip_levels_from_fields(&name, width, height, flag, count)?
        }
    };

    let buffer_size = read_u64(reader, "texture buffer size")?;
    let expected = chain_len(width, height, channels, mip_levels).ok_or_else(|| {
        ArchiveError::Malformed(format!(
            "texture '{name}' is {width}x{height} with {channels} channels, too large to store"
        ))
    })?;
    if buffer_size != expected {
        return Err(ArchiveError::Malformed(format!(
            "texture '{name}' stores {buffer_size} bytes, {mip_levels} levels need {expected}"
        )));
    }

    let pixels = read_exact_vec(reader, buffer_size, "texture pixels")?;

    Ok(TextureAsset {
        name,
        width,
        height,
        channels,
        mip_levels,
        pixels,
    })
}

fn mip_levels_from_fields(name: &str, width: u32, height: u32, flag: u32, count: u32) -> Result<u32, ArchiveError> {
    match (flag, count) {
        (0, 0 | 1) => Ok(1),
        (1, n) if n >= 1 && n <= full_mip_count(width, height) => Ok(n),
        _ => Err(ArchiveError::Malformed(format!(
            "texture '{name}' has mipmap flag {flag} with count {count}"
        ))),
    }
}

fn write_texture<W: Write>(
    writer: &mut W,
    texture: &TextureAsset,
    version: ArchiveVersion,
) -> Result<(), ArchiveError> {
    let expected = texture.expected_len();
    if expected != Some(texture.pixels.len() as u64) {
        return Err(ArchiveError::Malformed(format!(
            "texture '{}' has {} bytes, expected {:?}",
            texture.name,
            texture.pixels.len(),
            expected
        )));
    }

    write_name(writer, &texture.name)?;
    writer.write_all(&texture.width.to_le_bytes())?;
    writer.write_all(&texture.height.to_le_bytes())?;
    writer.write_all(&texture.channels.to_le_bytes())?;

    match version {
        ArchiveVersion::Legacy if texture.mip_levels > 1 => {
            return Err(ArchiveError::Malformed(format!(
                "texture '{}' has {} mip levels, legacy archives store one",
                texture.name, texture.mip_levels
            )));
        }
        ArchiveVersion::Legacy => {}
        ArchiveVersion::Mipmapped => {
            let flag = u32::from(texture.mip_levels > 1);
            writer.write_all(&flag.to_le_bytes())?;
            writer.write_all(&texture.mip_levels.max(1).to_le_bytes())?;
        }
    }

    writer.write_all(&(texture.pixels.len() as u64).to_le_bytes())?;
    writer.write_all(&texture.pixels)?;
    Ok(())
}

fn read_model<R: Read>(reader: &mut R, name_len: u64) -> Result<ModelAsset, ArchiveError> {
    let name = read_name(reader, name_len)?;
    let is_static = match read_u32(reader, "model static flag")? {
        0 => false,
        1 => true,
        other => {
            return Err(ArchiveError::Malformed(format!(
                "model '{name}' has static flag {other}"
            )))
        }
    };
    let mesh_count = read_u32(reader, "mesh count")?;

    let meshes = (0..mesh_count)
        .map(|_| read_mesh(reader))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ModelAsset {
        name,
        is_static,
        meshes,
    })
}

fn read_mesh<R: Read>(reader: &mut R) -> Result<MeshAsset, ArchiveError> {
    let name_len = read_u64(reader, "mesh name length")?;
    let name = read_name(reader, name_len)?;

    let vertex_count = read_u64(reader, "vertex count")?;
    let vertex_bytes = read_exact_vec(reader, byte_len(vertex_count, 4)?, "vertex data")?;
    let vertices = vertex_bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    let index_count = read_u64(reader, "index count")?;
    let index_bytes = read_exact_vec(reader, byte_len(index_count, 2)?, "index data")?;
    let indices = index_bytes
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();

    Ok(MeshAsset {
        name,
        vertices,
        indices,
    })
}

fn write_model<W: Write>(writer: &mut W, model: &ModelAsset) -> Result<(), ArchiveError> {
    write_name(writer, &model.name)?;
    writer.write_all(&u32::from(model.is_static).to_le_bytes())?;
    writer.write_all(&(model.meshes.len() as u32).to_le_bytes())?;

    for mesh in &model.meshes {
        write_name(writer, &mesh.name)?;
        writer.write_all(&(mesh.vertices.len() as u64).to_le_bytes())?;
        for v in &mesh.vertices {
            writer.write_all(&v.to_le_bytes())?;
        }
        writer.write_all(&(mesh.indices.len() as u64).to_le_bytes())?;
        for i in &mesh.indices {
            writer.write_all(&i.to_le_bytes())?;
        }
    }

    Ok(())
}

// =============================================================================
// Primitives
// =============================================================================

fn byte_len(count: u64, elem: u64) -> Result<u64, ArchiveError> {
    count
        .checked_mul(elem)
        .ok_or_else(|| ArchiveError::Malformed(format!("element count {count} overflows")))
}

fn truncated(what: &'static str) -> impl Fn(io::Error) -> ArchiveError {
    move |e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ArchiveError::Truncated(what),
        _ => ArchiveError::Io(e),
    }
}

fn read_u32<R: Read>(reader: &mut R, what: &'static str) -> Result<u32, ArchiveError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(truncated(what))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R, what: &'static str) -> Result<u64, ArchiveError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(truncated(what))?;
    Ok(u64::from_le_bytes(buf))
}

/// `None` on a clean end of stream, `Truncated` if it ends mid-value
fn read_u64_or_eof<R: Read>(reader: &mut R) -> Result<Option<u64>, ArchiveError> {
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(ArchiveError::Truncated("model name length")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(u64::from_le_bytes(buf)))
}

fn read_exact_vec<R: Read>(reader: &mut R, len: u64, what: &'static str) -> Result<Vec<u8>, ArchiveError> {
    // take() keeps a corrupt length from allocating up front
    let mut bytes = Vec::new();
    reader.take(len).read_to_end(&mut bytes)?;
    if bytes.len() as u64 != len {
        return Err(ArchiveError::Truncated(what));
    }
    Ok(bytes)
}

fn read_name<R: Read>(reader: &mut R, len: u64) -> Result<String, ArchiveError> {
    if len > MAX_NAME_LEN {
        return Err(ArchiveError::Malformed(format!("name length {len}")));
    }
    let bytes = read_exact_vec(reader, len, "name")?;
    String::from_utf8(bytes).map_err(|_| ArchiveError::Malformed("name is not UTF-8".into()))
}

fn write_name<W: Write>(writer: &mut W, name: &str) -> Result<(), ArchiveError> {
    writer.write_all(&(name.len() as u64).to_le_bytes())?;
    writer.write_all(name.as_bytes())?;
    Ok(())
}
