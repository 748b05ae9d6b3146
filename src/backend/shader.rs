// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. The two stages are read from disk up front
// so a missing file fails startup before any pipeline state is built.

use super::error::{RenderError, RenderResult, VkResultExt};
use super::VulkanDevice;
use ash::vk;
use std::io::Cursor;
use std::path::Path;

/// Read a compiled shader from disk
pub fn read_shader_bytes(path: &Path) -> RenderResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| RenderError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })
}

/// Vertex and fragment bytecode, both required before pipeline creation
#[derive(Debug, Clone)]
pub struct ShaderPair {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}

impl ShaderPair {
    pub fn load(vertex: &Path, fragment: &Path) -> RenderResult<Self> {
        let pair = Self {
            vertex: read_shader_bytes(vertex)?,
            fragment: read_shader_bytes(fragment)?,
        };
        log::debug!(
            "Loaded shaders {:?} ({} bytes) and {:?} ({} bytes)",
            vertex,
            pair.vertex.len(),
            fragment,
            pair.fragment.len()
        );
        Ok(pair)
    }
}

/// Create a shader module from SPIR-V bytes
pub fn create_shader_module(device: &VulkanDevice, code: &[u8]) -> RenderResult<vk::ShaderModule> {
    // read_spv realigns the bytes into 4-byte words and checks the length
    let words = ash::util::read_spv(&mut Cursor::new(code))
        .map_err(|_| RenderError::Vulkan {
            context: "Shader bytecode is not valid SPIR-V",
            result: vk::Result::ERROR_INVALID_SHADER_NV,
        })?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .vk_context("Failed to create shader module")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_shader_is_a_fatal_read_error() {
        let err = read_shader_bytes(Path::new("does/not/exist.spv")).unwrap_err();
        assert!(err.is_fatal());
        match err {
            RenderError::ShaderRead { path, source } => {
                assert_eq!(path, Path::new("does/not/exist.spv"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn pair_fails_if_either_stage_is_missing() {
        let dir = std::env::temp_dir().join(format!("shader-pair-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let vert = dir.join("scene.vert.spv");
        std::fs::write(&vert, [0x03, 0x02, 0x23, 0x07]).unwrap();

        let err = ShaderPair::load(&vert, &dir.join("scene.frag.spv")).unwrap_err();
        assert!(matches!(err, RenderError::ShaderRead { .. }));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
