// Render errors
//
// Every Vulkan call is checked where it is made and turned into a RenderError.
// Only SurfaceOutOfDate is recoverable: the frame loop answers it by rebuilding
// the swapchain. Everything else is fatal and ends up at the driver.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// How the caller is expected to react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The renderer cannot continue
    Fatal,
    /// Handled locally by rebuilding the swapchain
    Recoverable,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to load Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("{context}: {result}")]
    Vulkan {
        context: &'static str,
        result: vk::Result,
    },

    #[error("No suitable GPU found")]
    NoSuitableDevice,

    #[error("Validation layer {0} requested, but not available")]
    MissingValidationLayer(String),

    #[error("No memory type matches filter {type_filter:#b} with properties {properties:?}")]
    NoMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("None of the candidate formats {0:?} is supported")]
    UnsupportedFormat(Vec<vk::Format>),

    #[error("Texture '{name}' cannot be uploaded: {reason}")]
    UnsupportedTexture { name: String, reason: String },

    #[error("Texture '{0}' not found in asset archive")]
    TextureNotFound(String),

    #[error("Model '{0}' not found in asset archive")]
    ModelNotFound(String),

    #[error("Invalid mesh '{name}': {reason}")]
    InvalidMesh { name: String, reason: String },

    #[error("Failed to read shader {path:?}: {source}")]
    ShaderRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Swapchain is out of date")]
    SurfaceOutOfDate,
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RenderError::SurfaceOutOfDate => ErrorKind::Recoverable,
            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Attach a description to a raw Vulkan result, like anyhow's `context`
pub trait VkResultExt<T> {
    fn vk_context(self, context: &'static str) -> RenderResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn vk_context(self, context: &'static str) -> RenderResult<T> {
        self.map_err(|result| RenderError::Vulkan { context, result })
    }
}

/// Release what an earlier step created when a later step fails
pub trait OrRelease<T> {
    fn or_release(self, release: impl FnOnce()) -> RenderResult<T>;
}

impl<T> OrRelease<T> for RenderResult<T> {
    fn or_release(self, release: impl FnOnce()) -> RenderResult<T> {
        if self.is_err() {
            release();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn only_out_of_date_is_recoverable() {
        assert_eq!(RenderError::SurfaceOutOfDate.kind(), ErrorKind::Recoverable);
        assert!(RenderError::NoSuitableDevice.is_fatal());
        assert!(RenderError::Vulkan {
            context: "Failed to submit",
            result: vk::Result::ERROR_DEVICE_LOST,
        }
        .is_fatal());
    }

    #[test]
    fn vk_context_wraps_result_code() {
        let raw: Result<(), vk::Result> = Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let err = raw.vk_context("Failed to create fence").unwrap_err();
        match err {
            RenderError::Vulkan { context, result } => {
                assert_eq!(context, "Failed to create fence");
                assert_eq!(result, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn or_release_runs_only_on_failure() {
        let released = Cell::new(0);

        let ok: RenderResult<u32> = Ok(7);
        assert_eq!(ok.or_release(|| released.set(released.get() + 1)).unwrap(), 7);
        assert_eq!(released.get(), 0);

        let failed: RenderResult<u32> = Err(RenderError::NoSuitableDevice);
        let err = failed.or_release(|| released.set(released.get() + 1)).unwrap_err();
        assert!(matches!(err, RenderError::NoSuitableDevice));
        assert_eq!(released.get(), 1);
    }
}
