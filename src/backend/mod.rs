// Vulkan backend
//
// Leaf to root: capability queries, device, resource factory and uploads,
// swapchain, pipeline, descriptors, frame slots, frame loop, renderer.

pub mod buffer;
pub mod capability;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod pipeline;
pub mod renderer;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod upload;

pub use device::VulkanDevice;
pub use error::{ErrorKind, RenderError, RenderResult};
pub use frame::{FrameStatus, FRAMES_IN_FLIGHT};
pub use renderer::{Renderer, RendererSettings, Scene};
pub use surface::PresentationTarget;
pub use swapchain::Swapchain;
