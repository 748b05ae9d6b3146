// Presentation target - whatever owns the drawable the swapchain presents to
//
// The renderer only needs three things from the windowing layer: the current
// drawable size, the instance extensions needed to present, and a surface.

use super::error::{RenderResult, VkResultExt};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::os::raw::c_char;

pub trait PresentationTarget {
    /// Current drawable size in pixels
    fn drawable_size(&self) -> (u32, u32);

    /// Instance extensions required to create a surface for this target
    fn required_extensions(&self) -> RenderResult<Vec<*const c_char>>;

    /// Create a surface on `instance`; the caller owns and destroys it
    fn create_surface(&self, entry: &Entry, instance: &ash::Instance) -> RenderResult<vk::SurfaceKHR>;
}

impl PresentationTarget for winit::window::Window {
    fn drawable_size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }

    fn required_extensions(&self) -> RenderResult<Vec<*const c_char>> {
        let extensions = ash_window::enumerate_required_extensions(self.raw_display_handle())
            .vk_context("Failed to enumerate surface extensions")?;
        Ok(extensions.to_vec())
    }

    fn create_surface(&self, entry: &Entry, instance: &ash::Instance) -> RenderResult<vk::SurfaceKHR> {
        unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.raw_display_handle(),
                self.raw_window_handle(),
                None,
            )
        }
        .vk_context("Failed to create window surface")
    }
}
