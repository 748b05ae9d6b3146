//! Minimal Vulkan renderer and its asset pipeline.
//!
//! `backend` owns the GPU: device, swapchain, pipeline and the frame loop.
//! `assets` reads and writes the binary asset archive the renderer draws from.

pub mod assets;
pub mod backend;
pub mod config;
pub mod timer;
