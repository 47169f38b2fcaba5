//! # Azha Render
//!
//! The Vulkan core of the Azha engine: device selection, swapchain management,
//! the per-frame begin/record/end protocol, GPU buffers and descriptor sets.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use azha_render::prelude::*;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RendererConfig::default();
//!     let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
//!     let context = Arc::new(GpuContext::new(&window, &config)?);
//!     let mut renderer = VulkanRenderer::new(Arc::clone(&context), &mut window)?;
//!
//!     while !window.should_close() {
//!         for event in window.poll_events() {
//!             renderer.handle_window_event(&event);
//!         }
//!         if let Some(command_buffer) = renderer.begin_frame(&mut window)? {
//!             renderer.begin_swapchain_render_pass(command_buffer)?;
//!             // record draws here
//!             renderer.end_swapchain_render_pass(command_buffer)?;
//!             renderer.end_frame(&mut window)?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        config::{Config, RendererConfig, ShaderConfig, WindowConfig},
        foundation::ids::{Id, IdAllocator},
        render::{
            mesh::{Index, Mesh, MeshId, Vertex},
            vulkan::{
                GpuContext, GraphicsPipeline, PipelineConfig, PipelineLayout, ShaderSet, VulkanError, VulkanRenderer,
                VulkanResult,
            },
            window::{Window, WindowEvent},
        },
    };
}
