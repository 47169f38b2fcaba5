//! GLFW window used as the presentation target
//!
//! The window never talks to the renderer directly. Resizes come out of
//! [`Window::poll_events`] as [`WindowEvent::FramebufferResized`] and the
//! application hands them to the renderer.

use crate::render::vulkan::frame::FramebufferSource;
use ash::vk;
use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// `glfwInit` failed
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// `glfwCreateWindow` returned null
    #[error("Window creation failed")]
    CreationFailed,

    /// The loader reports Vulkan as unusable on this system
    #[error("Vulkan is not supported by GLFW on this system")]
    VulkanUnsupported,

    /// Surface creation failed
    #[error("Failed to create Vulkan surface: {0:?}")]
    SurfaceCreation(vk::Result),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Events the application loop cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// The framebuffer changed size, possibly to zero while minimized
    FramebufferResized {
        /// New width in pixels
        width: u32,
        /// New height in pixels
        height: u32,
    },
    /// The user asked to close the window
    CloseRequested,
    /// A key went down
    KeyPressed(glfw::Key),
}

impl WindowEvent {
    fn from_glfw(event: glfw::WindowEvent) -> Option<Self> {
        match event {
            glfw::WindowEvent::FramebufferSize(width, height) => Some(Self::FramebufferResized {
                width: width.max(0) as u32,
                height: height.max(0) as u32,
            }),
            glfw::WindowEvent::Close => Some(Self::CloseRequested),
            glfw::WindowEvent::Key(key, _, glfw::Action::Press, _) => Some(Self::KeyPressed(key)),
            _ => None,
        }
    }
}

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Open a resizable window without an OpenGL context
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        if !glfw.vulkan_supported() {
            return Err(WindowError::VulkanUnsupported);
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::info!("Opened window '{}' ({}x{})", title, width, height);

        Ok(Self { glfw, window, events })
    }

    /// Whether the user has asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Mark the window for closing
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Pump the platform queue and return the events the engine cares about
    pub fn poll_events(&mut self) -> Vec<WindowEvent> {
        self.glfw.poll_events();
        glfw::flush_messages(&self.events)
            .filter_map(|(_, event)| WindowEvent::from_glfw(event))
            .collect()
    }

    /// Current framebuffer size in pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    /// Get required Vulkan instance extensions from GLFW
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or(WindowError::VulkanUnsupported)
    }

    /// Create Vulkan surface using GLFW's built-in functionality
    pub fn create_surface(&self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::SurfaceCreation(result))
        }
    }
}

impl FramebufferSource for Window {
    fn framebuffer_extent(&self) -> vk::Extent2D {
        let (width, height) = self.framebuffer_size();
        vk::Extent2D { width, height }
    }

    fn wait_events(&mut self) {
        self.glfw.wait_events();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framebuffer_resize_is_translated() {
        let event = WindowEvent::from_glfw(glfw::WindowEvent::FramebufferSize(846, 484));
        assert_eq!(
            event,
            Some(WindowEvent::FramebufferResized {
                width: 846,
                height: 484
            })
        );
    }

    #[test]
    fn test_minimized_framebuffer_reports_zero() {
        let event = WindowEvent::from_glfw(glfw::WindowEvent::FramebufferSize(0, 0));
        assert_eq!(event, Some(WindowEvent::FramebufferResized { width: 0, height: 0 }));
    }

    #[test]
    fn test_key_release_is_ignored() {
        let press = glfw::WindowEvent::Key(glfw::Key::Escape, 9, glfw::Action::Press, glfw::Modifiers::empty());
        let release = glfw::WindowEvent::Key(glfw::Key::Escape, 9, glfw::Action::Release, glfw::Modifiers::empty());

        assert_eq!(WindowEvent::from_glfw(press), Some(WindowEvent::KeyPressed(glfw::Key::Escape)));
        assert_eq!(WindowEvent::from_glfw(release), None);
        assert_eq!(WindowEvent::from_glfw(glfw::WindowEvent::Close), Some(WindowEvent::CloseRequested));
    }
}
