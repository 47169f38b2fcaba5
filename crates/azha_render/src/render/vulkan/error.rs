//! Error types shared by every Vulkan wrapper in this crate

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Memory allocator rejected a request
    #[error("Allocation failed: {0:?}")]
    Allocation(vk::Result),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Validation was requested but the Khronos layer is not installed
    #[error("Validation layer VK_LAYER_KHRONOS_validation is not available")]
    MissingValidationLayer,

    /// The instance reported no physical devices at all
    #[error("No Vulkan-capable GPU found")]
    NoDevice,

    /// Physical devices exist but none satisfies the renderer's requirements
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// `map` called while a mapping is already active
    #[error("Buffer is already mapped")]
    AlreadyMapped,

    /// `map` called on memory without host access
    #[error("Buffer memory is not host visible")]
    NotMappable,

    /// `write` or `unmap` called without an active mapping
    #[error("Buffer is not mapped")]
    NotMapped,

    /// Write larger than the buffer capacity
    #[error("Write of {requested} bytes exceeds buffer capacity of {capacity} bytes")]
    SizeExceeded {
        /// Number of bytes the caller tried to write
        requested: u64,
        /// Size of the buffer in bytes
        capacity: u64,
    },

    /// Swapchain recreation produced different image or depth formats
    #[error("Swapchain format changed on recreation (image {old_image:?} -> {new_image:?}, depth {old_depth:?} -> {new_depth:?})")]
    FormatChanged {
        /// Image format before recreation
        old_image: vk::Format,
        /// Image format after recreation
        new_image: vk::Format,
        /// Depth format before recreation
        old_depth: vk::Format,
        /// Depth format after recreation
        new_depth: vk::Format,
    },

    /// Frame lifecycle method called out of order or with the wrong command buffer
    #[error("Frame protocol violation: {reason}")]
    ProtocolViolation {
        /// What the caller did wrong
        reason: String,
    },

    /// Binding registered twice on a layout builder
    #[error("Descriptor binding {binding} is already in use")]
    DuplicateBinding {
        /// Offending binding index
        binding: u32,
    },

    /// Write targets a binding the layout does not declare
    #[error("Layout does not contain binding {binding}")]
    UnknownBinding {
        /// Offending binding index
        binding: u32,
    },

    /// Write targets a binding declaring more than one descriptor
    #[error("Binding {binding} expects {count} descriptors, only single descriptors can be written")]
    UnsupportedDescriptorCount {
        /// Offending binding index
        binding: u32,
        /// Descriptor count declared by the layout
        count: u32,
    },

    /// A required file could not be read
    #[error("Failed to open {path}: {source}")]
    FileOpen {
        /// File that failed to open
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

impl VulkanError {
    /// Shorthand for a [`VulkanError::ProtocolViolation`]
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;
