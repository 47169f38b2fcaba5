//! Vertex format and GPU-resident meshes
//!
//! Meshes are uploaded once from in-memory vertex (and optional index) data
//! into device-local buffers through a staging copy.

use crate::foundation::ids::{Id, IdAllocator};
use crate::render::vulkan::buffer::{upload_device_local, Buffer};
use crate::render::vulkan::{GpuContext, VulkanError, VulkanResult};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

/// 2D position with an RGBA color
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Position in normalized device coordinates
    pub position: [f32; 2],
    /// Linear RGBA color
    pub color: [f32; 4],
}

impl Vertex {
    /// Create a vertex
    pub const fn new(position: [f32; 2], color: [f32; 4]) -> Self {
        Self { position, color }
    }
}

/// Index element type used by indexed meshes
pub type Index = u32;

/// Identifier of a [`Mesh`]
pub type MeshId = Id<Mesh>;

/// Draw call a mesh records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCommand {
    /// `vkCmdDrawIndexed` over all indices
    Indexed {
        /// Number of indices
        index_count: u32,
    },
    /// `vkCmdDraw` over all vertices
    Vertices {
        /// Number of vertices
        vertex_count: u32,
    },
}

/// Reject empty geometry and indices that point past the last vertex
pub fn validate_geometry(vertices: &[Vertex], indices: Option<&[Index]>) -> VulkanResult<()> {
    if vertices.is_empty() {
        return Err(VulkanError::InitializationFailed("Mesh has no vertices".to_string()));
    }

    if let Some(indices) = indices {
        if indices.is_empty() {
            return Err(VulkanError::InitializationFailed("Indexed mesh has no indices".to_string()));
        }
        if let Some(bad) = indices.iter().find(|&&index| index as usize >= vertices.len()) {
            return Err(VulkanError::InitializationFailed(format!(
                "Index {} out of range for {} vertices",
                bad,
                vertices.len()
            )));
        }
    }

    Ok(())
}

/// Geometry living in device-local memory
pub struct Mesh {
    id: MeshId,
    vertex_buffer: Buffer,
    index_buffer: Option<Buffer>,
    vertex_count: u32,
    index_count: u32,
    context: Arc<GpuContext>,
}

impl Mesh {
    /// Upload a non-indexed mesh
    pub fn from_vertices(
        context: &Arc<GpuContext>,
        ids: &mut IdAllocator<Mesh>,
        vertices: &[Vertex],
    ) -> VulkanResult<Self> {
        validate_geometry(vertices, None)?;
        let vertex_buffer = upload_device_local(
            context,
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;

        let mesh = Self {
            id: ids.allocate(),
            vertex_buffer,
            index_buffer: None,
            vertex_count: vertices.len() as u32,
            index_count: 0,
            context: Arc::clone(context),
        };
        log::debug!("Uploaded mesh {} ({} vertices)", mesh.id, mesh.vertex_count);
        Ok(mesh)
    }

    /// Upload an indexed mesh
    pub fn from_indexed(
        context: &Arc<GpuContext>,
        ids: &mut IdAllocator<Mesh>,
        vertices: &[Vertex],
        indices: &[Index],
    ) -> VulkanResult<Self> {
        validate_geometry(vertices, Some(indices))?;
        let vertex_buffer = upload_device_local(
            context,
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = upload_device_local(
            context,
            bytemuck::cast_slice(indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        let mesh = Self {
            id: ids.allocate(),
            vertex_buffer,
            index_buffer: Some(index_buffer),
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
            context: Arc::clone(context),
        };
        log::debug!(
            "Uploaded mesh {} ({} vertices, {} indices)",
            mesh.id,
            mesh.vertex_count,
            mesh.index_count
        );
        Ok(mesh)
    }

    /// Bind the vertex buffer, and the index buffer if any, at binding 0
    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        let device = self.context.device();
        unsafe {
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[self.vertex_buffer.handle()], &[0]);
            if let Some(index_buffer) = &self.index_buffer {
                device.cmd_bind_index_buffer(command_buffer, index_buffer.handle(), 0, vk::IndexType::UINT32);
            }
        }
    }

    /// Record the draw for the whole mesh
    pub fn draw(&self, command_buffer: vk::CommandBuffer) {
        let device = self.context.device();
        unsafe {
            match self.draw_command() {
                DrawCommand::Indexed { index_count } => device.cmd_draw_indexed(command_buffer, index_count, 1, 0, 0, 0),
                DrawCommand::Vertices { vertex_count } => device.cmd_draw(command_buffer, vertex_count, 1, 0, 0),
            }
        }
    }

    /// Draw call this mesh records
    pub fn draw_command(&self) -> DrawCommand {
        if self.index_buffer.is_some() {
            DrawCommand::Indexed {
                index_count: self.index_count,
            }
        } else {
            DrawCommand::Vertices {
                vertex_count: self.vertex_count,
            }
        }
    }

    /// Identifier assigned at upload
    pub fn id(&self) -> MeshId {
        self.id
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of indices, zero when not indexed
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}
