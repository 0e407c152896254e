use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::Result;
use gpu_allocator::vulkan::Allocator;
use gpu_allocator::MemoryLocation;

use crate::renderer::resources::buffer::AllocatedBuffer;
use crate::renderer::resources::vertex::Vertex;

/// Host-side vertex list with an optional device-side vertex buffer.
///
/// Owning the buffer makes the type move-only: the device handle can never be
/// aliased by a copy, and dropping the mesh releases exactly one buffer.
/// Shared ownership goes through `Model` instead.
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    vertex_buffer: Option<AllocatedBuffer>,
}

impl Mesh {
    pub fn new(vertices: Vec<Vertex>) -> Self {
        Self {
            vertices,
            vertex_buffer: None,
        }
    }

    /// Create the device vertex buffer and copy the host vertices into it.
    pub fn upload(
        &mut self,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<()> {
        let size = std::mem::size_of_val(self.vertices.as_slice()) as u64;
        let mut buffer = AllocatedBuffer::new(
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "Mesh Vertex Buffer",
            MemoryLocation::CpuToGpu,
            memory_allocator,
            device,
        )?;
        buffer.write(&self.vertices, 0)?;
        self.vertex_buffer = Some(buffer);
        Ok(())
    }

    pub fn vertex_buffer(&self) -> Option<&AllocatedBuffer> {
        self.vertex_buffer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn new_mesh_has_no_device_buffer() {
        let mesh = Mesh::new(vec![
            Vertex {
                position: Vec3::new(0.0, -0.5, 0.0),
                normal: Vec3::Z,
            },
            Vertex {
                position: Vec3::new(0.5, 0.5, 0.0),
                normal: Vec3::Z,
            },
            Vertex {
                position: Vec3::new(-0.5, 0.5, 0.0),
                normal: Vec3::Z,
            },
        ]);
        assert_eq!(mesh.vertices.len(), 3);
        assert!(mesh.vertex_buffer().is_none());
    }
}
