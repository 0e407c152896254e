use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Vertex layout uploaded verbatim into device vertex buffers
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_two_packed_vec3s() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
    }
}
