use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Camera transforms passed into the uniform buffer once per frame
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct CameraData {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}
