use glam::Mat4;

use crate::renderer::shader_data::CameraData;

/// Plain storage for the transform triple. The camera does no math of its
/// own; whatever drives the scene writes the matrices directly.
pub struct Camera {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl Camera {
    pub fn new() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        }
    }

    pub fn as_shader_data(&self) -> CameraData {
        CameraData {
            model: self.model,
            view: self.view,
            proj: self.proj,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_camera_is_identity() {
        let camera = Camera::new();
        assert_eq!(camera.model, Mat4::IDENTITY);
        assert_eq!(camera.view, Mat4::IDENTITY);
        assert_eq!(camera.proj, Mat4::IDENTITY);
    }

    #[test]
    fn shader_data_mirrors_matrices() {
        let mut camera = Camera::new();
        camera.view = Mat4::from_translation(glam::Vec3::new(0.0, 0.0, -5.0));
        let data = camera.as_shader_data();
        assert_eq!(data.view, camera.view);
        assert_eq!(data.model, Mat4::IDENTITY);
    }
}
