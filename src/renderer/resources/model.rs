use std::sync::Arc;

use crate::renderer::resources::mesh::Mesh;

/// Shared-ownership view of a mesh. Cloning a model clones the handle, not
/// the mesh or its device buffer.
#[derive(Clone)]
pub struct Model {
    mesh: Arc<Mesh>,
}

impl Model {
    pub fn new(mesh: Mesh) -> Self {
        Self {
            mesh: Arc::new(mesh),
        }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::resources::vertex::Vertex;

    #[test]
    fn clones_share_one_mesh() {
        let model = Model::new(Mesh::new(vec![Vertex::default(); 3]));
        let copy = model.clone();
        assert!(Arc::ptr_eq(&model.mesh, &copy.mesh));
        assert_eq!(copy.mesh().vertices.len(), 3);
    }
}
