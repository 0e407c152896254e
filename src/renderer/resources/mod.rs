pub mod buffer;
pub mod image;
pub mod mesh;
pub mod model;
pub mod vertex;
