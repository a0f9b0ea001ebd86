//! GPU-side resources shared by the passes

pub mod descriptor;
pub mod model;
pub mod sync;
pub mod texture;
pub mod uniform;
pub mod vertex;
