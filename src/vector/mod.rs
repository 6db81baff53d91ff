//! Core vector data structures shared by the build pipeline and the index
//! engines.

pub mod distance;
pub mod matrix;

pub use distance::{l2, l2_squared};
pub use matrix::EmbeddingMatrix;
