//! Library crate for reading serialized models into memory.
//!
//! A model file is a SafeTensors checkpoint. Loading it produces a
//! [`ModelArtifact`]: named tensors in a stable order plus the free-form
//! string metadata stored alongside them.

pub mod artifact;
pub mod error;
pub mod tensor;

pub use artifact::ModelArtifact;
pub use error::{LoadError, SaveError, TensorError};
pub use tensor::{DType, Tensor};
