use std::path::PathBuf;

use safetensors::SafeTensorError;

use crate::tensor::DType;

/// Failure to turn a file on disk into a [`crate::ModelArtifact`].
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("cannot read model file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a valid model file", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: SafeTensorError,
    },

    #[error("tensor `{name}` in {} is malformed", path.display())]
    Tensor {
        path: PathBuf,
        name: String,
        #[source]
        source: TensorError,
    },
}

/// Failure to serialize a [`crate::ModelArtifact`].
#[derive(thiserror::Error, Debug)]
pub enum SaveError {
    #[error("tensor `{0}` has an element type that cannot be serialized")]
    UnsupportedDType(String),

    #[error("serialization failed")]
    Serialize(#[from] SafeTensorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TensorError {
    #[error("expected {expected} bytes for shape {shape:?}, found {actual}")]
    SizeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("shape {0:?} has more elements than can be addressed")]
    ShapeOverflow(Vec<usize>),

    #[error("element type {0} cannot be decoded as floating point")]
    NotFloat(DType),
}
