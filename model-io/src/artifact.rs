use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use safetensors::tensor::TensorView;
use safetensors::SafeTensors;
use tracing::debug;

use crate::error::{LoadError, SaveError};
use crate::tensor::Tensor;

/// In-memory form of a trained model.
///
/// Tensors are keyed by name and iterate in sorted order, so anything
/// derived from an artifact is independent of the on-disk tensor layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelArtifact {
    tensors: BTreeMap<String, Tensor>,
    metadata: BTreeMap<String, String>,
}

impl ModelArtifact {
    pub fn from_tensors<I, S>(tensors: I) -> Self
    where
        I: IntoIterator<Item = (S, Tensor)>,
        S: Into<String>,
    {
        Self {
            tensors: tensors.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Read a SafeTensors file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let format_err = |source| LoadError::Format {
            path: path.to_path_buf(),
            source,
        };
        let (_, header) = SafeTensors::read_metadata(&bytes).map_err(format_err)?;
        let st = SafeTensors::deserialize(&bytes).map_err(format_err)?;

        let mut tensors = BTreeMap::new();
        for (name, view) in st.tensors() {
            let tensor = Tensor::new(view.dtype().into(), view.shape().to_vec(), view.data().to_vec())
                .map_err(|source| LoadError::Tensor {
                    path: path.to_path_buf(),
                    name: name.clone(),
                    source,
                })?;
            debug!(tensor = %name, dtype = %tensor.dtype(), shape = ?tensor.shape(), "loaded tensor");
            tensors.insert(name, tensor);
        }
        let metadata = header
            .metadata()
            .as_ref()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        Ok(Self { tensors, metadata })
    }

    /// Serialize to SafeTensors bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SaveError> {
        let mut views = Vec::with_capacity(self.tensors.len());
        for (name, tensor) in &self.tensors {
            let dtype = tensor
                .dtype()
                .to_safetensors()
                .ok_or_else(|| SaveError::UnsupportedDType(name.clone()))?;
            let view = TensorView::new(dtype, tensor.shape().to_vec(), tensor.data())?;
            views.push((name.as_str(), view));
        }
        let metadata: Option<HashMap<String, String>> = if self.metadata.is_empty() {
            None
        } else {
            Some(self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        };
        Ok(safetensors::serialize(views, &metadata)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SaveError> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn tensor(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    /// Tensors in name order.
    pub fn tensors(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.tensors.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Total number of elements across all tensors.
    pub fn parameter_count(&self) -> usize {
        self.tensors.values().map(Tensor::num_elements).sum()
    }
}
