//! Conversion of a loaded model into the mobile format.

use half::f16;
use model_io::{DType, ModelArtifact, TensorError};
use tracing::{debug, info};

use crate::config::{ConverterConfig, Optimization, Strategy, TensorType};
use crate::format::{MobileModel, MobileTensor, TensorPayload, FORMAT_VERSION, MAX_RANK};
use crate::quantize::quantize_per_channel;

#[derive(thiserror::Error, Debug)]
pub enum ConversionError {
    #[error("model has no tensors to convert")]
    EmptyModel,

    #[error("tensor `{name}` has unsupported element type {dtype}")]
    UnsupportedDType { name: String, dtype: DType },

    #[error("tensor `{0}` contains NaN or infinite values and cannot be quantized")]
    NonFinite(String),

    #[error("target type {0:?} is not supported by this converter")]
    UnsupportedTargetType(TensorType),

    #[error("tensor `{name}` with shape {shape:?} exceeds the format's rank or dimension limits")]
    ShapeTooLarge { name: String, shape: Vec<usize> },

    #[error("cannot encode converted model")]
    Encode(#[source] std::io::Error),

    #[error("tensor `{name}` is malformed")]
    Tensor {
        name: String,
        #[source]
        source: TensorError,
    },
}

/// Converts one [`ModelArtifact`] according to a [`ConverterConfig`].
///
/// ```no_run
/// # use mobile::{Converter, Optimization};
/// # let model = model_io::ModelArtifact::load("model.safetensors").unwrap();
/// let mut converter = Converter::from_model(&model);
/// converter.config.optimizations = vec![Optimization::Default];
/// let bytes = converter.convert().unwrap();
/// ```
pub struct Converter<'a> {
    model: &'a ModelArtifact,
    pub config: ConverterConfig,
}

impl<'a> Converter<'a> {
    pub fn from_model(model: &'a ModelArtifact) -> Self {
        Self::with_config(model, ConverterConfig::default())
    }

    pub fn with_config(model: &'a ModelArtifact, config: ConverterConfig) -> Self {
        Self { model, config }
    }

    pub fn strategy(&self) -> Result<Strategy, ConversionError> {
        if !self.config.optimizations.contains(&Optimization::Default) {
            return Ok(Strategy::Float32);
        }
        let mut strategy = Strategy::DynamicRangeInt8;
        for &ty in &self.config.target_spec.supported_types {
            match ty {
                TensorType::F16 => strategy = Strategy::Float16,
                other => return Err(ConversionError::UnsupportedTargetType(other)),
            }
        }
        Ok(strategy)
    }

    /// Convert and serialize.
    pub fn convert(&self) -> Result<Vec<u8>, ConversionError> {
        let model = self.convert_model()?;
        let bytes = model.to_bytes().map_err(ConversionError::Encode)?;
        info!(
            tensors = model.tensors.len(),
            bytes = bytes.len(),
            "conversion finished"
        );
        Ok(bytes)
    }

    pub fn convert_model(&self) -> Result<MobileModel, ConversionError> {
        if self.model.is_empty() {
            return Err(ConversionError::EmptyModel);
        }
        let strategy = self.strategy()?;
        let quant = self.config.quantization;

        let mut tensors = Vec::with_capacity(self.model.len());
        for (name, tensor) in self.model.tensors() {
            let shape = tensor.shape();
            if shape.len() > MAX_RANK || shape.iter().any(|&d| u32::try_from(d).is_err()) {
                return Err(ConversionError::ShapeTooLarge {
                    name: name.to_string(),
                    shape: shape.to_vec(),
                });
            }
            let dtype = tensor.dtype();
            let payload = if dtype.is_float() {
                let values = tensor.to_f32().map_err(|source| ConversionError::Tensor {
                    name: name.to_string(),
                    source,
                })?;
                let quantize = strategy == Strategy::DynamicRangeInt8
                    && values.ndim() >= 2
                    && values.len() >= quant.min_elements;
                if quantize {
                    let q = quantize_per_channel(&values, quant.int8_max)
                        .ok_or_else(|| ConversionError::NonFinite(name.to_string()))?;
                    TensorPayload::Int8(q)
                } else if strategy == Strategy::Float16 {
                    TensorPayload::F16(values.iter().map(|&v| f16::from_f32(v)).collect())
                } else {
                    TensorPayload::F32(values.iter().copied().collect())
                }
            } else {
                match dtype {
                    DType::Bool
                    | DType::U8
                    | DType::I8
                    | DType::U16
                    | DType::I16
                    | DType::U32
                    | DType::I32
                    | DType::U64
                    | DType::I64 => TensorPayload::Passthrough {
                        dtype,
                        bytes: tensor.data().to_vec(),
                    },
                    _ => {
                        return Err(ConversionError::UnsupportedDType {
                            name: name.to_string(),
                            dtype,
                        })
                    }
                }
            };
            debug!(tensor = name, %dtype, shape = ?tensor.shape(), encoding = payload_name(&payload), "converted tensor");
            tensors.push(MobileTensor {
                name: name.to_string(),
                shape: tensor.shape().to_vec(),
                payload,
            });
        }

        let mut metadata = self.model.metadata().clone();
        metadata.insert("converter".into(), env!("CARGO_PKG_NAME").into());
        metadata.insert("format_version".into(), FORMAT_VERSION.to_string());
        metadata.insert("optimization".into(), strategy.to_string());

        Ok(MobileModel { metadata, tensors })
    }
}

fn payload_name(payload: &TensorPayload) -> &'static str {
    match payload {
        TensorPayload::F32(_) => "f32",
        TensorPayload::F16(_) => "f16",
        TensorPayload::Int8(_) => "int8",
        TensorPayload::Passthrough { .. } => "passthrough",
    }
}
