//! Converter options.

use std::fmt;

/// Optimization passes the converter can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optimization {
    /// Reduce size and latency. Without further target types this is
    /// dynamic-range quantization: large weights become per-channel int8.
    Default,
}

/// Element types the target runtime is asked to support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorType {
    F16,
    /// Full integer quantization. Needs calibration data, which this
    /// converter does not take, so requesting it is an error.
    Int8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSpec {
    pub supported_types: Vec<TensorType>,
}

/// Thresholds for int8 weight quantization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantizationParams {
    /// Float tensors with fewer elements stay in f32.
    pub min_elements: usize,
    /// Largest magnitude of a quantized value.
    pub int8_max: f32,
}

impl Default for QuantizationParams {
    fn default() -> Self {
        Self {
            min_elements: 1024,
            int8_max: 127.0,
        }
    }
}

/// Everything that controls a conversion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConverterConfig {
    pub optimizations: Vec<Optimization>,
    pub target_spec: TargetSpec,
    pub quantization: QuantizationParams,
}

/// How float tensors end up encoded, resolved from a [`ConverterConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Float32,
    Float16,
    DynamicRangeInt8,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Float32 => "none",
            Strategy::Float16 => "float16",
            Strategy::DynamicRangeInt8 => "dynamic_range_int8",
        })
    }
}
