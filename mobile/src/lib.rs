//! Conversion of trained models into a compact format for on-device inference.
//!
//! [`Converter`] turns a [`model_io::ModelArtifact`] into the bytes of a
//! [`MobileModel`]; [`driver`] wraps that in the `convert-to-mobile` command.

pub mod config;
pub mod convert;
pub mod driver;
pub mod ffi;
pub mod format;
pub mod quantize;

pub use config::{ConverterConfig, Optimization, QuantizationParams, Strategy, TargetSpec, TensorType};
pub use convert::{ConversionError, Converter};
pub use ffi::*;
pub use format::{FormatError, MobileModel, MobileTensor, TensorPayload, FORMAT_VERSION};
pub use quantize::QuantizedTensor;
