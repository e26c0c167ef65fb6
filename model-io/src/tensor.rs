use std::fmt;

use half::{bf16, f16};
use ndarray::{ArrayD, IxDyn};

use crate::error::TensorError;

/// Element type of a stored tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F16,
    BF16,
    F32,
    F64,
    F8E5M2,
    F8E4M3,
    /// A type newer than this crate knows about. Kept so that loading
    /// succeeds and the consumer decides what to do with it.
    Unknown,
}

impl DType {
    /// Width of one element in bytes, `None` for [`DType::Unknown`].
    pub fn size(&self) -> Option<usize> {
        match self {
            DType::Bool | DType::U8 | DType::I8 | DType::F8E5M2 | DType::F8E4M3 => Some(1),
            DType::U16 | DType::I16 | DType::F16 | DType::BF16 => Some(2),
            DType::U32 | DType::I32 | DType::F32 => Some(4),
            DType::U64 | DType::I64 | DType::F64 => Some(8),
            DType::Unknown => None,
        }
    }

    /// Whether [`Tensor::to_f32`] can decode this type.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    /// Stable one-byte tag used by binary formats that embed raw tensors.
    pub fn code(&self) -> u8 {
        match self {
            DType::Bool => 0,
            DType::U8 => 1,
            DType::I8 => 2,
            DType::U16 => 3,
            DType::I16 => 4,
            DType::U32 => 5,
            DType::I32 => 6,
            DType::U64 => 7,
            DType::I64 => 8,
            DType::F16 => 9,
            DType::BF16 => 10,
            DType::F32 => 11,
            DType::F64 => 12,
            DType::F8E5M2 => 13,
            DType::F8E4M3 => 14,
            DType::Unknown => u8::MAX,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let dtype = match code {
            0 => DType::Bool,
            1 => DType::U8,
            2 => DType::I8,
            3 => DType::U16,
            4 => DType::I16,
            5 => DType::U32,
            6 => DType::I32,
            7 => DType::U64,
            8 => DType::I64,
            9 => DType::F16,
            10 => DType::BF16,
            11 => DType::F32,
            12 => DType::F64,
            13 => DType::F8E5M2,
            14 => DType::F8E4M3,
            _ => return None,
        };
        Some(dtype)
    }

    pub(crate) fn to_safetensors(self) -> Option<safetensors::Dtype> {
        use safetensors::Dtype;
        let dtype = match self {
            DType::Bool => Dtype::BOOL,
            DType::U8 => Dtype::U8,
            DType::I8 => Dtype::I8,
            DType::U16 => Dtype::U16,
            DType::I16 => Dtype::I16,
            DType::U32 => Dtype::U32,
            DType::I32 => Dtype::I32,
            DType::U64 => Dtype::U64,
            DType::I64 => Dtype::I64,
            DType::F16 => Dtype::F16,
            DType::BF16 => Dtype::BF16,
            DType::F32 => Dtype::F32,
            DType::F64 => Dtype::F64,
            DType::F8E5M2 => Dtype::F8_E5M2,
            DType::F8E4M3 => Dtype::F8_E4M3,
            DType::Unknown => return None,
        };
        Some(dtype)
    }
}

impl From<safetensors::Dtype> for DType {
    fn from(dtype: safetensors::Dtype) -> Self {
        use safetensors::Dtype;
        match dtype {
            Dtype::BOOL => DType::Bool,
            Dtype::U8 => DType::U8,
            Dtype::I8 => DType::I8,
            Dtype::U16 => DType::U16,
            Dtype::I16 => DType::I16,
            Dtype::U32 => DType::U32,
            Dtype::I32 => DType::I32,
            Dtype::U64 => DType::U64,
            Dtype::I64 => DType::I64,
            Dtype::F16 => DType::F16,
            Dtype::BF16 => DType::BF16,
            Dtype::F32 => DType::F32,
            Dtype::F64 => DType::F64,
            Dtype::F8_E5M2 => DType::F8E5M2,
            Dtype::F8_E4M3 => DType::F8E4M3,
            _ => DType::Unknown,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Bool => "bool",
            DType::U8 => "u8",
            DType::I8 => "i8",
            DType::U16 => "u16",
            DType::I16 => "i16",
            DType::U32 => "u32",
            DType::I32 => "i32",
            DType::U64 => "u64",
            DType::I64 => "i64",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::F8E5M2 => "f8_e5m2",
            DType::F8E4M3 => "f8_e4m3",
            DType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A tensor as stored on disk: element type, shape and little-endian bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl Tensor {
    /// Wrap raw bytes, checking that their length matches the shape.
    pub fn new(dtype: DType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self, TensorError> {
        let elements = shape.iter().try_fold(1usize, |n, &d| n.checked_mul(d));
        let Some(elements) = elements else {
            return Err(TensorError::ShapeOverflow(shape));
        };
        if let Some(size) = dtype.size() {
            let expected = elements
                .checked_mul(size)
                .ok_or_else(|| TensorError::ShapeOverflow(shape.clone()))?;
            if expected != data.len() {
                return Err(TensorError::SizeMismatch {
                    shape,
                    expected,
                    actual: data.len(),
                });
            }
        }
        Ok(Self { dtype, shape, data })
    }

    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self, TensorError> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(DType::F32, shape, data)
    }

    /// Build an f32 tensor from an ndarray, in logical (row-major) order.
    pub fn from_array(array: &ArrayD<f32>) -> Self {
        let data = array.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self {
            dtype: DType::F32,
            shape: array.shape().to_vec(),
            data,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Decode a floating point tensor into an f32 array.
    pub fn to_f32(&self) -> Result<ArrayD<f32>, TensorError> {
        let values: Vec<f32> = match self.dtype {
            DType::F32 => self
                .data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            DType::F64 => self
                .data
                .chunks_exact(8)
                .map(|b| {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(b);
                    f64::from_le_bytes(raw) as f32
                })
                .collect(),
            DType::F16 => self
                .data
                .chunks_exact(2)
                .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect(),
            DType::BF16 => self
                .data
                .chunks_exact(2)
                .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect(),
            other => return Err(TensorError::NotFloat(other)),
        };
        let actual = values.len();
        ArrayD::from_shape_vec(IxDyn(&self.shape), values).map_err(|_| TensorError::SizeMismatch {
            shape: self.shape.clone(),
            expected: self.num_elements(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_codes_are_reversible() {
        let all = [
            DType::Bool,
            DType::U8,
            DType::I8,
            DType::U16,
            DType::I16,
            DType::U32,
            DType::I32,
            DType::U64,
            DType::I64,
            DType::F16,
            DType::BF16,
            DType::F32,
            DType::F64,
            DType::F8E5M2,
            DType::F8E4M3,
        ];
        for dtype in all {
            assert_eq!(DType::from_code(dtype.code()), Some(dtype));
        }
        assert_eq!(DType::from_code(DType::Unknown.code()), None);
    }

    #[test]
    fn rejects_wrong_byte_length() {
        let err = Tensor::new(DType::F32, vec![2, 2], vec![0; 15]).unwrap_err();
        assert_eq!(
            err,
            TensorError::SizeMismatch {
                shape: vec![2, 2],
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn rejects_overflowing_shape() {
        let shape = vec![usize::MAX, 2];
        let err = Tensor::new(DType::F32, shape.clone(), Vec::new()).unwrap_err();
        assert_eq!(err, TensorError::ShapeOverflow(shape));

        let shape = vec![usize::MAX / 2 + 1];
        assert!(Tensor::new(DType::Unknown, shape.clone(), Vec::new()).is_ok());
        let err = Tensor::new(DType::F32, shape.clone(), Vec::new()).unwrap_err();
        assert_eq!(err, TensorError::ShapeOverflow(shape));
    }

    #[test]
    fn decodes_half_precision() {
        let values = [1.5f32, -2.0, 0.25];
        let data: Vec<u8> = values
            .iter()
            .flat_map(|&v| f16::from_f32(v).to_le_bytes())
            .collect();
        let tensor = Tensor::new(DType::F16, vec![3], data).unwrap();
        let decoded = tensor.to_f32().unwrap();
        assert_eq!(decoded.as_slice().unwrap(), &values);

        let data: Vec<u8> = values
            .iter()
            .flat_map(|&v| bf16::from_f32(v).to_le_bytes())
            .collect();
        let tensor = Tensor::new(DType::BF16, vec![3], data).unwrap();
        assert_eq!(tensor.to_f32().unwrap().as_slice().unwrap(), &values);
    }

    #[test]
    fn integer_tensors_are_not_float() {
        let tensor = Tensor::new(DType::I32, vec![1], vec![0; 4]).unwrap();
        assert_eq!(tensor.to_f32().unwrap_err(), TensorError::NotFloat(DType::I32));
    }

    #[test]
    fn scalar_has_one_element() {
        let tensor = Tensor::from_f32(vec![], &[3.0]).unwrap();
        assert_eq!(tensor.num_elements(), 1);
        assert_eq!(tensor.to_f32().unwrap().ndim(), 0);
    }
}
