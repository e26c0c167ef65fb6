//! The mobile tensor model format.
//!
//! All integers are little-endian. Layout:
//!
//! ```text
//! "MTM1" | u32 version | u32 n_meta | n_meta * (str key, str value)
//! u32 n_tensors | n_tensors * tensor
//!
//! tensor := str name | u8 encoding | u8 rank | rank * u32 dim | payload
//! payload (f32, f16)   := u64 len | bytes
//! payload (int8)       := u32 n_scales | n_scales * f32 | u64 len | bytes
//! payload (passthrough):= u8 dtype | u64 len | bytes
//! str := u32 len | utf-8 bytes
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use bytemuck::cast_slice;
use half::f16;
use memmap2::MmapOptions;
use model_io::DType;
use ndarray::{ArrayD, IxDyn};

use crate::quantize::{dequantize_per_channel, QuantizedTensor};

pub const MAGIC: &[u8; 4] = b"MTM1";
pub const FORMAT_VERSION: u32 = 1;
/// Largest tensor rank the one-byte rank field can hold.
pub const MAX_RANK: usize = u8::MAX as usize;

const ENC_F32: u8 = 0;
const ENC_F16: u8 = 1;
const ENC_INT8: u8 = 2;
const ENC_PASSTHROUGH: u8 = 3;

#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("not a mobile model file")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    #[error("file truncated at byte {0}")]
    Truncated(usize),

    #[error("unknown tensor encoding {0}")]
    UnknownEncoding(u8),

    #[error("unknown element type code {0}")]
    UnknownDType(u8),

    #[error("invalid UTF-8 string at byte {0}")]
    InvalidString(usize),

    #[error("tensor `{0}` payload does not match its shape")]
    ShapeMismatch(String),

    #[error("tensor `{0}` is not floating point")]
    NotFloat(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Stored representation of one tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorPayload {
    F32(Vec<f32>),
    F16(Vec<f16>),
    Int8(QuantizedTensor),
    /// Non-float data copied verbatim from the source model.
    Passthrough { dtype: DType, bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MobileTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub payload: TensorPayload,
}

impl MobileTensor {
    /// Decode to f32, dequantizing int8 weights.
    pub fn to_f32(&self) -> Result<ArrayD<f32>, FormatError> {
        let values = match &self.payload {
            TensorPayload::F32(v) => v.clone(),
            TensorPayload::F16(v) => v.iter().map(|x| x.to_f32()).collect(),
            TensorPayload::Int8(q) => dequantize_per_channel(q),
            TensorPayload::Passthrough { .. } => {
                return Err(FormatError::NotFloat(self.name.clone()))
            }
        };
        ArrayD::from_shape_vec(IxDyn(&self.shape), values)
            .map_err(|_| FormatError::ShapeMismatch(self.name.clone()))
    }

    /// Element count, `None` if the shape overflows `usize`.
    fn num_elements(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |n, &d| n.checked_mul(d))
    }
}

/// A converted model, either built by the converter or read back from disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MobileModel {
    pub metadata: BTreeMap<String, String>,
    pub tensors: Vec<MobileTensor>,
}

impl MobileModel {
    pub fn tensor(&self, name: &str) -> Option<&MobileTensor> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Tensor `name` decoded to f32, or `Ok(None)` if there is no such tensor.
    pub fn dequantize(&self, name: &str) -> Result<Option<ArrayD<f32>>, FormatError> {
        self.tensor(name).map(MobileTensor::to_f32).transpose()
    }

    /// Serialize into memory.
    ///
    /// Fails with [`io::ErrorKind::InvalidInput`] when a count, length or
    /// dimension does not fit its field.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&FORMAT_VERSION.to_le_bytes())?;
        w.write_all(&field_u32(self.metadata.len(), "metadata count")?.to_le_bytes())?;
        for (k, v) in &self.metadata {
            write_str(w, k)?;
            write_str(w, v)?;
        }
        w.write_all(&field_u32(self.tensors.len(), "tensor count")?.to_le_bytes())?;
        for t in &self.tensors {
            write_str(w, &t.name)?;
            let encoding = match t.payload {
                TensorPayload::F32(_) => ENC_F32,
                TensorPayload::F16(_) => ENC_F16,
                TensorPayload::Int8(_) => ENC_INT8,
                TensorPayload::Passthrough { .. } => ENC_PASSTHROUGH,
            };
            let rank = u8::try_from(t.shape.len())
                .map_err(|_| invalid_input(format!("tensor `{}` has rank {}", t.name, t.shape.len())))?;
            w.write_all(&[encoding, rank])?;
            for &d in &t.shape {
                w.write_all(&field_u32(d, "dimension")?.to_le_bytes())?;
            }
            match &t.payload {
                TensorPayload::F32(v) => {
                    w.write_all(&((v.len() * 4) as u64).to_le_bytes())?;
                    for x in v {
                        w.write_all(&x.to_le_bytes())?;
                    }
                }
                TensorPayload::F16(v) => {
                    w.write_all(&((v.len() * 2) as u64).to_le_bytes())?;
                    for x in v {
                        w.write_all(&x.to_le_bytes())?;
                    }
                }
                TensorPayload::Int8(q) => {
                    w.write_all(&field_u32(q.scales.len(), "scale count")?.to_le_bytes())?;
                    for s in &q.scales {
                        w.write_all(&s.to_le_bytes())?;
                    }
                    w.write_all(&(q.values.len() as u64).to_le_bytes())?;
                    w.write_all(cast_slice(&q.values))?;
                }
                TensorPayload::Passthrough { dtype, bytes } => {
                    w.write_all(&[dtype.code()])?;
                    w.write_all(&(bytes.len() as u64).to_le_bytes())?;
                    w.write_all(bytes)?;
                }
            }
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), FormatError> {
        let mut f = File::create(path)?;
        self.write_to(&mut f)?;
        f.flush()?;
        Ok(())
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, FormatError> {
        let mut r = Reader { buf, offset: 0 };
        if r.take(4)? != MAGIC {
            return Err(FormatError::BadMagic);
        }
        let version = r.u32()?;
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let mut metadata = BTreeMap::new();
        for _ in 0..r.u32()? {
            let k = r.str()?;
            let v = r.str()?;
            metadata.insert(k, v);
        }

        let n_tensors = r.u32()? as usize;
        let mut tensors = Vec::with_capacity(n_tensors.min(4096));
        for _ in 0..n_tensors {
            let name = r.str()?;
            let encoding = r.u8()?;
            let rank = r.u8()? as usize;
            let shape = (0..rank)
                .map(|_| r.u32().map(|d| d as usize))
                .collect::<Result<Vec<_>, _>>()?;
            let payload = match encoding {
                ENC_F32 => {
                    let bytes = r.blob()?;
                    TensorPayload::F32(
                        bytes
                            .chunks_exact(4)
                            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                            .collect(),
                    )
                }
                ENC_F16 => {
                    let bytes = r.blob()?;
                    TensorPayload::F16(
                        bytes
                            .chunks_exact(2)
                            .map(|b| f16::from_le_bytes([b[0], b[1]]))
                            .collect(),
                    )
                }
                ENC_INT8 => {
                    let n_scales = r.u32()? as usize;
                    let scales = (0..n_scales)
                        .map(|_| r.f32())
                        .collect::<Result<Vec<_>, _>>()?;
                    let values = r.blob()?.iter().map(|&b| b as i8).collect();
                    TensorPayload::Int8(QuantizedTensor { scales, values })
                }
                ENC_PASSTHROUGH => {
                    let code = r.u8()?;
                    let dtype = DType::from_code(code).ok_or(FormatError::UnknownDType(code))?;
                    TensorPayload::Passthrough {
                        dtype,
                        bytes: r.blob()?.to_vec(),
                    }
                }
                other => return Err(FormatError::UnknownEncoding(other)),
            };
            let tensor = MobileTensor {
                name,
                shape,
                payload,
            };
            check_payload(&tensor)?;
            tensors.push(tensor);
        }
        Ok(Self { metadata, tensors })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FormatError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn load_mmap<P: AsRef<Path>>(path: P) -> Result<Self, FormatError> {
        let file = File::open(path)?;
        // The mapping is only read while `file` is open in this scope.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Self::from_bytes(&mmap[..])
    }
}

fn check_payload(t: &MobileTensor) -> Result<(), FormatError> {
    let n = t
        .num_elements()
        .ok_or_else(|| FormatError::ShapeMismatch(t.name.clone()))?;
    let ok = match &t.payload {
        TensorPayload::F32(v) => v.len() == n,
        TensorPayload::F16(v) => v.len() == n,
        TensorPayload::Int8(q) => {
            q.values.len() == n && q.scales.len() == t.shape.first().copied().unwrap_or(0)
        }
        TensorPayload::Passthrough { dtype, bytes } => match dtype.size() {
            Some(size) => n.checked_mul(size) == Some(bytes.len()),
            None => true,
        },
    };
    if ok {
        Ok(())
    } else {
        Err(FormatError::ShapeMismatch(t.name.clone()))
    }
}

fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_all(&field_u32(s.len(), "string length")?.to_le_bytes())?;
    w.write_all(s.as_bytes())
}

fn field_u32(value: usize, field: &str) -> io::Result<u32> {
    u32::try_from(value).map_err(|_| invalid_input(format!("{field} {value} exceeds u32")))
}

fn invalid_input(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(FormatError::Truncated(self.offset))?;
        let bytes = &self.buf[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, FormatError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, FormatError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn f32(&mut self) -> Result<f32, FormatError> {
        Ok(f32::from_bits(self.u32()?))
    }

    fn blob(&mut self) -> Result<&'a [u8], FormatError> {
        let start = self.offset;
        let len = usize::try_from(self.u64()?).map_err(|_| FormatError::Truncated(start))?;
        self.take(len)
    }

    fn str(&mut self) -> Result<String, FormatError> {
        let start = self.offset;
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FormatError::InvalidString(start))
    }
}
