//! Symmetric int8 weight quantization.

use ndarray::{ArrayD, Axis};

/// Int8 weights with one scale per output channel (first dimension).
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    pub scales: Vec<f32>,
    pub values: Vec<i8>,
}

/// Symmetric per-channel quantization of a tensor of rank >= 1.
///
/// Returns `None` if any value is NaN or infinite.
pub fn quantize_per_channel(t: &ArrayD<f32>, int8_max: f32) -> Option<QuantizedTensor> {
    if t.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let mut scales = Vec::with_capacity(t.len_of(Axis(0)));
    let mut values = Vec::with_capacity(t.len());
    for channel in t.axis_iter(Axis(0)) {
        let max = channel.iter().fold(0.0_f32, |m, &v| m.max(v.abs()));
        // A subnormal max can make the scale underflow to zero.
        let scale = max / int8_max;
        let scale = if scale > 0.0 { scale } else { 1.0 };
        values.extend(
            channel
                .iter()
                .map(|&v| (v / scale).round().clamp(-int8_max, int8_max) as i8),
        );
        scales.push(scale);
    }
    Some(QuantizedTensor { scales, values })
}

/// Inverse of [`quantize_per_channel`], flattened in row-major order.
pub fn dequantize_per_channel(q: &QuantizedTensor) -> Vec<f32> {
    if q.scales.is_empty() {
        return Vec::new();
    }
    let per_channel = q.values.len() / q.scales.len();
    q.values
        .iter()
        .enumerate()
        .map(|(i, &v)| v as f32 * q.scales[i / per_channel.max(1)])
        .collect()
}
