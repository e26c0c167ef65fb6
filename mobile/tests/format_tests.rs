use std::io::ErrorKind;

use mobile::{
    Converter, ConverterConfig, FormatError, MobileModel, MobileTensor, Optimization, TensorPayload,
};
use model_io::{ModelArtifact, Tensor};
use tempfile::NamedTempFile;

fn converted() -> MobileModel {
    let weight: Vec<f32> = (0..32 * 48).map(|i| ((i % 17) as f32 - 8.0) / 10.0).collect();
    let model = ModelArtifact::from_tensors([
        ("fc.weight", Tensor::from_f32(vec![32, 48], &weight).unwrap()),
        ("fc.bias", Tensor::from_f32(vec![32], &[0.5; 32]).unwrap()),
    ]);
    let config = ConverterConfig {
        optimizations: vec![Optimization::Default],
        ..Default::default()
    };
    Converter::with_config(&model, config).convert_model().unwrap()
}

#[test]
fn test_save_and_load() -> Result<(), FormatError> {
    let model = converted();
    let file = NamedTempFile::new()?;
    model.save(file.path())?;

    assert_eq!(MobileModel::load(file.path())?, model);
    assert_eq!(MobileModel::load_mmap(file.path())?, model);
    Ok(())
}

#[test]
fn dequantize_restores_shape() -> Result<(), FormatError> {
    let model = MobileModel::from_bytes(&converted().to_bytes()?)?;
    let weight = model.tensor("fc.weight").unwrap().to_f32()?;
    assert_eq!(weight.shape(), &[32, 48]);
    let bias = model.tensor("fc.bias").unwrap().to_f32()?;
    assert!(bias.iter().all(|&v| v == 0.5));
    Ok(())
}

#[test]
fn rejects_foreign_files() {
    let err = MobileModel::from_bytes(b"PK\x03\x04 not ours").unwrap_err();
    assert!(matches!(err, FormatError::BadMagic));
}

#[test]
fn rejects_future_versions() {
    let mut bytes = converted().to_bytes().unwrap();
    bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
    let err = MobileModel::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err, FormatError::UnsupportedVersion(2)));
}

#[test]
fn truncated_file_is_an_error() {
    let bytes = converted().to_bytes().unwrap();
    for cut in [3, 10, bytes.len() / 2, bytes.len() - 1] {
        let err = MobileModel::from_bytes(&bytes[..cut]).unwrap_err();
        assert!(
            matches!(err, FormatError::Truncated(_) | FormatError::BadMagic),
            "cut at {cut}: {err:?}"
        );
    }
}

#[test]
fn dequantize_by_name() -> Result<(), FormatError> {
    let model = converted();
    let weight = model.dequantize("fc.weight")?.unwrap();
    assert_eq!(weight.shape(), &[32, 48]);
    assert_eq!(weight, model.tensor("fc.weight").unwrap().to_f32()?);
    assert!(model.dequantize("missing")?.is_none());
    Ok(())
}

#[test]
fn overflowing_shape_is_an_error() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"MTM1");
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes()); // metadata
    bytes.extend_from_slice(&1u32.to_le_bytes()); // tensors
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.push(b'w');
    bytes.extend_from_slice(&[0, 3]); // f32, rank 3
    for _ in 0..3 {
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
    }
    bytes.extend_from_slice(&0u64.to_le_bytes());

    let err = MobileModel::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err, FormatError::ShapeMismatch(ref name) if name == "w"));
}

#[test]
fn writer_refuses_unrepresentable_rank() {
    let model = MobileModel {
        tensors: vec![MobileTensor {
            name: "deep".into(),
            shape: vec![1; 256],
            payload: TensorPayload::F32(vec![1.0]),
        }],
        ..Default::default()
    };
    let err = model.to_bytes().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
