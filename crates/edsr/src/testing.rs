//! Test helpers.

use crate::weights::checkpoint::ParameterMap;
use burn::module::Param;
use burn::nn::conv::Conv2d;
use burn::prelude::{Backend, Tensor};
use burn::tensor::ElementConversion;
use std::io::Write;
use std::path::Path;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// Assert that two tensors have the same shape, and are element-wise within `tolerance`.
pub fn assert_tensors_close<B: Backend, const D: usize>(
    actual: Tensor<B, D>,
    expected: Tensor<B, D>,
    tolerance: f32,
) {
    assert_eq!(actual.dims(), expected.dims(), "shape mismatch");
    let max_diff: f32 = (actual - expected).abs().max().into_scalar().elem();
    assert!(
        max_diff <= tolerance,
        "max abs difference {max_diff} exceeds tolerance {tolerance}"
    );
}

/// Zero a parameter in place.
pub fn zero_param<B: Backend, const D: usize>(param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
    param.map(|tensor| tensor.zeros_like())
}

/// Zero all weights (and bias) of a [`Conv2d`].
pub fn zero_conv<B: Backend>(mut conv: Conv2d<B>) -> Conv2d<B> {
    conv.weight = zero_param(conv.weight);
    conv.bias = conv.bias.map(zero_param);
    conv
}

fn pickle_unicode(
    pickle: &mut Vec<u8>,
    value: &str,
) {
    pickle.push(b'X');
    pickle.extend_from_slice(&(value.len() as u32).to_le_bytes());
    pickle.extend_from_slice(value.as_bytes());
}

fn pickle_int(
    pickle: &mut Vec<u8>,
    value: usize,
) {
    pickle.push(b'J');
    pickle.extend_from_slice(&(value as i32).to_le_bytes());
}

fn pickle_int_tuple(
    pickle: &mut Vec<u8>,
    values: &[usize],
) {
    pickle.push(b'(');
    for &value in values {
        pickle_int(pickle, value);
    }
    pickle.push(b't');
}

/// Write `params` as a ``torch.save`` zip archive of contiguous ``f32`` tensors.
///
/// The layout is ``archive/data.pkl`` (a protocol 2 state dict of
/// ``torch._utils._rebuild_tensor_v2`` calls) and one ``archive/data/{i}``
/// storage per tensor.
pub fn write_torch_checkpoint(
    path: &Path,
    params: &ParameterMap,
) {
    let mut pickle = vec![0x80, 0x02, b'}', b'('];
    let mut storages = Vec::with_capacity(params.len());

    for (idx, (key, data)) in params.iter().enumerate() {
        let values = data.clone().convert::<f32>().into_vec::<f32>().unwrap();
        let shape = &data.shape;
        let mut strides = vec![1; shape.len()];
        for d in (0..shape.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * shape[d + 1];
        }

        pickle_unicode(&mut pickle, key);
        pickle.extend_from_slice(b"ctorch._utils\n_rebuild_tensor_v2\n(");

        // Storage persistent id: ("storage", FloatStorage, key, location, numel).
        pickle.push(b'(');
        pickle_unicode(&mut pickle, "storage");
        pickle.extend_from_slice(b"ctorch\nFloatStorage\n");
        pickle_unicode(&mut pickle, &idx.to_string());
        pickle_unicode(&mut pickle, "cpu");
        pickle_int(&mut pickle, values.len());
        pickle.extend_from_slice(b"tQ");

        pickle_int(&mut pickle, 0);
        pickle_int_tuple(&mut pickle, shape);
        pickle_int_tuple(&mut pickle, &strides);
        // requires_grad, backward_hooks
        pickle.extend_from_slice(&[0x89, b'}', b't', b'R']);

        storages.push(
            values
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect::<Vec<u8>>(),
        );
    }
    pickle.extend_from_slice(b"u.");

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    zip.start_file("archive/data.pkl", options).unwrap();
    zip.write_all(&pickle).unwrap();
    for (idx, storage) in storages.iter().enumerate() {
        zip.start_file(format!("archive/data/{idx}"), options)
            .unwrap();
        zip.write_all(storage).unwrap();
    }
    zip.finish().unwrap();
}
