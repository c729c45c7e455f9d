//! # Mean Shift
//!
//! [`MeanShift`] is a frozen ``1x1``, ``3 -> 3`` convolution which removes
//! ([`MeanShiftSign::Sub`]) or restores ([`MeanShiftSign::Add`]) a dataset
//! color mean, scaled by the intensity range.
//!
//! For ``Sub``:
//! ```text
//! weight = diag(1 / std)
//! bias   = -rgb_range * mean / std
//! ```
//!
//! ``Add`` is the exact inverse of ``Sub`` for the same ``(rgb_range, mean, std)``:
//! ```text
//! weight = diag(std)
//! bias   = rgb_range * mean
//! ```
//!
//! With the default unit ``std``, both reduce to ``diag(1)`` and
//! ``sign * rgb_range * mean / std``.

use crate::weights::checkpoint::ParameterMap;
use crate::weights::importer::WeightImporter;
use crate::weights::named::{NamedParameters, join_key};
use bimm_contracts::unpack_shape_contract;
use burn::module::Param;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::TensorData;
use serde::{Deserialize, Serialize};

/// Default dataset ``(r, g, b)`` mean (DIV2K).
pub const DEFAULT_RGB_MEAN: [f64; 3] = [0.4488, 0.4371, 0.4040];

/// Default dataset ``(r, g, b)`` standard deviation.
pub const DEFAULT_RGB_STD: [f64; 3] = [1.0, 1.0, 1.0];

/// Direction of a [`MeanShift`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeanShiftSign {
    /// Subtract the mean; ``sign = -1``.
    Sub,

    /// Restore the mean; ``sign = +1``.
    Add,
}

impl MeanShiftSign {
    /// The numeric sign.
    pub fn sign(&self) -> f64 {
        match self {
            MeanShiftSign::Sub => -1.0,
            MeanShiftSign::Add => 1.0,
        }
    }
}

/// [`MeanShift`] Config.
#[derive(Config, Debug)]
pub struct MeanShiftConfig {
    /// The intensity range of the input; ``1.0`` or ``255.0``.
    pub rgb_range: f64,

    /// Shift direction.
    pub sign: MeanShiftSign,

    /// Per-channel mean, in ``[0, 1]`` units.
    #[config(default = "DEFAULT_RGB_MEAN")]
    pub rgb_mean: [f64; 3],

    /// Per-channel standard deviation.
    #[config(default = "DEFAULT_RGB_STD")]
    pub rgb_std: [f64; 3],
}

impl MeanShiftConfig {
    /// The ``[3, 3, 1, 1]`` weight and ``[3]`` bias values.
    pub fn affine(&self) -> (Vec<f32>, Vec<f32>) {
        let mut weight = vec![0.0f32; 9];
        let mut bias = vec![0.0f32; 3];
        for c in 0..3 {
            let std = self.rgb_std[c];
            let mean = self.rgb_range * self.rgb_mean[c];
            let (w, b) = match self.sign {
                MeanShiftSign::Sub => (1.0 / std, -mean / std),
                MeanShiftSign::Add => (std, mean),
            };
            weight[c * 3 + c] = w as f32;
            bias[c] = b as f32;
        }
        (weight, bias)
    }

    /// Initialize a [`MeanShift`].
    ///
    /// # Panics
    ///
    /// If any ``std`` is zero.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> MeanShift<B> {
        assert!(
            self.rgb_std.iter().all(|s| *s != 0.0),
            "rgb_std must be non-zero: {:?}",
            self.rgb_std
        );
        let (weight, bias) = self.affine();

        let mut conv: Conv2d<B> = Conv2dConfig::new([3, 3], [1, 1]).init(device);
        conv.weight = Param::from_tensor(Tensor::from_data(
            TensorData::new(weight, [3, 3, 1, 1]).convert::<B::FloatElem>(),
            device,
        ));
        conv.bias = Some(Param::from_tensor(Tensor::from_data(
            TensorData::new(bias, [3]).convert::<B::FloatElem>(),
            device,
        )));

        MeanShift {
            conv: conv.no_grad(),
        }
    }
}

/// Frozen per-channel affine color shift.
#[derive(Module, Debug)]
pub struct MeanShift<B: Backend> {
    /// The frozen ``1x1`` convolution.
    pub conv: Conv2d<B>,
}

impl<B: Backend> MeanShift<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, 3, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, 3, height, width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        unpack_shape_contract!(
            ["batch", "colors", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("colors", 3)],
        );
        self.conv.forward(input)
    }
}

impl<B: Backend> NamedParameters for MeanShift<B> {
    fn export_parameters(
        &self,
        prefix: &str,
        params: &mut ParameterMap,
    ) {
        self.conv.export_parameters(prefix, params);
    }

    /// Mean shift parameters are frozen; checkpoint values are claimed, never copied.
    fn import_parameters(
        self,
        prefix: &str,
        importer: &mut WeightImporter<'_>,
    ) -> Self {
        importer.retain(&join_key(prefix, "weight"));
        importer.retain(&join_key(prefix, "bias"));
        self
    }
}
