//! # Sub-Pixel Upsampler
//!
//! A sequence of ``conv -> pixel shuffle -> [bn] -> [act]`` stages.
//!
//! * power-of-two scales: ``log2(scale)`` stages of factor 2, each expanding
//!   channels ``4x`` before the shuffle.
//! * scale 3: one stage of factor 3, expanding channels ``9x``.
//! * anything else is an [`EdsrError::UnsupportedScale`].

use crate::layers::activation::{Activation, ActivationConfig};
use crate::layers::conv::{ConvFactory, conv2d_channels, default_conv};
use crate::layers::pixel_shuffle::{PixelShuffle, PixelShuffleConfig};
use crate::models::edsr::error::EdsrError;
use crate::weights::checkpoint::ParameterMap;
use crate::weights::importer::WeightImporter;
use crate::weights::named::{NamedParameters, SequentialKeys};
use bimm_contracts::assert_shape_contract_periodically;
use burn::nn::conv::Conv2d;
use burn::nn::{BatchNorm, BatchNormConfig, PReluConfig};
use burn::prelude::{Backend, Config, Module, Tensor};
use serde::{Deserialize, Serialize};

/// Upsampler stage kernel size.
pub const UPSAMPLER_KERNEL_SIZE: usize = 3;

/// Activation applied after each upsampling stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsamplerActivation {
    /// No activation.
    #[default]
    None,

    /// ``ReLU``.
    Relu,

    /// Per-channel ``PReLU``.
    PRelu,
}

/// Factor a scale into per-stage pixel shuffle factors.
///
/// # Returns
///
/// * ``2^k`` -> ``[2; k]``; so ``1`` has no stages.
/// * ``3`` -> ``[3]``.
/// * otherwise [`EdsrError::UnsupportedScale`].
pub fn upsample_stage_factors(scale: usize) -> Result<Vec<usize>, EdsrError> {
    if scale.is_power_of_two() {
        Ok(vec![2; scale.trailing_zeros() as usize])
    } else if scale == 3 {
        Ok(vec![3])
    } else {
        Err(EdsrError::UnsupportedScale(scale))
    }
}

/// [`Upsampler`] Config.
#[derive(Config, Debug)]
pub struct UpsamplerConfig {
    /// Total spatial scale factor.
    pub scale: usize,

    /// Feature channels; both in and out.
    pub n_feats: usize,

    /// Insert a [`BatchNorm`] after each shuffle.
    #[config(default = "false")]
    pub bn: bool,

    /// Activation after each stage.
    #[config(default = "UpsamplerActivation::None")]
    pub act: UpsamplerActivation,

    /// Enable convolution bias.
    #[config(default = "true")]
    pub bias: bool,
}

impl UpsamplerConfig {
    /// Initialize an [`Upsampler`] with [`default_conv`] convolutions.
    ///
    /// # Panics
    ///
    /// On an unsupported scale.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Upsampler<B> {
        match self.try_init(device) {
            Ok(upsampler) => upsampler,
            Err(e) => panic!("{}", e),
        }
    }

    /// Initialize an [`Upsampler`] with [`default_conv`] convolutions.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<Upsampler<B>, EdsrError> {
        self.init_with(default_conv, device)
    }

    /// Initialize an [`Upsampler`] with convolutions from `conv`.
    pub fn init_with<B: Backend>(
        &self,
        conv: ConvFactory,
        device: &B::Device,
    ) -> Result<Upsampler<B>, EdsrError> {
        let n_feats = self.n_feats;
        let stages = upsample_stage_factors(self.scale)?
            .into_iter()
            .map(|factor| UpsampleStage {
                conv: conv(
                    n_feats,
                    factor * factor * n_feats,
                    UPSAMPLER_KERNEL_SIZE,
                    self.bias,
                )
                .init(device),
                shuffle: PixelShuffleConfig::new(factor).init(),
                norm: self
                    .bn
                    .then(|| BatchNormConfig::new(n_feats).init(device)),
                act: match self.act {
                    UpsamplerActivation::None => None,
                    UpsamplerActivation::Relu => Some(ActivationConfig::Relu.init(device)),
                    UpsamplerActivation::PRelu => Some(
                        ActivationConfig::from(PReluConfig::new().with_num_parameters(n_feats))
                            .init(device),
                    ),
                },
            })
            .collect();

        Ok(Upsampler { stages })
    }
}

/// One ``conv -> shuffle -> [bn] -> [act]`` stage.
#[derive(Module, Debug)]
pub struct UpsampleStage<B: Backend> {
    /// Channel expanding convolution.
    pub conv: Conv2d<B>,

    /// Channel to space rearrangement.
    pub shuffle: PixelShuffle,

    /// Optional norm.
    pub norm: Option<BatchNorm<B, 2>>,

    /// Optional activation.
    pub act: Option<Activation<B>>,
}

impl<B: Backend> UpsampleStage<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = self.shuffle.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        match &self.act {
            Some(act) => act.forward(x),
            None => x,
        }
    }
}

/// Sub-Pixel Upsampler.
#[derive(Module, Debug)]
pub struct Upsampler<B: Backend> {
    /// Stages, in order.
    pub stages: Vec<UpsampleStage<B>>,
}

impl<B: Backend> Upsampler<B> {
    /// The total spatial scale factor.
    pub fn scale(&self) -> usize {
        self.stages
            .iter()
            .map(|stage| stage.shuffle.upscale_factor)
            .product()
    }

    /// Feature channels; or `None` for an empty (scale 1) upsampler.
    pub fn n_feats(&self) -> Option<usize> {
        self.stages
            .first()
            .map(|stage| conv2d_channels(&stage.conv)[0])
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, n_feats, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, n_feats, height*scale, width*scale]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, n_feats, height, width] = input.dims();

        let x = self
            .stages
            .iter()
            .fold(input, |x, stage| stage.forward(x));

        assert_shape_contract_periodically!(
            [
                "batch",
                "n_feats",
                "out_height" = "height" * "scale",
                "out_width" = "width" * "scale"
            ],
            &x,
            &[
                ("batch", batch),
                ("n_feats", n_feats),
                ("height", height),
                ("width", width),
                ("scale", self.scale())
            ]
        );

        x
    }
}

impl<B: Backend> NamedParameters for Upsampler<B> {
    /// Names follow the flattened stage sequence ``{prefix}.{j}``;
    /// shuffles and stateless activations consume an index.
    fn export_parameters(
        &self,
        prefix: &str,
        params: &mut ParameterMap,
    ) {
        let mut keys = SequentialKeys::new(prefix);
        for stage in &self.stages {
            stage.conv.export_parameters(&keys.next_key(), params);
            keys.skip();
            if let Some(norm) = &stage.norm {
                norm.export_parameters(&keys.next_key(), params);
            }
            if let Some(act) = &stage.act {
                act.export_parameters(&keys.next_key(), params);
            }
        }
    }

    fn import_parameters(
        self,
        prefix: &str,
        importer: &mut WeightImporter<'_>,
    ) -> Self {
        let mut keys = SequentialKeys::new(prefix);
        let mut stages = Vec::with_capacity(self.stages.len());
        for mut stage in self.stages {
            stage.conv = stage.conv.import_parameters(&keys.next_key(), importer);
            keys.skip();
            stage.norm = stage
                .norm
                .map(|norm| norm.import_parameters(&keys.next_key(), importer));
            stage.act = stage
                .act
                .map(|act| act.import_parameters(&keys.next_key(), importer));
            stages.push(stage);
        }
        Self { stages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;
    use hamcrest::prelude::*;

    type B = NdArray<f32>;

    #[test]
    fn test_stage_factors() {
        assert_eq!(upsample_stage_factors(1).unwrap(), Vec::<usize>::new());
        assert_eq!(upsample_stage_factors(2).unwrap(), vec![2]);
        assert_eq!(upsample_stage_factors(3).unwrap(), vec![3]);
        assert_eq!(upsample_stage_factors(4).unwrap(), vec![2, 2]);
        assert_eq!(upsample_stage_factors(8).unwrap(), vec![2, 2, 2]);

        for scale in [0, 5, 6, 9, 12] {
            assert!(matches!(
                upsample_stage_factors(scale),
                Err(EdsrError::UnsupportedScale(s)) if s == scale
            ));
        }
    }

    #[test]
    fn test_unsupported_scale() {
        let device = Default::default();
        let result: Result<Upsampler<B>, _> = UpsamplerConfig::new(5, 4).try_init(&device);
        assert!(matches!(result, Err(EdsrError::UnsupportedScale(5))));
    }

    #[test]
    #[should_panic(expected = "Unsupported upsampling scale: 6")]
    fn test_unsupported_scale_panics() {
        let device = Default::default();
        let _: Upsampler<B> = UpsamplerConfig::new(6, 4).init(&device);
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let n_feats = 4;

        for scale in [2, 3, 4, 8] {
            let upsampler: Upsampler<B> = UpsamplerConfig::new(scale, n_feats).init(&device);
            assert_eq!(upsampler.scale(), scale);
            assert_eq!(upsampler.n_feats(), Some(n_feats));

            let input =
                Tensor::<B, 4>::random([2, n_feats, 5, 3], Distribution::Default, &device);
            let output = upsampler.forward(input);
            assert_shape_contract!(
                ["batch", "channels", "height", "width"],
                &output,
                &[
                    ("batch", 2),
                    ("channels", n_feats),
                    ("height", 5 * scale),
                    ("width", 3 * scale)
                ],
            );
        }
    }

    #[test]
    fn test_stage_channels() {
        let device = Default::default();

        let upsampler: Upsampler<B> = UpsamplerConfig::new(4, 8).init(&device);
        assert_eq!(upsampler.stages.len(), 2);
        for stage in &upsampler.stages {
            assert_eq!(conv2d_channels(&stage.conv), [8, 32]);
            assert!(stage.norm.is_none());
            assert!(stage.act.is_none());
        }

        let upsampler: Upsampler<B> = UpsamplerConfig::new(3, 8).init(&device);
        assert_eq!(upsampler.stages.len(), 1);
        assert_eq!(conv2d_channels(&upsampler.stages[0].conv), [8, 72]);
    }

    #[test]
    fn test_parameter_names() {
        let device = Default::default();

        let upsampler: Upsampler<B> = UpsamplerConfig::new(4, 4).init(&device);
        let mut params = ParameterMap::new();
        upsampler.export_parameters("tail.0", &mut params);
        assert_that!(
            &params.keys().cloned().collect::<Vec<_>>(),
            contains(vec![
                "tail.0.0.bias".to_string(),
                "tail.0.0.weight".to_string(),
                "tail.0.2.bias".to_string(),
                "tail.0.2.weight".to_string(),
            ])
            .exactly()
        );

        let upsampler: Upsampler<B> = UpsamplerConfig::new(4, 4)
            .with_bn(true)
            .with_act(UpsamplerActivation::PRelu)
            .with_bias(false)
            .init(&device);
        let params = upsampler.parameter_map();
        // conv, shuffle, bn, prelu; twice.
        assert_eq!(params["0.weight"].shape, vec![16, 4, 3, 3]);
        assert_eq!(params["2.running_mean"].shape, vec![4]);
        assert_eq!(params["3.weight"].shape, vec![4]);
        assert_eq!(params["4.weight"].shape, vec![16, 4, 3, 3]);
        assert_eq!(params["7.weight"].shape, vec![4]);
        assert!(!params.contains_key("0.bias"));
        assert_eq!(params.len(), 2 * (1 + 4 + 1));
    }

    #[test]
    fn test_relu_stage() {
        let device = Default::default();
        let upsampler: Upsampler<B> = UpsamplerConfig::new(2, 2)
            .with_act(UpsamplerActivation::Relu)
            .init(&device);

        let input = Tensor::<B, 4>::random([1, 2, 3, 3], Distribution::Normal(0.0, 1.0), &device);
        let output = upsampler.forward(input);
        let min: f32 = output.min().into_scalar();
        assert!(min >= 0.0);
    }
}
