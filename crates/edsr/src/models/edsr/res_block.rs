//! # EDSR Residual Block
//!
//! ```text
//! output = input + res_scale * f(input)
//! f = conv -> [bn] -> act -> conv -> [bn]
//! ```
//!
//! Unlike the `ResNet` blocks, there is no activation after the skip addition,
//! and the skip is never projected; input and output share ``n_feats`` channels.

use crate::layers::activation::{Activation, ActivationConfig};
use crate::layers::conv::{ConvFactory, conv2d_channels, default_conv};
use crate::weights::checkpoint::ParameterMap;
use crate::weights::importer::WeightImporter;
use crate::weights::named::{NamedParameters, SequentialKeys, join_key};
use bimm_contracts::unpack_shape_contract;
use burn::nn::conv::Conv2d;
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ResBlock`] Config.
#[derive(Config, Debug)]
pub struct ResBlockConfig {
    /// Feature channels; both in and out.
    pub n_feats: usize,

    /// Convolution kernel size.
    #[config(default = "3")]
    pub kernel_size: usize,

    /// Enable convolution bias.
    #[config(default = "true")]
    pub bias: bool,

    /// Insert a [`BatchNorm`] after each convolution.
    #[config(default = "false")]
    pub bn: bool,

    /// The activation between the convolutions.
    #[config(default = "ActivationConfig::Relu")]
    pub act: ActivationConfig,

    /// Residual scaling factor.
    #[config(default = "1.0")]
    pub res_scale: f64,
}

impl ResBlockConfig {
    /// Initialize a [`ResBlock`] with [`default_conv`] convolutions.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResBlock<B> {
        self.init_with(default_conv, device)
    }

    /// Initialize a [`ResBlock`] with convolutions from `conv`.
    pub fn init_with<B: Backend>(
        &self,
        conv: ConvFactory,
        device: &B::Device,
    ) -> ResBlock<B> {
        let n_feats = self.n_feats;
        let norm = || {
            self.bn
                .then(|| BatchNormConfig::new(n_feats).init(device))
        };

        ResBlock {
            conv1: conv(n_feats, n_feats, self.kernel_size, self.bias).init(device),
            norm1: norm(),
            act: self.act.init(device),
            conv2: conv(n_feats, n_feats, self.kernel_size, self.bias).init(device),
            norm2: norm(),
            res_scale: self.res_scale,
        }
    }
}

/// EDSR Residual Block.
#[derive(Module, Debug)]
pub struct ResBlock<B: Backend> {
    /// First convolution.
    pub conv1: Conv2d<B>,

    /// Optional norm after `conv1`.
    pub norm1: Option<BatchNorm<B, 2>>,

    /// Activation.
    pub act: Activation<B>,

    /// Second convolution.
    pub conv2: Conv2d<B>,

    /// Optional norm after `conv2`.
    pub norm2: Option<BatchNorm<B, 2>>,

    /// Residual scaling factor.
    pub res_scale: f64,
}

impl<B: Backend> ResBlock<B> {
    /// Feature channels.
    pub fn n_feats(&self) -> usize {
        conv2d_channels(&self.conv1)[0]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, n_feats, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, n_feats, height, width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        unpack_shape_contract!(
            ["batch", "n_feats", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("n_feats", self.n_feats())],
        );

        let x = self.conv1.forward(input.clone());
        let x = match &self.norm1 {
            Some(norm) => norm.forward(x),
            None => x,
        };
        let x = self.act.forward(x);

        let x = self.conv2.forward(x);
        let x = match &self.norm2 {
            Some(norm) => norm.forward(x),
            None => x,
        };

        x.mul_scalar(self.res_scale) + input
    }
}

impl<B: Backend> NamedParameters for ResBlock<B> {
    /// Names follow ``{prefix}.body.{j}``; with one sequence slot per layer.
    fn export_parameters(
        &self,
        prefix: &str,
        params: &mut ParameterMap,
    ) {
        let mut keys = SequentialKeys::new(&join_key(prefix, "body"));

        self.conv1.export_parameters(&keys.next_key(), params);
        if let Some(norm) = &self.norm1 {
            norm.export_parameters(&keys.next_key(), params);
        }
        self.act.export_parameters(&keys.next_key(), params);
        self.conv2.export_parameters(&keys.next_key(), params);
        if let Some(norm) = &self.norm2 {
            norm.export_parameters(&keys.next_key(), params);
        }
    }

    fn import_parameters(
        mut self,
        prefix: &str,
        importer: &mut WeightImporter<'_>,
    ) -> Self {
        let mut keys = SequentialKeys::new(&join_key(prefix, "body"));

        self.conv1 = self.conv1.import_parameters(&keys.next_key(), importer);
        self.norm1 = self
            .norm1
            .map(|norm| norm.import_parameters(&keys.next_key(), importer));
        self.act = self.act.import_parameters(&keys.next_key(), importer);
        self.conv2 = self.conv2.import_parameters(&keys.next_key(), importer);
        self.norm2 = self
            .norm2
            .map(|norm| norm.import_parameters(&keys.next_key(), importer));

        self
    }
}
