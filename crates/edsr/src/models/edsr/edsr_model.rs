//! # EDSR Network
//!
//! ```text
//! h = head(x)
//! r = body(h) + h
//! y = tail(r)        (image mode)
//! y = r              (feature-extractor mode; ``no_upsampling``)
//! ```
//!
//! When [`EdsrConfig::mean_shift`] is set, `x` is first passed through
//! `sub_mean`, and an image-mode `y` is passed through `add_mean`.
//! A feature map has ``n_feats`` channels, so it is never color-shifted.
//!
//! Parameters are named as in the reference EDSR checkpoints:
//! ``head.0``, ``body.{i}.body.{j}``, ``body.{n_resblocks}``,
//! ``tail.0.{j}``, ``tail.1``, ``sub_mean``, ``add_mean``.

use crate::layers::conv::{ConvFactory, conv2d_channels, default_conv};
use crate::layers::mean_shift::{
    DEFAULT_RGB_MEAN, DEFAULT_RGB_STD, MeanShift, MeanShiftConfig, MeanShiftSign,
};
use crate::models::edsr::error::EdsrError;
use crate::models::edsr::res_block::{ResBlock, ResBlockConfig};
use crate::models::edsr::upsampler::{Upsampler, UpsamplerConfig};
use crate::weights::checkpoint::{Checkpoint, CheckpointError, ParameterMap};
use crate::weights::importer::{
    ImportPolicy, ImportReport, WeightImportError, WeightImporter, import_weights,
    import_weights_partial,
};
use crate::weights::named::{NamedParameters, join_key};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::Conv2d;
use burn::prelude::{Backend, Config, Module, Tensor};
use std::path::Path;

/// Color channels of EDSR images.
pub const EDSR_N_COLORS: usize = 3;

/// The name prefix of the tail stage.
///
/// Checkpoints trained for another scale (or without a tail) differ only here.
pub const EDSR_TAIL_PREFIX: &str = "tail";

/// [`Edsr`] Config.
#[derive(Config, Debug)]
pub struct EdsrConfig {
    /// Number of residual blocks in the body.
    pub n_resblocks: usize,

    /// Feature channels.
    pub n_feats: usize,

    /// Convolution kernel size.
    #[config(default = "3")]
    pub kernel_size: usize,

    /// Residual block scaling factor.
    #[config(default = "1.0")]
    pub res_scale: f64,

    /// Upsampling scale; a power of 2, or 3.
    #[config(default = "2")]
    pub scale: usize,

    /// Feature-extractor mode; omit the tail.
    #[config(default = "false")]
    pub no_upsampling: bool,

    /// The intensity range of images; ``1.0`` or ``255.0``.
    #[config(default = "1.0")]
    pub rgb_range: f64,

    /// Dataset color mean.
    #[config(default = "DEFAULT_RGB_MEAN")]
    pub rgb_mean: [f64; 3],

    /// Dataset color standard deviation.
    #[config(default = "DEFAULT_RGB_STD")]
    pub rgb_std: [f64; 3],

    /// Apply `sub_mean` / `add_mean` in the forward pass.
    #[config(default = "false")]
    pub mean_shift: bool,

    /// Optional checkpoint path to import after construction.
    #[config(default = "None")]
    pub pretrained: Option<String>,

    /// Reject unexpected (non-tail) checkpoint names.
    #[config(default = "true")]
    pub strict: bool,
}

impl EdsrConfig {
    /// The number of output channels.
    ///
    /// ``n_feats`` in feature-extractor mode; [`EDSR_N_COLORS`] otherwise.
    pub fn out_channels(&self) -> usize {
        if self.no_upsampling {
            self.n_feats
        } else {
            EDSR_N_COLORS
        }
    }

    /// The checkpoint import policy; tail mismatches are tolerated.
    pub fn import_policy(&self) -> ImportPolicy {
        ImportPolicy::new(self.strict).tolerate_prefix(EDSR_TAIL_PREFIX)
    }

    fn mean_shift_config(
        &self,
        sign: MeanShiftSign,
    ) -> MeanShiftConfig {
        MeanShiftConfig::new(self.rgb_range, sign)
            .with_rgb_mean(self.rgb_mean)
            .with_rgb_std(self.rgb_std)
    }

    /// Initialize an [`Edsr`].
    ///
    /// # Panics
    ///
    /// On any error from [`EdsrConfig::try_init`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Edsr<B> {
        match self.try_init(device) {
            Ok(model) => model,
            Err(e) => panic!("{}", e),
        }
    }

    /// Initialize an [`Edsr`] with [`default_conv`] convolutions.
    ///
    /// See [`EdsrConfig::try_init_with`].
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<Edsr<B>, EdsrError> {
        self.try_init_with(default_conv, device)
    }

    /// Initialize an [`Edsr`] with convolutions from `conv`.
    ///
    /// If [`EdsrConfig::pretrained`] is set, the checkpoint is imported;
    /// see [`Edsr::try_load_pretrained`].
    ///
    /// # Errors
    ///
    /// - [`EdsrError::UnsupportedScale`] if the tail cannot be built.
    /// - [`EdsrError::Checkpoint`] for checkpoints which exist but cannot be read.
    /// - [`EdsrError::Import`] for checkpoints with unexpected names.
    pub fn try_init_with<B: Backend>(
        &self,
        conv: ConvFactory,
        device: &B::Device,
    ) -> Result<Edsr<B>, EdsrError> {
        let n_feats = self.n_feats;
        let kernel_size = self.kernel_size;

        let head = conv(EDSR_N_COLORS, n_feats, kernel_size, true).init(device);

        let block_config = ResBlockConfig::new(n_feats)
            .with_kernel_size(kernel_size)
            .with_res_scale(self.res_scale);
        let body = EdsrBody {
            blocks: (0..self.n_resblocks)
                .map(|_| block_config.init_with(conv, device))
                .collect(),
            conv: conv(n_feats, n_feats, kernel_size, true).init(device),
        };

        let tail = if self.no_upsampling {
            None
        } else {
            Some(EdsrTail {
                upsampler: UpsamplerConfig::new(self.scale, n_feats).init_with(conv, device)?,
                conv: conv(n_feats, EDSR_N_COLORS, kernel_size, true).init(device),
            })
        };

        let model = Edsr {
            sub_mean: self.mean_shift_config(MeanShiftSign::Sub).init(device),
            add_mean: self.mean_shift_config(MeanShiftSign::Add).init(device),
            head,
            body,
            tail,
            mean_shift: self.mean_shift,
        };

        match &self.pretrained {
            Some(path) => model.try_load_pretrained(Path::new(path), &self.import_policy()),
            None => Ok(model),
        }
    }
}

/// The EDSR body: residual blocks, then one convolution.
#[derive(Module, Debug)]
pub struct EdsrBody<B: Backend> {
    /// Residual blocks.
    pub blocks: Vec<ResBlock<B>>,

    /// Trailing convolution.
    pub conv: Conv2d<B>,
}

impl<B: Backend> EdsrBody<B> {
    /// Forward Pass; without the long skip.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self
            .blocks
            .iter()
            .fold(input, |x, block| block.forward(x));
        self.conv.forward(x)
    }
}

impl<B: Backend> NamedParameters for EdsrBody<B> {
    fn export_parameters(
        &self,
        prefix: &str,
        params: &mut ParameterMap,
    ) {
        for (idx, block) in self.blocks.iter().enumerate() {
            block.export_parameters(&join_key(prefix, &idx.to_string()), params);
        }
        let idx = self.blocks.len();
        self.conv
            .export_parameters(&join_key(prefix, &idx.to_string()), params);
    }

    fn import_parameters(
        self,
        prefix: &str,
        importer: &mut WeightImporter<'_>,
    ) -> Self {
        let blocks: Vec<_> = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(idx, block)| {
                block.import_parameters(&join_key(prefix, &idx.to_string()), importer)
            })
            .collect();
        let conv = self
            .conv
            .import_parameters(&join_key(prefix, &blocks.len().to_string()), importer);
        Self { blocks, conv }
    }
}

/// The EDSR tail: upsampler, then one convolution back to colors.
#[derive(Module, Debug)]
pub struct EdsrTail<B: Backend> {
    /// Upsampler.
    pub upsampler: Upsampler<B>,

    /// Output convolution.
    pub conv: Conv2d<B>,
}

impl<B: Backend> EdsrTail<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.conv.forward(self.upsampler.forward(input))
    }
}

impl<B: Backend> NamedParameters for EdsrTail<B> {
    fn export_parameters(
        &self,
        prefix: &str,
        params: &mut ParameterMap,
    ) {
        self.upsampler
            .export_parameters(&join_key(prefix, "0"), params);
        self.conv.export_parameters(&join_key(prefix, "1"), params);
    }

    fn import_parameters(
        self,
        prefix: &str,
        importer: &mut WeightImporter<'_>,
    ) -> Self {
        Self {
            upsampler: self
                .upsampler
                .import_parameters(&join_key(prefix, "0"), importer),
            conv: self
                .conv
                .import_parameters(&join_key(prefix, "1"), importer),
        }
    }
}

/// EDSR super-resolution network / feature encoder.
#[derive(Module, Debug)]
pub struct Edsr<B: Backend> {
    /// Frozen mean subtraction.
    pub sub_mean: MeanShift<B>,

    /// Frozen mean restoration.
    pub add_mean: MeanShift<B>,

    /// Colors to features.
    pub head: Conv2d<B>,

    /// Feature refinement.
    pub body: EdsrBody<B>,

    /// Upsampling; absent in feature-extractor mode.
    pub tail: Option<EdsrTail<B>>,

    /// Apply the mean shifts in [`Edsr::forward`].
    pub mean_shift: bool,
}

impl<B: Backend> Edsr<B> {
    /// Feature channels.
    pub fn n_feats(&self) -> usize {
        conv2d_channels(&self.head)[1]
    }

    /// Is this a feature extractor (no tail)?
    pub fn is_feature_extractor(&self) -> bool {
        self.tail.is_none()
    }

    /// The number of output channels.
    pub fn out_channels(&self) -> usize {
        match &self.tail {
            Some(tail) => conv2d_channels(&tail.conv)[1],
            None => self.n_feats(),
        }
    }

    /// The spatial scale of the output; 1 in feature-extractor mode.
    pub fn output_scale(&self) -> usize {
        self.tail
            .as_ref()
            .map(|tail| tail.upsampler.scale())
            .unwrap_or(1)
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[height, width]``.
    ///
    /// # Returns
    ///
    /// ``[height * scale, width * scale]``
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        let scale = self.output_scale();
        [input_resolution[0] * scale, input_resolution[1] * scale]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, 3, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, height * scale, width * scale]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "colors", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("colors", EDSR_N_COLORS)],
        );

        let x = if self.mean_shift {
            self.sub_mean.forward(input)
        } else {
            input
        };

        let h = self.head.forward(x);
        let r = self.body.forward(h.clone()) + h;

        let y = match &self.tail {
            None => r,
            Some(tail) => {
                let y = tail.forward(r);
                if self.mean_shift {
                    self.add_mean.forward(y)
                } else {
                    y
                }
            }
        };

        assert_shape_contract_periodically!(
            [
                "batch",
                "out_channels",
                "out_height" = "height" * "scale",
                "out_width" = "width" * "scale"
            ],
            &y,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("height", height),
                ("width", width),
                ("scale", self.output_scale())
            ]
        );

        y
    }

    /// The named parameter mapping of the live network.
    pub fn state_dict(&self) -> ParameterMap {
        self.parameter_map()
    }

    /// Import a checkpoint under `policy`.
    ///
    /// # Returns
    ///
    /// The updated network, and the [`ImportReport`].
    pub fn import_checkpoint(
        self,
        checkpoint: &Checkpoint,
        policy: &ImportPolicy,
    ) -> Result<(Self, ImportReport), WeightImportError> {
        import_weights(self, checkpoint, policy)
    }

    /// Load and import the checkpoint at `path`.
    ///
    /// Construction survives two failures, which are logged:
    /// - a missing file; `self` is returned unchanged.
    /// - a shape mismatch; the partially imported network is returned.
    ///
    /// # Errors
    ///
    /// - [`EdsrError::Checkpoint`] for files which exist but cannot be read.
    /// - [`EdsrError::Import`] for unexpected checkpoint names.
    pub fn try_load_pretrained(
        self,
        path: &Path,
        policy: &ImportPolicy,
    ) -> Result<Self, EdsrError> {
        let checkpoint = match Checkpoint::load(path) {
            Ok(checkpoint) => checkpoint,
            Err(CheckpointError::NotFound(path)) => {
                tracing::warn!(
                    path = %path.display(),
                    "File not found; keeping initialized weights"
                );
                return Ok(self);
            }
            Err(err) => {
                tracing::error!(%err, "Error loading model");
                return Err(err.into());
            }
        };

        let (model, result) = import_weights_partial(self, &checkpoint, policy);
        match result {
            Ok(report) => {
                tracing::info!(
                    path = %path.display(),
                    copied = report.copied.len(),
                    tolerated = report.tolerated.len(),
                    missing = report.missing.len(),
                    ignored = report.ignored.len(),
                    "Pretrained model loaded successfully"
                );
                Ok(model)
            }
            Err(err @ WeightImportError::ShapeMismatch { .. }) => {
                tracing::error!(
                    %err,
                    "Error loading model; keeping partially imported weights"
                );
                Ok(model)
            }
            Err(err) => {
                tracing::error!(%err, "Error loading model");
                Err(err.into())
            }
        }
    }

    /// Write the live parameters as a ``.safetensors`` checkpoint.
    pub fn save_checkpoint(
        &self,
        path: &Path,
    ) -> Result<(), CheckpointError> {
        Checkpoint::new(self.state_dict()).save_safetensors(path)
    }
}

impl<B: Backend> NamedParameters for Edsr<B> {
    fn export_parameters(
        &self,
        prefix: &str,
        params: &mut ParameterMap,
    ) {
        self.sub_mean
            .export_parameters(&join_key(prefix, "sub_mean"), params);
        self.add_mean
            .export_parameters(&join_key(prefix, "add_mean"), params);
        self.head
            .export_parameters(&join_key(prefix, "head.0"), params);
        self.body
            .export_parameters(&join_key(prefix, "body"), params);
        self.tail
            .export_parameters(&join_key(prefix, EDSR_TAIL_PREFIX), params);
    }

    fn import_parameters(
        mut self,
        prefix: &str,
        importer: &mut WeightImporter<'_>,
    ) -> Self {
        self.sub_mean = self
            .sub_mean
            .import_parameters(&join_key(prefix, "sub_mean"), importer);
        self.add_mean = self
            .add_mean
            .import_parameters(&join_key(prefix, "add_mean"), importer);
        self.head = self
            .head
            .import_parameters(&join_key(prefix, "head.0"), importer);
        self.body = self
            .body
            .import_parameters(&join_key(prefix, "body"), importer);
        self.tail = self
            .tail
            .import_parameters(&join_key(prefix, EDSR_TAIL_PREFIX), importer);
        self
    }
}
