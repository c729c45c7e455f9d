//! # EDSR Named Builders
//!
//! Two named encoders, ``edsr-baseline`` and ``edsr-large``, share one
//! pretrained checkpoint table, [`PRETRAINED_EDSR_WEIGHTS`], keyed by
//! ``r{n_resblocks}f{n_feats}x{scale}``.
//!
//! Builders resolve a key to its disk cache path, but never download;
//! an uncached (or unknown) checkpoint leaves the network freshly initialized.
//! Use [`PretrainedWeights::fetch_weights_to_disk_cache`] to populate the cache.

use crate::cache::disk::DiskCacheConfig;
use crate::cache::weights::{PretrainedWeights, PretrainedWeightsTable};
use crate::models::edsr::edsr_model::{Edsr, EdsrConfig};
use crate::models::edsr::error::EdsrError;
use anyhow::Context;
use burn::prelude::{Backend, Config};

const EDSR_LICENSE: &str = "mit";
const EDSR_ORIGIN: &str = "https://github.com/sanghyun-son/EDSR-PyTorch";

/// Published EDSR-PyTorch checkpoints.
pub static PRETRAINED_EDSR_WEIGHTS: PretrainedWeightsTable = PretrainedWeightsTable {
    items: &[
        PretrainedWeights {
            key: "r16f64x2",
            description: "EDSR baseline x2, trained on DIV2K",
            license: EDSR_LICENSE,
            origin: EDSR_ORIGIN,
            url: "https://cv.snu.ac.kr/research/EDSR/models/edsr_baseline_x2-1bc95232.pt",
        },
        PretrainedWeights {
            key: "r16f64x3",
            description: "EDSR baseline x3, trained on DIV2K",
            license: EDSR_LICENSE,
            origin: EDSR_ORIGIN,
            url: "https://cv.snu.ac.kr/research/EDSR/models/edsr_baseline_x3-abf2a44e.pt",
        },
        PretrainedWeights {
            key: "r16f64x4",
            description: "EDSR baseline x4, trained on DIV2K",
            license: EDSR_LICENSE,
            origin: EDSR_ORIGIN,
            url: "https://cv.snu.ac.kr/research/EDSR/models/edsr_baseline_x4-6b446fab.pt",
        },
        PretrainedWeights {
            key: "r32f256x2",
            description: "EDSR x2, trained on DIV2K",
            license: EDSR_LICENSE,
            origin: EDSR_ORIGIN,
            url: "https://cv.snu.ac.kr/research/EDSR/models/edsr_x2-0edfb8a3.pt",
        },
        PretrainedWeights {
            key: "r32f256x3",
            description: "EDSR x3, trained on DIV2K",
            license: EDSR_LICENSE,
            origin: EDSR_ORIGIN,
            url: "https://cv.snu.ac.kr/research/EDSR/models/edsr_x3-ea3ef2c6.pt",
        },
        PretrainedWeights {
            key: "r32f256x4",
            description: "EDSR x4, trained on DIV2K",
            license: EDSR_LICENSE,
            origin: EDSR_ORIGIN,
            url: "https://cv.snu.ac.kr/research/EDSR/models/edsr_x4-4f62e9ef.pt",
        },
    ],
};

/// The [`PRETRAINED_EDSR_WEIGHTS`] key for a network shape.
pub fn checkpoint_key(
    n_resblocks: usize,
    n_feats: usize,
    scale: usize,
) -> String {
    format!("r{n_resblocks}f{n_feats}x{scale}")
}

/// Named EDSR encoder arguments.
///
/// The defaults are the ``edsr-baseline`` arguments.
#[derive(Config, Debug)]
pub struct EdsrEncoderArgs {
    /// Number of residual blocks.
    #[config(default = "16")]
    pub n_resblocks: usize,

    /// Feature channels.
    #[config(default = "64")]
    pub n_feats: usize,

    /// Residual block scaling factor.
    #[config(default = "1.0")]
    pub res_scale: f64,

    /// Upsampling scale; also selects the pretrained weights.
    #[config(default = "2")]
    pub scale: usize,

    /// Feature-extractor mode.
    #[config(default = "true")]
    pub no_upsampling: bool,

    /// The intensity range of images.
    #[config(default = "1.0")]
    pub rgb_range: f64,

    /// Unused by the network.
    #[config(default = "100")]
    pub n_class: usize,
}

impl EdsrEncoderArgs {
    /// ``edsr-baseline``: 16 blocks, 64 features.
    pub fn baseline() -> Self {
        Self::new()
    }

    /// ``edsr-large``: 32 blocks, 256 features, residual scale 0.1.
    pub fn large() -> Self {
        Self::new()
            .with_n_resblocks(32)
            .with_n_feats(256)
            .with_res_scale(0.1)
    }

    /// The [`PRETRAINED_EDSR_WEIGHTS`] key for these arguments.
    pub fn checkpoint_key(&self) -> String {
        checkpoint_key(self.n_resblocks, self.n_feats, self.scale)
    }

    /// The published checkpoint for these arguments, if any.
    pub fn pretrained_weights(&self) -> Option<&'static PretrainedWeights> {
        PRETRAINED_EDSR_WEIGHTS.lookup(&self.checkpoint_key())
    }

    /// Resolve the disk cache path of the pretrained weights.
    ///
    /// Unknown shapes resolve to `None`.
    pub fn resolve_pretrained_checkpoint(
        &self,
        disk_cache: &DiskCacheConfig,
    ) -> Option<String> {
        let weights = self.pretrained_weights()?;
        match weights.disk_cache_path(disk_cache) {
            Ok(path) => Some(path.to_string_lossy().to_string()),
            Err(err) => {
                tracing::warn!(key = weights.key, %err, "cannot resolve weights path");
                None
            }
        }
    }

    /// Build an [`EdsrConfig`], without pretrained weights.
    pub fn to_config(&self) -> EdsrConfig {
        EdsrConfig::new(self.n_resblocks, self.n_feats)
            .with_res_scale(self.res_scale)
            .with_scale(self.scale)
            .with_no_upsampling(self.no_upsampling)
            .with_rgb_range(self.rgb_range)
    }

    /// Build an [`EdsrConfig`], with the pretrained weights from `disk_cache`.
    pub fn to_pretrained_config(
        &self,
        disk_cache: &DiskCacheConfig,
    ) -> EdsrConfig {
        self.to_config()
            .with_pretrained(self.resolve_pretrained_checkpoint(disk_cache))
    }

    /// Build the encoder, importing cached pretrained weights.
    pub fn try_init<B: Backend>(
        &self,
        disk_cache: &DiskCacheConfig,
        device: &B::Device,
    ) -> Result<Edsr<B>, EdsrError> {
        self.to_pretrained_config(disk_cache).try_init(device)
    }

    /// Build the encoder, importing cached pretrained weights.
    ///
    /// # Panics
    ///
    /// On any error from [`EdsrEncoderArgs::try_init`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Edsr<B> {
        match self.try_init(&DiskCacheConfig::default(), device) {
            Ok(model) => model,
            Err(e) => panic!("{}", e),
        }
    }
}

/// Build an ``edsr-baseline`` encoder.
///
/// `overrides` adjusts the [`EdsrEncoderArgs::baseline`] arguments;
/// pass `|args| args` to keep them.
///
/// # Panics
///
/// On any error from [`EdsrEncoderArgs::try_init`].
pub fn make_encoder_baseline<B: Backend>(
    overrides: impl FnOnce(EdsrEncoderArgs) -> EdsrEncoderArgs,
    device: &B::Device,
) -> Edsr<B> {
    overrides(EdsrEncoderArgs::baseline()).init(device)
}

/// Build an ``edsr-large`` encoder.
///
/// `overrides` adjusts the [`EdsrEncoderArgs::large`] arguments;
/// pass `|args| args` to keep them.
///
/// # Panics
///
/// On any error from [`EdsrEncoderArgs::try_init`].
pub fn make_encoder_large<B: Backend>(
    overrides: impl FnOnce(EdsrEncoderArgs) -> EdsrEncoderArgs,
    device: &B::Device,
) -> Edsr<B> {
    overrides(EdsrEncoderArgs::large()).init(device)
}

/// A named [`EdsrEncoderArgs`] default set.
#[derive(Debug, Clone, Copy)]
pub struct EdsrPrefab {
    /// Name of the encoder.
    pub name: &'static str,

    /// Description of the encoder.
    pub description: &'static str,

    /// The default arguments.
    pub defaults: fn() -> EdsrEncoderArgs,
}

impl EdsrPrefab {
    /// Build the default arguments.
    pub fn args(&self) -> EdsrEncoderArgs {
        (self.defaults)()
    }
}

/// A static list of [`EdsrPrefab`]s.
#[derive(Debug)]
pub struct EdsrPrefabMap {
    /// The prefabs; names are unique.
    pub items: &'static [EdsrPrefab],
}

impl EdsrPrefabMap {
    /// Names of the prefabs, in declaration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.items.iter().map(|item| item.name).collect()
    }

    /// Lookup a prefab by name.
    pub fn lookup_prefab(
        &self,
        name: &str,
    ) -> Option<&'static EdsrPrefab> {
        let items: &'static [EdsrPrefab] = self.items;
        items.iter().find(|item| item.name == name)
    }

    /// Lookup a prefab by name.
    pub fn try_lookup_prefab(
        &self,
        name: &str,
    ) -> anyhow::Result<&'static EdsrPrefab> {
        self.lookup_prefab(name).with_context(|| {
            format!(
                "Unknown EDSR encoder: {name}; expected one of {:?}",
                self.names()
            )
        })
    }
}

/// The named EDSR encoders.
pub static PREFAB_EDSR_MAP: EdsrPrefabMap = EdsrPrefabMap {
    items: &[
        EdsrPrefab {
            name: "edsr-baseline",
            description: "EDSR baseline: 16 residual blocks, 64 features",
            defaults: EdsrEncoderArgs::baseline,
        },
        EdsrPrefab {
            name: "edsr-large",
            description: "EDSR: 32 residual blocks, 256 features, residual scale 0.1",
            defaults: EdsrEncoderArgs::large,
        },
    ],
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_torch_checkpoint;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::prelude::Tensor;
    use burn::tensor::Distribution;
    use hamcrest::prelude::*;

    type B = NdArray<f32>;

    fn temp_disk_cache(dir: &tempfile::TempDir) -> DiskCacheConfig {
        DiskCacheConfig::new().with_root_dir(Some(dir.path().to_string_lossy().to_string()))
    }

    #[test]
    fn test_checkpoint_key() {
        assert_eq!(checkpoint_key(16, 64, 2), "r16f64x2");
        assert_eq!(EdsrEncoderArgs::baseline().checkpoint_key(), "r16f64x2");
        assert_eq!(
            EdsrEncoderArgs::large().with_scale(4).checkpoint_key(),
            "r32f256x4"
        );
    }

    #[test]
    fn test_weights_table() {
        assert_that!(
            PRETRAINED_EDSR_WEIGHTS.keys(),
            is(equal_to(vec![
                "r16f64x2",
                "r16f64x3",
                "r16f64x4",
                "r32f256x2",
                "r32f256x3",
                "r32f256x4",
            ]))
        );
        for weights in PRETRAINED_EDSR_WEIGHTS.items {
            assert!(weights.file_name().ends_with(".pt"));
            assert_eq!(weights.license, "mit");
        }
    }

    #[test]
    fn test_builder_args() {
        let baseline = EdsrEncoderArgs::baseline();
        assert_eq!(baseline.n_resblocks, 16);
        assert_eq!(baseline.n_feats, 64);
        assert_eq!(baseline.res_scale, 1.0);
        assert_eq!(baseline.scale, 2);
        assert!(baseline.no_upsampling);
        assert_eq!(baseline.rgb_range, 1.0);
        assert_eq!(baseline.n_class, 100);

        let large = EdsrEncoderArgs::large();
        assert_eq!(large.n_resblocks, 32);
        assert_eq!(large.n_feats, 256);
        assert_eq!(large.res_scale, 0.1);
        assert!(large.no_upsampling);

        let config = large.with_scale(3).with_no_upsampling(false).to_config();
        assert_eq!(config.n_resblocks, 32);
        assert_eq!(config.n_feats, 256);
        assert_eq!(config.res_scale, 0.1);
        assert_eq!(config.scale, 3);
        assert!(!config.no_upsampling);
        assert!(config.pretrained.is_none());
    }

    #[test]
    fn test_resolve_pretrained_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let disk_cache = temp_disk_cache(&dir);

        let path = EdsrEncoderArgs::baseline()
            .resolve_pretrained_checkpoint(&disk_cache)
            .unwrap();
        assert_eq!(
            path,
            dir.path()
                .join("weights")
                .join("edsr_baseline_x2-1bc95232.pt")
                .to_string_lossy()
                .to_string()
        );

        let path = EdsrEncoderArgs::large()
            .with_scale(4)
            .resolve_pretrained_checkpoint(&disk_cache)
            .unwrap();
        assert!(path.ends_with("edsr_x4-4f62e9ef.pt"));

        // Unknown combinations have no checkpoint.
        let args = EdsrEncoderArgs::baseline().with_n_resblocks(8);
        assert!(args.pretrained_weights().is_none());
        assert!(args.resolve_pretrained_checkpoint(&disk_cache).is_none());
        assert!(args.to_pretrained_config(&disk_cache).pretrained.is_none());
    }

    #[test]
    fn test_cached_torch_checkpoint_is_imported() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let disk_cache = temp_disk_cache(&dir);

        // A full x2 network, as published; the encoder has no tail.
        let source: Edsr<B> = EdsrEncoderArgs::baseline()
            .with_no_upsampling(false)
            .to_config()
            .init(&device);
        let expected = source.state_dict();

        let path = EdsrEncoderArgs::baseline()
            .pretrained_weights()
            .unwrap()
            .disk_cache_path(&disk_cache)
            .unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        write_torch_checkpoint(&path, &expected);

        let encoder: Edsr<B> = EdsrEncoderArgs::baseline()
            .try_init(&disk_cache, &device)
            .unwrap();
        assert!(encoder.is_feature_extractor());

        let loaded = encoder.state_dict();
        for (key, data) in loaded.iter() {
            if key.starts_with("sub_mean") || key.starts_with("add_mean") {
                continue;
            }
            data.assert_eq(&expected[key], true);
        }
    }

    #[test]
    fn test_prefab_map() {
        assert_eq!(PREFAB_EDSR_MAP.names(), vec!["edsr-baseline", "edsr-large"]);

        let args = PREFAB_EDSR_MAP
            .try_lookup_prefab("edsr-large")
            .unwrap()
            .args();
        assert_eq!(args.n_feats, 256);

        assert!(PREFAB_EDSR_MAP.lookup_prefab("edsr-huge").is_none());
        let err = PREFAB_EDSR_MAP.try_lookup_prefab("edsr-huge").unwrap_err();
        assert!(err.to_string().contains("edsr-baseline"));
    }

    #[test]
    fn test_make_encoder_baseline() {
        let device = Default::default();

        // A shape with no published weights; nothing is resolved.
        let model: Edsr<B> =
            make_encoder_baseline(|args| args.with_n_resblocks(2).with_n_feats(8), &device);
        assert_eq!(model.out_channels(), 8);
        assert_eq!(model.body.blocks.len(), 2);
        assert_eq!(model.body.blocks[0].res_scale, 1.0);

        let input = Tensor::<B, 4>::random([1, 3, 12, 12], Distribution::Default, &device);
        let output = model.forward(input);
        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &output,
            &[
                ("batch", 1),
                ("channels", 8),
                ("height", 12),
                ("width", 12)
            ],
        );
    }

    #[test]
    fn test_make_encoder_large_defaults() {
        let device = Default::default();

        // Only the depth is overridden; features and residual scale are the large defaults.
        let model: Edsr<B> = make_encoder_large(|args| args.with_n_resblocks(1), &device);
        assert_eq!(model.n_feats(), 256);
        assert_eq!(model.out_channels(), 256);
        assert_eq!(model.body.blocks.len(), 1);
        assert_eq!(model.body.blocks[0].res_scale, 0.1);
        assert!(model.is_feature_extractor());
    }

    #[test]
    fn test_make_encoder_large() {
        let device = Default::default();

        let model: Edsr<B> = make_encoder_large(
            |args| {
                args.with_n_resblocks(1)
                    .with_n_feats(4)
                    .with_no_upsampling(false)
                    .with_scale(3)
            },
            &device,
        );
        assert_eq!(model.out_channels(), 3);
        assert_eq!(model.output_scale(), 3);
        assert_eq!(model.body.blocks[0].res_scale, 0.1);
    }
}
