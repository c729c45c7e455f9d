//! # Pixel Shuffle
//!
//! Sub-pixel rearrangement; trades ``r*r`` channels for an ``r``-fold
//! expansion of each spatial dimension:
//!
//! ```text
//! [batch, channels * r * r, height, width] -> [batch, channels, height * r, width * r]
//! ```
//!
//! Channel ``c * r * r + i * r + j`` of the input lands at
//! output position ``(h * r + i, w * r + j)`` of channel ``c``.

use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`PixelShuffle`] Config.
#[derive(Config, Debug)]
pub struct PixelShuffleConfig {
    /// The spatial upscale factor, ``r``.
    pub upscale_factor: usize,
}

impl PixelShuffleConfig {
    /// Initialize a [`PixelShuffle`].
    ///
    /// # Panics
    ///
    /// If the upscale factor is 0.
    pub fn init(&self) -> PixelShuffle {
        assert!(self.upscale_factor > 0, "upscale_factor must be > 0");
        PixelShuffle {
            upscale_factor: self.upscale_factor,
        }
    }
}

/// Pixel Shuffle layer.
#[derive(Module, Clone, Debug)]
pub struct PixelShuffle {
    /// The spatial upscale factor, ``r``.
    pub upscale_factor: usize,
}

impl PixelShuffle {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels=out_channels*r*r, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, height*r, width*r]``
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let r = self.upscale_factor;
        let [batch, out_channels, height, width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels" = "out_channels" * "factor_sq",
                "height",
                "width"
            ],
            &input,
            &["batch", "out_channels", "height", "width"],
            &[("factor_sq", r * r)],
        );

        let x = input
            .reshape([batch, out_channels, r, r, height, width])
            .permute([0, 1, 4, 2, 5, 3])
            .reshape([batch, out_channels, height * r, width * r]);

        assert_shape_contract_periodically!(
            [
                "batch",
                "out_channels",
                "out_height" = "height" * "r",
                "out_width" = "width" * "r"
            ],
            &x,
            &[
                ("batch", batch),
                ("out_channels", out_channels),
                ("height", height),
                ("width", width),
                ("r", r)
            ]
        );

        x
    }
}
