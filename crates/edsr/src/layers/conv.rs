//! # Same-Padding Convolutions
//!
//! [`default_conv`] is the convolution factory used by every EDSR stage.

use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::Backend;

/// Convolution factory.
///
/// ``(in_channels, out_channels, kernel_size, bias) -> Conv2dConfig``
pub type ConvFactory = fn(usize, usize, usize, bool) -> Conv2dConfig;

/// Build a square [`Conv2dConfig`] with ``padding = kernel_size / 2``.
///
/// For odd kernel sizes this preserves the spatial resolution.
pub fn default_conv(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    bias: bool,
) -> Conv2dConfig {
    let padding = kernel_size / 2;
    Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(bias)
}

/// The ``[in_channels, out_channels]`` of an initialized [`Conv2d`].
pub fn conv2d_channels<B: Backend>(conv: &Conv2d<B>) -> [usize; 2] {
    let [out_channels, in_per_group, _, _] = conv.weight.dims();
    [in_per_group * conv.groups, out_channels]
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::prelude::Tensor;

    type B = NdArray<f32>;

    #[test]
    fn test_default_conv_config() {
        let config = default_conv(3, 64, 3, true);
        assert_eq!(config.channels, [3, 64]);
        assert_eq!(config.kernel_size, [3, 3]);
        assert!(config.bias);
        assert!(matches!(config.padding, PaddingConfig2d::Explicit(1, 1)));

        let config = default_conv(8, 8, 1, false);
        assert!(!config.bias);
        assert!(matches!(config.padding, PaddingConfig2d::Explicit(0, 0)));
    }

    #[test]
    fn test_default_conv_preserves_resolution() {
        let device = Default::default();

        for kernel_size in [1, 3, 5, 7] {
            let conv: Conv2d<B> = default_conv(3, 6, kernel_size, true).init(&device);
            assert_eq!(conv2d_channels(&conv), [3, 6]);

            let input = Tensor::ones([2, 3, 11, 7], &device);
            let output = conv.forward(input);
            assert_shape_contract!(
                ["batch", "channels", "height", "width"],
                &output,
                &[
                    ("batch", 2),
                    ("channels", 6),
                    ("height", 11),
                    ("width", 7)
                ],
            );
        }
    }

    #[test]
    fn test_default_conv_without_bias() {
        let device = Default::default();
        let conv: Conv2d<B> = default_conv(4, 4, 3, false).init(&device);
        assert!(conv.bias.is_none());
    }
}
