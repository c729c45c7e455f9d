use anyhow::{Context, bail};
use burn::backend::NdArray;
use burn::prelude::{Backend, Tensor};
use burn::tensor::{Distribution, TensorData};
use clap::Parser;
use edsr::cache::disk::DiskCacheConfig;
use edsr::models::edsr::edsr_model::Edsr;
use edsr::models::edsr::prefabs::{EdsrEncoderArgs, PREFAB_EDSR_MAP};
use edsr::utility::summary::{display_parameter_summary, parameter_count};
use image::{ImageBuffer, Rgb, RgbImage};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Named encoder config.
    #[arg(long, default_value = "edsr-baseline")]
    prefab: String,

    /// Upsampling scale; selects the pretrained weights.
    #[arg(long, default_value = "2")]
    scale: usize,

    /// Build the upsampling tail, and emit an image.
    #[arg(long, default_value = "false")]
    upsample: bool,

    /// Download the pretrained weights into the disk cache first.
    #[arg(long, default_value = "false")]
    fetch: bool,

    /// Input image; a random ``48x48`` input is used when absent.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output image; requires `--upsample`.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print the parameter summary.
    #[arg(long, default_value = "false")]
    summary: bool,
}

fn image_to_tensor<B: Backend>(
    image: &RgbImage,
    rgb_range: f64,
    device: &B::Device,
) -> Tensor<B, 4> {
    let (width, height) = image.dimensions();
    let (width, height) = (width as usize, height as usize);

    // HWC -> CHW
    let mut values = vec![0.0f32; 3 * height * width];
    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            values[c * height * width + y * width + x] =
                (pixel[c] as f64 / 255.0 * rgb_range) as f32;
        }
    }

    Tensor::from_data(TensorData::new(values, [1, 3, height, width]), device)
}

fn tensor_to_image<B: Backend>(
    tensor: Tensor<B, 4>,
    rgb_range: f64,
) -> anyhow::Result<RgbImage> {
    let [_, channels, height, width] = tensor.dims();
    if channels != 3 {
        bail!("Expected a 3 channel image, found {channels} channels");
    }

    let values = tensor
        .div_scalar(rgb_range)
        .clamp(0.0, 1.0)
        .into_data()
        .convert::<f32>()
        .into_vec::<f32>()
        .map_err(|err| anyhow::anyhow!("{err:?}"))?;

    Ok(ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let px = |c: usize| (values[c * height * width + y * width + x] * 255.0).round() as u8;
        Rgb([px(0), px(1), px(2)])
    }))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    type B = NdArray<f32>;
    let device = Default::default();

    let encoder_args: EdsrEncoderArgs = PREFAB_EDSR_MAP
        .try_lookup_prefab(&args.prefab)?
        .args()
        .with_scale(args.scale)
        .with_no_upsampling(!args.upsample);

    let disk_cache = DiskCacheConfig::default();
    if args.fetch {
        let weights = encoder_args.pretrained_weights().with_context(|| {
            format!(
                "No pretrained weights for {}",
                encoder_args.checkpoint_key()
            )
        })?;
        let path = weights.fetch_weights_to_disk_cache(&disk_cache)?;
        tracing::info!(path = %path.display(), "weights cached");
    }

    let model: Edsr<B> = encoder_args.try_init(&disk_cache, &device)?;

    if args.summary {
        let params = model.state_dict();
        println!("{}", display_parameter_summary(&params)?);
        tracing::info!(parameters = parameter_count(&params), "summary");
    }

    let input = match &args.input {
        Some(path) => {
            let image = image::open(path)
                .with_context(|| format!("Failed to read {}", path.display()))?
                .to_rgb8();
            image_to_tensor::<B>(&image, encoder_args.rgb_range, &device)
        }
        None => Tensor::random([1, 3, 48, 48], Distribution::Default, &device),
    };

    let output = model.forward(input.clone());
    tracing::info!(input = ?input.dims(), output = ?output.dims(), "forward");

    if let Some(path) = &args.output {
        if model.is_feature_extractor() {
            bail!("--output requires --upsample");
        }
        tensor_to_image(output, encoder_args.rgb_range)?
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote image");
    }

    Ok(())
}
