use anyhow::{Context, Result, bail};
use candle_core::{DType, Tensor};
use image::{GrayImage, RgbImage};
use std::{fs, path::Path};

/// Writes a `[C, H, W]` tensor with values in `[0, 1]` as a png. One channel frames are stored as
/// grayscale, three channel frames as rgb.
pub fn save_tensor_as_img(tensor: &Tensor, path: &Path) -> Result<()> {
    let (channels, height, width) = tensor.dims3()?;
    let pixels: Vec<u8> = tensor
        .to_device(&candle_core::Device::Cpu)?
        .to_dtype(DType::F32)?
        .clamp(0f32, 1f32)?
        .permute((1, 2, 0))?
        .flatten_all()?
        .to_vec1::<f32>()?
        .into_iter()
        .map(|v| (v * 255.).round() as u8)
        .collect();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating image directory {}", parent.display()))?;
    }
    let (width, height) = (width as u32, height as u32);
    match channels {
        1 => GrayImage::from_raw(width, height, pixels)
            .context("pixel buffer does not match the frame size")?
            .save(path),
        3 => RgbImage::from_raw(width, height, pixels)
            .context("pixel buffer does not match the frame size")?
            .save(path),
        other => bail!("can not write a {other} channel frame as an image"),
    }
    .with_context(|| format!("writing {}", path.display()))
}
