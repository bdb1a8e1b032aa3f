use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use rlgen_api::{
    logger::{setup_logger, tracing_filter},
    vis::save_tensor_as_img,
};
use tracing_subscriber::filter::LevelFilter;
use serde::Serialize;

#[derive(Serialize)]
struct Variant {
    lr: f64,
}

#[test]
fn logger_writes_variant_and_progress() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut logger = setup_logger(dir.path(), "exp", 2, 7, &Variant { lr: 0.5 })?;
    assert_eq!(logger.log_dir(), dir.path().join("exp").join("exp--s-7--2"));
    let variant = std::fs::read_to_string(logger.log_dir().join("variant.json"))?;
    assert!(variant.contains("\"lr\": 0.5"));
    for epoch in 0..2 {
        logger.record_tabular("Epoch", epoch as f32);
        logger.record_tabular("Return", -1.5);
        logger.dump_tabular()?;
    }
    let progress = std::fs::read_to_string(logger.log_dir().join("progress.csv"))?;
    assert_eq!(progress, "Epoch,Return\n0,-1.5\n1,-1.5\n");
    logger.record_tabular("Other", 1.);
    assert!(logger.dump_tabular().is_err());
    Ok(())
}

#[test]
fn frames_are_written_as_png() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let rgb = Tensor::rand(0f32, 1., (3, 6, 5), &Device::Cpu)?;
    let path = dir.path().join("nested").join("rgb.png");
    save_tensor_as_img(&rgb, &path)?;
    let img = image::open(&path)?;
    assert_eq!((img.width(), img.height()), (5, 6));

    let gray = Tensor::ones((1, 4, 4), DType::F32, &Device::Cpu)?;
    save_tensor_as_img(&gray, &dir.path().join("gray.png"))?;
    let two = Tensor::ones((2, 4, 4), DType::F32, &Device::Cpu)?;
    assert!(save_tensor_as_img(&two, &dir.path().join("two.png")).is_err());
    Ok(())
}

#[test]
fn tracing_level_follows_directives() {
    assert_eq!(tracing_filter(None).max_level_hint(), Some(LevelFilter::INFO));
    assert_eq!(
        tracing_filter(Some("debug")).max_level_hint(),
        Some(LevelFilter::DEBUG)
    );
    assert_eq!(
        tracing_filter(Some("warn")).max_level_hint(),
        Some(LevelFilter::WARN)
    );
}
