use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use rlgen_core::rng::set_seed;
use rlgen_models::{
    LOG_SIG_MAX, LOG_SIG_MIN,
    conv_gru::ConvGruCell,
    likelihood::diag_gaussian_log_prob,
    mlp::FlattenMlp,
    tanh_gaussian::TanhGaussianPolicy,
    video_predictor::{ConvGruPredictor, ConvGruPredictorConfig},
};

fn var_builder(varmap: &VarMap) -> VarBuilder<'static> {
    VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
}

#[test]
fn flatten_mlp_concatenates_inputs() -> Result<()> {
    let varmap = VarMap::new();
    let mlp = FlattenMlp::new(5, &[16, 16], 1, var_builder(&varmap))?;
    let obs = Tensor::ones((4, 3), DType::F32, &Device::Cpu)?;
    let act = Tensor::ones((4, 2), DType::F32, &Device::Cpu)?;
    let out = mlp.forward(&[&obs, &act])?;
    assert_eq!(out.dims(), &[4, 1]);
    // hidden layers, plus weight and bias of the output layer
    assert_eq!(varmap.all_vars().len(), 6);
    Ok(())
}

#[test]
fn tanh_gaussian_actions_are_squashed() -> Result<()> {
    set_seed(7);
    let varmap = VarMap::new();
    let policy = TanhGaussianPolicy::new(6, 3, &[32, 32], var_builder(&varmap))?;
    let obs = Tensor::randn(0f32, 3., (10, 6), &Device::Cpu)?;
    let out = policy.forward(&obs, false)?;
    assert_eq!(out.action.dims(), &[10, 3]);
    let log_prob = out.log_prob.expect("stochastic path has a log prob");
    assert_eq!(log_prob.dims(), &[10, 1]);
    let actions: Vec<f32> = out.action.flatten_all()?.to_vec1()?;
    assert!(actions.iter().all(|a| a.abs() < 1.));
    let log_std: Vec<f32> = out.log_std.flatten_all()?.to_vec1()?;
    assert!(
        log_std
            .iter()
            .all(|s| *s as f64 >= LOG_SIG_MIN && *s as f64 <= LOG_SIG_MAX)
    );
    Ok(())
}

#[test]
fn tanh_gaussian_deterministic_action_is_tanh_of_mean() -> Result<()> {
    let varmap = VarMap::new();
    let policy = TanhGaussianPolicy::new(4, 2, &[8], var_builder(&varmap))?;
    let obs = Tensor::randn(0f32, 1., (3, 4), &Device::Cpu)?;
    let out = policy.forward(&obs, true)?;
    assert!(out.log_prob.is_none());
    let diff = (out.action - out.mean.tanh()?)?.abs()?.sum_all()?.to_scalar::<f32>()?;
    assert!(diff < 1e-6);
    let single = policy.get_action(&[0.1, 0.2, 0.3, 0.4], true, &Device::Cpu)?;
    assert_eq!(single.len(), 2);
    assert!(policy.get_action(&[0.1], true, &Device::Cpu).is_err());
    Ok(())
}

#[test]
fn conv_gru_keeps_hidden_shape() -> Result<()> {
    let varmap = VarMap::new();
    let cell = ConvGruCell::new(8, 16, 3, var_builder(&varmap))?;
    let x = Tensor::randn(0f32, 1., (2, 8, 5, 5), &Device::Cpu)?;
    let h = Tensor::zeros((2, 16, 5, 5), DType::F32, &Device::Cpu)?;
    let h = cell.forward(&x, &h)?;
    assert_eq!(h.dims(), &[2, 16, 5, 5]);
    // convex combination of the previous state and a tanh candidate
    let max = h.abs()?.max_keepdim(0)?.flatten_all()?.max(0)?.to_scalar::<f32>()?;
    assert!(max <= 1.);
    assert!(ConvGruCell::new(8, 16, 4, var_builder(&varmap)).is_err());
    Ok(())
}

#[test]
fn predictor_step_shapes_and_ranges() -> Result<()> {
    let varmap = VarMap::new();
    let config = ConvGruPredictorConfig {
        image_size: 8,
        conv_channels: 8,
        gru_channels: 16,
        ..Default::default()
    };
    let model = ConvGruPredictor::new(config, var_builder(&varmap))?;
    let h = model.initial_hidden(3)?;
    assert_eq!(h.dims(), &[3, 16, 2, 2]);
    let obs = Tensor::rand(0f32, 1., (3, 3, 8, 8), &Device::Cpu)?;
    let act = Tensor::randn(0f32, 1., (3, 4), &Device::Cpu)?;
    let step = model.step(&h, &obs, &act, true)?;
    assert_eq!(step.recon.dims(), obs.dims());
    assert_eq!(step.log_cov.dims(), obs.dims());
    assert_eq!(step.next_hidden.dims(), h.dims());
    let recon: Vec<f32> = step.recon.flatten_all()?.to_vec1()?;
    assert!(recon.iter().all(|v| (0. ..=1.).contains(v)));
    let eval = model.step(&step.next_hidden, &obs, &act, false)?;
    assert_eq!(eval.recon.dims(), obs.dims());
    Ok(())
}

#[test]
fn predictor_rejects_bad_frame_size() {
    let varmap = VarMap::new();
    let config = ConvGruPredictorConfig {
        image_size: 10,
        ..Default::default()
    };
    assert!(ConvGruPredictor::new(config, var_builder(&varmap)).is_err());
}

#[test]
fn diag_gaussian_log_prob_of_unit_gaussian() -> Result<()> {
    let mean = Tensor::zeros((2, 3), DType::F32, &Device::Cpu)?;
    let log_cov = Tensor::zeros((2, 3), DType::F32, &Device::Cpu)?;
    let log_prob = diag_gaussian_log_prob(&mean, &log_cov, &mean)?.to_scalar::<f32>()?;
    let expected = -0.5 * 6. * (2. * std::f32::consts::PI).ln();
    assert!((log_prob - expected).abs() < 1e-4);
    let far = Tensor::ones((2, 3), DType::F32, &Device::Cpu)?;
    let far_log_prob = diag_gaussian_log_prob(&mean, &log_cov, &far)?.to_scalar::<f32>()?;
    assert!((far_log_prob - (expected - 3.)).abs() < 1e-4);
    Ok(())
}
