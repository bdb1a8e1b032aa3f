use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{Init, VarBuilder, VarMap};
use rlgen_core::optim::{OptimizerWithMaxGrad, clip_grad};

fn single_var(value: f32) -> Result<(VarMap, Tensor)> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let w = vb.get_with_hints(2, "w", Init::Const(value as f64))?;
    Ok((varmap, w))
}

#[test]
fn clip_grad_bounds_global_norm() -> Result<()> {
    let (varmap, w) = single_var(10.)?;
    // d/dw sum(w^2) = 2w = [20, 20], norm ~28.3
    let loss = w.sqr()?.sum_all()?;
    let grads = clip_grad(&loss, &varmap, 1.)?;
    let grad = grads.get(&w).expect("gradient of w");
    let norm = grad.sqr()?.sum_all()?.sqrt()?.to_scalar::<f32>()?;
    assert!((norm - 1.).abs() < 1e-3);
    Ok(())
}

#[test]
fn backward_step_decreases_loss() -> Result<()> {
    let (varmap, w) = single_var(1.)?;
    let mut optimizer = OptimizerWithMaxGrad::adam(varmap, 0.1, 0.)?.with_max_grad_norm(Some(0.5));
    let before = w.sqr()?.sum_all()?.to_scalar::<f32>()?;
    for _ in 0..5 {
        let loss = w.sqr()?.sum_all()?;
        optimizer.backward_step(&loss)?;
    }
    let after = w.sqr()?.sum_all()?.to_scalar::<f32>()?;
    assert!(after < before);
    Ok(())
}
