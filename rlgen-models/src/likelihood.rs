use candle_core::{Result, Tensor};
use std::f64::consts::PI;

/// Log likelihood of `obs` under a diagonal gaussian with per pixel `mean` and `log_cov`,
/// summed over the whole batch.
pub fn diag_gaussian_log_prob(mean: &Tensor, log_cov: &Tensor, obs: &Tensor) -> Result<Tensor> {
    let bs = mean.dim(0)?;
    let mean = mean.reshape((bs, ()))?;
    let log_cov = log_cov.reshape((bs, ()))?;
    let obs = obs.reshape((bs, ()))?;
    let dims = mean.dim(1)? as f64;
    let mahalanobis = (mean - obs)?.sqr()?.div(&log_cov.exp()?)?.sum_all()?;
    let log_det = log_cov.sum_all()?;
    // -0.5 * (sum (x - mu)^2 / sigma^2 + sum log sigma^2 + D * B * log 2pi)
    let constant = dims * bs as f64 * (2. * PI).ln();
    (mahalanobis + log_det)?.affine(-0.5, -0.5 * constant)
}
