use crate::{
    LOG_SIG_MAX, LOG_SIG_MIN,
    mlp::{build_hidden, forward_hidden, uniform_linear},
};
use candle_core::{Device, Result, Shape, Tensor, bail};
use candle_nn::{Init, Linear, Module, VarBuilder};
use rand_distr::{Distribution, StandardNormal};
use rlgen_core::rng::with_rng;
use std::f64::consts::PI;

const INIT_W: f64 = 1e-3;
const TANH_EPS: f64 = 1e-6;

/// Standard normal noise drawn from the workspace rng.
pub fn standard_normal(shape: impl Into<Shape>, device: &Device) -> Result<Tensor> {
    let shape = shape.into();
    let noise: Vec<f32> = with_rng(|rng| {
        (0..shape.elem_count())
            .map(|_| StandardNormal.sample(rng))
            .collect()
    });
    Tensor::from_vec(noise, shape, device)
}

#[derive(Debug)]
pub struct PolicyOutput {
    pub action: Tensor,
    pub mean: Tensor,
    pub log_std: Tensor,
    /// `None` on the deterministic path.
    pub log_prob: Option<Tensor>,
    pub pre_tanh_value: Option<Tensor>,
}

/// Gaussian policy squashed through a tanh, so actions live in `(-1, 1)`.
#[derive(Debug, Clone)]
pub struct TanhGaussianPolicy {
    hidden: Vec<Linear>,
    last_fc: Linear,
    last_fc_log_std: Linear,
    obs_dim: usize,
    action_dim: usize,
}

impl TanhGaussianPolicy {
    pub fn new(
        obs_dim: usize,
        action_dim: usize,
        hidden_sizes: &[usize],
        vb: VarBuilder,
    ) -> Result<Self> {
        if hidden_sizes.is_empty() {
            bail!("tanh gaussian policy needs at least one hidden layer");
        }
        let (hidden, last_dim) = build_hidden(obs_dim, hidden_sizes, &vb, "fc")?;
        let head_init = Init::Uniform {
            lo: -INIT_W,
            up: INIT_W,
        };
        let last_fc = uniform_linear(last_dim, action_dim, INIT_W, head_init, vb.pp("last_fc"))?;
        let last_fc_log_std = uniform_linear(
            last_dim,
            action_dim,
            INIT_W,
            head_init,
            vb.pp("last_fc_log_std"),
        )?;
        Ok(Self {
            hidden,
            last_fc,
            last_fc_log_std,
            obs_dim,
            action_dim,
        })
    }

    pub fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    pub fn forward(&self, obs: &Tensor, deterministic: bool) -> Result<PolicyOutput> {
        let h = forward_hidden(&self.hidden, obs)?;
        let mean = self.last_fc.forward(&h)?;
        let log_std = self
            .last_fc_log_std
            .forward(&h)?
            .clamp(LOG_SIG_MIN, LOG_SIG_MAX)?;
        if deterministic {
            return Ok(PolicyOutput {
                action: mean.tanh()?,
                mean,
                log_std,
                log_prob: None,
                pre_tanh_value: None,
            });
        }
        let std = log_std.exp()?;
        let eps = standard_normal(mean.shape(), mean.device())?;
        let pre_tanh_value = (&mean + std.mul(&eps)?)?;
        let action = pre_tanh_value.tanh()?;
        // log N(pre_tanh | mean, std), (pre_tanh - mean) / std is exactly eps
        let normal_log_prob = ((eps.sqr()? * -0.5)? - &log_std)?.affine(1., -0.5 * (2. * PI).ln())?;
        let squash_correction = (action.sqr()?.affine(-1., 1. + TANH_EPS))?.log()?;
        let log_prob = (normal_log_prob - squash_correction)?.sum_keepdim(1)?;
        Ok(PolicyOutput {
            action,
            mean,
            log_std,
            log_prob: Some(log_prob),
            pre_tanh_value: Some(pre_tanh_value),
        })
    }

    /// Action for a single flat observation.
    pub fn get_action(&self, obs: &[f32], deterministic: bool, device: &Device) -> Result<Vec<f32>> {
        if obs.len() != self.obs_dim {
            bail!(
                "observation has {} elements, policy expects {}",
                obs.len(),
                self.obs_dim
            );
        }
        let obs = Tensor::from_slice(obs, (1, self.obs_dim), device)?;
        let out = self.forward(&obs, deterministic)?;
        out.action.detach().squeeze(0)?.to_vec1::<f32>()
    }
}
