use candle_core::{Result, bail};
use rlgen_core::env::{Env, EnvironmentDescription, MetaEnv, SnapShot, Space};

/// Exposes a `[-1, 1]` action box regardless of the wrapped bounds, optionally normalizing
/// observations and scaling rewards.
#[derive(Debug, Clone)]
pub struct NormalizedBoxEnv<E: Env> {
    env: E,
    reward_scale: f32,
    obs_mean: Option<Vec<f32>>,
    obs_std: Option<Vec<f32>>,
}

impl<E: Env> NormalizedBoxEnv<E> {
    pub fn new(env: E) -> Self {
        Self {
            env,
            reward_scale: 1.,
            obs_mean: None,
            obs_std: None,
        }
    }

    pub fn with_reward_scale(mut self, reward_scale: f32) -> Self {
        self.reward_scale = reward_scale;
        self
    }

    pub fn with_obs_normalization(mut self, mean: Vec<f32>, std: Vec<f32>) -> Result<Self> {
        let size = self.env.env_description().observation_size();
        if mean.len() != size || std.len() != size {
            bail!("observation statistics must have {size} elements");
        }
        self.obs_mean = Some(mean);
        self.obs_std = Some(std);
        Ok(self)
    }

    pub fn inner(&self) -> &E {
        &self.env
    }

    pub fn scale_action(&self, action: &[f32]) -> Result<Vec<f32>> {
        let description = self.env.env_description();
        let Some((low, high)) = description.action_space.bounds() else {
            return Ok(action.to_vec());
        };
        if action.len() != low.len() {
            bail!(
                "action has {} elements, environment expects {}",
                action.len(),
                low.len()
            );
        }
        Ok(action
            .iter()
            .zip(low.iter().zip(high.iter()))
            .map(|(a, (lb, ub))| (lb + (a + 1.) * 0.5 * (ub - lb)).clamp(*lb, *ub))
            .collect())
    }

    fn apply_normalize_obs(&self, mut obs: Vec<f32>) -> Vec<f32> {
        if let (Some(mean), Some(std)) = (&self.obs_mean, &self.obs_std) {
            for ((o, m), s) in obs.iter_mut().zip(mean).zip(std) {
                *o = (*o - m) / (s + 1e-8);
            }
        }
        obs
    }
}

impl<E: Env> Env for NormalizedBoxEnv<E> {
    fn reset(&mut self, seed: u64) -> Result<Vec<f32>> {
        let obs = self.env.reset(seed)?;
        Ok(self.apply_normalize_obs(obs))
    }

    fn step(&mut self, action: &[f32]) -> Result<SnapShot> {
        let scaled = self.scale_action(action)?;
        let snapshot = self.env.step(&scaled)?;
        Ok(SnapShot {
            state: self.apply_normalize_obs(snapshot.state),
            reward: snapshot.reward * self.reward_scale,
            ..snapshot
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        let description = self.env.env_description();
        let action_space = match description.action_space {
            Space::Continuous { size, .. } => Space::unit_box(size),
            discrete => discrete,
        };
        EnvironmentDescription::new(description.observation_space, action_space)
    }
}

impl<E: MetaEnv> MetaEnv for NormalizedBoxEnv<E> {
    fn meta_variables(&self) -> Vec<f32> {
        self.env.meta_variables()
    }
}
