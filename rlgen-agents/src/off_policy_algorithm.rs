use crate::{Diagnostics, OffPolicyAgent};
use candle_core::{Device, Result, bail};
use rand::Rng;
use rlgen_core::{Algorithm, env::Env, replay_buffer::ReplayBuffer, rng::with_rng};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffPolicyParams {
    pub num_epochs: usize,
    pub num_steps_per_epoch: usize,
    pub num_steps_per_eval: usize,
    pub batch_size: usize,
    pub max_path_length: usize,
    pub min_steps_before_training: usize,
    pub num_updates_per_env_step: usize,
    pub replay_buffer_size: usize,
}

impl Default for OffPolicyParams {
    fn default() -> Self {
        Self {
            num_epochs: 100,
            num_steps_per_epoch: 1000,
            num_steps_per_eval: 1000,
            batch_size: 128,
            max_path_length: 1000,
            min_steps_before_training: 0,
            num_updates_per_env_step: 1,
            replay_buffer_size: 1_000_000,
        }
    }
}

/// Summary statistics over the returns of a set of paths.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReturnStats {
    pub num_paths: usize,
    pub mean: f32,
    pub std: f32,
    pub max: f32,
    pub min: f32,
}

impl ReturnStats {
    pub fn from_returns(returns: &[f32]) -> Self {
        if returns.is_empty() {
            return Self::default();
        }
        let n = returns.len() as f32;
        let mean = returns.iter().sum::<f32>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f32>() / n;
        Self {
            num_paths: returns.len(),
            mean,
            std: variance.sqrt(),
            max: returns.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            min: returns.iter().copied().fold(f32::INFINITY, f32::min),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EpochStats {
    pub epoch: usize,
    pub total_env_steps: usize,
    pub total_train_steps: usize,
    pub exploration: ReturnStats,
    pub evaluation: ReturnStats,
    /// Diagnostics of the last training step of the epoch, empty before training starts.
    pub train_diagnostics: Diagnostics,
}

impl EpochStats {
    /// Flattens the statistics into named scalars, in a stable order.
    pub fn tabular(&self) -> Vec<(String, f32)> {
        let mut row = vec![
            ("Epoch".to_string(), self.epoch as f32),
            ("Total Env Steps".to_string(), self.total_env_steps as f32),
            ("Total Train Steps".to_string(), self.total_train_steps as f32),
        ];
        for (prefix, stats) in [("Exploration", &self.exploration), ("Test", &self.evaluation)] {
            row.push((format!("{prefix} Num Paths"), stats.num_paths as f32));
            row.push((format!("{prefix} Returns Mean"), stats.mean));
            row.push((format!("{prefix} Returns Std"), stats.std));
            row.push((format!("{prefix} Returns Max"), stats.max));
            row.push((format!("{prefix} Returns Min"), stats.min));
        }
        row.push(("AverageReturn".to_string(), self.evaluation.mean));
        row.extend(
            self.train_diagnostics
                .iter()
                .map(|(name, value)| (name.to_string(), *value)),
        );
        row
    }
}

pub trait OffPolicyAlgorithmHooks {
    fn init_hook(&mut self) -> Result<bool> {
        Ok(false)
    }

    /// Called after the evaluation at the end of every epoch. Returning true stops training.
    fn post_epoch_hook(&mut self, stats: &EpochStats) -> Result<bool>;

    fn shutdown_hook(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DefaultOffPolicyHooks;

impl OffPolicyAlgorithmHooks for DefaultOffPolicyHooks {
    fn post_epoch_hook(&mut self, stats: &EpochStats) -> Result<bool> {
        info!(
            "epoch: {:<4} env steps: {:<7} exploration return: {:<8.2} test return: {:.2}",
            stats.epoch, stats.total_env_steps, stats.exploration.mean, stats.evaluation.mean
        );
        Ok(false)
    }
}

fn next_seed() -> u64 {
    with_rng(|rng| rng.random())
}

/// Runs `num_steps` steps of `agent` in `env`, cutting paths at `max_path_length`. Returns the
/// returns of the finished paths, or of the single unfinished path when none finished.
pub fn evaluate<E: Env, A: OffPolicyAgent>(
    env: &mut E,
    agent: &A,
    num_steps: usize,
    max_path_length: usize,
) -> Result<Vec<f32>> {
    let mut returns = vec![];
    let mut obs = env.reset(next_seed())?;
    let mut path_return = 0.;
    let mut path_length = 0;
    for _ in 0..num_steps {
        let action = agent.get_action(&obs, true)?;
        let snapshot = env.step(&action)?;
        path_return += snapshot.reward;
        path_length += 1;
        if snapshot.terminated || snapshot.truncated || path_length >= max_path_length {
            returns.push(path_return);
            path_return = 0.;
            path_length = 0;
            obs = env.reset(next_seed())?;
        } else {
            obs = snapshot.state;
        }
    }
    if returns.is_empty() && path_length > 0 {
        returns.push(path_return);
    }
    Ok(returns)
}

/// Epoch based off policy training: explore with the stochastic policy, fill the replay buffer,
/// update from uniformly sampled batches, and evaluate the deterministic policy on a separate
/// environment at the end of every epoch.
pub struct OffPolicyAlgorithm<E: Env, A: OffPolicyAgent, H: OffPolicyAlgorithmHooks> {
    pub env: E,
    pub eval_env: E,
    pub agent: A,
    pub replay_buffer: ReplayBuffer,
    pub hooks: H,
    pub params: OffPolicyParams,
    pub device: Device,
}

impl<E: Env, A: OffPolicyAgent, H: OffPolicyAlgorithmHooks> OffPolicyAlgorithm<E, A, H> {
    pub fn new(
        env: E,
        eval_env: E,
        agent: A,
        hooks: H,
        params: OffPolicyParams,
        device: Device,
    ) -> Result<Self> {
        let description = env.env_description();
        if params.batch_size == 0 || params.max_path_length == 0 {
            bail!("batch size and max path length must be positive");
        }
        let replay_buffer = ReplayBuffer::new(
            params.replay_buffer_size,
            description.observation_size(),
            description.action_size(),
        )?;
        Ok(Self {
            env,
            eval_env,
            agent,
            replay_buffer,
            hooks,
            params,
            device,
        })
    }

    fn can_train(&self) -> bool {
        self.replay_buffer.len() >= self.params.batch_size.max(self.params.min_steps_before_training)
    }
}

impl<E: Env, A: OffPolicyAgent, H: OffPolicyAlgorithmHooks> Algorithm
    for OffPolicyAlgorithm<E, A, H>
{
    fn train(&mut self) -> Result<()> {
        if self.hooks.init_hook()? {
            return Ok(());
        }
        let mut obs = self.env.reset(next_seed())?;
        let mut path_return = 0f32;
        let mut path_length = 0usize;
        let mut total_env_steps = 0usize;
        let mut total_train_steps = 0usize;
        for epoch in 0..self.params.num_epochs {
            let mut exploration_returns = vec![];
            let mut train_diagnostics = vec![];
            for _ in 0..self.params.num_steps_per_epoch {
                let action = self.agent.get_action(&obs, false)?;
                let snapshot = self.env.step(&action)?;
                total_env_steps += 1;
                path_return += snapshot.reward;
                path_length += 1;
                self.replay_buffer.add_sample(
                    &obs,
                    &action,
                    snapshot.reward,
                    snapshot.terminated,
                    &snapshot.state,
                )?;
                if snapshot.terminated
                    || snapshot.truncated
                    || path_length >= self.params.max_path_length
                {
                    self.replay_buffer.terminate_episode();
                    exploration_returns.push(path_return);
                    debug!(path_return, path_length, "path finished");
                    path_return = 0.;
                    path_length = 0;
                    obs = self.env.reset(next_seed())?;
                } else {
                    obs = snapshot.state;
                }
                if self.can_train() {
                    for _ in 0..self.params.num_updates_per_env_step {
                        let batch = self
                            .replay_buffer
                            .random_batch(self.params.batch_size, &self.device)?;
                        train_diagnostics = self.agent.learn(&batch)?;
                        total_train_steps += 1;
                    }
                }
            }
            let eval_returns = evaluate(
                &mut self.eval_env,
                &self.agent,
                self.params.num_steps_per_eval,
                self.params.max_path_length,
            )?;
            let stats = EpochStats {
                epoch,
                total_env_steps,
                total_train_steps,
                exploration: ReturnStats::from_returns(&exploration_returns),
                evaluation: ReturnStats::from_returns(&eval_returns),
                train_diagnostics,
            };
            if self.hooks.post_epoch_hook(&stats)? {
                break;
            }
        }
        self.hooks.shutdown_hook()
    }
}
