use crate::rng::with_rng;
use candle_core::{Device, Result, Tensor, bail};
use rand::Rng;

/// A batch of transitions, every tensor has the batch as its first dimension.
#[derive(Debug)]
pub struct TransitionBatch {
    pub observations: Tensor,
    pub actions: Tensor,
    pub rewards: Tensor,
    pub terminals: Tensor,
    pub next_observations: Tensor,
}

/// Fixed capacity ring buffer of transitions. Once full, the oldest transition is overwritten.
#[derive(Debug)]
pub struct ReplayBuffer {
    obs_dim: usize,
    action_dim: usize,
    capacity: usize,
    observations: Vec<f32>,
    actions: Vec<f32>,
    rewards: Vec<f32>,
    terminals: Vec<f32>,
    next_observations: Vec<f32>,
    top: usize,
    size: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, obs_dim: usize, action_dim: usize) -> Result<Self> {
        if capacity == 0 {
            bail!("replay buffer capacity must be positive");
        }
        Ok(Self {
            obs_dim,
            action_dim,
            capacity,
            observations: vec![0.; capacity * obs_dim],
            actions: vec![0.; capacity * action_dim],
            rewards: vec![0.; capacity],
            terminals: vec![0.; capacity],
            next_observations: vec![0.; capacity * obs_dim],
            top: 0,
            size: 0,
        })
    }

    pub fn add_sample(
        &mut self,
        observation: &[f32],
        action: &[f32],
        reward: f32,
        terminal: bool,
        next_observation: &[f32],
    ) -> Result<()> {
        if observation.len() != self.obs_dim || next_observation.len() != self.obs_dim {
            bail!(
                "observation has {} elements, replay buffer expects {}",
                observation.len(),
                self.obs_dim
            );
        }
        if action.len() != self.action_dim {
            bail!(
                "action has {} elements, replay buffer expects {}",
                action.len(),
                self.action_dim
            );
        }
        let top = self.top;
        self.observations[top * self.obs_dim..(top + 1) * self.obs_dim].copy_from_slice(observation);
        self.next_observations[top * self.obs_dim..(top + 1) * self.obs_dim]
            .copy_from_slice(next_observation);
        self.actions[top * self.action_dim..(top + 1) * self.action_dim].copy_from_slice(action);
        self.rewards[top] = reward;
        self.terminals[top] = if terminal { 1. } else { 0. };
        self.top = (self.top + 1) % self.capacity;
        self.size = (self.size + 1).min(self.capacity);
        Ok(())
    }

    /// Paths are stored flat, there is nothing to close.
    pub fn terminate_episode(&mut self) {}

    pub fn random_batch(&self, batch_size: usize, device: &Device) -> Result<TransitionBatch> {
        if self.is_empty() {
            bail!("can not sample from an empty replay buffer")
        }
        let indices: Vec<usize> =
            with_rng(|rng| (0..batch_size).map(|_| rng.random_range(0..self.size)).collect());
        let gather = |data: &[f32], dim: usize| -> Vec<f32> {
            indices
                .iter()
                .flat_map(|idx| data[idx * dim..(idx + 1) * dim].iter().copied())
                .collect()
        };
        Ok(TransitionBatch {
            observations: Tensor::from_vec(
                gather(&self.observations, self.obs_dim),
                (batch_size, self.obs_dim),
                device,
            )?,
            actions: Tensor::from_vec(
                gather(&self.actions, self.action_dim),
                (batch_size, self.action_dim),
                device,
            )?,
            rewards: Tensor::from_vec(gather(&self.rewards, 1), (batch_size, 1), device)?,
            terminals: Tensor::from_vec(gather(&self.terminals, 1), (batch_size, 1), device)?,
            next_observations: Tensor::from_vec(
                gather(&self.next_observations, self.obs_dim),
                (batch_size, self.obs_dim),
                device,
            )?,
        })
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the observation and reward stored at `index` (in insertion slots, not age).
    pub fn sample_point(&self, index: usize) -> (&[f32], f32) {
        (
            &self.observations[index * self.obs_dim..(index + 1) * self.obs_dim],
            self.rewards[index],
        )
    }
}
