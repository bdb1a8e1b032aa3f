pub mod off_policy_algorithm;
pub mod sac;
pub mod tensors;

use candle_core::Result;
use rlgen_core::replay_buffer::TransitionBatch;

/// Named scalar statistics of a training step.
pub type Diagnostics = Vec<(&'static str, f32)>;

pub trait OffPolicyAgent {
    fn get_action(&self, observation: &[f32], deterministic: bool) -> Result<Vec<f32>>;

    /// Performs one gradient update on a batch of transitions.
    fn learn(&mut self, batch: &TransitionBatch) -> Result<Diagnostics>;
}
