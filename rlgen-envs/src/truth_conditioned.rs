use candle_core::Result;
use rlgen_core::env::{Env, EnvironmentDescription, MetaEnv, SnapShot, Space};

/// Appends the true meta variables of the wrapped environment to every observation.
#[derive(Debug, Clone)]
pub struct TruthConditioned<E: MetaEnv> {
    env: E,
}

impl<E: MetaEnv> TruthConditioned<E> {
    pub fn new(env: E) -> Self {
        Self { env }
    }

    pub fn inner(&self) -> &E {
        &self.env
    }

    fn condition(&self, mut obs: Vec<f32>) -> Vec<f32> {
        obs.extend(self.env.meta_variables());
        obs
    }
}

impl<E: MetaEnv> Env for TruthConditioned<E> {
    fn reset(&mut self, seed: u64) -> Result<Vec<f32>> {
        let obs = self.env.reset(seed)?;
        Ok(self.condition(obs))
    }

    fn step(&mut self, action: &[f32]) -> Result<SnapShot> {
        let snapshot = self.env.step(action)?;
        Ok(SnapShot {
            state: self.condition(snapshot.state),
            ..snapshot
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        let description = self.env.env_description();
        let size = description.observation_size() + self.env.meta_variable_size();
        EnvironmentDescription::new(
            Space::continuous_from_dims(vec![size]),
            description.action_space,
        )
    }
}

impl<E: MetaEnv> MetaEnv for TruthConditioned<E> {
    fn meta_variables(&self) -> Vec<f32> {
        self.env.meta_variables()
    }
}
