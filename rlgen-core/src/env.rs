use candle_core::{Result, bail};

#[derive(Debug, Clone, PartialEq)]
pub enum Space {
    Discrete(usize),
    Continuous {
        min: Option<Vec<f32>>,
        max: Option<Vec<f32>>,
        size: usize,
    },
}

impl Space {
    pub fn continuous_from_dims(dims: Vec<usize>) -> Self {
        Self::Continuous {
            min: None,
            max: None,
            size: dims.iter().product(),
        }
    }

    pub fn bounded(low: Vec<f32>, high: Vec<f32>) -> Result<Self> {
        if low.len() != high.len() {
            bail!(
                "lower bound has {} elements but upper bound has {}",
                low.len(),
                high.len()
            );
        }
        let size = low.len();
        Ok(Self::Continuous {
            min: Some(low),
            max: Some(high),
            size,
        })
    }

    /// The `[-1, 1]` box of `size` dimensions.
    pub fn unit_box(size: usize) -> Self {
        Self::Continuous {
            min: Some(vec![-1.; size]),
            max: Some(vec![1.; size]),
            size,
        }
    }

    pub fn size(&self) -> usize {
        match &self {
            Self::Discrete(size) => *size,
            Self::Continuous { size, .. } => *size,
        }
    }

    /// Lower and upper bounds of a bounded continuous space.
    pub fn bounds(&self) -> Option<(&[f32], &[f32])> {
        match self {
            Self::Continuous {
                min: Some(min),
                max: Some(max),
                ..
            } => Some((min, max)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentDescription {
    pub observation_space: Space,
    pub action_space: Space,
}

impl EnvironmentDescription {
    pub fn new(observation_space: Space, action_space: Space) -> Self {
        Self {
            observation_space,
            action_space,
        }
    }

    pub fn action_size(&self) -> usize {
        self.action_space.size()
    }

    pub fn observation_size(&self) -> usize {
        self.observation_space.size()
    }
}

#[derive(Debug, Clone)]
pub struct SnapShot {
    pub state: Vec<f32>,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
}

pub trait Env {
    fn reset(&mut self, seed: u64) -> Result<Vec<f32>>;
    fn step(&mut self, action: &[f32]) -> Result<SnapShot>;
    fn env_description(&self) -> EnvironmentDescription;
}

/// Environments whose task is parameterized by hidden variables (goal positions, masses, ...)
/// that can be revealed to the agent.
pub trait MetaEnv: Env {
    fn meta_variables(&self) -> Vec<f32>;

    fn meta_variable_size(&self) -> usize {
        self.meta_variables().len()
    }
}

impl<E: Env + ?Sized> Env for Box<E> {
    fn reset(&mut self, seed: u64) -> Result<Vec<f32>> {
        (**self).reset(seed)
    }

    fn step(&mut self, action: &[f32]) -> Result<SnapShot> {
        (**self).step(action)
    }

    fn env_description(&self) -> EnvironmentDescription {
        (**self).env_description()
    }
}

impl<E: MetaEnv + ?Sized> MetaEnv for Box<E> {
    fn meta_variables(&self) -> Vec<f32> {
        (**self).meta_variables()
    }
}
