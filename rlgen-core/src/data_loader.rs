use crate::rng::with_rng;
use candle_core::{Result, Tensor, bail};
use rand::Rng;
use rand::seq::index::sample;

/// Splits frames and actions at row `index` into (train, validation) partitions.
pub fn split_at(
    observations: &Tensor,
    actions: &Tensor,
    index: usize,
) -> Result<((Tensor, Tensor), (Tensor, Tensor))> {
    let rows = observations.dim(0)?;
    if actions.dim(0)? != rows {
        bail!(
            "observations have {rows} rows but actions have {}",
            actions.dim(0)?
        );
    }
    if index == 0 || index >= rows {
        bail!("split index {index} leaves an empty partition of {rows} rows");
    }
    let train = (observations.narrow(0, 0, index)?, actions.narrow(0, 0, index)?);
    let val = (
        observations.narrow(0, index, rows - index)?,
        actions.narrow(0, index, rows - index)?,
    );
    Ok((train, val))
}

fn select_rows(
    observations: &Tensor,
    actions: &Tensor,
    rows: Vec<u32>,
) -> Result<(Tensor, Tensor)> {
    let len = rows.len();
    let idx = Tensor::from_vec(rows, len, observations.device())?;
    let obs = observations.index_select(&idx, 0)?;
    let idx = idx.to_device(actions.device())?;
    let acts = actions.index_select(&idx, 0)?;
    Ok((obs, acts))
}

/// Walks `batch_size` randomly chosen episodes in lock step. Frames of an episode are stored
/// contiguously, `episode_length` rows per episode. A fresh set of episodes is drawn every time
/// the walk wraps around.
#[derive(Debug)]
pub struct BasicDataLoader {
    observations: Tensor,
    actions: Tensor,
    episode_length: usize,
    batch_size: usize,
    num_episodes: usize,
    episodes: Vec<usize>,
    timestep: usize,
}

impl BasicDataLoader {
    pub fn new(
        observations: Tensor,
        actions: Tensor,
        episode_length: usize,
        batch_size: usize,
    ) -> Result<Self> {
        let rows = observations.dim(0)?;
        if actions.dim(0)? != rows {
            bail!(
                "observations have {rows} rows but actions have {}",
                actions.dim(0)?
            );
        }
        if episode_length == 0 || batch_size == 0 {
            bail!("episode length and batch size must be positive");
        }
        let num_episodes = rows / episode_length;
        if num_episodes == 0 {
            bail!("{rows} rows do not hold a single episode of length {episode_length}");
        }
        Ok(Self {
            observations,
            actions,
            episode_length,
            batch_size,
            num_episodes,
            episodes: vec![],
            timestep: 0,
        })
    }

    pub fn num_episodes(&self) -> usize {
        self.num_episodes
    }

    pub fn timestep(&self) -> usize {
        self.timestep
    }

    /// Episodes currently being walked.
    pub fn episodes(&self) -> &[usize] {
        &self.episodes
    }

    fn draw_episodes(&mut self) {
        let (num_episodes, batch_size) = (self.num_episodes, self.batch_size);
        self.episodes = with_rng(|rng| {
            if batch_size <= num_episodes {
                sample(rng, num_episodes, batch_size).into_vec()
            } else {
                (0..batch_size)
                    .map(|_| rng.random_range(0..num_episodes))
                    .collect()
            }
        });
    }

    /// Returns frames `[B, C, H, W]` and actions `[B, A]` for the current timestep of every
    /// episode in the batch, then advances the timestep.
    pub fn get_next_batch(&mut self) -> Result<(Tensor, Tensor)> {
        if self.timestep == 0 {
            self.draw_episodes();
        }
        let rows = self
            .episodes
            .iter()
            .map(|ep| (ep * self.episode_length + self.timestep) as u32)
            .collect();
        let batch = select_rows(&self.observations, &self.actions, rows)?;
        self.timestep = (self.timestep + 1) % self.episode_length;
        Ok(batch)
    }
}

/// Samples independent rows uniformly at random.
#[derive(Debug)]
pub struct RandomDataLoader {
    observations: Tensor,
    actions: Tensor,
    batch_size: usize,
    rows: usize,
}

impl RandomDataLoader {
    pub fn new(observations: Tensor, actions: Tensor, batch_size: usize) -> Result<Self> {
        let rows = observations.dim(0)?;
        if actions.dim(0)? != rows {
            bail!(
                "observations have {rows} rows but actions have {}",
                actions.dim(0)?
            );
        }
        if rows == 0 {
            bail!("can not sample from an empty dataset");
        }
        Ok(Self {
            observations,
            actions,
            batch_size,
            rows,
        })
    }

    pub fn get_next_batch(&mut self) -> Result<(Tensor, Tensor)> {
        let rows = with_rng(|rng| {
            (0..self.batch_size)
                .map(|_| rng.random_range(0..self.rows) as u32)
                .collect()
        });
        select_rows(&self.observations, &self.actions, rows)
    }
}
