pub mod data_loader;
pub mod env;
pub mod optim;
pub mod replay_buffer;
pub mod rng;

use candle_core::Result;

pub trait Algorithm {
    fn train(&mut self) -> Result<()>;
}
