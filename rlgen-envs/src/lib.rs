pub mod normalized;
pub mod pusher;
pub mod reacher;
pub mod truth_conditioned;

use candle_core::{Result, bail};
use rlgen_core::env::MetaEnv;
use tracing::debug;

/// Environments that can be named from an experiment file.
pub fn make_meta_env(name: &str) -> Result<Box<dyn MetaEnv>> {
    debug!(name, "making environment");
    match name {
        "reacher" => Ok(Box::new(reacher::Reacher::default())),
        other => bail!("unknown environment {other}"),
    }
}
