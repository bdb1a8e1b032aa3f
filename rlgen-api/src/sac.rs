use crate::{
    config::SacSpec,
    device::select_device,
    logger::{ExperimentLogger, setup_logger},
};
use anyhow::{Context, Result, bail};
use candle_core::Device;
use rlgen_agents::{
    off_policy_algorithm::{EpochStats, OffPolicyAlgorithm, OffPolicyAlgorithmHooks},
    sac::SoftActorCritic,
};
use rlgen_core::{
    Algorithm,
    env::{Env, MetaEnv},
    rng::set_seed,
};
use rlgen_envs::{
    make_meta_env, normalized::NormalizedBoxEnv, truth_conditioned::TruthConditioned,
};
use tracing::info;

/// Builds the environment named in `spec`. When meta variable dims are configured, observations
/// carry the environment's true meta variables and their count must match the configuration.
pub fn build_env(spec: &SacSpec) -> Result<Box<dyn Env>> {
    let env = NormalizedBoxEnv::new(make_meta_env(&spec.env_specs.env_name)?);
    let configured = spec.total_meta_variable_dim();
    if configured == 0 {
        return Ok(Box::new(env));
    }
    let available = env.meta_variable_size();
    if configured != available {
        bail!(
            "true_meta_variable_dims add up to {configured} but {} exposes {available} meta variables",
            spec.env_specs.env_name
        );
    }
    Ok(Box::new(TruthConditioned::new(env)))
}

/// Forwards every epoch after the first training step to the tabular log.
pub struct LoggerHooks {
    logger: ExperimentLogger,
}

impl LoggerHooks {
    pub fn new(logger: ExperimentLogger) -> Self {
        Self { logger }
    }

    pub fn logger(&self) -> &ExperimentLogger {
        &self.logger
    }
}

impl OffPolicyAlgorithmHooks for LoggerHooks {
    fn post_epoch_hook(&mut self, stats: &EpochStats) -> candle_core::Result<bool> {
        // the csv columns are fixed by the first row, which has to carry the training losses
        if stats.train_diagnostics.is_empty() {
            info!(epoch = stats.epoch, "training has not started, skipping the tabular log");
            return Ok(false);
        }
        for (key, value) in stats.tabular() {
            self.logger.record_tabular(key, value);
        }
        self.logger
            .dump_tabular()
            .map_err(|err| candle_core::Error::Msg(format!("{err:#}")))?;
        Ok(false)
    }

    fn shutdown_hook(&mut self) -> candle_core::Result<()> {
        info!("training finished, logs in {}", self.logger.log_dir().display());
        Ok(())
    }
}

pub type SacExperiment = OffPolicyAlgorithm<Box<dyn Env>, SoftActorCritic, LoggerHooks>;

pub fn build_experiment(spec: &SacSpec, logger: ExperimentLogger, device: Device) -> Result<SacExperiment> {
    let env = build_env(spec)?;
    let eval_env = build_env(spec)?;
    let description = env.env_description();
    let obs_dim = description.observation_size();
    let action_dim = description.action_size();
    info!(obs_dim, action_dim, "built {}", spec.env_specs.env_name);
    let hidden = [spec.net_size, spec.net_size];
    let agent = SoftActorCritic::new(
        obs_dim,
        action_dim,
        &hidden,
        spec.algo_params.sac_params(),
        &device,
    )?;
    Ok(OffPolicyAlgorithm::new(
        env,
        eval_env,
        agent,
        LoggerHooks::new(logger),
        spec.algo_params.off_policy_params(),
        device,
    )?)
}

pub fn run(spec: SacSpec) -> Result<()> {
    set_seed(spec.meta.seed as u64);
    let device = select_device(spec.meta.use_gpu)?;
    let logger = setup_logger(
        &spec.meta.log_dir,
        &spec.meta.exp_name,
        spec.meta.exp_id,
        spec.meta.seed,
        &spec,
    )?;
    let mut experiment = build_experiment(&spec, logger, device)?;
    experiment
        .train()
        .context("soft actor critic training failed")?;
    if let Some(path) = &spec.checkpoint_path {
        experiment
            .agent
            .save(path)
            .with_context(|| format!("saving checkpoint {}", path.display()))?;
        info!("saved networks to {}", path.display());
    }
    Ok(())
}
