use crate::{
    config::{ConvGruSpec, ReconstructionLoss},
    device::select_device,
    logger::{ExperimentLogger, setup_logger},
    vis::save_tensor_as_img,
};
use anyhow::{Context, Result, bail};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use rlgen_core::{
    data_loader::{BasicDataLoader, split_at},
    optim::OptimizerWithMaxGrad,
    rng::set_seed,
};
use rlgen_models::{
    likelihood::diag_gaussian_log_prob,
    video_predictor::{ConvGruPredictor, ConvGruPredictorConfig},
};
use std::path::Path;
use tracing::info;

/// Loads `next_observations` and `actions` from a safetensors file.
pub fn load_dataset(path: &Path, device: &Device) -> Result<(Tensor, Tensor)> {
    let mut tensors = candle_core::safetensors::load(path, device)
        .with_context(|| format!("loading dataset {}", path.display()))?;
    let observations = tensors
        .remove("next_observations")
        .context("dataset has no next_observations")?
        .to_dtype(DType::F32)?;
    let actions = tensors
        .remove("actions")
        .context("dataset has no actions")?
        .to_dtype(DType::F32)?;
    Ok((observations, actions))
}

fn format_losses(losses: &[f32]) -> String {
    losses
        .iter()
        .map(|l| format!("{l:.4}"))
        .collect::<Vec<_>>()
        .join("\t")
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainSummary {
    pub iterations: usize,
    pub optimizer_steps: usize,
    pub last_val_mse: Vec<f32>,
}

/// Trains the conv-GRU predictor with truncated backpropagation through time: the loss of
/// `freq_bptt` consecutive steps is accumulated, backpropagated, and the recurrent state is
/// detached from the graph before the next window.
pub struct ConvGruTrainer {
    spec: ConvGruSpec,
    model: ConvGruPredictor,
    varmap: VarMap,
    optimizer: OptimizerWithMaxGrad,
    train_loader: BasicDataLoader,
    val_loader: BasicDataLoader,
    logger: ExperimentLogger,
}

impl ConvGruTrainer {
    pub fn new(
        spec: ConvGruSpec,
        observations: Tensor,
        actions: Tensor,
        logger: ExperimentLogger,
        device: &Device,
    ) -> Result<Self> {
        let (_, channels, height, width) = observations.dims4()?;
        if height != width {
            bail!("frames must be square, got {height}x{width}");
        }
        let action_dim = actions.dim(1)?;
        let ((train_obs, train_acts), (val_obs, val_acts)) =
            split_at(&observations, &actions, spec.train_split)?;
        let train_loader =
            BasicDataLoader::new(train_obs, train_acts, spec.episode_length, spec.batch_size)?;
        let val_loader =
            BasicDataLoader::new(val_obs, val_acts, spec.episode_length, spec.batch_size)?;

        let config = ConvGruPredictorConfig {
            image_channels: channels,
            image_size: height,
            action_dim,
            conv_channels: spec.model.conv_channels,
            gru_channels: spec.model.gru_channels,
            act_channels: spec.model.act_channels,
            gru_kernel_size: spec.model.gru_kernel_size,
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = ConvGruPredictor::new(config, vb)?;
        let optimizer = OptimizerWithMaxGrad::adam(varmap.clone(), spec.model_lr, spec.model_wd)?
            .with_max_grad_norm(spec.max_grad_norm);
        info!(
            "training on {} episodes, validating on {}",
            train_loader.num_episodes(),
            val_loader.num_episodes()
        );
        Ok(Self {
            spec,
            model,
            varmap,
            optimizer,
            train_loader,
            val_loader,
            logger,
        })
    }

    pub fn logger(&self) -> &ExperimentLogger {
        &self.logger
    }

    fn step_loss(&self, obs: &Tensor, recon: &Tensor, log_cov: &Tensor) -> Result<Tensor> {
        let batch_size = self.spec.batch_size as f64;
        let loss = match self.spec.loss {
            ReconstructionLoss::Mse => (obs - recon)?.sqr()?.sum_all()?,
            ReconstructionLoss::DiagGaussian => diag_gaussian_log_prob(recon, log_cov, obs)?.neg()?,
        };
        Ok((loss / batch_size)?)
    }

    /// Runs one validation episode without gradients, batch norm in inference mode. Returns the
    /// per step reconstruction MSE.
    fn validate(&mut self) -> Result<Vec<f32>> {
        let mut hidden = self.model.initial_hidden(self.spec.batch_size)?;
        let mut losses = Vec::with_capacity(self.spec.episode_length);
        for _ in 0..self.spec.episode_length {
            let (obs, act) = self.val_loader.get_next_batch()?;
            let step = self.model.step(&hidden, &obs, &act, false)?;
            hidden = step.next_hidden.detach();
            losses.push((&obs - &step.recon)?.sqr()?.mean_all()?.to_scalar::<f32>()?);
        }
        Ok(losses)
    }

    fn visualize(&self, iter: usize, obs: &Tensor, recon: &Tensor) -> Result<()> {
        let dir = &self.spec.vis_dir;
        save_tensor_as_img(&recon.get(0)?, &dir.join(format!("rnn_recon_{iter}.png")))?;
        save_tensor_as_img(&obs.get(0)?, &dir.join(format!("rnn_obs_{iter}.png")))
    }

    pub fn train(&mut self) -> Result<TrainSummary> {
        let episode_length = self.spec.episode_length;
        let freq_bptt = self.spec.freq_bptt;
        let vis_period = self.spec.vis_freq * episode_length;
        let mut hidden = self.model.initial_hidden(self.spec.batch_size)?;
        let mut loss: Option<Tensor> = None;
        let mut optimizer_steps = 0;
        let mut episode_losses: Vec<f32> = vec![];
        let mut train_losses: Vec<f32> = vec![];
        let mut last_val_mse = vec![];

        for iter in 0..self.spec.max_iters {
            if iter % freq_bptt == 0 {
                if iter > 0 {
                    if let Some(loss) = loss.take() {
                        self.optimizer.backward_step(&loss)?;
                        optimizer_steps += 1;
                    }
                    hidden = hidden.detach();
                }
                loss = None;
            }
            if iter % episode_length == 0 {
                hidden = self.model.initial_hidden(self.spec.batch_size)?;
                train_losses = std::mem::take(&mut episode_losses);
            }

            let (obs, act) = self.train_loader.get_next_batch()?;
            let step = self.model.step(&hidden, &obs, &act, true)?;
            hidden = step.next_hidden;

            episode_losses.push((&obs - &step.recon)?.sqr()?.mean_all()?.to_scalar::<f32>()?);
            // the first frame of an episode is predicted from an empty state
            if iter % episode_length != 0 {
                let step_loss = self.step_loss(&obs, &step.recon, &step.log_cov)?;
                loss = Some(match loss {
                    Some(loss) => (loss + step_loss)?,
                    None => step_loss,
                });
            }

            if iter % vis_period < 2 * episode_length {
                self.visualize(iter, &obs, &step.recon)?;
            }

            if iter % self.spec.freq_val == 0 {
                info!("validating iter {iter}");
                last_val_mse = self.validate()?;
                info!("Val MSE:\t{}", format_losses(&last_val_mse));
                info!("Train MSE:\t{}", format_losses(&train_losses));
                self.logger.record_tabular("Iteration", iter as f32);
                self.logger
                    .record_tabular("Optimizer Steps", optimizer_steps as f32);
                self.logger
                    .record_tabular("Val MSE Mean", mean(&last_val_mse));
                self.logger
                    .record_tabular("Train MSE Mean", mean(&train_losses));
                self.logger.dump_tabular()?;
            }
        }

        if let Some(path) = &self.spec.checkpoint_path {
            self.varmap
                .save(path)
                .with_context(|| format!("saving checkpoint {}", path.display()))?;
            info!("saved model to {}", path.display());
        }
        Ok(TrainSummary {
            iterations: self.spec.max_iters,
            optimizer_steps,
            last_val_mse,
        })
    }
}

/// Full experiment: seeding, logging, data, training.
pub fn run(spec: ConvGruSpec) -> Result<TrainSummary> {
    set_seed(spec.meta.seed as u64);
    let device = select_device(spec.meta.use_gpu)?;
    let logger = setup_logger(
        &spec.meta.log_dir,
        &spec.meta.exp_name,
        spec.meta.exp_id,
        spec.meta.seed,
        &spec,
    )?;
    let (observations, actions) = load_dataset(&spec.replay_dict_path, &device)?;
    let mut trainer = ConvGruTrainer::new(spec, observations, actions, logger, &device)?;
    trainer.train()
}
