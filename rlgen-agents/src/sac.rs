use crate::{
    Diagnostics, OffPolicyAgent,
    tensors::{LogPi, PolicyLoss, QTarget, QfLoss, VTarget, VfLoss},
};
use candle_core::{DType, Device, Error, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use rlgen_core::{optim::OptimizerWithMaxGrad, replay_buffer::TransitionBatch};
use rlgen_models::{mlp::FlattenMlp, tanh_gaussian::TanhGaussianPolicy};
use std::{collections::HashMap, ops::Deref, path::Path};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SacParams {
    pub discount: f64,
    pub reward_scale: f64,
    pub soft_target_tau: f64,
    pub policy_lr: f64,
    pub qf_lr: f64,
    pub vf_lr: f64,
    pub policy_mean_reg_weight: f64,
    pub policy_std_reg_weight: f64,
    /// Weight of the squared pre-tanh activations in the policy loss.
    pub policy_pre_activation_weight: f64,
    /// Trains the policy through the reparameterized sample instead of the likelihood ratio.
    pub reparameterize: bool,
}

impl Default for SacParams {
    fn default() -> Self {
        Self {
            discount: 0.99,
            reward_scale: 1.,
            soft_target_tau: 1e-2,
            policy_lr: 1e-3,
            qf_lr: 1e-3,
            vf_lr: 1e-3,
            policy_mean_reg_weight: 1e-3,
            policy_std_reg_weight: 1e-3,
            policy_pre_activation_weight: 0.,
            reparameterize: true,
        }
    }
}

/// Copies `tau * source + (1 - tau) * target` into every variable of `target`. Both maps must have
/// been built by the same constructor so that variable names line up, and must be distinct maps.
pub fn soft_update(source: &VarMap, target: &VarMap, tau: f64) -> Result<()> {
    if std::ptr::eq(source.data(), target.data()) {
        candle_core::bail!("soft update source and target are the same varmap");
    }
    let source = source
        .data()
        .lock()
        .map_err(|_| Error::Msg("source varmap lock poisoned".into()))?;
    let target = target
        .data()
        .lock()
        .map_err(|_| Error::Msg("target varmap lock poisoned".into()))?;
    for (name, target_var) in target.iter() {
        let Some(source_var) = source.get(name) else {
            candle_core::bail!("variable {name} is missing from the source network");
        };
        let mixed = ((source_var.as_tensor() * tau)? + (target_var.as_tensor() * (1. - tau))?)?;
        target_var.set(&mixed.detach())?;
    }
    Ok(())
}

/// Soft actor critic with a separate state value network and its slowly tracking target.
pub struct SoftActorCritic {
    pub policy: TanhGaussianPolicy,
    pub qf: FlattenMlp,
    pub vf: FlattenMlp,
    pub target_vf: FlattenMlp,
    policy_optimizer: OptimizerWithMaxGrad,
    qf_optimizer: OptimizerWithMaxGrad,
    vf_optimizer: OptimizerWithMaxGrad,
    policy_varmap: VarMap,
    qf_varmap: VarMap,
    vf_varmap: VarMap,
    target_vf_varmap: VarMap,
    params: SacParams,
    device: Device,
}

impl SoftActorCritic {
    pub fn new(
        obs_dim: usize,
        action_dim: usize,
        hidden_sizes: &[usize],
        params: SacParams,
        device: &Device,
    ) -> Result<Self> {
        let policy_varmap = VarMap::new();
        let qf_varmap = VarMap::new();
        let vf_varmap = VarMap::new();
        let target_vf_varmap = VarMap::new();
        let vb = |varmap: &VarMap| VarBuilder::from_varmap(varmap, DType::F32, device);
        let policy = TanhGaussianPolicy::new(obs_dim, action_dim, hidden_sizes, vb(&policy_varmap))?;
        let qf = FlattenMlp::new(obs_dim + action_dim, hidden_sizes, 1, vb(&qf_varmap))?;
        let vf = FlattenMlp::new(obs_dim, hidden_sizes, 1, vb(&vf_varmap))?;
        let target_vf = FlattenMlp::new(obs_dim, hidden_sizes, 1, vb(&target_vf_varmap))?;
        soft_update(&vf_varmap, &target_vf_varmap, 1.)?;
        Ok(Self {
            policy,
            qf,
            vf,
            target_vf,
            policy_optimizer: OptimizerWithMaxGrad::adam(
                policy_varmap.clone(),
                params.policy_lr,
                0.,
            )?,
            qf_optimizer: OptimizerWithMaxGrad::adam(qf_varmap.clone(), params.qf_lr, 0.)?,
            vf_optimizer: OptimizerWithMaxGrad::adam(vf_varmap.clone(), params.vf_lr, 0.)?,
            policy_varmap,
            qf_varmap,
            vf_varmap,
            target_vf_varmap,
            params,
            device: device.clone(),
        })
    }

    pub fn params(&self) -> &SacParams {
        &self.params
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn policy_varmap(&self) -> &VarMap {
        &self.policy_varmap
    }

    pub fn qf_varmap(&self) -> &VarMap {
        &self.qf_varmap
    }

    pub fn vf_varmap(&self) -> &VarMap {
        &self.vf_varmap
    }

    pub fn target_vf_varmap(&self) -> &VarMap {
        &self.target_vf_varmap
    }

    /// Writes every network into one safetensors file, variables prefixed with `policy.`, `qf.`,
    /// `vf.` and `target_vf.`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut tensors = HashMap::new();
        for (prefix, varmap) in [
            ("policy", &self.policy_varmap),
            ("qf", &self.qf_varmap),
            ("vf", &self.vf_varmap),
            ("target_vf", &self.target_vf_varmap),
        ] {
            let data = varmap
                .data()
                .lock()
                .map_err(|_| Error::Msg(format!("{prefix} varmap lock poisoned")))?;
            for (name, var) in data.iter() {
                tensors.insert(format!("{prefix}.{name}"), var.as_tensor().detach());
            }
        }
        candle_core::safetensors::save(&tensors, path)
    }

    fn q_target(&self, batch: &TransitionBatch) -> Result<QTarget> {
        let target_v = self.target_vf.forward(&[&batch.next_observations])?;
        let not_done = batch.terminals.affine(-1., 1.)?;
        let bootstrap = (not_done.mul(&target_v)? * self.params.discount)?;
        let q_target = ((&batch.rewards * self.params.reward_scale)? + bootstrap)?;
        Ok(QTarget(q_target.detach()))
    }

    fn policy_loss(
        &self,
        log_pi: &LogPi,
        q_new_actions: &Tensor,
        v_pred: &Tensor,
    ) -> Result<Tensor> {
        if self.params.reparameterize {
            (log_pi.deref() - q_new_actions)?.mean_all()
        } else {
            let log_policy_target = (q_new_actions - v_pred)?;
            let advantage = (log_pi.deref() - log_policy_target)?.detach();
            log_pi.mul(&advantage)?.mean_all()
        }
    }
}

impl OffPolicyAgent for SoftActorCritic {
    fn get_action(&self, observation: &[f32], deterministic: bool) -> Result<Vec<f32>> {
        self.policy
            .get_action(observation, deterministic, &self.device)
    }

    fn learn(&mut self, batch: &TransitionBatch) -> Result<Diagnostics> {
        let obs = &batch.observations;
        let q_pred = self.qf.forward(&[obs, &batch.actions])?;
        let v_pred = self.vf.forward(&[obs])?;
        let policy_out = self.policy.forward(obs, false)?;
        let Some(log_pi) = policy_out.log_prob else {
            candle_core::bail!("stochastic policy forward did not produce a log prob");
        };
        let log_pi = LogPi(log_pi);

        let q_target = self.q_target(batch)?;
        let qf_loss = QfLoss((&q_pred - q_target.deref())?.sqr()?.mean_all()?);

        let q_new_actions = self.qf.forward(&[obs, &policy_out.action])?;
        let v_target = VTarget((&q_new_actions - log_pi.deref())?.detach());
        let vf_loss = VfLoss((&v_pred - v_target.deref())?.sqr()?.mean_all()?);

        let mean_reg = (policy_out.mean.sqr()?.mean_all()? * self.params.policy_mean_reg_weight)?;
        let std_reg = (policy_out.log_std.sqr()?.mean_all()? * self.params.policy_std_reg_weight)?;
        let Some(pre_tanh_value) = &policy_out.pre_tanh_value else {
            candle_core::bail!("stochastic policy forward did not produce pre-tanh values");
        };
        let pre_activation_reg = (pre_tanh_value.sqr()?.sum_keepdim(1)?.mean_all()?
            * self.params.policy_pre_activation_weight)?;
        let policy_loss = PolicyLoss(
            (((self.policy_loss(&log_pi, &q_new_actions, &v_pred)? + mean_reg)? + std_reg)?
                + &pre_activation_reg)?,
        );

        // take every gradient before any parameter moves
        let qf_grads = self.qf_optimizer.grads(&qf_loss)?;
        let vf_grads = self.vf_optimizer.grads(&vf_loss)?;
        let policy_grads = self.policy_optimizer.grads(&policy_loss)?;
        self.qf_optimizer.step(&qf_grads)?;
        self.vf_optimizer.step(&vf_grads)?;
        self.policy_optimizer.step(&policy_grads)?;
        soft_update(
            &self.vf_varmap,
            &self.target_vf_varmap,
            self.params.soft_target_tau,
        )?;

        Ok(vec![
            ("QF Loss", qf_loss.to_scalar::<f32>()?),
            ("VF Loss", vf_loss.to_scalar::<f32>()?),
            ("Policy Loss", policy_loss.to_scalar::<f32>()?),
            (
                "Policy Pre-tanh Reg",
                pre_activation_reg.to_scalar::<f32>()?,
            ),
            ("Q Predictions", q_pred.mean_all()?.to_scalar::<f32>()?),
            ("V Predictions", v_pred.mean_all()?.to_scalar::<f32>()?),
            ("Log Pis", log_pi.mean_all()?.to_scalar::<f32>()?),
            ("Policy mu", policy_out.mean.mean_all()?.to_scalar::<f32>()?),
            (
                "Policy log std",
                policy_out.log_std.mean_all()?.to_scalar::<f32>()?,
            ),
        ])
    }
}
