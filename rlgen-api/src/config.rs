use anyhow::{Context, Result, bail};
use rlgen_agents::{off_policy_algorithm::OffPolicyParams, sac::SacParams};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned, de::Error as _};
use std::path::{Path, PathBuf};

/// Experiment files are hand written, numbers show up as `1000`, `1e6`, `3.0e-4` or `"1e6"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

impl LooseNumber {
    fn as_f64<E: serde::de::Error>(&self) -> std::result::Result<f64, E> {
        match self {
            Self::Int(v) => Ok(*v as f64),
            Self::Float(v) => Ok(*v),
            Self::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("`{s}` is not a number"))),
        }
    }
}

pub fn loose_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    LooseNumber::deserialize(deserializer)?.as_f64()
}

pub fn loose_usize<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<usize, D::Error> {
    let value = LooseNumber::deserialize(deserializer)?.as_f64::<D::Error>()?;
    if value < 0. || value.fract() != 0. || value > usize::MAX as f64 {
        return Err(D::Error::custom(format!(
            "expected a non negative integer, got {value}"
        )));
    }
    Ok(value as usize)
}

pub fn load_spec<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let spec = std::fs::read_to_string(path)
        .with_context(|| format!("reading experiment file {}", path.display()))?;
    serde_yaml::from_str(&spec)
        .with_context(|| format!("parsing experiment file {}", path.display()))
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

/// Keys shared by every experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentMeta {
    pub exp_name: String,
    #[serde(deserialize_with = "loose_usize")]
    pub exp_id: usize,
    #[serde(deserialize_with = "loose_usize")]
    pub seed: usize,
    #[serde(default)]
    pub use_gpu: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionLoss {
    /// Summed squared error of the predicted means.
    #[default]
    Mse,
    /// Negative log likelihood under the predicted diagonal gaussian.
    DiagGaussian,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConvGruModelSpec {
    #[serde(default = "ConvGruModelSpec::default_conv_channels")]
    pub conv_channels: usize,
    #[serde(default = "ConvGruModelSpec::default_gru_channels")]
    pub gru_channels: usize,
    #[serde(default = "ConvGruModelSpec::default_act_channels")]
    pub act_channels: usize,
    #[serde(default = "ConvGruModelSpec::default_gru_kernel_size")]
    pub gru_kernel_size: usize,
}

impl ConvGruModelSpec {
    fn default_conv_channels() -> usize {
        32
    }

    fn default_gru_channels() -> usize {
        128
    }

    fn default_act_channels() -> usize {
        4
    }

    fn default_gru_kernel_size() -> usize {
        3
    }
}

impl Default for ConvGruModelSpec {
    fn default() -> Self {
        Self {
            conv_channels: Self::default_conv_channels(),
            gru_channels: Self::default_gru_channels(),
            act_channels: Self::default_act_channels(),
            gru_kernel_size: Self::default_gru_kernel_size(),
        }
    }
}

fn default_train_split() -> usize {
    40000
}

fn default_vis_dir() -> PathBuf {
    PathBuf::from("junk_vis/conv_gru")
}

fn default_vis_freq() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvGruSpec {
    #[serde(flatten)]
    pub meta: ExperimentMeta,
    /// Safetensors file holding `next_observations` `[N, C, H, W]` and `actions` `[N, A]`.
    pub replay_dict_path: PathBuf,
    /// Rows before this index train, the rest validate.
    #[serde(default = "default_train_split", deserialize_with = "loose_usize")]
    pub train_split: usize,
    #[serde(deserialize_with = "loose_usize")]
    pub batch_size: usize,
    #[serde(deserialize_with = "loose_usize")]
    pub episode_length: usize,
    #[serde(deserialize_with = "loose_usize")]
    pub freq_bptt: usize,
    #[serde(deserialize_with = "loose_usize")]
    pub freq_val: usize,
    #[serde(deserialize_with = "loose_usize")]
    pub max_iters: usize,
    #[serde(deserialize_with = "loose_f64")]
    pub model_lr: f64,
    #[serde(default, deserialize_with = "loose_f64")]
    pub model_wd: f64,
    #[serde(default)]
    pub max_grad_norm: Option<f32>,
    #[serde(default)]
    pub loss: ReconstructionLoss,
    #[serde(default)]
    pub model: ConvGruModelSpec,
    #[serde(default = "default_vis_dir")]
    pub vis_dir: PathBuf,
    /// Frames are written for the first two episodes of every `vis_freq` episodes.
    #[serde(default = "default_vis_freq", deserialize_with = "loose_usize")]
    pub vis_freq: usize,
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,
}

impl ConvGruSpec {
    pub fn from_path(path: &Path) -> Result<Self> {
        let spec: Self = load_spec(path)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("episode_length", self.episode_length),
            ("freq_bptt", self.freq_bptt),
            ("freq_val", self.freq_val),
            ("vis_freq", self.vis_freq),
        ] {
            if value == 0 {
                bail!("{name} must be positive");
            }
        }
        if self.model_lr <= 0. {
            bail!("model_lr must be positive, got {}", self.model_lr);
        }
        Ok(())
    }
}

fn default_env_name() -> String {
    "reacher".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvSpecs {
    #[serde(default = "default_env_name")]
    pub env_name: String,
}

impl Default for EnvSpecs {
    fn default() -> Self {
        Self {
            env_name: default_env_name(),
        }
    }
}

macro_rules! default_fns {
    ($source:expr; $($name:ident: $ty:ty = $field:ident),* $(,)?) => {
        $(
            fn $name() -> $ty {
                $source.$field
            }
        )*
    };
}

default_fns!(OffPolicyParams::default();
    default_num_epochs: usize = num_epochs,
    default_num_steps_per_epoch: usize = num_steps_per_epoch,
    default_num_steps_per_eval: usize = num_steps_per_eval,
    default_batch_size: usize = batch_size,
    default_max_path_length: usize = max_path_length,
    default_min_steps_before_training: usize = min_steps_before_training,
    default_num_updates_per_env_step: usize = num_updates_per_env_step,
    default_replay_buffer_size: usize = replay_buffer_size,
);

default_fns!(SacParams::default();
    default_discount: f64 = discount,
    default_reward_scale: f64 = reward_scale,
    default_soft_target_tau: f64 = soft_target_tau,
    default_policy_lr: f64 = policy_lr,
    default_qf_lr: f64 = qf_lr,
    default_vf_lr: f64 = vf_lr,
    default_policy_mean_reg_weight: f64 = policy_mean_reg_weight,
    default_policy_std_reg_weight: f64 = policy_std_reg_weight,
    default_policy_pre_activation_weight: f64 = policy_pre_activation_weight,
    default_reparameterize: bool = reparameterize,
);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgoParams {
    #[serde(default = "default_num_epochs", deserialize_with = "loose_usize")]
    pub num_epochs: usize,
    #[serde(default = "default_num_steps_per_epoch", deserialize_with = "loose_usize")]
    pub num_steps_per_epoch: usize,
    #[serde(default = "default_num_steps_per_eval", deserialize_with = "loose_usize")]
    pub num_steps_per_eval: usize,
    #[serde(default = "default_batch_size", deserialize_with = "loose_usize")]
    pub batch_size: usize,
    #[serde(default = "default_max_path_length", deserialize_with = "loose_usize")]
    pub max_path_length: usize,
    #[serde(
        default = "default_min_steps_before_training",
        deserialize_with = "loose_usize"
    )]
    pub min_steps_before_training: usize,
    #[serde(
        default = "default_num_updates_per_env_step",
        deserialize_with = "loose_usize"
    )]
    pub num_updates_per_env_step: usize,
    #[serde(default = "default_replay_buffer_size", deserialize_with = "loose_usize")]
    pub replay_buffer_size: usize,
    #[serde(default = "default_discount", deserialize_with = "loose_f64")]
    pub discount: f64,
    #[serde(default = "default_reward_scale", deserialize_with = "loose_f64")]
    pub reward_scale: f64,
    #[serde(default = "default_soft_target_tau", deserialize_with = "loose_f64")]
    pub soft_target_tau: f64,
    #[serde(default = "default_policy_lr", deserialize_with = "loose_f64")]
    pub policy_lr: f64,
    #[serde(default = "default_qf_lr", deserialize_with = "loose_f64")]
    pub qf_lr: f64,
    #[serde(default = "default_vf_lr", deserialize_with = "loose_f64")]
    pub vf_lr: f64,
    #[serde(default = "default_policy_mean_reg_weight", deserialize_with = "loose_f64")]
    pub policy_mean_reg_weight: f64,
    #[serde(default = "default_policy_std_reg_weight", deserialize_with = "loose_f64")]
    pub policy_std_reg_weight: f64,
    #[serde(
        default = "default_policy_pre_activation_weight",
        deserialize_with = "loose_f64"
    )]
    pub policy_pre_activation_weight: f64,
    #[serde(default = "default_reparameterize")]
    pub train_policy_with_reparameterization: bool,
}

impl AlgoParams {
    pub fn off_policy_params(&self) -> OffPolicyParams {
        OffPolicyParams {
            num_epochs: self.num_epochs,
            num_steps_per_epoch: self.num_steps_per_epoch,
            num_steps_per_eval: self.num_steps_per_eval,
            batch_size: self.batch_size,
            max_path_length: self.max_path_length,
            min_steps_before_training: self.min_steps_before_training,
            num_updates_per_env_step: self.num_updates_per_env_step,
            replay_buffer_size: self.replay_buffer_size,
        }
    }

    pub fn sac_params(&self) -> SacParams {
        SacParams {
            discount: self.discount,
            reward_scale: self.reward_scale,
            soft_target_tau: self.soft_target_tau,
            policy_lr: self.policy_lr,
            qf_lr: self.qf_lr,
            vf_lr: self.vf_lr,
            policy_mean_reg_weight: self.policy_mean_reg_weight,
            policy_std_reg_weight: self.policy_std_reg_weight,
            policy_pre_activation_weight: self.policy_pre_activation_weight,
            reparameterize: self.train_policy_with_reparameterization,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SacSpec {
    #[serde(flatten)]
    pub meta: ExperimentMeta,
    #[serde(default)]
    pub env_specs: EnvSpecs,
    #[serde(deserialize_with = "loose_usize")]
    pub net_size: usize,
    /// Groups of meta variable dimensions revealed to the networks.
    #[serde(default)]
    pub true_meta_variable_dims: Vec<Vec<usize>>,
    pub algo_params: AlgoParams,
    /// Safetensors file receiving every network once training ends.
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,
}

impl SacSpec {
    pub fn from_path(path: &Path) -> Result<Self> {
        let spec: Self = load_spec(path)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.net_size == 0 {
            bail!("net_size must be positive");
        }
        let params = &self.algo_params;
        if params.batch_size == 0 || params.max_path_length == 0 || params.replay_buffer_size == 0
        {
            bail!("batch_size, max_path_length and replay_buffer_size must be positive");
        }
        Ok(())
    }

    pub fn total_meta_variable_dim(&self) -> usize {
        self.true_meta_variable_dims
            .iter()
            .map(|dims| dims.iter().sum::<usize>())
            .sum()
    }
}
