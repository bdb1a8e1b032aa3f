use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{Init, VarBuilder, VarMap};
use rlgen_agents::{
    OffPolicyAgent,
    off_policy_algorithm::{
        DefaultOffPolicyHooks, EpochStats, OffPolicyAlgorithm, OffPolicyAlgorithmHooks,
        OffPolicyParams, ReturnStats,
    },
    sac::{SacParams, SoftActorCritic, soft_update},
};
use rlgen_core::{Algorithm, replay_buffer::ReplayBuffer, rng::set_seed};
use rlgen_envs::{normalized::NormalizedBoxEnv, reacher::Reacher};

fn flat_vars(varmap: &VarMap) -> Result<Vec<f32>> {
    let data = varmap.data().lock().expect("varmap lock");
    let mut names: Vec<_> = data.keys().cloned().collect();
    names.sort();
    let mut values = vec![];
    for name in names {
        values.extend(data[&name].as_tensor().flatten_all()?.to_vec1::<f32>()?);
    }
    Ok(values)
}

fn filled_buffer(obs_dim: usize, action_dim: usize) -> Result<ReplayBuffer> {
    let mut buffer = ReplayBuffer::new(64, obs_dim, action_dim)?;
    for i in 0..32 {
        let obs = vec![i as f32 / 32.; obs_dim];
        let action = vec![0.5; action_dim];
        buffer.add_sample(&obs, &action, 1., i % 8 == 7, &obs)?;
    }
    Ok(buffer)
}

#[test]
fn soft_update_interpolates() -> Result<()> {
    let source = VarMap::new();
    let target = VarMap::new();
    let dev = Device::Cpu;
    VarBuilder::from_varmap(&source, DType::F32, &dev).get_with_hints(3, "w", Init::Const(1.))?;
    VarBuilder::from_varmap(&target, DType::F32, &dev).get_with_hints(3, "w", Init::Const(0.))?;
    soft_update(&source, &target, 0.25)?;
    assert_eq!(flat_vars(&target)?, vec![0.25; 3]);
    assert!(soft_update(&source, &source, 0.5).is_err());
    assert!(soft_update(&source, &source.clone(), 0.5).is_err());
    Ok(())
}

#[test]
fn target_starts_as_copy_and_tracks_by_tau() -> Result<()> {
    set_seed(0);
    let params = SacParams {
        soft_target_tau: 0.5,
        ..Default::default()
    };
    let mut sac = SoftActorCritic::new(4, 2, &[16, 16], params, &Device::Cpu)?;
    assert_eq!(flat_vars(sac.vf_varmap())?, flat_vars(sac.target_vf_varmap())?);
    let target_before = flat_vars(sac.target_vf_varmap())?;
    let batch = filled_buffer(4, 2)?.random_batch(8, &Device::Cpu)?;
    sac.learn(&batch)?;
    let online = flat_vars(sac.vf_varmap())?;
    let target_after = flat_vars(sac.target_vf_varmap())?;
    for ((before, after), online) in target_before.iter().zip(target_after).zip(online) {
        assert!((after - 0.5 * (before + online)).abs() < 1e-5);
    }
    Ok(())
}

#[test]
fn learn_updates_networks_and_reports_losses() -> Result<()> {
    set_seed(1);
    for reparameterize in [true, false] {
        let params = SacParams {
            reparameterize,
            ..Default::default()
        };
        let mut sac = SoftActorCritic::new(4, 2, &[16], params, &Device::Cpu)?;
        let obs = Tensor::ones((2, 4), DType::F32, &Device::Cpu)?;
        let q_before = sac
            .qf
            .forward(&[&obs, &Tensor::zeros((2, 2), DType::F32, &Device::Cpu)?])?
            .sum_all()?
            .to_scalar::<f32>()?;
        let buffer = filled_buffer(4, 2)?;
        let mut diagnostics = vec![];
        for _ in 0..3 {
            diagnostics = sac.learn(&buffer.random_batch(16, &Device::Cpu)?)?;
        }
        let q_after = sac
            .qf
            .forward(&[&obs, &Tensor::zeros((2, 2), DType::F32, &Device::Cpu)?])?
            .sum_all()?
            .to_scalar::<f32>()?;
        assert_ne!(q_before, q_after);
        let names: Vec<_> = diagnostics.iter().map(|(name, _)| *name).collect();
        assert!(names.contains(&"QF Loss"));
        assert!(names.contains(&"Policy Loss"));
        assert!(diagnostics.iter().all(|(_, value)| value.is_finite()));
    }
    Ok(())
}

#[test]
fn actions_stay_in_unit_box() -> Result<()> {
    let sac = SoftActorCritic::new(3, 2, &[8], SacParams::default(), &Device::Cpu)?;
    for deterministic in [true, false] {
        let action = sac.get_action(&[1., -2., 3.], deterministic)?;
        assert_eq!(action.len(), 2);
        assert!(action.iter().all(|a| a.abs() < 1.));
    }
    Ok(())
}

#[test]
fn return_stats() {
    let stats = ReturnStats::from_returns(&[1., 3.]);
    assert_eq!(stats.num_paths, 2);
    assert_eq!(stats.mean, 2.);
    assert_eq!(stats.std, 1.);
    assert_eq!(stats.max, 3.);
    assert_eq!(stats.min, 1.);
    assert_eq!(ReturnStats::from_returns(&[]), ReturnStats::default());
}

#[derive(Default)]
struct RecordingHooks {
    epochs: Vec<EpochStats>,
    stop_after: Option<usize>,
    shut_down: bool,
}

impl OffPolicyAlgorithmHooks for RecordingHooks {
    fn post_epoch_hook(&mut self, stats: &EpochStats) -> Result<bool> {
        self.epochs.push(stats.clone());
        Ok(self.stop_after.is_some_and(|n| self.epochs.len() >= n))
    }

    fn shutdown_hook(&mut self) -> Result<()> {
        self.shut_down = true;
        Ok(())
    }
}

fn small_params() -> OffPolicyParams {
    OffPolicyParams {
        num_epochs: 3,
        num_steps_per_epoch: 30,
        num_steps_per_eval: 20,
        batch_size: 8,
        max_path_length: 10,
        min_steps_before_training: 10,
        num_updates_per_env_step: 1,
        replay_buffer_size: 100,
    }
}

fn reacher_algorithm(
    hooks: RecordingHooks,
) -> Result<OffPolicyAlgorithm<NormalizedBoxEnv<Reacher>, SoftActorCritic, RecordingHooks>> {
    let params = small_params();
    let sac = SoftActorCritic::new(11, 2, &[16, 16], SacParams::default(), &Device::Cpu)?;
    OffPolicyAlgorithm::new(
        NormalizedBoxEnv::new(Reacher::default()),
        NormalizedBoxEnv::new(Reacher::default()),
        sac,
        hooks,
        params,
        Device::Cpu,
    )
}

#[test]
fn off_policy_algorithm_runs_epochs() -> Result<()> {
    set_seed(2);
    let mut algorithm = reacher_algorithm(RecordingHooks::default())?;
    algorithm.train()?;
    let epochs = &algorithm.hooks.epochs;
    assert_eq!(epochs.len(), 3);
    assert_eq!(epochs[2].total_env_steps, 90);
    // training starts once 10 samples are stored
    assert_eq!(epochs[2].total_train_steps, 81);
    assert_eq!(epochs[0].exploration.num_paths, 3);
    assert_eq!(epochs[0].evaluation.num_paths, 2);
    assert!(!epochs[2].train_diagnostics.is_empty());
    assert!(epochs[2].tabular().iter().any(|(name, _)| name == "AverageReturn"));
    assert_eq!(algorithm.replay_buffer.len(), 90);
    assert!(algorithm.hooks.shut_down);
    Ok(())
}

#[test]
fn hooks_can_stop_training() -> Result<()> {
    let hooks = RecordingHooks {
        stop_after: Some(1),
        ..Default::default()
    };
    let mut algorithm = reacher_algorithm(hooks)?;
    algorithm.train()?;
    assert_eq!(algorithm.hooks.epochs.len(), 1);
    Ok(())
}

#[test]
fn zero_sized_replay_buffer_is_an_error() -> Result<()> {
    let params = OffPolicyParams {
        replay_buffer_size: 0,
        ..small_params()
    };
    let sac = SoftActorCritic::new(11, 2, &[8], SacParams::default(), &Device::Cpu)?;
    let algorithm = OffPolicyAlgorithm::new(
        Reacher::default(),
        Reacher::default(),
        sac,
        DefaultOffPolicyHooks,
        params,
        Device::Cpu,
    );
    assert!(algorithm.is_err());
    Ok(())
}

#[test]
fn pre_activation_weight_enters_policy_loss() -> Result<()> {
    set_seed(5);
    let buffer = filled_buffer(4, 2)?;
    for (weight, expect_reg) in [(0., false), (10., true)] {
        let params = SacParams {
            policy_pre_activation_weight: weight,
            ..Default::default()
        };
        let mut sac = SoftActorCritic::new(4, 2, &[16], params, &Device::Cpu)?;
        let diagnostics = sac.learn(&buffer.random_batch(16, &Device::Cpu)?)?;
        let (_, reg) = diagnostics
            .iter()
            .find(|(name, _)| *name == "Policy Pre-tanh Reg")
            .expect("pre-tanh regularizer is reported");
        assert_eq!(*reg > 0., expect_reg);
    }
    Ok(())
}

#[test]
fn save_writes_every_network() -> Result<()> {
    let sac = SoftActorCritic::new(3, 2, &[8], SacParams::default(), &Device::Cpu)?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sac.safetensors");
    sac.save(&path)?;
    let tensors = candle_core::safetensors::load(&path, &Device::Cpu)?;
    for prefix in ["policy.", "qf.", "vf.", "target_vf."] {
        assert!(tensors.keys().any(|name| name.starts_with(prefix)), "{prefix}");
    }
    let expected: usize = [
        sac.policy_varmap(),
        sac.qf_varmap(),
        sac.vf_varmap(),
        sac.target_vf_varmap(),
    ]
    .iter()
    .map(|varmap| varmap.all_vars().len())
    .sum();
    assert_eq!(tensors.len(), expected);
    Ok(())
}
