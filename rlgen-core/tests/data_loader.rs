use candle_core::{DType, Device, Result, Tensor};
use rlgen_core::data_loader::{BasicDataLoader, RandomDataLoader, split_at};
use rlgen_core::rng::set_seed;

// Frame `i` is filled with the value `i`, action `i` is `[i, -i]`.
fn indexed_dataset(rows: usize) -> Result<(Tensor, Tensor)> {
    let device = Device::Cpu;
    let obs = Tensor::arange(0u32, rows as u32, &device)?
        .to_dtype(DType::F32)?
        .reshape((rows, 1, 1, 1))?
        .broadcast_as((rows, 3, 4, 4))?
        .contiguous()?;
    let acts = Tensor::arange(0u32, rows as u32, &device)?
        .to_dtype(DType::F32)?
        .reshape((rows, 1))?;
    let acts = Tensor::cat(&[&acts, &acts.neg()?], 1)?;
    Ok((obs, acts))
}

fn frame_ids(obs: &Tensor) -> Result<Vec<usize>> {
    let ids: Vec<f32> = obs.narrow(1, 0, 1)?.flatten_from(1)?.max(1)?.to_vec1()?;
    Ok(ids.into_iter().map(|v| v as usize).collect())
}

#[test]
fn basic_loader_walks_episodes_in_order() -> Result<()> {
    set_seed(3);
    let (obs, acts) = indexed_dataset(40)?;
    let mut loader = BasicDataLoader::new(obs, acts, 8, 3)?;
    assert_eq!(loader.num_episodes(), 5);
    let (first_obs, first_acts) = loader.get_next_batch()?;
    assert_eq!(first_obs.dims(), &[3, 3, 4, 4]);
    assert_eq!(first_acts.dims(), &[3, 2]);
    let starts = frame_ids(&first_obs)?;
    for start in starts.iter() {
        assert_eq!(start % 8, 0);
    }
    for t in 1..8 {
        let (obs, _) = loader.get_next_batch()?;
        let ids = frame_ids(&obs)?;
        for (id, start) in ids.iter().zip(starts.iter()) {
            assert_eq!(*id, start + t);
        }
    }
    assert_eq!(loader.timestep(), 0);
    let (obs, _) = loader.get_next_batch()?;
    for id in frame_ids(&obs)? {
        assert_eq!(id % 8, 0);
    }
    Ok(())
}

#[test]
fn basic_loader_actions_follow_frames() -> Result<()> {
    let (obs, acts) = indexed_dataset(16)?;
    let mut loader = BasicDataLoader::new(obs, acts, 4, 2)?;
    loader.get_next_batch()?;
    let (obs, acts) = loader.get_next_batch()?;
    let ids = frame_ids(&obs)?;
    let acts: Vec<Vec<f32>> = acts.to_vec2()?;
    for (id, act) in ids.iter().zip(acts.iter()) {
        assert_eq!(act[0], *id as f32);
        assert_eq!(act[1], -(*id as f32));
    }
    Ok(())
}

#[test]
fn basic_loader_rejects_short_dataset() -> Result<()> {
    let (obs, acts) = indexed_dataset(5)?;
    assert!(BasicDataLoader::new(obs, acts, 8, 2).is_err());
    Ok(())
}

#[test]
fn split_partitions_by_row() -> Result<()> {
    let (obs, acts) = indexed_dataset(10)?;
    let ((train_obs, train_acts), (val_obs, val_acts)) = split_at(&obs, &acts, 6)?;
    assert_eq!(train_obs.dim(0)?, 6);
    assert_eq!(train_acts.dim(0)?, 6);
    assert_eq!(val_obs.dim(0)?, 4);
    assert_eq!(val_acts.dim(0)?, 4);
    assert_eq!(frame_ids(&val_obs)?, vec![6, 7, 8, 9]);
    assert!(split_at(&obs, &acts, 10).is_err());
    Ok(())
}

#[test]
fn random_loader_samples_existing_rows() -> Result<()> {
    let (obs, acts) = indexed_dataset(12)?;
    let mut loader = RandomDataLoader::new(obs, acts, 5)?;
    let (obs, acts) = loader.get_next_batch()?;
    assert_eq!(obs.dims(), &[5, 3, 4, 4]);
    assert_eq!(acts.dims(), &[5, 2]);
    assert!(frame_ids(&obs)?.iter().all(|id| *id < 12));
    Ok(())
}
