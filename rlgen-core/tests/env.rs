use candle_core::Result;
use rlgen_core::env::Space;

#[test]
fn bounded_space_checks_bound_lengths() -> Result<()> {
    let space = Space::bounded(vec![0., -2.], vec![1., 2.])?;
    assert_eq!(space.size(), 2);
    let (low, high) = space.bounds().expect("bounded space");
    assert_eq!(low, &[0., -2.]);
    assert_eq!(high, &[1., 2.]);
    assert!(Space::bounded(vec![0.], vec![1., 2.]).is_err());
    assert_eq!(Space::unit_box(2), Space::bounded(vec![-1.; 2], vec![1.; 2])?);
    assert!(Space::continuous_from_dims(vec![3, 2]).bounds().is_none());
    Ok(())
}
