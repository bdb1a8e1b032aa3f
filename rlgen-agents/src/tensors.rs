use candle_core::Tensor;
use derive_more::{Deref, DerefMut, Display};

#[derive(Deref, DerefMut, Debug, Display)]
pub struct QfLoss(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct VfLoss(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct PolicyLoss(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct LogPi(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct QTarget(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct VTarget(pub Tensor);
