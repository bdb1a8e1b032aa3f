use candle_core::{Result, Tensor, backprop::GradStore};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use std::fmt::Debug;
use tracing::trace;

/// Backpropagates `loss` and rescales the gradients of `varmap` so that their global L2 norm does
/// not exceed `max_norm`.
pub fn clip_grad(loss: &Tensor, varmap: &VarMap, max_norm: f32) -> Result<GradStore> {
    let mut grad_store = loss.backward()?;
    let all_vars = varmap.all_vars();
    let mut total_norm_squared = 0f32;
    for var in all_vars.iter() {
        if let Some(grad) = grad_store.get(var.as_tensor()) {
            total_norm_squared += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
    }
    let total_norm = total_norm_squared.sqrt();
    if total_norm > max_norm {
        trace!(total_norm, max_norm, "clipping gradients");
        let clip_coef = (max_norm / (total_norm + 1e-6)) as f64;
        for var in all_vars.iter() {
            if let Some(grad) = grad_store.get(var.as_tensor()) {
                let new_grad = (grad * clip_coef)?;
                grad_store.insert(var.as_tensor(), new_grad);
            }
        }
    }
    Ok(grad_store)
}

/// Adam with (coupled into AdamW) weight decay over every variable of `varmap`.
pub fn adam(varmap: &VarMap, lr: f64, weight_decay: f64) -> Result<AdamW> {
    let params = ParamsAdamW {
        lr,
        weight_decay,
        ..Default::default()
    };
    AdamW::new(varmap.all_vars(), params)
}

pub struct OptimizerWithMaxGrad {
    pub optimizer: AdamW,
    pub max_grad_norm: Option<f32>,
    pub varmap: VarMap,
}

impl Debug for OptimizerWithMaxGrad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerWithMaxGrad")
            .field("learning_rate", &self.optimizer.learning_rate())
            .field("max_grad_norm", &self.max_grad_norm)
            .finish()
    }
}

impl OptimizerWithMaxGrad {
    pub fn new(optimizer: AdamW, max_grad_norm: Option<f32>, varmap: VarMap) -> Self {
        Self {
            optimizer,
            max_grad_norm,
            varmap,
        }
    }

    pub fn adam(varmap: VarMap, lr: f64, weight_decay: f64) -> Result<Self> {
        let optimizer = adam(&varmap, lr, weight_decay)?;
        Ok(Self::new(optimizer, None, varmap))
    }

    pub fn with_max_grad_norm(mut self, max_grad_norm: Option<f32>) -> Self {
        self.max_grad_norm = max_grad_norm;
        self
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Gradients of `loss`, clipped when a max norm is set. Pairs with [`Self::step`] when several
    /// losses share a graph and every gradient has to be taken before any parameter moves.
    pub fn grads(&self, loss: &Tensor) -> Result<GradStore> {
        if let Some(max_norm) = self.max_grad_norm {
            clip_grad(loss, &self.varmap, max_norm)
        } else {
            loss.backward()
        }
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.optimizer.step(grads)
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = self.grads(loss)?;
        self.step(&grads)
    }
}
