use candle_core::{Result, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder};

pub(crate) const HIDDEN_BIAS_INIT: f64 = 0.1;
pub(crate) const LAST_LAYER_INIT: f64 = 3e-3;

/// Linear layer with weights drawn from `U(-bound, bound)`.
pub(crate) fn uniform_linear(
    in_dim: usize,
    out_dim: usize,
    bound: f64,
    bias_init: Init,
    vb: VarBuilder,
) -> Result<Linear> {
    let weight = vb.get_with_hints(
        (out_dim, in_dim),
        "weight",
        Init::Uniform {
            lo: -bound,
            up: bound,
        },
    )?;
    let bias = vb.get_with_hints(out_dim, "bias", bias_init)?;
    Ok(Linear::new(weight, Some(bias)))
}

pub(crate) fn fanin_linear(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let bound = 1. / (in_dim as f64).sqrt();
    uniform_linear(in_dim, out_dim, bound, Init::Const(HIDDEN_BIAS_INIT), vb)
}

/// Builds the ReLU trunk shared by the value networks and the policy.
pub(crate) fn build_hidden(
    input_dim: usize,
    hidden_sizes: &[usize],
    vb: &VarBuilder,
    prefix: &str,
) -> Result<(Vec<Linear>, usize)> {
    let mut last_dim = input_dim;
    let mut layers = Vec::with_capacity(hidden_sizes.len());
    for (layer_idx, layer_size) in hidden_sizes.iter().enumerate() {
        layers.push(fanin_linear(
            last_dim,
            *layer_size,
            vb.pp(format!("{prefix}{layer_idx}")),
        )?);
        last_dim = *layer_size;
    }
    Ok((layers, last_dim))
}

pub(crate) fn forward_hidden(layers: &[Linear], xs: &Tensor) -> Result<Tensor> {
    layers
        .iter()
        .try_fold(xs.clone(), |h, layer| layer.forward(&h)?.relu())
}

/// Multi layer perceptron that flattens all of its inputs along the feature dimension first.
#[derive(Debug, Clone)]
pub struct FlattenMlp {
    hidden: Vec<Linear>,
    last_fc: Linear,
    input_size: usize,
}

impl FlattenMlp {
    pub fn new(
        input_size: usize,
        hidden_sizes: &[usize],
        output_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (hidden, last_dim) = build_hidden(input_size, hidden_sizes, &vb, "fc")?;
        let last_fc = uniform_linear(
            last_dim,
            output_size,
            LAST_LAYER_INIT,
            Init::Uniform {
                lo: -LAST_LAYER_INIT,
                up: LAST_LAYER_INIT,
            },
            vb.pp("last_fc"),
        )?;
        Ok(Self {
            hidden,
            last_fc,
            input_size,
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn forward(&self, inputs: &[&Tensor]) -> Result<Tensor> {
        let flat = Tensor::cat(inputs, 1)?;
        let h = forward_hidden(&self.hidden, &flat)?;
        self.last_fc.forward(&h)
    }
}

impl Module for FlattenMlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        FlattenMlp::forward(self, &[xs])
    }
}
