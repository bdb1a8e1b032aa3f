use candle_core::{Result, Tensor, bail};
use candle_nn::{Conv2d, Conv2dConfig, Module, VarBuilder, conv2d, ops::sigmoid};

/// Gated recurrent unit whose gates are convolutions, so the hidden state keeps its spatial
/// layout `[B, hidden_channels, H, W]`.
#[derive(Debug, Clone)]
pub struct ConvGruCell {
    gates: Conv2d,
    candidate: Conv2d,
    input_channels: usize,
    hidden_channels: usize,
}

impl ConvGruCell {
    pub fn new(
        input_channels: usize,
        hidden_channels: usize,
        kernel_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        if kernel_size % 2 == 0 {
            bail!("conv gru kernel size must be odd to keep the spatial size, got {kernel_size}");
        }
        let cfg = Conv2dConfig {
            padding: kernel_size / 2,
            ..Default::default()
        };
        let gates = conv2d(
            input_channels + hidden_channels,
            2 * hidden_channels,
            kernel_size,
            cfg,
            vb.pp("gates"),
        )?;
        let candidate = conv2d(
            input_channels + hidden_channels,
            hidden_channels,
            kernel_size,
            cfg,
            vb.pp("candidate"),
        )?;
        Ok(Self {
            gates,
            candidate,
            input_channels,
            hidden_channels,
        })
    }

    pub fn hidden_channels(&self) -> usize {
        self.hidden_channels
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn forward(&self, input: &Tensor, hidden: &Tensor) -> Result<Tensor> {
        let gates = sigmoid(&self.gates.forward(&Tensor::cat(&[input, hidden], 1)?)?)?;
        let reset = gates.narrow(1, 0, self.hidden_channels)?;
        let update = gates.narrow(1, self.hidden_channels, self.hidden_channels)?;
        let candidate = self
            .candidate
            .forward(&Tensor::cat(&[input, &reset.mul(hidden)?], 1)?)?
            .tanh()?;
        // h' = (1 - z) * h + z * c
        let keep = update.affine(-1., 1.)?.mul(hidden)?;
        keep + update.mul(&candidate)?
    }
}
