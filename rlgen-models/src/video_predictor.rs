use crate::{LOG_SIG_MAX, LOG_SIG_MIN, conv_gru::ConvGruCell};
use candle_core::{DType, Device, Module, ModuleT, Result, Tensor, bail};
use candle_nn::{
    BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig,
    Linear, VarBuilder, batch_norm, conv_transpose2d_no_bias, conv2d, conv2d_no_bias, linear,
    ops::sigmoid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGruPredictorConfig {
    pub image_channels: usize,
    /// Height and width of the (square) frames, a multiple of 4.
    pub image_size: usize,
    pub action_dim: usize,
    pub conv_channels: usize,
    pub gru_channels: usize,
    pub act_channels: usize,
    pub gru_kernel_size: usize,
}

impl Default for ConvGruPredictorConfig {
    fn default() -> Self {
        Self {
            image_channels: 3,
            image_size: 20,
            action_dim: 4,
            conv_channels: 32,
            gru_channels: 128,
            act_channels: 4,
            gru_kernel_size: 3,
        }
    }
}

impl ConvGruPredictorConfig {
    /// Spatial size of the recurrent state after the two stride 2 encoder convolutions.
    pub fn inter_size(&self) -> usize {
        self.image_size / 4
    }
}

#[derive(Debug, Clone)]
enum ConvKind {
    Conv(Conv2d),
    Transposed(ConvTranspose2d),
}

/// Convolution (no bias), batch norm and relu.
#[derive(Debug, Clone)]
struct ConvBnRelu {
    conv: ConvKind,
    bn: BatchNorm,
}

impl ConvBnRelu {
    fn conv(
        in_c: usize,
        out_c: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding,
            stride,
            ..Default::default()
        };
        let conv = conv2d_no_bias(in_c, out_c, kernel, cfg, vb.pp("conv"))?;
        let bn = batch_norm(out_c, BatchNormConfig::default(), vb.pp("bn"))?;
        Ok(Self {
            conv: ConvKind::Conv(conv),
            bn,
        })
    }

    fn transposed(in_c: usize, out_c: usize, vb: VarBuilder) -> Result<Self> {
        let cfg = ConvTranspose2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };
        let conv = conv_transpose2d_no_bias(in_c, out_c, 4, cfg, vb.pp("conv"))?;
        let bn = batch_norm(out_c, BatchNormConfig::default(), vb.pp("bn"))?;
        Ok(Self {
            conv: ConvKind::Transposed(conv),
            bn,
        })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = match &self.conv {
            ConvKind::Conv(conv) => conv.forward(xs)?,
            ConvKind::Transposed(conv) => conv.forward(xs)?,
        };
        self.bn.forward_t(&xs, train)?.relu()
    }
}

#[derive(Debug)]
pub struct PredictorStep {
    /// Predicted frame means in `[0, 1]`, `[B, C, H, W]`.
    pub recon: Tensor,
    /// Clamped per pixel log covariance, `[B, C, H, W]`.
    pub log_cov: Tensor,
    pub next_hidden: Tensor,
}

/// Action conditioned video predictor: a conv encoder feeds a conv-GRU whose state is decoded
/// into the next frame.
#[derive(Debug, Clone)]
pub struct ConvGruPredictor {
    config: ConvGruPredictorConfig,
    encoder: Vec<ConvBnRelu>,
    act_proc: Linear,
    pre_gru: ConvBnRelu,
    gru: ConvGruCell,
    post_gru: ConvBnRelu,
    decoder: Vec<ConvBnRelu>,
    mean_decoder: Conv2d,
    log_cov_decoder: Conv2d,
    device: Device,
}

impl ConvGruPredictor {
    pub fn new(config: ConvGruPredictorConfig, vb: VarBuilder) -> Result<Self> {
        if config.image_size == 0 || config.image_size % 4 != 0 {
            bail!(
                "frame size must be a positive multiple of 4, got {}",
                config.image_size
            );
        }
        let c = config.conv_channels;
        let inter = config.inter_size();
        let encoder = vec![
            ConvBnRelu::conv(config.image_channels, c, 4, 2, 1, vb.pp("encoder.0"))?,
            ConvBnRelu::conv(c, c, 4, 2, 1, vb.pp("encoder.1"))?,
        ];
        let act_proc = linear(
            config.action_dim,
            config.act_channels * inter * inter,
            vb.pp("act_proc"),
        )?;
        let pre_gru = ConvBnRelu::conv(config.act_channels + c, c, 3, 1, 1, vb.pp("pre_gru"))?;
        let gru = ConvGruCell::new(c, config.gru_channels, config.gru_kernel_size, vb.pp("gru"))?;
        let post_gru = ConvBnRelu::conv(
            config.act_channels + config.gru_channels,
            c,
            3,
            1,
            1,
            vb.pp("post_gru"),
        )?;
        let decoder = vec![
            ConvBnRelu::transposed(c, c, vb.pp("decoder.0"))?,
            ConvBnRelu::transposed(c, c, vb.pp("decoder.1"))?,
        ];
        let head = Conv2dConfig::default();
        let mean_decoder = conv2d(c, config.image_channels, 1, head, vb.pp("mean_decoder"))?;
        let log_cov_decoder = conv2d(c, config.image_channels, 1, head, vb.pp("log_cov_decoder"))?;
        Ok(Self {
            config,
            encoder,
            act_proc,
            pre_gru,
            gru,
            post_gru,
            decoder,
            mean_decoder,
            log_cov_decoder,
            device: vb.device().clone(),
        })
    }

    pub fn config(&self) -> &ConvGruPredictorConfig {
        &self.config
    }

    pub fn initial_hidden(&self, batch_size: usize) -> Result<Tensor> {
        let inter = self.config.inter_size();
        Tensor::zeros(
            (batch_size, self.config.gru_channels, inter, inter),
            DType::F32,
            &self.device,
        )
    }

    fn process_action(&self, act: &Tensor) -> Result<Tensor> {
        let inter = self.config.inter_size();
        let bs = act.dim(0)?;
        self.act_proc
            .forward(act)?
            .reshape((bs, self.config.act_channels, inter, inter))
    }

    /// Decodes the prediction for `obs` from `prev_hidden` and `act`, then folds `obs` into the
    /// recurrent state.
    pub fn step(
        &self,
        prev_hidden: &Tensor,
        obs: &Tensor,
        act: &Tensor,
        train: bool,
    ) -> Result<PredictorStep> {
        let act = self.process_action(act)?;

        let hidden = self
            .post_gru
            .forward_t(&Tensor::cat(&[prev_hidden, &act], 1)?, train)?;
        let hidden = self
            .decoder
            .iter()
            .try_fold(hidden, |h, block| block.forward_t(&h, train))?;
        let recon = sigmoid(&self.mean_decoder.forward(&hidden)?)?;
        let log_cov = self
            .log_cov_decoder
            .forward(&hidden)?
            .clamp(LOG_SIG_MIN, LOG_SIG_MAX)?;

        let enc = self
            .encoder
            .iter()
            .try_fold(obs.clone(), |h, block| block.forward_t(&h, train))?;
        let enc = self
            .pre_gru
            .forward_t(&Tensor::cat(&[&enc, &act], 1)?, train)?;
        let next_hidden = self.gru.forward(&enc, prev_hidden)?;
        Ok(PredictorStep {
            recon,
            log_cov,
            next_hidden,
        })
    }
}
