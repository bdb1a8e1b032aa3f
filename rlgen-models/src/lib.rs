pub mod conv_gru;
pub mod likelihood;
pub mod mlp;
pub mod tanh_gaussian;
pub mod video_predictor;

/// Bounds applied to every predicted log standard deviation / log covariance.
pub const LOG_SIG_MAX: f64 = 2.;
pub const LOG_SIG_MIN: f64 = -20.;
