pub mod config;
pub mod conv_gru;
pub mod device;
pub mod logger;
pub mod sac;
pub mod vis;
