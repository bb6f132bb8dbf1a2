pub mod candle_autoencoder_linear;
pub mod candle_autoencoder_nonlinear;
pub mod candle_aux_layers;
pub mod candle_data_loader;
pub mod candle_data_loader_util;
pub mod candle_edge_mask;
pub mod candle_gumbel;
pub mod candle_inference;
pub mod candle_latent_causal_model;
pub mod candle_loss_functions;
pub mod candle_mixing_mask;
pub mod candle_model_traits;
pub mod candle_noise;
pub mod candle_transition;
pub mod cli;
pub mod config;
pub mod error;
pub mod simulate;

pub use candle_core;
pub use candle_nn;
