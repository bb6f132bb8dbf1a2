use candle_core::{Result, Tensor};

pub trait AutoEncoderModuleT {
    /// Gaussian parameters of q(z | x) for one feature
    ///
    /// # Arguments
    /// * `x_nd` - grid observations of feature `feature` (n x d_x)
    /// * `feature` - feature index
    ///
    /// # Returns `(mu_nk, logvar_nk)`, both (n x d_z)
    fn encode(&self, x_nd: &Tensor, feature: usize) -> Result<(Tensor, Tensor)>;

    /// Gaussian parameters of p(x | z) for one feature
    ///
    /// # Arguments
    /// * `z_nk` - latent states of feature `feature` (n x d_z)
    /// * `feature` - feature index
    ///
    /// # Returns `(mu_nd, logvar_nd)`, both (n x d_x)
    fn decode(&self, z_nk: &Tensor, feature: usize) -> Result<(Tensor, Tensor)>;

    /// The weights (or mixing logits) mapping observations to latents
    fn encoder_weight(&self) -> Result<Tensor>;

    /// The weights (or mixing logits) mapping latents to observations
    fn decoder_weight(&self) -> Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}
