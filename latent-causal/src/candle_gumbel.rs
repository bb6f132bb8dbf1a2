use candle_core::{Result, Tensor, D};
use candle_nn::ops;

/// Gumbel-sigmoid relaxation of independent Bernoulli variables
///
/// y_soft = sigmoid((logits + noise) / temperature)
///
/// In `hard` mode the forward value is `1[y_soft > 0.5]` while the
/// gradient is that of `y_soft` (straight-through estimator):
///
/// y = y_hard - detach(y_soft) + y_soft
///
/// * `logits` - log-odds, broadcastable to `noise`
/// * `noise` - standard logistic noise, e.g. `[batch] + logits.shape`
/// * `temperature` - relaxation temperature (> 0)
/// * `hard` - discretize the forward value
pub fn gumbel_sigmoid_with_noise(
    logits: &Tensor,
    noise: &Tensor,
    temperature: f64,
    hard: bool,
) -> Result<Tensor> {
    let y_soft = ops::sigmoid(&(noise.broadcast_add(logits)? / temperature)?)?;

    if hard {
        let y_hard = y_soft.detach().gt(0.5)?.to_dtype(y_soft.dtype())?;
        (y_hard - y_soft.detach())?.add(&y_soft)
    } else {
        Ok(y_soft)
    }
}

/// Gumbel-softmax relaxation of a categorical variable over the last axis
///
/// y = softmax((logits + gumbel) / temperature)
///
/// * `logits` - unnormalized log-probabilities, broadcastable to `noise`
/// * `noise` - standard Gumbel noise
/// * `temperature` - relaxation temperature (> 0)
pub fn gumbel_softmax_with_noise(
    logits: &Tensor,
    noise: &Tensor,
    temperature: f64,
) -> Result<Tensor> {
    let scores = (noise.broadcast_add(logits)? / temperature)?;
    ops::softmax(&scores, D::Minus1)
}
