use candle_core::{Result, Tensor};

/// Elementwise KL divergence between two diagonal Gaussians
///
/// KL(q || p) = 0.5 * (log(σp²) - log(σq²))
///            + 0.5 * (σq² + (μq - μp)²) / σp²
///            - 0.5
///
/// * `q_mean`, `q_std` - posterior parameters
/// * `p_mean`, `p_std` - prior parameters (same shape as `q`)
///
/// Returns the unreduced KL, one entry per latent coordinate.
pub fn gaussian_kl_divergence(
    q_mean: &Tensor,
    q_std: &Tensor,
    p_mean: &Tensor,
    p_std: &Tensor,
) -> Result<Tensor> {
    let q_var = q_std.sqr()?;
    let p_var = p_std.sqr()?;

    let log_ratio = ((p_var.log()? - q_var.log()?)? * 0.5)?;
    let mismatch = ((q_var + (q_mean - p_mean)?.sqr()?)? / &p_var)?;

    (log_ratio + (mismatch * 0.5)?)? - 0.5
}

/// Elementwise Gaussian log-density
///
/// log N(x; μ, σ²) = -0.5 * [log(2π) + 2 log σ + (x - μ)² / σ²]
///
/// * `x` - observed data
/// * `mean` - mean (broadcastable to `x`)
/// * `std` - standard deviation (broadcastable to `x`)
pub fn gaussian_log_density(x: &Tensor, mean: &Tensor, std: &Tensor) -> Result<Tensor> {
    let ln_2pi = (2.0 * std::f64::consts::PI).ln();
    let z = x.broadcast_sub(mean)?.broadcast_div(std)?;
    let log_std = std.log()?.broadcast_as(x.shape())?;
    ((z.sqr()? + (log_std * 2.0)?)? + ln_2pi)? * (-0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, D};

    #[test]
    fn kl_vanishes_for_identical_gaussians() -> Result<()> {
        let dev = Device::Cpu;
        let mu = Tensor::randn(0f64, 1f64, (8, 3, 2), &dev)?;
        let std = (Tensor::rand(0f64, 1f64, (8, 3, 2), &dev)? + 0.1)?;

        let kl = gaussian_kl_divergence(&mu, &std, &mu, &std)?;
        let max_abs = kl.abs()?.max_all()?.to_scalar::<f64>()?;
        assert!(max_abs < 1e-12);
        Ok(())
    }

    #[test]
    fn kl_is_non_negative_over_random_draws() -> Result<()> {
        let dev = Device::Cpu;
        for _ in 0..1000 {
            let q_mu = Tensor::randn(0f32, 2f32, (4, 2, 3), &dev)?;
            let p_mu = Tensor::randn(0f32, 2f32, (4, 2, 3), &dev)?;
            let q_std = (Tensor::rand(0f32, 3f32, (4, 2, 3), &dev)? + 0.05)?;
            let p_std = (Tensor::rand(0f32, 3f32, (4, 2, 3), &dev)? + 0.05)?;

            let kl = gaussian_kl_divergence(&q_mu, &q_std, &p_mu, &p_std)?
                .sum(D::Minus1)?
                .mean_all()?
                .to_scalar::<f32>()?;
            assert!(kl >= -1e-5, "KL = {}", kl);
        }
        Ok(())
    }

    #[test]
    fn kl_matches_known_value() -> Result<()> {
        // KL(N(0,1) || N(1,4)) = log 2 + (1 + 1) / 8 - 0.5
        let dev = Device::Cpu;
        let kl = gaussian_kl_divergence(
            &Tensor::new(&[0f64], &dev)?,
            &Tensor::new(&[1f64], &dev)?,
            &Tensor::new(&[1f64], &dev)?,
            &Tensor::new(&[2f64], &dev)?,
        )?
        .to_vec1::<f64>()?[0];
        let expected = 2f64.ln() + 0.25 - 0.5;
        approx::assert_abs_diff_eq!(kl, expected, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn log_density_at_mean() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[0.5f64, -1.0, 2.0]], &dev)?;
        let std = Tensor::new(&[[1f64, 1f64, 1f64]], &dev)?;
        let llik = gaussian_log_density(&x, &x, &std)?.sum_all()?.to_scalar::<f64>()?;
        let expected = -0.5 * (2.0 * std::f64::consts::PI).ln() * 3.0;
        approx::assert_abs_diff_eq!(llik, expected, epsilon = 1e-12);
        Ok(())
    }
}
