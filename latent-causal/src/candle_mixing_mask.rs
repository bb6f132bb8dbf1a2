use crate::candle_gumbel::gumbel_softmax_with_noise;
use crate::candle_noise::NoiseSource;
use crate::error::{LatentCausalError, Result};
use candle_core::Tensor;
use candle_nn::VarBuilder;

/// Initial logit of every (feature, grid, latent) assignment
pub const MIXING_LOGIT_INIT: f64 = 5.0;

/// Logit magnitude used when the mixing is pinned to a ground truth
pub const GROUND_TRUTH_LOGIT: f64 = 10.0;

/// Gumbel-softmax temperature of the mixing relaxation
pub const MIXING_TEMPERATURE: f64 = 1.0;

pub enum MixingLogits {
    Learned(Tensor),
    /// ±`GROUND_TRUTH_LOGIT` on nonzero / zero ground-truth entries
    GroundTruth(Tensor),
}

impl MixingLogits {
    pub fn tensor(&self) -> &Tensor {
        match self {
            MixingLogits::Learned(x) => x,
            MixingLogits::GroundTruth(x) => x,
        }
    }
}

/// Soft assignment of each grid location to the latent dimensions of
/// its feature, relaxed as a categorical over the `d_z` axis.
pub struct MixingMaskSampler {
    d: usize,
    d_x: usize,
    d_z: usize,
    logits: MixingLogits,
    noise: NoiseSource,
}

impl MixingMaskSampler {
    /// Will create a new mixing mask with this variable unless a
    /// ground truth is given:
    /// * `logits` (d x d_x x d_z)
    ///
    /// # Arguments
    /// * `d` - number of features
    /// * `d_x` - grid locations per feature
    /// * `d_z` - latents per feature
    /// * `ground_truth` - optional mixing structure `[d, d_x, d_z]`
    /// * `noise` - this sampler's own random stream
    /// * `vb` - variable builder
    pub fn new(
        d: usize,
        d_x: usize,
        d_z: usize,
        ground_truth: Option<&Tensor>,
        noise: NoiseSource,
        vb: VarBuilder,
    ) -> Result<Self> {
        let logits = match ground_truth {
            Some(gt) => {
                if gt.dims() != [d, d_x, d_z] {
                    return Err(LatentCausalError::ShapeMismatch {
                        what: "ground-truth mixing",
                        expected: vec![d, d_x, d_z],
                        actual: gt.dims().to_vec(),
                    });
                }
                let support = gt
                    .ne(0.0)?
                    .to_dtype(vb.dtype())?
                    .to_device(vb.device())?;
                MixingLogits::GroundTruth(
                    ((support * (2.0 * GROUND_TRUTH_LOGIT))? - GROUND_TRUTH_LOGIT)?,
                )
            }
            None => MixingLogits::Learned(vb.get_with_hints(
                (d, d_x, d_z),
                "logits",
                candle_nn::Init::Const(MIXING_LOGIT_INIT),
            )?),
        };

        Ok(Self {
            d,
            d_x,
            d_z,
            logits,
            noise,
        })
    }

    /// Draw `[batch, d, d_x, d_z]` soft masks, each row summing to one
    /// over `d_z`
    pub fn sample(&self, batch_size: usize) -> candle_core::Result<Tensor> {
        let logits = self.logits.tensor();
        let gumbel = self.noise.gumbel(
            (batch_size, self.d, self.d_x, self.d_z),
            logits.dtype(),
            logits.device(),
        )?;
        gumbel_softmax_with_noise(logits, &gumbel, MIXING_TEMPERATURE)
    }

    pub fn logits(&self) -> &Tensor {
        self.logits.tensor()
    }

    pub fn is_ground_truth(&self) -> bool {
        matches!(self.logits, MixingLogits::GroundTruth(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, IndexOp, D};
    use candle_nn::VarMap;

    #[test]
    fn learned_mask_is_a_soft_partition() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        let mixing = MixingMaskSampler::new(2, 5, 3, None, NoiseSource::new(Some(3), 2), vb)?;

        let m = mixing.sample(4)?;
        assert_eq!(m.dims(), &[4, 2, 5, 3]);
        let sums = m.sum(D::Minus1)?.flatten_all()?.to_vec1::<f64>()?;
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-9));
        let v = m.flatten_all()?.to_vec1::<f64>()?;
        assert!(v.iter().all(|&x| (0.0..=1.0).contains(&x)));
        Ok(())
    }

    #[test]
    fn ground_truth_mask_is_near_one_hot() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &dev);

        // grid j of feature 0 belongs to latent j % 2
        let mut gt = vec![0f64; 4 * 2];
        for j in 0..4 {
            gt[j * 2 + j % 2] = 0.8;
        }
        let gt = Tensor::from_vec(gt, (1, 4, 2), &dev)?;

        let mixing = MixingMaskSampler::new(1, 4, 2, Some(&gt), NoiseSource::new(Some(5), 2), vb)?;
        assert!(mixing.is_ground_truth());
        assert!(varmap.all_vars().is_empty());

        let m = mixing.sample(16)?;
        let support = gt.i(0)?.ne(0.0)?.to_dtype(DType::F64)?;
        let picked = m.i((.., 0))?.broadcast_mul(&support)?;
        let min_weight = picked.sum(D::Minus1)?.min_all()?.to_scalar::<f64>()?;
        assert!(min_weight > 0.99, "min weight {}", min_weight);
        Ok(())
    }
}
