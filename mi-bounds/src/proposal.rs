use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

use crate::layers::{feed_forward, FeedForward};
use crate::traits::{ConditionalDistribution, Distribution};

// keep the variance heads away from degenerate scales
const MIN_LNVAR: f64 = -8.;
const MAX_LNVAR: f64 = 8.;

/// Conditional diagonal Gaussian r(. | ctx): an MLP trunk with mean and
/// log-variance heads. Serves both the proposal role (negatives, primal
/// log-density) and the predictor role (attributes given y).
pub struct ConditionalGaussian {
    trunk: Option<FeedForward>,
    mean: Linear,
    lnvar: Linear,
}

impl ConditionalGaussian {
    /// Variables are created under `trunk`, `mean`, and `lnvar` of the
    /// given builder.
    ///
    /// * `ctx_dim` - conditioning feature dimension
    /// * `event_dim` - dimension of the modeled variable
    /// * `hidden_dims` - trunk layers; empty means linear heads on `ctx`
    pub fn new(
        ctx_dim: usize,
        event_dim: usize,
        hidden_dims: &[usize],
        vb: VarBuilder,
    ) -> Result<Self> {
        let (trunk, feat_dim) = match hidden_dims.split_last() {
            Some((&last, front)) => {
                let trunk = feed_forward(ctx_dim, front, last, vb.pp("trunk"))?;
                (Some(trunk), last)
            }
            None => (None, ctx_dim),
        };

        let mean = candle_nn::linear(feat_dim, event_dim, vb.pp("mean"))?;
        let lnvar = candle_nn::linear(feat_dim, event_dim, vb.pp("lnvar"))?;

        Ok(Self { trunk, mean, lnvar })
    }
}

impl ConditionalDistribution for ConditionalGaussian {
    fn condition(&self, ctx: &Tensor) -> Result<Box<dyn Distribution>> {
        let h = match &self.trunk {
            Some(trunk) => trunk.forward(ctx)?.relu()?,
            None => ctx.clone(),
        };

        let mean = self.mean.forward(&h)?;
        let lnvar = self.lnvar.forward(&h)?.clamp(MIN_LNVAR, MAX_LNVAR)?;

        Ok(Box::new(DiagonalGaussian::new(mean, lnvar)))
    }
}

/// Diagonal Gaussian with per-row parameters.
pub struct DiagonalGaussian {
    mean: Tensor,
    lnvar: Tensor,
}

impl DiagonalGaussian {
    pub fn new(mean: Tensor, lnvar: Tensor) -> Self {
        Self { mean, lnvar }
    }
}

impl Distribution for DiagonalGaussian {
    fn sample(&self, n_samples: usize) -> Result<Tensor> {
        Ok(self.rsample(n_samples)?.detach())
    }

    /// z = mu + exp(lnvar / 2) * eps, eps ~ N(0, 1)
    fn rsample(&self, n_samples: usize) -> Result<Tensor> {
        let (n, d) = self.mean.dims2()?;
        let eps = Tensor::randn(0f32, 1f32, (n, n_samples, d), self.mean.device())?;
        let std = (&self.lnvar * 0.5)?.exp()?;

        self.mean
            .unsqueeze(1)?
            .broadcast_add(&std.unsqueeze(1)?.broadcast_mul(&eps)?)
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let (mean, lnvar) = if value.rank() == self.mean.rank() + 1 {
            // one sample-multiplicity axis on the value side
            let dim = self.mean.rank() - 1;
            (self.mean.unsqueeze(dim)?, self.lnvar.unsqueeze(dim)?)
        } else if value.rank() == self.mean.rank() {
            (self.mean.clone(), self.lnvar.clone())
        } else {
            candle_core::bail!(
                "value rank {} incompatible with distribution rank {}",
                value.rank(),
                self.mean.rank()
            );
        };

        let ln_2pi = (2.0 * std::f64::consts::PI).ln();
        let quad = value
            .broadcast_sub(&mean)?
            .sqr()?
            .broadcast_div(&lnvar.exp()?)?;
        let lp = ((quad.broadcast_add(&lnvar)? + ln_2pi)? * (-0.5))?;

        lp.sum(lp.rank() - 1)
    }
}
