use candle_core::{Result, Tensor};

/// An unnormalized log density-ratio model f(x, y).
pub trait RatioEstimator {
    /// Score a pairing of `x` against one or more samples of `y`.
    ///
    /// # Arguments
    /// * `x` - batch of conditioning samples (n x d_x)
    /// * `y` - paired samples with a multiplicity axis (n x m x d_y)
    ///
    /// # Returns
    /// Unbounded scores (n x m)
    fn log_ratio(&self, x: &Tensor, y: &Tensor) -> Result<Tensor>;
}

/// A correction term subtracted from dual scores to control the variance
/// (or bias) of the partition-function estimate.
pub trait Baseline {
    /// Compute the correction for a batch of negative scores.
    ///
    /// # Arguments
    /// * `scores` - scores on negative samples (n x m')
    /// * `x` - conditioning batch (n x d_x)
    /// * `y` - positive samples (n x m x d_y)
    ///
    /// # Returns
    /// A tensor broadcastable against the scores: scalar, (n), or (n x 1)
    fn correct(&mut self, scores: &Tensor, x: &Tensor, y: &Tensor) -> Result<Tensor>;

    /// Whether the correction is already an empirical log-partition, so the
    /// downstream Z term is exactly one.
    fn normalized(&self) -> bool {
        false
    }
}

/// A distribution obtained by conditioning; exposes sampling and log-density.
pub trait Distribution {
    /// Draw `n_samples` per conditioning row, without gradients flowing
    /// through the draw.
    ///
    /// # Returns
    /// Samples (n x n_samples x d)
    fn sample(&self, n_samples: usize) -> Result<Tensor>;

    /// Reparameterized draw; gradients flow back into the parameters.
    ///
    /// Fails fast unless the distribution supports it.
    fn rsample(&self, n_samples: usize) -> Result<Tensor> {
        let _ = n_samples;
        candle_core::bail!("reparameterized sampling is not implemented for this distribution")
    }

    /// Log-density of `value`, summed over the event dimension.
    fn log_prob(&self, value: &Tensor) -> Result<Tensor>;
}

/// A conditional distribution r(. | ctx).
pub trait ConditionalDistribution {
    fn condition(&self, ctx: &Tensor) -> Result<Box<dyn Distribution>>;
}
