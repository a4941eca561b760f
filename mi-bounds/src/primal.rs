use candle_core::{Result, Tensor};

use crate::traits::{ConditionalDistribution, Distribution};

/// Where the tractable (closed-form) part of the bound comes from.
///
/// The two learned-density modes are mutually exclusive by construction.
pub enum PrimalSource {
    /// The proposal is taken to be the true marginal p(y); the tractable
    /// contribution is identically zero and the bound rests on the dual term.
    Marginal,
    /// A conditional proposal r(y|x); contributes E[log r(y|x)] + H(y).
    ProposalBased(Box<dyn ConditionalDistribution>),
    /// A conditional predictor q(a|y) over auxiliary attributes;
    /// contributes E[log q(a|y)] + H(a).
    PredictorBased(Box<dyn ConditionalDistribution>),
}

impl PrimalSource {
    /// The proposal to draw negative samples from, when one exists.
    pub fn proposal(&self) -> Option<&dyn ConditionalDistribution> {
        match self {
            PrimalSource::ProposalBased(p) => Some(p.as_ref()),
            _ => None,
        }
    }

    pub fn is_predictor(&self) -> bool {
        matches!(self, PrimalSource::PredictorBased(_))
    }
}

/// Entropy of the modeled variable, needed to calibrate the cross-entropy
/// term into a bound value. A fixed constant takes precedence over a
/// reference density when both could apply.
pub enum EntropySource {
    Fixed(f64),
    Reference(Box<dyn Distribution>),
}

impl EntropySource {
    /// H = fixed value, or -mean(log p(value)) under the reference density.
    fn entropy(&self, value: &Tensor) -> Result<Tensor> {
        match self {
            EntropySource::Fixed(h) => {
                Tensor::zeros((), value.dtype(), value.device())? + *h
            }
            EntropySource::Reference(p) => p.log_prob(value)?.mean_all()?.neg(),
        }
    }
}

/// Closed-form contribution to the bound.
///
/// # Returns `(value, grad)`
/// * `value` - calibrated contribution, `None` when no entropy source makes
///   the cross-entropy interpretable as a bound value
/// * `grad` - the differentiable term (always defined)
pub fn compute_primal_ratio(
    source: &PrimalSource,
    x: &Tensor,
    y: &Tensor,
    a: Option<&Tensor>,
    entropy_y: Option<&EntropySource>,
    entropy_a: Option<&EntropySource>,
) -> Result<(Option<Tensor>, Tensor)> {
    let zero = || Tensor::zeros((), x.dtype(), x.device());

    match source {
        PrimalSource::Marginal => Ok((Some(zero()?), zero()?)),

        PrimalSource::PredictorBased(predictor) => {
            let Some(a) = a else {
                // no attributes in this batch: nothing tractable to evaluate
                return Ok((Some(zero()?), zero()?));
            };

            let q_a_given_y = predictor.condition(y)?;
            let a_n1d = if a.rank() + 1 == y.rank() {
                a.unsqueeze(1)?
            } else {
                a.clone()
            };

            // cross-entropy over samples and batch
            let grad = q_a_given_y.log_prob(&a_n1d)?.mean_all()?;

            let value = match entropy_a {
                Some(h_a) => Some(grad.add(&h_a.entropy(a)?)?),
                None => None,
            };

            Ok((value, grad))
        }

        PrimalSource::ProposalBased(proposal) => {
            let r_y_given_x = proposal.condition(x)?;
            let grad = r_y_given_x.log_prob(y)?.mean_all()?;

            let value = match entropy_y {
                Some(h_y) => Some(grad.add(&h_y.entropy(y)?)?),
                None => None,
            };

            Ok((value, grad))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::DiagonalGaussian;
    use approx::assert_relative_eq;
    use candle_core::{DType, Device};

    struct FixedGaussian {
        event_dim: usize,
    }

    impl ConditionalDistribution for FixedGaussian {
        fn condition(&self, ctx: &Tensor) -> Result<Box<dyn Distribution>> {
            let n = ctx.dims()[0];
            let mean = Tensor::zeros((n, self.event_dim), DType::F32, ctx.device())?;
            let lnvar = Tensor::zeros((n, self.event_dim), DType::F32, ctx.device())?;
            Ok(Box::new(DiagonalGaussian::new(mean, lnvar)))
        }
    }

    #[test]
    fn marginal_source_contributes_nothing() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::randn(0f32, 1f32, (3, 2), &dev)?;
        let y = Tensor::randn(0f32, 1f32, (3, 1, 2), &dev)?;

        let (value, grad) = compute_primal_ratio(&PrimalSource::Marginal, &x, &y, None, None, None)?;
        assert_relative_eq!(value.unwrap().to_scalar::<f32>()?, 0.0);
        assert_relative_eq!(grad.to_scalar::<f32>()?, 0.0);
        Ok(())
    }

    #[test]
    fn proposal_value_is_cross_entropy_plus_entropy() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::zeros((4, 2), DType::F32, &dev)?;
        let y = Tensor::zeros((4, 1, 2), DType::F32, &dev)?;

        let source = PrimalSource::ProposalBased(Box::new(FixedGaussian { event_dim: 2 }));
        let h_y = EntropySource::Fixed(1.5);

        let (value, grad) = compute_primal_ratio(&source, &x, &y, None, Some(&h_y), None)?;

        // standard normal at zero: log density = -ln(2*pi) for 2 dims
        let want_grad = -(2.0 * std::f64::consts::PI).ln() as f32;
        assert_relative_eq!(grad.to_scalar::<f32>()?, want_grad, epsilon = 1e-5);
        assert_relative_eq!(
            value.unwrap().to_scalar::<f32>()?,
            want_grad + 1.5,
            epsilon = 1e-5
        );
        Ok(())
    }

    #[test]
    fn predictor_without_entropy_yields_no_calibrated_value() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::zeros((4, 2), DType::F32, &dev)?;
        let y = Tensor::zeros((4, 1, 3), DType::F32, &dev)?;
        let a = Tensor::zeros((4, 2), DType::F32, &dev)?;

        let source = PrimalSource::PredictorBased(Box::new(FixedGaussian { event_dim: 2 }));
        let (value, grad) = compute_primal_ratio(&source, &x, &y, Some(&a), None, None)?;

        assert!(value.is_none());
        assert!(grad.to_scalar::<f32>()?.is_finite());
        Ok(())
    }
}
