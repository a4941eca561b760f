use candle_core::{Result, Tensor};
use log::debug;

use crate::dual::{dual_value, js_gradient, DualValueRule};
use crate::primal::{compute_primal_ratio, EntropySource, PrimalSource};
use crate::sampler::sample_negatives;
use crate::traits::{Baseline, RatioEstimator};

/// One batch of paired samples.
///
/// `x` is (n x d_x); `y` is (n x d_y) or (n x m x d_y); optional negatives
/// `y_neg` and attributes `a` follow the same convention.
pub struct SampleBatch {
    pub x: Tensor,
    pub y: Tensor,
    pub y_neg: Option<Tensor>,
    pub a: Option<Tensor>,
}

/// Per-batch report: the calibrated estimate (when the configuration
/// exposes one) and the quantity to differentiate, with their primal and
/// dual parts.
pub struct MiEstimate {
    pub value: Option<Tensor>,
    pub grad: Tensor,
    pub primal_value: Option<Tensor>,
    pub primal_grad: Tensor,
    pub dual_value: Tensor,
    pub dual_grad: Tensor,
}

/// Variational estimator of I(x;y), assembled from a primal source, an
/// optional learned ratio with its baselines, and a negative-sampling
/// policy.
///
/// Each call is a pure per-batch transformation apart from baseline-owned
/// running statistics; the `&mut` receiver serializes those updates.
pub struct MutualInformationEstimator {
    primal: PrimalSource,
    ratio_estimator: Option<Box<dyn RatioEstimator>>,
    baseline: Option<Box<dyn Baseline>>,
    grad_baseline: Option<Box<dyn Baseline>>,
    entropy_y: Option<EntropySource>,
    entropy_a: Option<EntropySource>,
    neg_samples: i64,
    sample_gradient: bool,
    tau: Option<f64>,
    js_grad: bool,
    value_rule: DualValueRule,
}

impl MutualInformationEstimator {
    pub fn new(primal: PrimalSource) -> Self {
        Self {
            primal,
            ratio_estimator: None,
            baseline: None,
            grad_baseline: None,
            entropy_y: None,
            entropy_a: None,
            neg_samples: 1,
            sample_gradient: false,
            tau: None,
            js_grad: false,
            value_rule: DualValueRule::Generic,
        }
    }

    pub fn with_ratio_estimator(mut self, ratio_estimator: Box<dyn RatioEstimator>) -> Self {
        self.ratio_estimator = Some(ratio_estimator);
        self
    }

    pub fn with_baseline(mut self, baseline: Box<dyn Baseline>) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn with_grad_baseline(mut self, grad_baseline: Box<dyn Baseline>) -> Self {
        self.grad_baseline = Some(grad_baseline);
        self
    }

    pub fn with_entropy_y(mut self, entropy_y: EntropySource) -> Self {
        self.entropy_y = Some(entropy_y);
        self
    }

    pub fn with_entropy_a(mut self, entropy_a: EntropySource) -> Self {
        self.entropy_a = Some(entropy_a);
        self
    }

    /// Negatives per row; non-positive means the complement `n - k`.
    pub fn with_neg_samples(mut self, neg_samples: i64) -> Self {
        self.neg_samples = neg_samples;
        self
    }

    /// Let gradients flow through proposal draws (reparameterized sampling).
    pub fn with_sample_gradient(mut self, sample_gradient: bool) -> Self {
        self.sample_gradient = sample_gradient;
        self
    }

    /// Clamp negative scores to [-tau, tau] on the value path.
    pub fn with_tau(mut self, tau: f64) -> Self {
        assert!(tau >= 0.0);
        self.tau = Some(tau);
        self
    }

    /// Use the Jensen-Shannon surrogate for the gradient target.
    pub fn with_js_grad(mut self, js_grad: bool) -> Self {
        self.js_grad = js_grad;
        self
    }

    pub fn with_value_rule(mut self, value_rule: DualValueRule) -> Self {
        self.value_rule = value_rule;
        self
    }

    /// Opt-in diagnostic summary of the assembled configuration.
    pub fn describe(&self) -> String {
        let primal = match &self.primal {
            PrimalSource::Marginal => "marginal",
            PrimalSource::ProposalBased(_) => "proposal",
            PrimalSource::PredictorBased(_) => "predictor",
        };
        format!(
            "primal={} ratio={} baseline={} grad_baseline={} neg_samples={} \
             tau={:?} js_grad={} value_rule={:?}",
            primal,
            self.ratio_estimator.is_some(),
            self.baseline.is_some(),
            self.grad_baseline.is_some(),
            self.neg_samples,
            self.tau,
            self.js_grad,
            self.value_rule,
        )
    }

    /// Learned-ratio contribution against sampled negatives.
    ///
    /// # Returns `(value, grad)`
    fn compute_dual_ratio(
        &mut self,
        x: &Tensor,
        y: &Tensor,
        y_neg: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)> {
        let Some(ratio_estimator) = self.ratio_estimator.as_ref() else {
            let zero = Tensor::zeros((), x.dtype(), x.device())?;
            return Ok((zero.clone(), zero));
        };

        let f = ratio_estimator.log_ratio(x, y)?;

        let y_neg = match y_neg {
            Some(y_neg) => y_neg.clone(),
            None => sample_negatives(
                x,
                y,
                self.primal.proposal(),
                self.neg_samples,
                self.sample_gradient,
            )?,
        };
        let f_ = ratio_estimator.log_ratio(x, &y_neg)?;

        // clamping stabilizes the exponentials of the value path only
        let f_clamped = match self.tau {
            Some(tau) => f_.clamp(-tau, tau)?,
            None => f_.clone(),
        };

        let value = dual_value(
            self.value_rule,
            &f,
            &f_clamped,
            self.baseline.as_deref_mut(),
            x,
            y,
        )?;

        let grad = if self.js_grad {
            js_gradient(&f, &f_)?
        } else if self.grad_baseline.is_some() {
            // lower-variance gradient signal, decoupled from the value
            dual_value(
                self.value_rule,
                &f,
                &f_,
                self.grad_baseline.as_deref_mut(),
                x,
                y,
            )?
        } else {
            value.clone()
        };

        Ok((value, grad))
    }

    /// Estimate a bound on I(x;y) from one batch.
    ///
    /// # Arguments
    /// * `x` - (n x d_x), drawn from p(x)
    /// * `y` - (n x d_y) or (n x m x d_y), drawn from p(y|x)
    /// * `y_neg` - optional precomputed negatives, same convention as `y`
    /// * `a` - optional attributes paired with `x`, predictor mode only
    ///
    /// # Returns
    /// The estimate and the quantity to differentiate to maximize I(x;y);
    /// the two can differ, and the value is absent when the configuration
    /// exposes no calibrated number (training signal only).
    pub fn estimate(
        &mut self,
        x: &Tensor,
        y: &Tensor,
        y_neg: Option<&Tensor>,
        a: Option<&Tensor>,
    ) -> Result<MiEstimate> {
        let y = with_sample_axis(x, y)?;
        let y_neg = match y_neg {
            Some(y_neg) => Some(with_sample_axis(x, y_neg)?),
            None => None,
        };

        let (primal_value, primal_grad) = compute_primal_ratio(
            &self.primal,
            x,
            &y,
            a,
            self.entropy_y.as_ref(),
            self.entropy_a.as_ref(),
        )?;

        let (dual_value, dual_grad) = self.compute_dual_ratio(x, &y, y_neg.as_ref())?;

        let grad = primal_grad.broadcast_add(&dual_grad)?;
        let value = match &primal_value {
            Some(primal_value) => Some(primal_value.broadcast_add(&dual_value)?),
            None => None,
        };

        if log::log_enabled!(log::Level::Debug) {
            if let Some(v) = &primal_value {
                debug!("I_primal(x;y)/value: {}", v.to_scalar::<f32>()?);
            }
            debug!("I_primal(x;y)/grad: {}", primal_grad.to_scalar::<f32>()?);
            debug!("KL_dual(p||r)/value: {}", dual_value.to_scalar::<f32>()?);
            debug!("KL_dual(p||r)/grad: {}", dual_grad.to_scalar::<f32>()?);
            if let Some(v) = &value {
                debug!("I(x;y)/value: {}", v.to_scalar::<f32>()?);
            }
            debug!("I(x;y)/grad: {}", grad.to_scalar::<f32>()?);
        }

        Ok(MiEstimate {
            value,
            grad,
            primal_value,
            primal_grad,
            dual_value,
            dual_grad,
        })
    }

    /// The loss an external minimizer should descend: mutual information is
    /// maximized by minimizing its negated gradient target.
    pub fn training_step(&mut self, batch: &SampleBatch) -> Result<Tensor> {
        let estimate = self.estimate(
            &batch.x,
            &batch.y,
            batch.y_neg.as_ref(),
            batch.a.as_ref(),
        )?;
        estimate.grad.neg()
    }
}

/// Ensure the sample-multiplicity axis is present: inputs with the same
/// rank as `x` get a unit axis; anything else must already carry exactly
/// one extra dimension.
fn with_sample_axis(x: &Tensor, t: &Tensor) -> Result<Tensor> {
    let t = if t.rank() == x.rank() {
        t.unsqueeze(1)?
    } else {
        t.clone()
    };

    if t.rank() != x.rank() + 1 {
        candle_core::bail!(
            "expected rank {} or {} relative to x, got {}",
            x.rank(),
            x.rank() + 1,
            t.rank()
        );
    }

    Ok(t)
}
