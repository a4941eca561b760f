use candle_core::Result;
use candle_nn::VarBuilder;

use crate::baseline::{
    BatchLogMeanExp, ConstantBaseline, ExponentialMovingAverage, InterpolatedBaseline,
    LearnableJointBaseline, LearnableMlpBaseline,
};
use crate::dual::DualValueRule;
use crate::estimator::MutualInformationEstimator;
use crate::primal::{EntropySource, PrimalSource};
use crate::proposal::ConditionalGaussian;
use crate::ratio::{JointRatioMlp, SeparableRatioMlp};
use crate::traits::RatioEstimator;

/// The named estimators. Every one of them is a configuration of the same
/// engine; none carries logic of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EstimatorVariant {
    Nwj,
    Mine,
    InfoNce,
    Js,
    Tuba,
    AlphaTuba,
    Smile,
    Flo,
    Ba,
}

/// Which scorer family backs the dual term.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RatioFamily {
    /// One MLP over each (x, y) pairing.
    Joint,
    /// Inner product of separate x and y embeddings; negatives come from
    /// the rest of the batch.
    Separable,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BaselineKind {
    None,
    Constant(f64),
    BatchLogMeanExp { dim: usize },
    LearnableMlp,
    /// BatchLogMeanExp(1) interpolated with a learnable MLP of x.
    Interpolated { alpha: f64 },
    LearnableJoint,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GradBaselineKind {
    None,
    ExponentialMovingAverage { gamma: f64 },
}

/// Declarative description of one variant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VariantSpec {
    pub ratio: Option<RatioFamily>,
    pub baseline: BaselineKind,
    pub grad_baseline: GradBaselineKind,
    /// Negatives per row; 0 means the whole batch.
    pub neg_samples: i64,
    pub js_grad: bool,
    pub tau: Option<f64>,
    pub value_rule: DualValueRule,
    /// Proposal-based primal term instead of a learned ratio.
    pub proposal_primal: bool,
}

impl VariantSpec {
    const fn dual(ratio: RatioFamily, baseline: BaselineKind) -> Self {
        Self {
            ratio: Some(ratio),
            baseline,
            grad_baseline: GradBaselineKind::None,
            neg_samples: 1,
            js_grad: false,
            tau: None,
            value_rule: DualValueRule::Generic,
            proposal_primal: false,
        }
    }
}

impl EstimatorVariant {
    /// The configuration table. Each row fully determines the estimator.
    pub fn spec(self) -> VariantSpec {
        use RatioFamily::{Joint, Separable};

        match self {
            EstimatorVariant::Nwj => VariantSpec::dual(Joint, BaselineKind::Constant(1.0)),

            EstimatorVariant::Mine => VariantSpec {
                grad_baseline: GradBaselineKind::ExponentialMovingAverage { gamma: 0.9 },
                ..VariantSpec::dual(Joint, BaselineKind::BatchLogMeanExp { dim: 2 })
            },

            EstimatorVariant::InfoNce => VariantSpec {
                neg_samples: 0,
                ..VariantSpec::dual(Separable, BaselineKind::BatchLogMeanExp { dim: 1 })
            },

            EstimatorVariant::Js => VariantSpec {
                js_grad: true,
                ..VariantSpec::dual(Joint, BaselineKind::Constant(1.0))
            },

            EstimatorVariant::Tuba => VariantSpec::dual(Joint, BaselineKind::LearnableMlp),

            EstimatorVariant::AlphaTuba => {
                VariantSpec::dual(Joint, BaselineKind::Interpolated { alpha: 0.5 })
            }

            EstimatorVariant::Smile => VariantSpec {
                js_grad: true,
                tau: Some(5.0),
                ..VariantSpec::dual(Joint, BaselineKind::BatchLogMeanExp { dim: 2 })
            },

            EstimatorVariant::Flo => VariantSpec {
                value_rule: DualValueRule::Flo,
                ..VariantSpec::dual(Joint, BaselineKind::LearnableJoint)
            },

            EstimatorVariant::Ba => VariantSpec {
                ratio: None,
                baseline: BaselineKind::None,
                grad_baseline: GradBaselineKind::None,
                neg_samples: 1,
                js_grad: false,
                tau: None,
                value_rule: DualValueRule::Generic,
                proposal_primal: true,
            },
        }
    }
}

/// Architecture and hyperparameter knobs shared by every variant builder.
pub struct VariantOptions {
    /// Hidden widths for every MLP (ratio, baselines, proposal trunk).
    pub hidden_dims: Vec<usize>,
    /// Embedding width of the separable scorer.
    pub embed_dim: usize,
    /// Override the table's interpolation weight.
    pub alpha: Option<f64>,
    /// Override the table's clamp threshold.
    pub tau: Option<f64>,
    /// Override the table's EMA decay.
    pub gamma: Option<f64>,
    /// Override the table's negative-sample count.
    pub neg_samples: Option<i64>,
    /// Entropy of y, to calibrate proposal-based values.
    pub entropy_y: Option<EntropySource>,
}

impl Default for VariantOptions {
    fn default() -> Self {
        Self {
            hidden_dims: vec![64, 32],
            embed_dim: 32,
            alpha: None,
            tau: None,
            gamma: None,
            neg_samples: None,
            entropy_y: None,
        }
    }
}

/// Assemble a named estimator; trainable parameters are created under the
/// given builder (`ratio`, `baseline`, `proposal` prefixes).
pub fn build_variant(
    variant: EstimatorVariant,
    x_dim: usize,
    y_dim: usize,
    options: VariantOptions,
    vb: VarBuilder,
) -> Result<MutualInformationEstimator> {
    let spec = variant.spec();

    let primal = if spec.proposal_primal {
        let proposal =
            ConditionalGaussian::new(x_dim, y_dim, &options.hidden_dims, vb.pp("proposal"))?;
        PrimalSource::ProposalBased(Box::new(proposal))
    } else {
        PrimalSource::Marginal
    };

    let mut estimator = MutualInformationEstimator::new(primal)
        .with_neg_samples(options.neg_samples.unwrap_or(spec.neg_samples))
        .with_js_grad(spec.js_grad)
        .with_value_rule(spec.value_rule);

    if let Some(family) = spec.ratio {
        let ratio_estimator: Box<dyn RatioEstimator> = match family {
            RatioFamily::Joint => Box::new(JointRatioMlp::new(
                x_dim,
                y_dim,
                &options.hidden_dims,
                vb.pp("ratio"),
            )?),
            RatioFamily::Separable => Box::new(SeparableRatioMlp::new(
                x_dim,
                y_dim,
                &options.hidden_dims,
                options.embed_dim,
                vb.pp("ratio"),
            )?),
        };
        estimator = estimator.with_ratio_estimator(ratio_estimator);
    }

    estimator = match spec.baseline {
        BaselineKind::None => estimator,
        BaselineKind::Constant(c) => estimator.with_baseline(Box::new(ConstantBaseline::new(c))),
        BaselineKind::BatchLogMeanExp { dim } => {
            estimator.with_baseline(Box::new(BatchLogMeanExp::new(dim)))
        }
        BaselineKind::LearnableMlp => estimator.with_baseline(Box::new(
            LearnableMlpBaseline::new(x_dim, &options.hidden_dims, vb.pp("baseline"))?,
        )),
        BaselineKind::Interpolated { alpha } => {
            let learned =
                LearnableMlpBaseline::new(x_dim, &options.hidden_dims, vb.pp("baseline"))?;
            estimator.with_baseline(Box::new(InterpolatedBaseline::new(
                Box::new(BatchLogMeanExp::new(1)),
                Box::new(learned),
                options.alpha.unwrap_or(alpha),
            )))
        }
        BaselineKind::LearnableJoint => estimator.with_baseline(Box::new(
            LearnableJointBaseline::new(x_dim, y_dim, &options.hidden_dims, vb.pp("baseline"))?,
        )),
    };

    if let GradBaselineKind::ExponentialMovingAverage { gamma } = spec.grad_baseline {
        estimator = estimator.with_grad_baseline(Box::new(ExponentialMovingAverage::new(
            options.gamma.unwrap_or(gamma),
        )));
    }

    if let Some(tau) = options.tau.or(spec.tau) {
        estimator = estimator.with_tau(tau);
    }

    if let Some(entropy_y) = options.entropy_y {
        estimator = estimator.with_entropy_y(entropy_y);
    }

    Ok(estimator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_table_matches_the_published_configurations() {
        let nwj = EstimatorVariant::Nwj.spec();
        assert_eq!(nwj.ratio, Some(RatioFamily::Joint));
        assert_eq!(nwj.baseline, BaselineKind::Constant(1.0));
        assert_eq!(nwj.grad_baseline, GradBaselineKind::None);
        assert!(!nwj.js_grad);

        let mine = EstimatorVariant::Mine.spec();
        assert_eq!(mine.baseline, BaselineKind::BatchLogMeanExp { dim: 2 });
        assert_eq!(
            mine.grad_baseline,
            GradBaselineKind::ExponentialMovingAverage { gamma: 0.9 }
        );

        let infonce = EstimatorVariant::InfoNce.spec();
        assert_eq!(infonce.ratio, Some(RatioFamily::Separable));
        assert_eq!(infonce.baseline, BaselineKind::BatchLogMeanExp { dim: 1 });
        assert_eq!(infonce.neg_samples, 0);

        let js = EstimatorVariant::Js.spec();
        assert!(js.js_grad);
        assert_eq!(js.baseline, BaselineKind::Constant(1.0));

        let smile = EstimatorVariant::Smile.spec();
        assert!(smile.js_grad);
        assert_eq!(smile.tau, Some(5.0));
        assert_eq!(smile.baseline, BaselineKind::BatchLogMeanExp { dim: 2 });

        let flo = EstimatorVariant::Flo.spec();
        assert_eq!(flo.value_rule, DualValueRule::Flo);
        assert_eq!(flo.baseline, BaselineKind::LearnableJoint);

        let ba = EstimatorVariant::Ba.spec();
        assert!(ba.proposal_primal);
        assert!(ba.ratio.is_none());
    }
}
