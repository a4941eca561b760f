//! Variational estimation of mutual information I(x;y) from paired samples.
//!
//! Every bound is split into a *primal* term (closed-form contribution of a
//! tractable conditional density) and a *dual* term (a learned unnormalized
//! ratio, corrected by a baseline and an estimated partition function fed by
//! contrastive samples). The named estimators (NWJ, MINE, InfoNCE, JS, TUBA,
//! AlphaTUBA, SMILE, FLO, BA) are declarative configurations of this one
//! engine.
//!
//! # Example
//!
//! ```ignore
//! use candle_nn::{VarBuilder, VarMap};
//! use mi_bounds::{build_variant, EstimatorVariant, VariantOptions};
//!
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//!
//! let mut estimator = build_variant(
//!     EstimatorVariant::Smile, x_dim, y_dim, VariantOptions::default(), vb)?;
//!
//! // Training loop
//! for batch in batches {
//!     let loss = estimator.training_step(&batch)?;
//!     // optimizer.backward_step(&loss)?;
//! }
//!
//! let report = estimator.estimate(&x, &y, None, None)?;
//! ```

pub mod baseline;
pub mod dual;
pub mod estimator;
pub mod layers;
pub mod numerics;
pub mod primal;
pub mod proposal;
pub mod ratio;
pub mod sampler;
pub mod train;
pub mod traits;
pub mod variants;

pub use baseline::{
    BatchLogMeanExp, ConstantBaseline, ExponentialMovingAverage, InterpolatedBaseline,
    LearnableJointBaseline, LearnableMlpBaseline,
};
pub use dual::DualValueRule;
pub use estimator::{MiEstimate, MutualInformationEstimator, SampleBatch};
pub use primal::{EntropySource, PrimalSource};
pub use proposal::{ConditionalGaussian, DiagonalGaussian};
pub use ratio::{JointRatioMlp, SeparableRatioMlp};
pub use train::{evaluate_mi, fit_estimator, TrainConfig};
pub use traits::{Baseline, ConditionalDistribution, Distribution, RatioEstimator};
pub use variants::{
    build_variant, BaselineKind, EstimatorVariant, GradBaselineKind, RatioFamily, VariantOptions,
    VariantSpec,
};

pub use candle_core;
pub use candle_nn;
