use candle_core::{Result, Tensor};
use candle_nn::{Module, VarBuilder};

use crate::layers::{concat_pairs, feed_forward, FeedForward};
use crate::numerics::{log_mean_exp_all, log_mean_exp_keepdim};
use crate::traits::Baseline;

/// Fixed scalar correction.
pub struct ConstantBaseline {
    value: f64,
}

impl ConstantBaseline {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl Baseline for ConstantBaseline {
    fn correct(&mut self, scores: &Tensor, _x: &Tensor, _y: &Tensor) -> Result<Tensor> {
        Tensor::zeros((), scores.dtype(), scores.device())? + self.value
    }
}

/// Empirical log-partition estimate over the batch of negative scores.
///
/// b = logsumexp(scores, dim) - log(count along dim)
///
/// `dim = 1` reduces over the sample axis per row; `dim = 2` reduces over
/// rows and samples jointly (the Donsker-Varadhan form).
pub struct BatchLogMeanExp {
    dim: usize,
}

impl BatchLogMeanExp {
    pub fn new(dim: usize) -> Self {
        assert!(dim == 1 || dim == 2, "dim must be 1 (per row) or 2 (whole batch)");
        Self { dim }
    }
}

impl Baseline for BatchLogMeanExp {
    fn correct(&mut self, scores: &Tensor, _x: &Tensor, _y: &Tensor) -> Result<Tensor> {
        match self.dim {
            1 => log_mean_exp_keepdim(scores, 1),
            _ => log_mean_exp_all(scores),
        }
    }

    fn normalized(&self) -> bool {
        true
    }
}

/// Running estimate of the partition function, updated once per call:
///
/// m <- gamma * m + (1 - gamma) * mean(exp(scores))
///
/// The update is detached from the gradient graph; the returned correction
/// is log(m). Calls against one instance must happen in batch order.
pub struct ExponentialMovingAverage {
    gamma: f64,
    running: Option<f64>,
}

impl ExponentialMovingAverage {
    pub fn new(gamma: f64) -> Self {
        assert!((0.0..1.0).contains(&gamma));
        Self {
            gamma,
            running: None,
        }
    }

    /// Current running mean of exp(scores), if any batch has been seen.
    pub fn running(&self) -> Option<f64> {
        self.running
    }
}

impl Baseline for ExponentialMovingAverage {
    fn correct(&mut self, scores: &Tensor, _x: &Tensor, _y: &Tensor) -> Result<Tensor> {
        let batch_mean = scores.detach().exp()?.mean_all()?.to_scalar::<f32>()? as f64;

        let m = match self.running {
            Some(m) => self.gamma * m + (1.0 - self.gamma) * batch_mean,
            // first batch seeds the running estimate
            None => batch_mean,
        };
        self.running = Some(m);

        Tensor::zeros((), scores.dtype(), scores.device())? + m.ln()
    }
}

/// Trainable correction amortized over the batch, a function of x only.
pub struct LearnableMlpBaseline {
    net: FeedForward,
}

impl LearnableMlpBaseline {
    pub fn new(x_dim: usize, hidden_dims: &[usize], vb: VarBuilder) -> Result<Self> {
        let net = feed_forward(x_dim, hidden_dims, 1, vb)?;
        Ok(Self { net })
    }
}

impl Baseline for LearnableMlpBaseline {
    fn correct(&mut self, _scores: &Tensor, x: &Tensor, _y: &Tensor) -> Result<Tensor> {
        // (n x 1), broadcast against the score rows
        self.net.forward(x)
    }
}

/// Convex combination of two baselines:
///
/// b = alpha * b1 + (1 - alpha) * b2
pub struct InterpolatedBaseline {
    baseline_1: Box<dyn Baseline>,
    baseline_2: Box<dyn Baseline>,
    alpha: f64,
}

impl InterpolatedBaseline {
    pub fn new(baseline_1: Box<dyn Baseline>, baseline_2: Box<dyn Baseline>, alpha: f64) -> Self {
        assert!((0.0..=1.0).contains(&alpha));
        Self {
            baseline_1,
            baseline_2,
            alpha,
        }
    }
}

impl Baseline for InterpolatedBaseline {
    fn correct(&mut self, scores: &Tensor, x: &Tensor, y: &Tensor) -> Result<Tensor> {
        let b1 = self.baseline_1.correct(scores, x, y)?;
        let b2 = self.baseline_2.correct(scores, x, y)?;
        (b1 * self.alpha)?.broadcast_add(&(b2 * (1.0 - self.alpha))?)
    }
}

/// Trainable correction over joint pairs (x, y); parameterizes the bound
/// itself in the FLO value rule rather than merely correcting it.
pub struct LearnableJointBaseline {
    net: FeedForward,
}

impl LearnableJointBaseline {
    pub fn new(x_dim: usize, y_dim: usize, hidden_dims: &[usize], vb: VarBuilder) -> Result<Self> {
        let net = feed_forward(x_dim + y_dim, hidden_dims, 1, vb)?;
        Ok(Self { net })
    }
}

impl Baseline for LearnableJointBaseline {
    fn correct(&mut self, _scores: &Tensor, x: &Tensor, y: &Tensor) -> Result<Tensor> {
        let xy_nmd = concat_pairs(x, y)?;
        let b_nm1 = self.net.forward(&xy_nmd)?;
        b_nm1.squeeze(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::Device;

    fn dummy_xy(dev: &Device) -> Result<(Tensor, Tensor)> {
        let x = Tensor::zeros((2, 3), candle_core::DType::F32, dev)?;
        let y = Tensor::zeros((2, 1, 3), candle_core::DType::F32, dev)?;
        Ok((x, y))
    }

    #[test]
    fn constant_broadcasts_a_scalar() -> Result<()> {
        let dev = Device::Cpu;
        let (x, y) = dummy_xy(&dev)?;
        let scores = Tensor::new(&[[0.1f32, 0.2], [0.3, 0.4]], &dev)?;

        let mut b = ConstantBaseline::new(1.0);
        let out = b.correct(&scores, &x, &y)?;
        assert_eq!(out.rank(), 0);
        assert_relative_eq!(out.to_scalar::<f32>()?, 1.0);
        Ok(())
    }

    #[test]
    fn batch_log_mean_exp_shapes() -> Result<()> {
        let dev = Device::Cpu;
        let (x, y) = dummy_xy(&dev)?;
        let scores = Tensor::new(&[[0.1f32, 0.2], [0.3, 0.4]], &dev)?;

        let per_row = BatchLogMeanExp::new(1).correct(&scores, &x, &y)?;
        assert_eq!(per_row.dims(), &[2, 1]);

        let global = BatchLogMeanExp::new(2).correct(&scores, &x, &y)?;
        assert_eq!(global.rank(), 0);

        let want = ((0.1f32.exp() + 0.2f32.exp() + 0.3f32.exp() + 0.4f32.exp()) / 4.0).ln();
        assert_relative_eq!(global.to_scalar::<f32>()?, want, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn ema_tracks_the_batch_statistic_in_order() -> Result<()> {
        let dev = Device::Cpu;
        let (x, y) = dummy_xy(&dev)?;
        let mut ema = ExponentialMovingAverage::new(0.9);

        let s1 = Tensor::new(&[[0.0f32, 0.0]], &dev)?;
        let b1 = ema.correct(&s1, &x, &y)?.to_scalar::<f32>()?;
        // first batch: m = mean(exp(0)) = 1
        assert_relative_eq!(b1, 0.0, epsilon = 1e-6);

        let s2 = Tensor::new(&[[1.0f32, 1.0]], &dev)?;
        let b2 = ema.correct(&s2, &x, &y)?.to_scalar::<f32>()?;
        let want = (0.9f64 + 0.1 * (1f64).exp()).ln() as f32;
        assert_relative_eq!(b2, want, epsilon = 1e-5);

        Ok(())
    }

    #[test]
    fn interpolation_endpoints_reproduce_the_parts() -> Result<()> {
        let dev = Device::Cpu;
        let (x, y) = dummy_xy(&dev)?;
        let scores = Tensor::new(&[[0.5f32, -0.5], [1.5, 2.5]], &dev)?;

        let mut at_one = InterpolatedBaseline::new(
            Box::new(ConstantBaseline::new(2.0)),
            Box::new(ConstantBaseline::new(5.0)),
            1.0,
        );
        assert_relative_eq!(at_one.correct(&scores, &x, &y)?.to_scalar::<f32>()?, 2.0);

        let mut at_zero = InterpolatedBaseline::new(
            Box::new(ConstantBaseline::new(2.0)),
            Box::new(ConstantBaseline::new(5.0)),
            0.0,
        );
        assert_relative_eq!(at_zero.correct(&scores, &x, &y)?.to_scalar::<f32>()?, 5.0);

        let mut at_one_lme = InterpolatedBaseline::new(
            Box::new(BatchLogMeanExp::new(1)),
            Box::new(ConstantBaseline::new(5.0)),
            1.0,
        );
        let got = at_one_lme.correct(&scores, &x, &y)?;
        let want = BatchLogMeanExp::new(1).correct(&scores, &x, &y)?;
        let got = got.flatten_all()?.to_vec1::<f32>()?;
        let want = want.flatten_all()?.to_vec1::<f32>()?;
        for (g, w) in got.iter().zip(want.iter()) {
            assert_relative_eq!(*g, *w);
        }
        Ok(())
    }
}
