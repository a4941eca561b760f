use candle_core::{Result, Tensor};

use crate::numerics::softplus;
use crate::traits::Baseline;

/// Which closed form turns corrected scores into the dual bound value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DualValueRule {
    /// mean(f - b - Z + 1) with Z = mean(exp(f_)) / exp(b),
    /// or Z = 1 when the baseline is already an empirical log-partition.
    Generic,
    /// The baseline itself parameterizes the bound:
    /// mean(b - Z + 1) with Z = mean(exp(f_)) / exp(f - b).
    Flo,
}

/// Broadcast-align a baseline output against the negative scores.
///
/// Accepted shapes: scalar, (n), or the scores' own rank.
fn align_correction(b: Tensor, scores: &Tensor) -> Result<Tensor> {
    let b = if b.rank() == 1 { b.unsqueeze(1)? } else { b };
    if b.rank() != 0 && b.rank() != scores.rank() {
        candle_core::bail!(
            "baseline rank {} cannot broadcast against scores of rank {}",
            b.rank(),
            scores.rank()
        );
    }
    Ok(b)
}

/// Corrected dual bound value from positive scores `f` (n x m) and negative
/// scores `f_` (n x m').
pub fn dual_value(
    rule: DualValueRule,
    f: &Tensor,
    f_: &Tensor,
    baseline: Option<&mut (dyn Baseline + 'static)>,
    x: &Tensor,
    y: &Tensor,
) -> Result<Tensor> {
    match rule {
        DualValueRule::Generic => {
            let (b, normalized) = match baseline {
                Some(baseline) => {
                    let b = align_correction(baseline.correct(f_, x, y)?, f_)?;
                    (b, baseline.normalized())
                }
                None => (Tensor::zeros((), f.dtype(), f.device())?, false),
            };

            let f_corrected = f.broadcast_sub(&b)?;

            if normalized {
                // Z = 1, and the +1 cancels it
                f_corrected.mean_all()
            } else {
                let z = f_.exp()?.mean_keepdim(1)?.broadcast_div(&b.exp()?)?;
                (f_corrected.broadcast_sub(&z)? + 1.0)?.mean_all()
            }
        }

        DualValueRule::Flo => {
            let Some(baseline) = baseline else {
                candle_core::bail!("the FLO value rule requires a joint baseline");
            };
            let b = align_correction(baseline.correct(f_, x, y)?, f_)?;

            let z = f_
                .exp()?
                .mean_keepdim(1)?
                .broadcast_div(&f.broadcast_sub(&b)?.exp()?)?;

            (b.broadcast_sub(&z)? + 1.0)?.mean_all()
        }
    }
}

/// Jensen-Shannon gradient surrogate, independent of any baseline:
///
/// mean( -softplus(-f) - mean_m'(softplus(f_)) )
pub fn js_gradient(f: &Tensor, f_: &Tensor) -> Result<Tensor> {
    let pos_nm = softplus(&f.neg()?)?.neg()?;
    let neg_n1 = softplus(f_)?.mean_keepdim(1)?;
    pos_nm.broadcast_sub(&neg_n1)?.mean_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{BatchLogMeanExp, ConstantBaseline};
    use crate::numerics::log_mean_exp_keepdim;
    use approx::assert_relative_eq;
    use candle_core::{DType, Device};

    fn dummy_xy(dev: &Device) -> Result<(Tensor, Tensor)> {
        let x = Tensor::zeros((2, 1), DType::F32, dev)?;
        let y = Tensor::zeros((2, 1, 1), DType::F32, dev)?;
        Ok((x, y))
    }

    #[test]
    fn generic_value_with_constant_baseline() -> Result<()> {
        let dev = Device::Cpu;
        let (x, y) = dummy_xy(&dev)?;

        let f = Tensor::new(&[[0.5f32], [1.0]], &dev)?;
        let f_ = Tensor::new(&[[0.2f32], [-0.3]], &dev)?;

        let mut baseline = ConstantBaseline::new(1.0);
        let got = dual_value(
            DualValueRule::Generic,
            &f,
            &f_,
            Some(&mut baseline as &mut dyn Baseline),
            &x,
            &y,
        )?
        .to_scalar::<f32>()?;

        // mean(f - 1 - exp(f_)/e + 1)
        let z0 = 0.2f32.exp() / 1f32.exp();
        let z1 = (-0.3f32).exp() / 1f32.exp();
        let want = ((0.5 - 1.0 - z0 + 1.0) + (1.0 - 1.0 - z1 + 1.0)) / 2.0;
        assert_relative_eq!(got, want, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn normalized_baseline_makes_the_partition_term_one() -> Result<()> {
        let dev = Device::Cpu;
        let (x, y) = dummy_xy(&dev)?;

        let f = Tensor::new(&[[0.7f32], [-0.1]], &dev)?;
        let f_ = Tensor::new(&[[0.4f32, 1.2], [-0.8, 0.3]], &dev)?;

        let mut baseline = BatchLogMeanExp::new(1);
        let got = dual_value(
            DualValueRule::Generic,
            &f,
            &f_,
            Some(&mut baseline as &mut dyn Baseline),
            &x,
            &y,
        )?
        .to_scalar::<f32>()?;

        // with Z = 1 the value collapses to mean(f - b)
        let b = log_mean_exp_keepdim(&f_, 1)?;
        let want = f.broadcast_sub(&b)?.mean_all()?.to_scalar::<f32>()?;
        assert_relative_eq!(got, want, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn flo_rule_requires_a_baseline() -> Result<()> {
        let dev = Device::Cpu;
        let (x, y) = dummy_xy(&dev)?;
        let f = Tensor::new(&[[0.5f32], [1.0]], &dev)?;
        let f_ = Tensor::new(&[[0.2f32], [-0.3]], &dev)?;

        assert!(dual_value(DualValueRule::Flo, &f, &f_, None, &x, &y).is_err());
        Ok(())
    }

    #[test]
    fn js_gradient_closed_form() -> Result<()> {
        let dev = Device::Cpu;
        let f = Tensor::new(&[[0.5f32], [1.0]], &dev)?;
        let f_ = Tensor::new(&[[0.2f32, -0.4], [-0.3, 0.6]], &dev)?;

        let got = js_gradient(&f, &f_)?.to_scalar::<f32>()?;

        let sp = |v: f32| (1.0 + v.exp()).ln();
        let row0 = -sp(-0.5) - (sp(0.2) + sp(-0.4)) / 2.0;
        let row1 = -sp(-1.0) - (sp(-0.3) + sp(0.6)) / 2.0;
        assert_relative_eq!(got, (row0 + row1) / 2.0, epsilon = 1e-5);
        Ok(())
    }
}
