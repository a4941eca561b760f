use candle_core::{Result, Tensor};

/// Log-mean-exp over one dimension, keeping it as a unit axis.
///
/// lme(x) = log( mean_d exp(x) ) = max + log( mean_d exp(x - max) )
///
/// The max subtraction keeps the exponentials bounded for heavy-tailed
/// scores.
///
/// * `x` - input tensor
/// * `dim` - dimension to reduce
pub fn log_mean_exp_keepdim(x: &Tensor, dim: usize) -> Result<Tensor> {
    let x_max = x.max_keepdim(dim)?;
    let lme = x
        .broadcast_sub(&x_max)?
        .exp()?
        .mean_keepdim(dim)?
        .log()?;
    lme.add(&x_max)
}

/// Log-mean-exp over every element, returning a scalar tensor.
///
/// lme(x) = log( mean exp(x) )
pub fn log_mean_exp_all(x: &Tensor) -> Result<Tensor> {
    let flat = x.flatten_all()?;
    log_mean_exp_keepdim(&flat, 0)?.squeeze(0)
}

/// Element-wise softplus, in the overflow-safe form
///
/// softplus(x) = max(x, 0) + log(1 + exp(-|x|))
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let linear = x.relu()?;
    let log1p = (x.abs()?.neg()?.exp()? + 1.0)?.log()?;
    linear.add(&log1p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::Device;

    #[test]
    fn log_mean_exp_matches_direct_computation() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[0.5f32, -1.0, 2.0], [3.0, 3.0, 3.0]], &dev)?;

        let lme = log_mean_exp_keepdim(&x, 1)?;
        assert_eq!(lme.dims(), &[2, 1]);

        let got = lme.flatten_all()?.to_vec1::<f32>()?;
        let want0 = ((0.5f32.exp() + (-1.0f32).exp() + 2.0f32.exp()) / 3.0).ln();
        assert_relative_eq!(got[0], want0, epsilon = 1e-5);
        assert_relative_eq!(got[1], 3.0, epsilon = 1e-5);

        Ok(())
    }

    #[test]
    fn log_mean_exp_is_stable_for_large_scores() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[80.0f32, 80.0, 80.0]], &dev)?;
        let lme = log_mean_exp_keepdim(&x, 1)?;
        let got = lme.flatten_all()?.to_vec1::<f32>()?[0];
        assert_relative_eq!(got, 80.0, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn softplus_limits() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[-50.0f32, 0.0, 50.0], &dev)?;
        let sp = softplus(&x)?.to_vec1::<f32>()?;
        assert_relative_eq!(sp[0], 0.0, epsilon = 1e-5);
        assert_relative_eq!(sp[1], 2f32.ln(), epsilon = 1e-5);
        assert_relative_eq!(sp[2], 50.0, epsilon = 1e-4);
        Ok(())
    }
}
