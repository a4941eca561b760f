use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use mi_bounds::SampleBatch;

/// Batches of correlated Gaussian pairs with a closed-form ground truth.
pub struct CorrelatedGaussian {
    pub batches: Vec<SampleBatch>,
    /// I(x;y) = -d/2 * ln(1 - rho^2)
    pub ground_truth_mi: f64,
    /// H(y) = d/2 * ln(2 pi e); the marginal of y stays standard normal.
    pub entropy_y: f64,
}

/// Simulate y = rho * x + sqrt(1 - rho^2) * eps per dimension, with
/// x, eps ~ N(0, 1) i.i.d.
pub fn correlated_gaussian(
    num_samples: usize,
    batch_size: usize,
    dim: usize,
    rho: f64,
    seed: u64,
    device: &Device,
) -> anyhow::Result<CorrelatedGaussian> {
    if rho <= -1.0 || rho >= 1.0 {
        anyhow::bail!("correlation must lie in (-1, 1), got {}", rho);
    }
    if batch_size < 2 {
        anyhow::bail!("batch size must be at least 2 for in-batch negatives");
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let standard_normal = Normal::new(0f32, 1f32).map_err(|e| anyhow::anyhow!("{}", e))?;
    let noise_scale = (1.0 - rho * rho).sqrt() as f32;

    let num_batches = num_samples / batch_size;
    if num_batches == 0 {
        anyhow::bail!(
            "{} samples cannot fill one batch of size {}",
            num_samples,
            batch_size
        );
    }

    let mut batches = Vec::with_capacity(num_batches);

    for _ in 0..num_batches {
        let mut x_data = Vec::with_capacity(batch_size * dim);
        let mut y_data = Vec::with_capacity(batch_size * dim);

        for _ in 0..batch_size * dim {
            let x = standard_normal.sample(&mut rng);
            let eps = standard_normal.sample(&mut rng);
            x_data.push(x);
            y_data.push(rho as f32 * x + noise_scale * eps);
        }

        batches.push(SampleBatch {
            x: Tensor::from_vec(x_data, (batch_size, dim), device)?,
            y: Tensor::from_vec(y_data, (batch_size, dim), device)?,
            y_neg: None,
            a: None,
        });
    }

    let ground_truth_mi = -(dim as f64) / 2.0 * (1.0 - rho * rho).ln();
    let entropy_y = (dim as f64) / 2.0 * (2.0 * std::f64::consts::PI * std::f64::consts::E).ln();

    Ok(CorrelatedGaussian {
        batches,
        ground_truth_mi,
        entropy_y,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_shapes_and_ground_truth() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let sim = correlated_gaussian(256, 64, 3, 0.8, 42, &dev)?;

        assert_eq!(sim.batches.len(), 4);
        assert_eq!(sim.batches[0].x.dims(), &[64, 3]);
        assert_eq!(sim.batches[0].y.dims(), &[64, 3]);

        let want = -1.5f64 * (1.0 - 0.64f64).ln();
        assert!((sim.ground_truth_mi - want).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn degenerate_correlation_is_rejected() {
        let dev = Device::Cpu;
        assert!(correlated_gaussian(64, 32, 2, 1.0, 0, &dev).is_err());
    }
}
