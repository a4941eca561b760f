use candle_core::{Result, Tensor};

use crate::traits::ConditionalDistribution;

/// Resolve a requested negative-sample count against the batch size.
///
/// Non-positive values are complement counts: `k <= 0` means `n - k`, so 0
/// requests one negative per row of the whole batch.
pub fn resolve_neg_count(n_rows: usize, requested: i64) -> Result<usize> {
    if n_rows == 0 {
        candle_core::bail!("cannot sample negatives from an empty batch");
    }

    let k = if requested <= 0 {
        n_rows as i64 - requested
    } else {
        requested
    };

    if k < 1 {
        candle_core::bail!("resolved negative-sample count {} is not positive", k);
    }

    Ok(k as usize)
}

/// Deterministic batch-shuffle index table.
///
/// idx(i, j) = (j + (i*k + j)/k + 1) mod n
///
/// Row i never draws its own index for any k up to n - 1, so the other
/// rows' y serve as empirical marginal samples without extra randomness.
pub fn shuffle_indices(n_rows: usize, k: usize) -> Vec<u32> {
    let mut idx = Vec::with_capacity(n_rows * k);
    for i in 0..n_rows {
        for j in 0..k {
            let v = i * k + j;
            idx.push(((v % k + v / k + 1) % n_rows) as u32);
        }
    }
    idx
}

/// Produce negative samples y_ of shape (n x k x d_y).
///
/// With no proposal, the batch itself supplies the negatives through the
/// shuffle table above; a conditional proposal is sampled k times per row,
/// reparameterized when gradients must flow through the draw.
pub fn sample_negatives(
    x: &Tensor,
    y: &Tensor,
    proposal: Option<&dyn ConditionalDistribution>,
    requested: i64,
    reparameterized: bool,
) -> Result<Tensor> {
    let (n, _m, d_y) = y.dims3()?;
    let k = resolve_neg_count(n, requested)?;

    match proposal {
        None => {
            // first positive per row is the empirical marginal pool
            let pool_nd = y.narrow(1, 0, 1)?.squeeze(1)?.contiguous()?;
            let idx = Tensor::from_vec(shuffle_indices(n, k), n * k, y.device())?;
            pool_nd.index_select(&idx, 0)?.reshape((n, k, d_y))
        }
        Some(proposal) => {
            let r_y_given_x = proposal.condition(x)?;
            if reparameterized {
                r_y_given_x.rsample(k)
            } else {
                r_y_given_x.sample(k)
            }
        }
    }
}
