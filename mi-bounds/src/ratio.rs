use candle_core::{Result, Tensor};
use candle_nn::{Module, VarBuilder};

use crate::layers::{concat_pairs, feed_forward, FeedForward};
use crate::traits::RatioEstimator;

/// Joint scorer: an MLP over concatenated (x, y) features, one score per
/// pairing.
pub struct JointRatioMlp {
    net: FeedForward,
}

impl JointRatioMlp {
    /// Variables are created under `joint_ratio` of the given builder.
    pub fn new(x_dim: usize, y_dim: usize, hidden_dims: &[usize], vb: VarBuilder) -> Result<Self> {
        let net = feed_forward(x_dim + y_dim, hidden_dims, 1, vb.pp("joint_ratio"))?;
        Ok(Self { net })
    }
}

impl RatioEstimator for JointRatioMlp {
    fn log_ratio(&self, x: &Tensor, y: &Tensor) -> Result<Tensor> {
        let xy_nmd = concat_pairs(x, y)?;
        self.net.forward(&xy_nmd)?.squeeze(2)
    }
}

/// Separable scorer: f(x, y) = <g(x), h(y)>.
///
/// Embeds both sides and takes an inner product, so scoring a row against
/// the rest of the batch reuses the per-row embeddings.
pub struct SeparableRatioMlp {
    net_x: FeedForward,
    net_y: FeedForward,
}

impl SeparableRatioMlp {
    /// Variables are created under `embed_x` and `embed_y` of the builder.
    pub fn new(
        x_dim: usize,
        y_dim: usize,
        hidden_dims: &[usize],
        embed_dim: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let net_x = feed_forward(x_dim, hidden_dims, embed_dim, vb.pp("embed_x"))?;
        let net_y = feed_forward(y_dim, hidden_dims, embed_dim, vb.pp("embed_y"))?;
        Ok(Self { net_x, net_y })
    }
}

impl RatioEstimator for SeparableRatioMlp {
    fn log_ratio(&self, x: &Tensor, y: &Tensor) -> Result<Tensor> {
        let g_nk = self.net_x.forward(x)?;
        let h_nmk = self.net_y.forward(y)?;
        h_nmk.broadcast_mul(&g_nk.unsqueeze(1)?)?.sum(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn scorers_produce_one_score_per_pairing() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let x = Tensor::randn(0f32, 1f32, (4, 3), &dev)?;
        let y = Tensor::randn(0f32, 1f32, (4, 5, 2), &dev)?;

        let joint = JointRatioMlp::new(3, 2, &[8], vb.pp("j"))?;
        assert_eq!(joint.log_ratio(&x, &y)?.dims(), &[4, 5]);

        let sep = SeparableRatioMlp::new(3, 2, &[8], 6, vb.pp("s"))?;
        assert_eq!(sep.log_ratio(&x, &y)?.dims(), &[4, 5]);

        Ok(())
    }
}
