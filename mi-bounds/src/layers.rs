use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder};

/// A stack of linear layers with optional activations in between.
///
/// Works on `[N, D]` as well as `[N, M, D]` inputs; `candle_nn::Linear`
/// broadcasts the matmul over any leading batch dimensions.
pub struct FeedForward {
    layers: Vec<Linear>,
    activations: Vec<Option<Activation>>,
}

impl FeedForward {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            activations: Vec::new(),
        }
    }

    pub fn push_with_act(&mut self, layer: Linear, activation: Activation) {
        self.layers.push(layer);
        self.activations.push(Some(activation));
    }

    pub fn push(&mut self, layer: Linear) {
        self.layers.push(layer);
        self.activations.push(None);
    }
}

impl Default for FeedForward {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for FeedForward {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut h = input.clone();
        for (layer, activation) in self.layers.iter().zip(self.activations.iter()) {
            h = layer.forward(&h)?;
            if let Some(activation) = activation {
                h = activation.forward(&h)?;
            }
        }
        Ok(h)
    }
}

/// Build a ReLU multi-layer perceptron with a linear output head.
///
/// Variables are created under `fc.{layer index}` of the given builder.
///
/// * `in_dim` - input feature dimension
/// * `hidden_dims` - one entry per hidden layer
/// * `out_dim` - output dimension
/// * `vb` - variable builder
pub fn feed_forward(
    in_dim: usize,
    hidden_dims: &[usize],
    out_dim: usize,
    vb: VarBuilder,
) -> Result<FeedForward> {
    let mut ff = FeedForward::new();
    let mut prev_dim = in_dim;

    for (j, &d) in hidden_dims.iter().enumerate() {
        let fc = candle_nn::linear(prev_dim, d, vb.pp(format!("fc.{}", j)))?;
        ff.push_with_act(fc, Activation::Relu);
        prev_dim = d;
    }

    let head = candle_nn::linear(prev_dim, out_dim, vb.pp(format!("fc.{}", hidden_dims.len())))?;
    ff.push(head);

    Ok(ff)
}

/// Tile `x` along the sample axis of `y` and concatenate the features,
/// producing one row per (x, y) pairing.
///
/// * `x_nd` - (n x d_x)
/// * `y_nmd` - (n x m x d_y)
///
/// # Returns
/// Paired features (n x m x (d_x + d_y))
pub fn concat_pairs(x_nd: &Tensor, y_nmd: &Tensor) -> Result<Tensor> {
    let (n, m, _d_y) = y_nmd.dims3()?;
    let (n_x, d_x) = x_nd.dims2()?;
    if n_x != n {
        candle_core::bail!("batch mismatch between x ({}) and y ({})", n_x, n);
    }

    let x_nmd = x_nd.unsqueeze(1)?.expand((n, m, d_x))?.contiguous()?;
    Tensor::cat(&[&x_nmd, &y_nmd.contiguous()?], 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn forward_handles_flat_and_sampled_inputs() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let ff = feed_forward(4, &[8, 8], 2, vb)?;

        let x_nd = Tensor::randn(0f32, 1f32, (3, 4), &dev)?;
        assert_eq!(ff.forward(&x_nd)?.dims(), &[3, 2]);

        let x_nmd = Tensor::randn(0f32, 1f32, (3, 5, 4), &dev)?;
        assert_eq!(ff.forward(&x_nmd)?.dims(), &[3, 5, 2]);

        Ok(())
    }
}
