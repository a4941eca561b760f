use candle_nn::{AdamW, Optimizer, VarMap};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

use crate::estimator::{MutualInformationEstimator, SampleBatch};

pub struct TrainConfig {
    pub learning_rate: f32,
    pub num_epochs: usize,
    pub show_progress: bool,
    pub verbose: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 5e-4,
            num_epochs: 10,
            show_progress: true,
            verbose: false,
        }
    }
}

/// Fit every trainable component of the estimator (ratio, baselines,
/// proposal) by descending `-grad_target` with AdamW.
///
/// * `estimator` - the assembled estimator
/// * `variable_map` - the map its parameters were built from
/// * `batches` - caller-prepared batches, visited in order every epoch
/// * `train_config` - training configuration
///
/// # Returns
/// Mean loss per epoch.
pub fn fit_estimator(
    estimator: &mut MutualInformationEstimator,
    variable_map: &VarMap,
    batches: &[SampleBatch],
    train_config: &TrainConfig,
) -> anyhow::Result<Vec<f32>> {
    if batches.is_empty() {
        anyhow::bail!("no batches to fit on");
    }

    let mut adam = AdamW::new_lr(
        variable_map.all_vars(),
        train_config.learning_rate.into(),
    )?;

    let pb = ProgressBar::new(train_config.num_epochs as u64);

    if !train_config.show_progress || train_config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut loss_trace = vec![];

    for _epoch in 0..train_config.num_epochs {
        let mut loss_tot = 0f32;

        for batch in batches {
            let loss = estimator.training_step(batch)?;
            adam.backward_step(&loss)?;
            loss_tot += loss.to_scalar::<f32>()?;
        }

        loss_trace.push(loss_tot / batches.len() as f32);
        pb.inc(1);

        if train_config.verbose {
            info!(
                "[{}] loss: {}",
                _epoch + 1,
                loss_trace.last().ok_or(anyhow::anyhow!("loss trace"))?
            );
        }
    }

    pb.finish_and_clear();
    Ok(loss_trace)
}

/// Mean and standard deviation of the calibrated estimate over batches.
///
/// Fails when the configuration exposes no calibrated value (predictor
/// mode without an entropy source yields a training signal only).
pub fn evaluate_mi(
    estimator: &mut MutualInformationEstimator,
    batches: &[SampleBatch],
) -> anyhow::Result<(f32, f32)> {
    if batches.is_empty() {
        anyhow::bail!("no batches to evaluate on");
    }

    let mut values = Vec::with_capacity(batches.len());

    for batch in batches {
        let estimate =
            estimator.estimate(&batch.x, &batch.y, batch.y_neg.as_ref(), batch.a.as_ref())?;

        match estimate.value {
            Some(value) => values.push(value.to_scalar::<f32>()?),
            None => anyhow::bail!(
                "this configuration exposes no calibrated estimate, only a training signal"
            ),
        }
    }

    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;

    Ok((mean, var.sqrt()))
}
