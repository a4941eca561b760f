mod simulate;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use clap::{Parser, ValueEnum};
use log::info;
use serde::Serialize;

use mi_bounds::{
    build_variant, evaluate_mi, fit_estimator, EntropySource, EstimatorVariant, TrainConfig,
    VariantOptions,
};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
enum Variant {
    Nwj,
    Mine,
    Infonce,
    Js,
    Tuba,
    Alphatuba,
    Smile,
    Flo,
    Ba,
}

impl From<Variant> for EstimatorVariant {
    fn from(v: Variant) -> Self {
        match v {
            Variant::Nwj => EstimatorVariant::Nwj,
            Variant::Mine => EstimatorVariant::Mine,
            Variant::Infonce => EstimatorVariant::InfoNce,
            Variant::Js => EstimatorVariant::Js,
            Variant::Tuba => EstimatorVariant::Tuba,
            Variant::Alphatuba => EstimatorVariant::AlphaTuba,
            Variant::Smile => EstimatorVariant::Smile,
            Variant::Flo => EstimatorVariant::Flo,
            Variant::Ba => EstimatorVariant::Ba,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "MI-FIT",
    long_about = "Fit a variational mutual information estimator on simulated\n\
		  correlated Gaussian pairs and compare the estimate against\n\
		  the closed-form ground truth."
)]
struct Cli {
    #[arg(
        long,
        short,
        value_enum,
        default_value_t = Variant::Smile,
        help = "Estimator variant"
    )]
    estimator: Variant,

    #[arg(long, default_value_t = 2, help = "Dimension of x and y")]
    dim: usize,

    #[arg(long, default_value_t = 0.8, help = "Per-dimension correlation")]
    rho: f64,

    #[arg(long, default_value_t = 20_000, help = "Training sample pairs")]
    num_samples: usize,

    #[arg(long, default_value_t = 4_000, help = "Evaluation sample pairs")]
    num_eval_samples: usize,

    #[arg(long, default_value_t = 128)]
    batch_size: usize,

    #[arg(long, default_value_t = 20)]
    epochs: usize,

    #[arg(long, default_value_t = 5e-4)]
    learning_rate: f32,

    #[arg(
        long,
        help = "Negatives per row; 0 uses the whole batch",
        long_help = "Override the variant's negative-sample count.\n\
		     Non-positive values request the complement of the batch size."
    )]
    neg_samples: Option<i64>,

    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = vec![64usize, 32],
        help = "Hidden layer widths, comma separated"
    )]
    hidden: Vec<usize>,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, help = "Write a JSON report (estimate + loss trace) here")]
    out: Option<Box<str>>,

    #[arg(long, default_value_t = false, help = "Per-epoch logging")]
    verbose: bool,
}

#[derive(Serialize)]
struct Report {
    estimator: String,
    dim: usize,
    rho: f64,
    ground_truth_mi: f64,
    estimated_mi: f32,
    estimated_mi_std: f32,
    loss_trace: Vec<f32>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let device = Device::Cpu;
    let variant: EstimatorVariant = cli.estimator.into();

    let train = simulate::correlated_gaussian(
        cli.num_samples,
        cli.batch_size,
        cli.dim,
        cli.rho,
        cli.seed,
        &device,
    )?;
    let eval = simulate::correlated_gaussian(
        cli.num_eval_samples,
        cli.batch_size,
        cli.dim,
        cli.rho,
        cli.seed + 1,
        &device,
    )?;

    info!(
        "simulated {} training batches of {} ({}d, rho = {}), I(x;y) = {:.4}",
        train.batches.len(),
        cli.batch_size,
        cli.dim,
        cli.rho,
        train.ground_truth_mi
    );

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    let options = VariantOptions {
        hidden_dims: cli.hidden.clone(),
        neg_samples: cli.neg_samples,
        entropy_y: Some(EntropySource::Fixed(train.entropy_y)),
        ..VariantOptions::default()
    };

    let mut estimator = build_variant(variant, cli.dim, cli.dim, options, vb)?;
    info!("assembled {:?}: {}", variant, estimator.describe());

    let train_config = TrainConfig {
        learning_rate: cli.learning_rate,
        num_epochs: cli.epochs,
        show_progress: true,
        verbose: cli.verbose,
    };

    let loss_trace = fit_estimator(&mut estimator, &varmap, &train.batches, &train_config)?;

    let (estimated_mi, estimated_mi_std) = evaluate_mi(&mut estimator, &eval.batches)?;

    info!(
        "estimated I(x;y) = {:.4} +- {:.4} (ground truth {:.4})",
        estimated_mi, estimated_mi_std, train.ground_truth_mi
    );

    if let Some(out) = &cli.out {
        let report = Report {
            estimator: format!("{:?}", variant),
            dim: cli.dim,
            rho: cli.rho,
            ground_truth_mi: train.ground_truth_mi,
            estimated_mi,
            estimated_mi_std,
            loss_trace,
        };
        std::fs::write(out.as_ref(), serde_json::to_string_pretty(&report)?)?;
        info!("report written to {}", out);
    }

    Ok(())
}
