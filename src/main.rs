use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use gnb_dispatch::{ClassificationKernel, CpuKernel, LayoutConfig, NaiveBayes, WorkerPool};
use std::{path::PathBuf, sync::Arc, time::Duration};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// Score slots directly on the CPU.
    Cpu,
    /// Route every slot through the worker pool service.
    Pool,
}

/// Train a Gaussian Naive Bayes model and report its accuracy on the training set.
#[derive(Parser, Debug)]
#[command(name = "gnb", version, about)]
struct Cli {
    /// Comma separated training file: label, then one value per feature.
    #[arg(value_name = "TRAIN_FILE")]
    train_file: PathBuf,

    /// Number of rows to read.
    #[arg(short = 'n', long, default_value_t = 124800)]
    examples: usize,

    #[arg(short, long, default_value_t = 26)]
    classes: usize,

    #[arg(short, long, default_value_t = 784)]
    features: usize,

    #[arg(short, long, default_value_t = 0.05)]
    epsilon: f32,

    /// CPU threads for row scoring (all cores if omitted).
    #[arg(short, long)]
    threads: Option<usize>,

    #[arg(short, long, value_enum, default_value_t = Backend::Cpu)]
    backend: Backend,

    /// Concurrent requests per classify call.
    #[arg(long, default_value_t = 8)]
    slots: usize,

    /// Feature padding width.
    #[arg(long, default_value_t = 16)]
    vectorization: usize,

    /// Rows per slot are padded to a multiple of this.
    #[arg(long, default_value_t = 8)]
    parallelism: usize,

    /// Fail a pool slot that has not answered after this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .init();

    let config = LayoutConfig {
        slots: cli.slots,
        vectorization: cli.vectorization,
        parallelism: cli.parallelism,
    };
    let mut model =
        NaiveBayes::new(cli.classes, cli.features, config).context("invalid model shape")?;

    model
        .train(&cli.train_file, cli.examples)
        .with_context(|| format!("training on {} failed", cli.train_file.display()))?;

    let cpu = match cli.threads {
        Some(threads) => CpuKernel::with_threads(threads)?,
        None => CpuKernel::new(),
    };
    let kernel: Box<dyn ClassificationKernel> = match cli.backend {
        Backend::Cpu => Box::new(cpu),
        Backend::Pool => {
            let pool = WorkerPool::spawn(cli.slots, Arc::new(cpu))?;
            match cli.timeout_ms {
                Some(ms) => Box::new(pool.with_timeout(Duration::from_millis(ms))),
                None => Box::new(pool),
            }
        }
    };

    let accuracy = model
        .predict(cli.epsilon, kernel.as_ref())
        .context("classification failed")?;

    println!("\n -- Accuracy: {accuracy}\n");

    Ok(())
}
