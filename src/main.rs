use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use parcel_volume::{CancelFlag, NiftiSource, Orchestrator, Parcellator, RunConfig, RunOptions, output};
use tracing::{error, info, warn};

/// Per-ROI summary tables of diffusion metric maps.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML run configuration
    config: PathBuf,

    /// Output directory; overrides `output_root` from the config
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Run jobs one after another
    #[arg(long)]
    sequential: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match RunConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Ctrl-C stops scheduling; jobs already running finish and the partial
    // output is still written.
    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("interrupt received, finishing running jobs");
        on_interrupt.cancel();
    }) {
        warn!("could not install interrupt handler: {e}");
    }

    let orchestrator = Orchestrator::new(
        NiftiSource::from_config(&config),
        Parcellator::default(),
        RunOptions {
            policy: config.resample,
            parallel: config.parallel && !args.sequential,
        },
    )
    .with_cancel_flag(cancel);
    let output = match orchestrator.run(&config) {
        Ok(output) => output,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        succeeded = output.succeeded(),
        failed = output.failed(),
        rows = output.table.len(),
        "parcellation finished"
    );
    for failure in &output.failures {
        warn!(job = %failure.job, kind = ?failure.kind, "{}", failure.detail);
    }

    match args.output.or(config.output_root) {
        Some(root) => {
            if let Err(e) = output::write_run(&root, &output) {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        }
        None => warn!("no output directory configured, results were not written"),
    }
    if output.cancelled {
        warn!("run was interrupted, output is partial");
        return ExitCode::from(130);
    }
    ExitCode::SUCCESS
}
