use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use eurostat_etl::config::{FetchPolicy, PipelineConfig, load_config};
use eurostat_etl::pipeline::{RunOptions, run_pipeline, with_fetch_policy};
use eurostat_etl::verify::{Precondition, VerifyOptions, verify};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "eurostat-etl",
    about = "Download Eurostat tables and load them into SQLite"
)]
struct Cli {
    /// Pipeline TOML; the built-in datasets are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run {
        #[arg(long)]
        dataset: Option<String>,
        #[arg(long, default_value_t = false)]
        skip_export: bool,
        /// Reuse raw files already on disk instead of downloading them again.
        #[arg(long, default_value_t = false)]
        skip_existing: bool,
    },
    Verify {
        /// Run the pipeline in process before checking its outputs.
        #[arg(long, default_value_t = false)]
        run: bool,
        /// External pipeline command to run before checking, e.g. `-- bash pipeline.sh`.
        #[arg(last = true)]
        command: Vec<String>,
    },
    Datasets,
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::builtin(),
    };
    if let Some(data_dir) = cli.data_dir {
        config = config.with_data_dir(data_dir);
    }

    match cli.command {
        Commands::Run {
            dataset,
            skip_export,
            skip_existing,
        } => {
            if skip_existing {
                config = with_fetch_policy(config, FetchPolicy::SkipExisting);
            }
            let reports = run_pipeline(&RunOptions {
                config,
                dataset,
                skip_export,
            })?;

            for report in reports {
                info!(
                    dataset = %report.key,
                    table = %report.table_name,
                    rows = report.rows,
                    store = %report.store.display(),
                    sha256 = report.payload_sha256.as_deref().unwrap_or("-"),
                    "dataset summary"
                );
            }
            info!("data pipeline execution completed");
        }
        Commands::Verify { run, command } => {
            let precondition = match (run, command.is_empty()) {
                (true, false) => bail!("--run and an external command are mutually exclusive"),
                (true, true) => Precondition::InProcess,
                (false, false) => Precondition::Command(command),
                (false, true) => Precondition::None,
            };
            let report = verify(&VerifyOptions {
                config,
                precondition,
            })?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.all_passed() {
                bail!(
                    "{} verification check(s) failed",
                    report.failures().count()
                );
            }
        }
        Commands::Datasets => {
            for dataset in &config.datasets {
                println!(
                    "{}\t{}\t{}\t{}",
                    dataset.key,
                    dataset.table_name,
                    config.store_path(dataset).display(),
                    dataset
                        .request_url()
                        .map(|u| u.to_string())
                        .unwrap_or_else(|_| dataset.url.clone())
                );
            }
        }
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}
