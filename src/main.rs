use std::{path::PathBuf, time::Duration};

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use docsync::{
    config::Config,
    deploy::{self, AnyExtractor, AnyStore, AnyWarehouse},
    job::{JobExecutor, RunSummary, sql},
    progress::{self, RunPhase},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[derive(Parser)]
struct Opts {
    #[clap(short, long, env = "DOCSYNC_CONFIG")]
    config: PathBuf,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process pending documents once and print the run summary.
    Run {
        /// Reprocess every object, even those already in the table.
        #[clap(long)]
        all: bool,
    },
    /// Run repeatedly on a fixed interval until interrupted.
    Schedule {
        #[clap(long, default_value_t = 3600)]
        interval_secs: u64,
        #[clap(long)]
        all: bool,
    },
    /// Create the source bucket and destination table if missing.
    Setup,
    /// Print the DDL of the destination table.
    Schema,
}

type Executor = JobExecutor<AnyStore, AnyExtractor, AnyWarehouse>;

async fn executor(config: &Config) -> anyhow::Result<Executor> {
    let store = AnyStore::from_config(&config.storage).await;
    let extractor =
        AnyExtractor::from_config(&config.extractor).with_context(|| "configure extractor")?;
    let warehouse = AnyWarehouse::from_config(&config.warehouse)
        .await
        .with_context(|| "connect warehouse")?;
    Ok(JobExecutor {
        store,
        extractor,
        warehouse,
    })
}

async fn run_once(
    executor: &Executor,
    config: &Config,
    cancel: &CancellationToken,
) -> anyhow::Result<RunSummary> {
    let reporter = progress::create_reporter();
    let result = executor
        .run(
            &config.warehouse.table,
            &config.pipeline,
            reporter.as_ref(),
            cancel,
        )
        .await;
    if let Err(error) = &result {
        reporter.set_phase(RunPhase::Failed(error.to_string()));
    }
    reporter.finish();
    let summary = result.map_err(|error| anyhow!("{error}"))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary)
}

async fn run(opts: Opts, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut config = Config::load(&opts.config)
        .await
        .with_context(|| format!("load config from {}", opts.config.display()))?;
    config.validate().with_context(|| "validate config")?;

    match opts.command {
        Command::Schema => {
            let dialect = deploy::dialect(&config.warehouse);
            println!("{}", sql::ddl(dialect, &config.warehouse.table));
        }
        Command::Setup => {
            deploy::setup(&config).await.with_context(|| "setup")?;
        }
        Command::Run { all } => {
            if all {
                config.pipeline.process_only_new = false;
            }
            let executor = executor(&config).await?;
            let summary = run_once(&executor, &config, &cancel).await?;
            if summary.failed_total() > 0 {
                warn!(failed = summary.failed_total(), "some documents failed");
            }
        }
        Command::Schedule { interval_secs, all } => {
            if all {
                config.pipeline.process_only_new = false;
            }
            let executor = executor(&config).await?;
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                // A failed run is logged and retried on the next tick.
                if let Err(error) = run_once(&executor, &config, &cancel).await {
                    error!(?error, "scheduled run failed");
                }
                if cancel.is_cancelled() {
                    break;
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing in-flight stages");
            on_signal.cancel();
        }
    });

    if let Err(e) = run(opts, cancel).await {
        error!(?e, "critical error");
        std::process::exit(1);
    }
}
