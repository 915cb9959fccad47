use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use street_relay::broker::AmqpBroker;
use street_relay::logging::init_logging;
use street_relay::store::{PgStore, RecordStore};
use street_relay::{Config, ConsumerPipeline, Metrics, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "street-consumer")]
#[command(about = "Consumes streets from the queue and stores them", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "street-relay.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting street-consumer");
    info!("Loading configuration from {:?}", args.config);

    match run(&args).await {
        Ok(()) => {
            info!("Consumer exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Consumer failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<()> {
    let config = Config::load(Some(&args.config))?;

    info!(
        queue = %config.broker.queue,
        prefetch = config.broker.prefetch_count,
        database = %config.store.database,
        table = %config.store.table,
        "Configuration summary"
    );

    let store = Arc::new(PgStore::connect(&config.store).await?);
    let broker = match AmqpBroker::connect(config.broker.clone()).await {
        Ok(broker) => Arc::new(broker),
        Err(e) => {
            if let Err(close_err) = store.close().await {
                error!(error = %close_err, "Error closing store");
            }
            return Err(e);
        }
    };

    let metrics = Arc::new(Metrics::new());
    let pipeline = ConsumerPipeline::new(broker, store, metrics.clone());

    let reporter_cancel = CancellationToken::new();
    let reporter = metrics.spawn_reporter(
        Duration::from_secs(config.consumer.metrics_interval_secs),
        reporter_cancel.clone(),
    );

    let result = match pipeline.start().await {
        Ok(()) => pipeline.run_until(shutdown_signal()).await,
        Err(e) => {
            let _ = pipeline.shutdown().await;
            Err(e)
        }
    };

    reporter_cancel.cancel();
    if let Err(e) = reporter.await {
        error!(error = %e, "Metrics reporter ended abnormally");
    }
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
