use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use street_relay::broker::AmqpBroker;
use street_relay::logging::init_logging;
use street_relay::source::DataGovSource;
use street_relay::{City, Config, Publisher, Result};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "street-publisher")]
#[command(about = "Fetches the streets of a city and publishes them to the queue", long_about = None)]
struct Args {
    /// City whose streets are published
    #[arg(value_enum)]
    city: City,

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

    info!("Starting street-publisher");
    info!("Loading configuration from {:?}", args.config);

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Publisher failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<()> {
    let config = Config::load(Some(&args.config))?;

    info!(
        city = %args.city,
        queue = %config.broker.queue,
        concurrency_limit = config.publisher.concurrency_limit,
        enrich_records = config.publisher.enrich_records,
        "Configuration summary"
    );

    let source = Arc::new(DataGovSource::new(config.source.clone())?);
    let broker = Arc::new(AmqpBroker::connect(config.broker.clone()).await?);

    let publisher = Publisher::new(source, broker, config.publisher.concurrency_limit)
        .with_enrichment(config.publisher.enrich_records);

    let report = publisher.run(args.city).await?;
    info!(
        total = report.total,
        published = report.published,
        failed = report.failed,
        "Publishing complete"
    );
    Ok(())
}
