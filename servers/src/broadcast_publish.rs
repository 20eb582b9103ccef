//! Publishes one JSON payload to one or more broker topics.

mod broadcast_logic;

use std::sync::Arc;

use anyhow::{Context, Result};
use broadcast_logic::config::{Config, load_config};
use clap::Parser;
use lib_broadcast::loggers::setup_logging;
use lib_broadcast::model::Envelope;
use lib_broadcast::{BrokerConnection, BrokerTransport, NatsWsTransport, Publisher, Topic};
use tracing::info;

const APP_NAME: &str = "broadcast_publish";

#[derive(Parser, Debug)]
#[clap(about = "Publish a JSON payload on broker topics", version)]
struct PublishArgs {
    #[clap(flatten)]
    config: Config,

    #[clap(long = "topic", required = true, help = "Target topic; repeat to dispatch to several.")]
    topics: Vec<String>,

    #[clap(long, help = "Wrap the payload in an {id, timestamp, data} envelope with this id.")]
    envelope_id: Option<String>,

    #[clap(help = "JSON payload, e.g. '{\"id\":\"42\",\"email\":\"a@b.com\"}'")]
    payload: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = PublishArgs::parse();
    let config = load_config(APP_NAME, args.config)?;
    let _guard = setup_logging(APP_NAME, &config.log_dir(), &config.log_level())?;

    let topics = args
        .topics
        .iter()
        .map(|t| Topic::new(t.as_str()))
        .collect::<Result<Vec<_>, _>>()?;
    let data: serde_json::Value = serde_json::from_str(&args.payload).context("payload is not valid JSON")?;
    let payload = match args.envelope_id {
        Some(id) => serde_json::to_value(Envelope::now(id, data))?,
        None => data,
    };

    let broadcast = config.to_broadcast_config()?;
    let connection = NatsWsTransport::from_config(&broadcast)
        .connect(&broadcast.broadcast_url)
        .await?;
    let publisher = Publisher::new(Arc::new(connection));

    let result = publisher.dispatch_batch(&topics, &payload).await;
    publisher.connection().close().await?;
    result?;

    info!(count = topics.len(), "Published");
    Ok(())
}
