//! Attaches to one or more broker topics and prints every message to stdout
//! until interrupted.

mod broadcast_logic;

use anyhow::Result;
use broadcast_logic::config::{Config, load_config};
use clap::Parser;
use futures_util::future::join_all;
use lib_broadcast::loggers::setup_logging;
use lib_broadcast::{BroadcastError, SubscriptionManager, SubscriptionScope, TextDecoder, Topic};
use tracing::{error, info, warn};

const APP_NAME: &str = "broadcast_tail";

#[derive(Parser, Debug)]
#[clap(about = "Print messages published on broker topics", version)]
struct TailArgs {
    #[clap(flatten)]
    config: Config,

    #[clap(required = true, help = "Topics to follow, e.g. feedback.create or media.>")]
    topics: Vec<String>,

    #[clap(long, help = "Print payloads as received instead of parsing them as JSON.")]
    raw: bool,
}

fn report(topic: String) -> impl FnMut(BroadcastError) + Send + 'static {
    move |err| error!(%topic, error = %err, "Broadcast error")
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = TailArgs::parse();
    let config = load_config(APP_NAME, args.config)?;
    let _guard = setup_logging(APP_NAME, &config.log_dir(), &config.log_level())?;

    let broadcast = config.to_broadcast_config()?;
    let manager = SubscriptionManager::from_config(&broadcast)?;
    info!(endpoint = manager.endpoint(), topics = ?args.topics, "Starting tail");

    let mut scopes: Vec<SubscriptionScope> = Vec::with_capacity(args.topics.len());
    for name in &args.topics {
        let topic = Topic::new(name.as_str())?;
        let label = topic.to_string();
        let scope = if args.raw {
            manager.attach_with(
                topic,
                TextDecoder,
                move |text: String| println!("[{label}] {text}"),
                report(name.clone()),
            )
        } else {
            manager.attach(
                topic,
                move |value: serde_json::Value| println!("[{label}] {value}"),
                report(name.clone()),
            )
        };
        scopes.push(scope);
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, detaching"),
        _ = join_all(scopes.iter().map(|s| s.closed())) => warn!("Every subscription has closed"),
    }

    for scope in &scopes {
        scope.detach().await;
    }
    info!("Bye");
    Ok(())
}
