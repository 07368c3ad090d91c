mod pool;
mod queue;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use relay_core::{
    ChannelPublisher, ChannelQueue, DeliveryRecordStore, Dispatcher, DiscordMedium, FeedEventHandler, FeedParser,
    FeedRequestsClient, FileComparisonStore, FileDeliveryRecordStore, HandlerParts, JobSender, MediumKey,
    PublishedSignal, RateLimitStore, RateLimiter, WorkerConfig,
};
use reqwest::{redirect, ClientBuilder};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::queue::{Envelope, InboundMessage};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = WorkerConfig::load(&config_dir());
    let data_dir = config.storage.data_dir.clone();

    let client = ClientBuilder::new()
        .redirect(redirect::Policy::limited(5))
        .user_agent("article-relay/0.1")
        .build()?;

    let comparisons = Arc::new(match &data_dir {
        Some(dir) => FileComparisonStore::load_from(dir.join("comparison_store.json")).await,
        None => FileComparisonStore::in_memory(),
    });
    let records = match &data_dir {
        Some(dir) => FileDeliveryRecordStore::load_from(dir.join("delivery_records.json")).await,
        None => FileDeliveryRecordStore::in_memory(),
    };
    let records: Arc<dyn DeliveryRecordStore> = Arc::new(records.with_retention(config.storage.record_retention()));
    let limits = match &data_dir {
        Some(dir) => RateLimitStore::load_from(dir.join("rate_limits.json")).await,
        None => RateLimitStore::in_memory(),
    };

    let (outbound, job_rx) = ChannelQueue::new(config.workers.outbound_capacity.max(1));
    let (publisher, signal_rx) = ChannelPublisher::new();
    let discord = DiscordMedium::with_api_base(Arc::new(outbound), config.discord.api_base.clone());
    let dispatcher =
        Dispatcher::new(RateLimiter::new(limits, records.clone())).with_medium(MediumKey::Discord, Arc::new(discord));

    let handler = Arc::new(FeedEventHandler::new(HandlerParts {
        fetcher: Arc::new(FeedRequestsClient::new(
            client.clone(),
            &config.requests.service_host,
            config.requests.timeout(),
        )?),
        parser: Arc::new(FeedParser),
        parse_options: config.parser.options(),
        comparisons,
        records,
        dispatcher,
        publisher: Arc::new(publisher),
    }));

    let signals = tokio::spawn(write_signals(signal_rx));
    let sender = pool::spawn_sender(
        JobSender::new(client, config.discord.bot_token.clone()),
        handler.clone(),
        job_rx,
    );
    let (inbound_tx, inbound_rx) = mpsc::channel(config.workers.inbound_capacity.max(1));
    let workers = pool::spawn_workers(config.workers.count, handler.clone(), inbound_rx);
    info!(
        workers = config.workers.count,
        persistent = data_dir.is_some(),
        "article relay worker started"
    );

    tokio::select! {
        _ = read_inbound(inbound_tx) => {
            info!("input closed, draining queued events");
            workers.join().await;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            workers.stop().await;
        }
    }

    sender.stop().await;
    drop(handler);
    if let Err(e) = signals.await {
        error!(error = %e, "signal writer failed");
    }
    Ok(())
}

fn init_tracing() {
    // stdout carries published signals.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn config_dir() -> PathBuf {
    // Linux: ~/.config/article-relay
    let mut dir = dirs::config_dir().unwrap_or_else(|| Path::new(".").to_path_buf());
    dir.push("article-relay");
    dir
}

async fn read_inbound(tx: mpsc::Sender<InboundMessage>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed to read input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match InboundMessage::from_line(&line) {
            Ok(message) => {
                if tx.send(message).await.is_err() {
                    warn!("workers stopped, discarding input");
                    break;
                }
            }
            Err(e) => warn!(error = %e, "skipping input line"),
        }
    }
}

async fn write_signals(mut rx: mpsc::UnboundedReceiver<PublishedSignal>) {
    let mut stdout = tokio::io::stdout();
    while let Some(signal) = rx.recv().await {
        let envelope = Envelope {
            queue: signal.queue,
            message: signal.payload,
        };
        let mut line = match serde_json::to_vec(&envelope) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "failed to encode signal");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = stdout.write_all(&line).await {
            error!(error = %e, "failed to write signal");
            break;
        }
        let _ = stdout.flush().await;
    }
}
