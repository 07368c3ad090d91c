use std::sync::Arc;

use relay_core::{FeedEventHandler, HandlerError, JobSender, OutboundJob};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::queue::InboundMessage;

pub struct PoolHandle {
    cancel_tx: broadcast::Sender<()>,
    joins: Vec<JoinHandle<()>>,
}

impl PoolHandle {
    /// Waits for the tasks to finish on their own.
    pub async fn join(self) {
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "worker task failed");
            }
        }
    }

    /// Asks the tasks to stop at their next wait point, then waits for them.
    pub async fn stop(self) {
        let _ = self.cancel_tx.send(());
        self.join().await;
    }
}

/// Runs `count` workers pulling from one shared inbound channel.
/// Workers exit when the channel closes or on cancel.
pub fn spawn_workers(
    count: usize,
    handler: Arc<FeedEventHandler>,
    inbound: mpsc::Receiver<InboundMessage>,
) -> PoolHandle {
    let (cancel_tx, _) = broadcast::channel(1);
    let inbound = Arc::new(Mutex::new(inbound));

    let joins = (0..count.max(1))
        .map(|worker| {
            let mut cancel_rx = cancel_tx.subscribe();
            let inbound = inbound.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        _ = cancel_rx.recv() => {
                            info!(worker, "worker shutdown requested");
                            break;
                        }
                        next = async { inbound.lock().await.recv().await } => next,
                    };
                    let Some(message) = next else {
                        debug!(worker, "inbound queue closed");
                        break;
                    };
                    handle_message(&handler, message).await;
                }
            })
        })
        .collect();

    PoolHandle { cancel_tx, joins }
}

async fn handle_message(handler: &FeedEventHandler, message: InboundMessage) {
    match message {
        InboundMessage::DeliverArticles(payload) => match handler.handle(&payload).await {
            Ok(delivered) => debug!(count = delivered.len(), "feed event handled"),
            Err(HandlerError::Validation(errors)) => {
                warn!(errors = ?errors, "dropping invalid feed event");
            }
            Err(e) => error!(error = %e, "feed event failed"),
        },
        InboundMessage::FeedDeleted { feed_id } => {
            if let Err(e) = handler.handle_feed_deleted(&feed_id).await {
                error!(feed_id, error = %e, "failed to clear deleted feed");
            }
        }
    }
}

/// Performs queued jobs one at a time and applies each result.
/// On cancel, jobs already queued are still sent before exiting.
pub fn spawn_sender(
    sender: JobSender,
    handler: Arc<FeedEventHandler>,
    mut jobs: mpsc::Receiver<OutboundJob>,
) -> PoolHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    while let Ok(job) = jobs.try_recv() {
                        deliver(&sender, &handler, job).await;
                    }
                    info!("outbound sender stopped");
                    break;
                }
                job = jobs.recv() => match job {
                    Some(job) => deliver(&sender, &handler, job).await,
                    None => break,
                },
            }
        }
    });

    PoolHandle {
        cancel_tx,
        joins: vec![join],
    }
}

async fn deliver(sender: &JobSender, handler: &FeedEventHandler, job: OutboundJob) {
    let result = sender.send(job).await;
    let processed = handler.handle_delivery_result(&result).await;
    debug!(
        delivery_id = %result.job.meta.id,
        status = processed.status.label(),
        "outbound job completed"
    );
}
