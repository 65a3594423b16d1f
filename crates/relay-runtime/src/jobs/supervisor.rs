//! Reconnect-on-disconnect supervisor for the full set of registered
//! subscriptions (§4.6 "Reconnection"): on any transport failure, tear down
//! every subscription, back off 5s, rebuild the channel via C5, reopen all.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::handlers::{HandlerCtx, HandlerRegistry};
use crate::pipeline::channel::ChannelFactory;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct JobRuntimeConfig {
    pub channel_factory: Arc<ChannelFactory>,
    pub registry: HandlerRegistry,
    pub ctx: HandlerCtx,
}

/// Runs until `shutdown` fires. Each reconnect round opens one subscription
/// per registered task-type and waits for all of them to end (stream close,
/// transport error, or shutdown) before deciding whether to reconnect.
pub async fn run_job_runtime(config: JobRuntimeConfig, mut shutdown: broadcast::Receiver<()>) {
    'reconnect: loop {
        if shutdown.try_recv().is_ok() {
            return;
        }

        let client = match config.channel_factory.connect().await {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(%err, "job runtime: failed to connect to engine, retrying");
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => continue 'reconnect,
                }
            }
        };

        let mut subscriptions = JoinSet::new();
        for task_type in config.registry.task_types() {
            let entry = config.registry.get(task_type).expect("listed by task_types").clone();
            let client = client.clone();
            let ctx = config.ctx.clone();
            let sub_shutdown = shutdown.resubscribe();
            subscriptions.spawn(async move { super::dispatch::run_subscription(client, entry, ctx, sub_shutdown).await });
        }

        tracing::info!(subscriptions = subscriptions.len(), "job runtime: all subscriptions open");

        let mut disconnected = false;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    subscriptions.shutdown().await;
                    return;
                }
                joined = subscriptions.join_next() => {
                    match joined {
                        None => break,
                        Some(Ok(Ok(()))) => {}
                        Some(Ok(Err(err))) => {
                            tracing::warn!(%err, "job runtime: subscription failed, reconnecting all");
                            disconnected = true;
                        }
                        Some(Err(join_err)) => {
                            tracing::error!(%join_err, "job runtime: subscription task panicked, reconnecting all");
                            disconnected = true;
                        }
                    }
                }
            }
        }

        subscriptions.shutdown().await;

        if disconnected {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            }
        }
    }
}
