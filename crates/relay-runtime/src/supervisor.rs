//! C9: composes the job runtime (C6) and the webhook server (C8) as two
//! independently-supervised tasks (§4.9).
//!
//! Grounded on the teacher's `cluster/shutdown.rs` `GracefulShutdown`: a
//! `broadcast::Sender<()>` every long-running task subscribes to, driven by
//! `tokio::signal`, with a bounded drain grace period. Crash-restart with a
//! fixed backoff is this worker's addition — the teacher's dispatcher is
//! restarted externally by its process supervisor, but a long-lived CI/CD
//! worker must survive a single handler panic or transport exception itself.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::gateway::{router, GatewayState};
use crate::jobs::{run_job_runtime, JobRuntimeConfig};

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);
const RESTART_BACKOFF: Duration = Duration::from_secs(5);

pub struct Supervisor {
    job_runtime: JobRuntimeConfig,
    gateway_state: GatewayState,
    webhook_addr: SocketAddr,
}

impl Supervisor {
    pub fn new(job_runtime: JobRuntimeConfig, gateway_state: GatewayState, webhook_addr: SocketAddr) -> Self {
        Self { job_runtime, gateway_state, webhook_addr }
    }

    /// Runs both tasks until SIGINT/SIGTERM, restarting either one after a
    /// crash with a fixed backoff, then drains for up to the grace period.
    pub async fn run(self) {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let job_runtime = self.job_runtime.clone();
        let job_shutdown = shutdown_tx.subscribe();
        let jobs_task = tokio::spawn(supervised_loop("job-runtime", job_shutdown, shutdown_tx.clone(), move |shutdown| {
            let job_runtime = job_runtime.clone();
            Box::pin(async move {
                run_job_runtime(job_runtime, shutdown).await;
                Ok(())
            })
        }));

        let gateway_state = self.gateway_state.clone();
        let webhook_addr = self.webhook_addr;
        let webhook_shutdown = shutdown_tx.subscribe();
        let webhook_task = tokio::spawn(supervised_loop("webhook-server", webhook_shutdown, shutdown_tx.clone(), move |shutdown| {
            let gateway_state = gateway_state.clone();
            Box::pin(async move { run_webhook_server(gateway_state, webhook_addr, shutdown).await })
        }));

        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, draining");
        let _ = shutdown_tx.send(());

        let drain = tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, async {
            let _ = jobs_task.await;
            let _ = webhook_task.await;
        });
        if drain.await.is_err() {
            tracing::warn!("shutdown grace period elapsed with tasks still draining");
        }
    }
}

type TaskFuture = std::pin::Pin<Box<dyn std::future::Future<Output = relay_core::Result<()>> + Send>>;

/// Runs `task` to completion in its own spawned task; if it returns an error
/// OR panics (and shutdown was not requested), waits the fixed backoff and
/// restarts it. A clean return, or any return once shutdown has been
/// signalled, ends the loop. Spawning `make_task` separately from the loop
/// itself means a panic inside the task only fails that `JoinHandle` — it
/// does not unwind through `supervised_loop` and kill the outer task this
/// loop runs in, the same protection `jobs/supervisor.rs`'s `JoinSet` gives
/// individual subscriptions.
async fn supervised_loop<F>(name: &'static str, mut shutdown: broadcast::Receiver<()>, shutdown_tx: broadcast::Sender<()>, mut make_task: F)
where
    F: FnMut(broadcast::Receiver<()>) -> TaskFuture,
{
    loop {
        let task_shutdown = shutdown_tx.subscribe();
        let result = tokio::spawn(make_task(task_shutdown)).await;

        if shutdown.try_recv().is_ok() {
            return;
        }

        match result {
            Ok(Ok(())) => return,
            Ok(Err(err)) => {
                tracing::error!(task = name, %err, "task failed, restarting after backoff");
            }
            Err(join_err) => {
                tracing::error!(task = name, %join_err, "task panicked, restarting after backoff");
            }
        }

        tokio::select! {
            _ = shutdown.recv() => return,
            _ = tokio::time::sleep(RESTART_BACKOFF) => {}
        }
    }
}

async fn run_webhook_server(state: GatewayState, addr: SocketAddr, mut shutdown: broadcast::Receiver<()>) -> relay_core::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(relay_core::RelayError::Io)?;

    tracing::info!(%addr, "webhook server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .map_err(relay_core::RelayError::Io)
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// `make_task` panics on its first call. If the panic unwound through
    /// `supervised_loop` it would kill the `tokio::spawn`'d task running this
    /// test's call to `supervised_loop` itself, and the `JoinHandle::await`
    /// below would observe a panic rather than a clean return — proving the
    /// isolation fix actually isolates, not just that it compiles.
    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_task_is_isolated_and_loop_still_shuts_down() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let shutdown_rx = shutdown_tx.subscribe();

        let loop_calls = calls.clone();
        let loop_shutdown_tx = shutdown_tx.clone();
        let handle = tokio::spawn(supervised_loop("test-task", shutdown_rx, loop_shutdown_tx, move |_shutdown| {
            let calls = loop_calls.clone();
            Box::pin(async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("boom");
                }
                Ok(())
            })
        }));

        // Unblocks the post-panic backoff select immediately instead of
        // waiting out RESTART_BACKOFF, then lets the loop see the shutdown
        // flag and return.
        let _ = shutdown_tx.send(());

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervised_loop did not return after shutdown")
            .expect("supervised_loop task panicked instead of isolating the inner panic");

        assert!(calls.load(Ordering::SeqCst) >= 1, "task should have been invoked at least once");
    }
}
