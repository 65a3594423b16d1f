//! Per-task-type subscription: stream `ActivateJobs`, dispatch each activated
//! job to its handler under a concurrency semaphore, report the outcome back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use relay_core::{Job, JobOutcome, Result};
use tokio::sync::{broadcast, Semaphore};

use crate::handlers::HandlerEntry;
use crate::pipeline::channel::gateway_protocol::{
    ActivateJobsRequest, CompleteJobRequest, FailJobRequest, ThrowErrorRequest,
};
use crate::pipeline::channel::EngineClient;

const WORKER_NAME: &str = "relay";
const MAX_JOBS_TO_ACTIVATE: i32 = 32;
const TIMEOUT_GUARD: Duration = Duration::from_secs(5);

fn decode_job(raw: crate::pipeline::channel::gateway_protocol::ActivatedJob) -> Job {
    let variables = serde_json::from_str(&raw.variables).unwrap_or_default();
    let custom_headers: HashMap<String, String> =
        serde_json::from_str(&raw.custom_headers).unwrap_or_default();
    let deadline = SystemTime::UNIX_EPOCH + Duration::from_millis(raw.deadline.max(0) as u64);

    Job {
        key: raw.key,
        r#type: raw.r#type,
        variables,
        custom_headers,
        retries_remaining: raw.retries.max(0) as u32,
        process_instance_key: raw.process_instance_key,
        element_instance_key: raw.element_instance_key,
        element_id: raw.element_id,
        bpmn_process_id: raw.bpmn_process_id,
        deadline,
    }
}

async fn report_outcome(client: &mut EngineClient, job: &Job, outcome: JobOutcome) {
    let result = match outcome {
        JobOutcome::Completed(vars) => {
            let variables = serde_json::to_string(&vars).unwrap_or_else(|_| "{}".to_string());
            client
                .complete_job(CompleteJobRequest { job_key: job.key, variables })
                .await
                .map(drop)
        }
        JobOutcome::Failed(message) => {
            client
                .fail_job(FailJobRequest {
                    job_key: job.key,
                    retries: (job.retries_remaining.saturating_sub(1)) as i32,
                    error_message: message,
                    retry_back_off: 0,
                })
                .await
                .map(drop)
        }
        JobOutcome::BpmnError { code, message } => {
            client
                .throw_error(ThrowErrorRequest {
                    job_key: job.key,
                    error_code: code,
                    error_message: message,
                })
                .await
                .map(drop)
        }
    };

    if let Err(status) = result {
        tracing::error!(job_key = job.key, %status, "failed to report job outcome to engine");
    }
}

/// Run one task-type's subscription until the stream ends or shutdown fires.
/// Returns `Ok(())` on a clean stream end (caller reconnects), `Err` on a
/// transport failure the caller should treat as a disconnect.
pub(crate) async fn run_subscription(
    mut client: EngineClient,
    entry: HandlerEntry,
    ctx: crate::handlers::HandlerCtx,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let task_type = entry.meta.task_type;
    let semaphore = Arc::new(Semaphore::new(entry.meta.max_concurrent_jobs));

    let request = ActivateJobsRequest {
        r#type: task_type.to_string(),
        worker: WORKER_NAME.to_string(),
        timeout: entry.meta.timeout.as_millis() as i64,
        max_jobs_to_activate: MAX_JOBS_TO_ACTIVATE,
        fetch_variable: Vec::new(),
        request_timeout: entry.meta.timeout.as_millis() as i64,
    };

    let span = tracing::info_span!("job_subscription", task_type);
    let _enter = span.enter();

    let mut stream = client
        .activate_jobs(request)
        .await
        .map_err(|e| relay_core::RelayError::Transient(format!("activate_jobs: {e}")))?
        .into_inner();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(task_type, "subscription shutting down");
                return Ok(());
            }
            next = tokio_stream::StreamExt::next(&mut stream) => {
                let Some(next) = next else {
                    tracing::warn!(task_type, "activation stream ended");
                    return Ok(());
                };
                let response = next.map_err(|e| relay_core::RelayError::Transient(format!("activation stream: {e}")))?;

                for raw_job in response.jobs {
                    let job = decode_job(raw_job);
                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                    let handler = entry.handler.clone();
                    let middleware = entry.meta.middleware;
                    let ctx = ctx.clone();
                    let mut report_client = client.clone();

                    tokio::spawn(async move {
                        let _permit = permit;
                        let job_span = tracing::info_span!(
                            "job_invocation",
                            job.key = job.key,
                            job.r#type = %job.r#type,
                            process_instance_key = job.process_instance_key,
                        );
                        let _enter = job_span.enter();

                        let job = middleware.map(|f| f(job.clone())).unwrap_or(job);
                        let retries_remaining = job.retries_remaining;
                        let budget = job.time_budget(TIMEOUT_GUARD);
                        let variables = job.variables.clone();

                        let result = match tokio::time::timeout(budget, handler(ctx, variables)).await {
                            Ok(result) => result,
                            Err(_) => Err(relay_core::RelayError::Transient(format!(
                                "handler for {} exceeded its time budget",
                                job.r#type
                            ))),
                        };

                        let outcome = JobOutcome::from_handler_result(result, retries_remaining);
                        report_outcome(&mut report_client, &job, outcome).await;
                    });
                }
            }
        }
    }
}
