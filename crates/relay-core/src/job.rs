//! The job data model (SPEC_FULL.md §3) and the dispatcher-facing outcome type.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde_json::Value;

/// The unit the engine hands to the runtime.
#[derive(Debug, Clone)]
pub struct Job {
    pub key: i64,
    pub r#type: String,
    pub variables: HashMap<String, Value>,
    pub custom_headers: HashMap<String, String>,
    pub retries_remaining: u32,
    pub process_instance_key: i64,
    pub element_instance_key: i64,
    pub element_id: String,
    pub bpmn_process_id: String,
    pub deadline: SystemTime,
}

impl Job {
    /// Wall-clock time left before the engine considers this job timed out,
    /// minus a small guard margin so the runtime can still report an outcome.
    pub fn time_budget(&self, guard: Duration) -> Duration {
        self.deadline
            .duration_since(SystemTime::now())
            .unwrap_or_default()
            .saturating_sub(guard)
    }

    /// True once this is the job's last retry attempt (§4.6 outcome mapping).
    pub fn is_last_attempt(&self) -> bool {
        self.retries_remaining <= 1
    }
}

/// Variables produced by a successfully-completed job.
pub type Variables = HashMap<String, Value>;

/// A sum of the three outcomes a leased job can be reported with (§3).
///
/// Exactly one of these is produced per job (invariant 1, §8). Handlers never
/// construct this directly — they return `relay_core::Result<Variables>` and
/// the job runtime's outcome-mapping step (`JobOutcome::from_handler_result`)
/// is the only place a `RelayError` becomes one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Variables),
    Failed(String),
    BpmnError { code: String, message: String },
}

impl JobOutcome {
    /// Map a handler's result to an outcome per the rules in §4.6:
    /// success -> Completed; failure with retries left -> Failed; failure on
    /// the last retry -> BpmnError carrying the error's class name.
    pub fn from_handler_result(
        result: crate::error::Result<Variables>,
        retries_remaining: u32,
    ) -> Self {
        match result {
            Ok(vars) => JobOutcome::Completed(vars),
            Err(err) => {
                if retries_remaining <= 1 {
                    JobOutcome::BpmnError {
                        code: err.bpmn_code(),
                        message: truncate(&err.to_string(), 6000),
                    }
                } else {
                    JobOutcome::Failed(format!("Failed job. Error: {}", err))
                }
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let boundary = s.char_indices().nth(max).map(|(i, _)| i).unwrap_or(s.len());
        format!("{}...", &s[..boundary])
    }
}

/// stdout/stderr/exit-code of a remote command (§3).
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Raise `RemoteCommandFailed` with the trimmed stderr if this command
    /// exited non-zero; otherwise pass the result through unchanged (§4.3).
    pub fn check(self) -> crate::error::Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(crate::error::RelayError::RemoteCommandFailed(
                self.stderr_str().trim().to_string(),
            ))
        }
    }
}

/// Pre-invocation transform applied to a job before parameter extraction
/// (§4.6 step 1). Pure `Job -> Job`.
pub type Middleware = fn(Job) -> Job;

/// A registered handler: task-type, timeout, concurrency cap, and optional
/// middleware (§3 HandlerRegistration). The handler function itself lives in
/// `relay_runtime::jobs::registry::HandlerFn` since it needs the IO clients
/// from that crate; this type only carries the declarative metadata.
#[derive(Clone)]
pub struct HandlerMeta {
    pub task_type: &'static str,
    pub timeout: Duration,
    pub max_concurrent_jobs: usize,
    pub middleware: Option<Middleware>,
}

impl HandlerMeta {
    pub fn new(task_type: &'static str, timeout: Duration, max_concurrent_jobs: usize) -> Self {
        Self {
            task_type,
            timeout,
            max_concurrent_jobs,
            middleware: None,
        }
    }

    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middleware = Some(middleware);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;

    fn job(retries_remaining: u32) -> Job {
        Job {
            key: 1,
            r#type: "git-pull".into(),
            variables: HashMap::new(),
            custom_headers: HashMap::new(),
            retries_remaining,
            process_instance_key: 1,
            element_instance_key: 1,
            element_id: "Task_1".into(),
            bpmn_process_id: "deploy".into(),
            deadline: SystemTime::now() + Duration::from_secs(60),
        }
    }

    #[test]
    fn completed_on_success() {
        let outcome = JobOutcome::from_handler_result(Ok(Variables::new()), 3);
        assert_eq!(outcome, JobOutcome::Completed(Variables::new()));
    }

    #[test]
    fn failed_when_retries_remain() {
        let err = RelayError::RemoteCommandFailed("network".into());
        let outcome = JobOutcome::from_handler_result(Err(err), 3);
        match outcome {
            JobOutcome::Failed(msg) => assert!(msg.contains("network")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn bpmn_error_on_last_retry() {
        let err = RelayError::RemoteCommandFailed("network".into());
        let outcome = JobOutcome::from_handler_result(Err(err), 1);
        match outcome {
            JobOutcome::BpmnError { code, .. } => assert_eq!(code, "RemoteCommandFailed"),
            other => panic!("expected BpmnError, got {other:?}"),
        }
    }

    #[test]
    fn is_last_attempt_boundary() {
        assert!(job(1).is_last_attempt());
        assert!(job(0).is_last_attempt());
        assert!(!job(2).is_last_attempt());
    }

    #[test]
    fn truncate_does_not_panic_on_multibyte_boundary() {
        let message = "конфлікт ".repeat(1000);
        let err = RelayError::RemoteCommandFailed(message);
        let outcome = JobOutcome::from_handler_result(Err(err), 1);
        match outcome {
            JobOutcome::BpmnError { message, .. } => assert!(message.ends_with("...")),
            other => panic!("expected BpmnError, got {other:?}"),
        }
    }
}
