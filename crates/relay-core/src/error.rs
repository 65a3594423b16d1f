use thiserror::Error;

/// The worker's crate-wide error taxonomy (see SPEC_FULL.md §7).
///
/// Handler code returns `RelayError::Retriable` or `RelayError::Terminal` for
/// business failures; the job runtime is the only place these are turned into
/// a `JobOutcome` (`relay_core::job::JobOutcome`), which keeps the
/// exactly-one-outcome invariant mechanically enforceable at one call site.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Transport hiccup (SSH dial, engine RPC disconnect, HTTP 5xx, timeout).
    /// Caught and retried by C2/C6; never reported to the engine directly.
    #[error("transient: {0}")]
    Transient(String),

    /// A handler failed in a way that should consume a retry.
    #[error("{0}")]
    Retriable(String),

    /// A handler failed on its last retry; becomes a BpmnError.
    /// `code` is used verbatim as the BPMN error code.
    #[error("{code}: {message}")]
    Terminal { code: String, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("remote command timed out after {0:?}")]
    RemoteTimeout(std::time::Duration),

    #[error("remote command failed: {0}")]
    RemoteCommandFailed(String),

    #[error("http error ({status}): {message}")]
    Http { status: u16, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// The exception-class-name-like tag the job runtime uses as a BPMN error
    /// code when this error surfaces on the last retry (§4.6, §8 invariant 2).
    pub fn class_name(&self) -> &'static str {
        match self {
            RelayError::Transient(_) => "Transient",
            RelayError::Retriable(_) => "Retriable",
            RelayError::Terminal { .. } => "Terminal",
            RelayError::Auth(_) => "Auth",
            RelayError::Validation(_) => "Validation",
            RelayError::Config(_) => "Config",
            RelayError::RemoteTimeout(_) => "RemoteTimeout",
            RelayError::RemoteCommandFailed(_) => "RemoteCommandFailed",
            RelayError::Http { .. } => "HttpError",
            RelayError::Io(_) => "IoError",
        }
    }

    /// The explicit BPMN error code for `Terminal` errors, falling back to
    /// `class_name()` for every other variant.
    pub fn bpmn_code(&self) -> String {
        match self {
            RelayError::Terminal { code, .. } => code.clone(),
            other => other.class_name().to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_name_matches_variant() {
        assert_eq!(
            RelayError::RemoteCommandFailed("x".into()).class_name(),
            "RemoteCommandFailed"
        );
    }

    #[test]
    fn terminal_uses_explicit_code() {
        let err = RelayError::Terminal {
            code: "IncompleteRunbot".into(),
            message: "missing enterprise sha".into(),
        };
        assert_eq!(err.bpmn_code(), "IncompleteRunbot");
    }
}
