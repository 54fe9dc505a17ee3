//! Error taxonomy for pipeline runs.
//!
//! Every failure a run can surface is one of these variants; the HTTP
//! layer maps `InvalidRequest` to 400 and everything else to 500 with
//! the variant name as `error_type`.

/// Marker text the model service emits when its client-side reporting
/// layer fails after a result was already produced. Matching on the
/// message text is brittle but is the only signal the service gives
/// today; replace with a typed field once the service exposes one.
pub const AMBIGUOUS_REPORT_MARKER: &str = "verbose error reporting";

/// True when a remote error message is the reporting-only failure that
/// can coincide with an already-produced valid result.
pub fn is_ambiguous_report(message: &str) -> bool {
    message.contains(AMBIGUOUS_REPORT_MARKER)
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("{stage} timed out after {budget_secs}s")]
    Timeout { stage: String, budget_secs: u64 },

    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("Model service reported a failure for {operation}: {message}")]
    RemoteTerminal { operation: String, message: String },

    #[error("Model service lost the result report for {operation}: {message}")]
    RemoteAmbiguous { operation: String, message: String },

    #[error("Storage backend unavailable for {key}: {reason}")]
    StorageUnavailable { key: String, reason: String },

    #[error("Mesh has no faces")]
    EmptyMesh,

    #[error("Failed to write mesh stream: {0}")]
    WriteError(#[source] std::io::Error),
}

impl PipelineError {
    /// Transient network-class failures worth a backoff-and-retry.
    /// Everything else still consumes the retry budget (matching the
    /// observed behavior of the service being replaced) but is logged
    /// as a terminal failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Download { .. } | PipelineError::Network { .. }
        )
    }

    /// Stable variant name used as `error_type` in 500 responses.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidRequest { .. } => "invalid_request",
            PipelineError::Timeout { .. } => "timeout",
            PipelineError::Download { .. } => "download",
            PipelineError::Network { .. } => "network",
            PipelineError::RemoteTerminal { .. } => "remote_terminal",
            PipelineError::RemoteAmbiguous { .. } => "remote_ambiguous",
            PipelineError::StorageUnavailable { .. } => "storage_unavailable",
            PipelineError::EmptyMesh => "empty_mesh",
            PipelineError::WriteError(_) => "write_error",
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        PipelineError::InvalidRequest {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Network {
            reason: err.to_string(),
        }
    }
}
