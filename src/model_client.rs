//! Client for the remote model service: session handshake, job
//! submission, and bounded polling for results.
//!
//! The service occasionally fails on its own result-reporting path
//! after the computation has already produced output; when the failure
//! text carries the known marker and a result payload was captured from
//! an earlier poll, the captured payload is returned as success.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{PipelineError, is_ambiguous_report};
use crate::io_struct::SingleOrBatch;

#[derive(Debug, Clone)]
pub struct SessionId(pub String);

/// Remote file reference returned by an asset upload, passed back to
/// the service as a stage parameter.
#[derive(Debug, Clone)]
pub struct AssetRef(pub String);

/// Result payload of a completed job: one or more remote artifact URLs
/// in the order the service produced them.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub artifacts: Vec<String>,
}

/// An in-flight remote computation.
#[async_trait]
pub trait JobHandle: Send {
    /// Block until the job completes or `budget` elapses. A timeout is
    /// reported as `Timeout`, distinct from a remote-reported failure.
    async fn wait(self: Box<Self>, budget: Duration) -> Result<JobOutput, PipelineError>;
}

#[async_trait]
pub trait JobService: Send + Sync {
    /// Stateful handshake; must complete before the first submit of a
    /// run. A failure carrying the ambiguous-report marker is
    /// tolerated, anything else is fatal to the run.
    async fn start_session(&self) -> Result<SessionId, PipelineError>;

    /// Push a local file to the service, returning its remote ref.
    async fn upload_asset(&self, local_path: &Path) -> Result<AssetRef, PipelineError>;

    /// Non-blocking job submission.
    async fn submit(
        &self,
        operation: &str,
        params: Value,
    ) -> Result<Box<dyn JobHandle>, PipelineError>;
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    event_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    path: String,
}

#[derive(Debug, Deserialize)]
pub struct JobStatusDoc {
    pub status: String,
    #[serde(default)]
    pub result: Option<JobResultDoc>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobResultDoc {
    pub artifacts: SingleOrBatch<String>,
}

/// One poll step: capture any result payload, then decide whether the
/// job is done. `Ok(None)` means keep polling.
pub fn evaluate_poll(
    doc: JobStatusDoc,
    operation: &str,
    captured: &mut Option<JobOutput>,
) -> Result<Option<JobOutput>, PipelineError> {
    if let Some(result) = doc.result {
        *captured = Some(JobOutput {
            artifacts: result.artifacts.into_vec(),
        });
    }
    match doc.status.as_str() {
        "complete" => match captured.take() {
            Some(output) => Ok(Some(output)),
            None => Err(PipelineError::RemoteTerminal {
                operation: operation.to_string(),
                message: "job completed without a result payload".to_string(),
            }),
        },
        "failed" => {
            let message = doc.error.unwrap_or_else(|| "unknown failure".to_string());
            if is_ambiguous_report(&message) {
                if let Some(output) = captured.take() {
                    log::warn!(
                        "{}: reporting-only failure after a result was captured, \
                         treating as success: {}",
                        operation,
                        message
                    );
                    return Ok(Some(output));
                }
                return Err(PipelineError::RemoteAmbiguous {
                    operation: operation.to_string(),
                    message,
                });
            }
            Err(PipelineError::RemoteTerminal {
                operation: operation.to_string(),
                message,
            })
        }
        _ => Ok(None),
    }
}

/// Decide what a failed handshake response means. The known
/// reporting-only failure is tolerated with a synthesized session
/// token; anything else is fatal to the run.
fn recover_session_failure(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<String, PipelineError> {
    if is_ambiguous_report(body) {
        log::warn!(
            "start_session reported a client-side failure ({}), continuing: {}",
            status,
            body
        );
        return Ok(format!(
            "recovered-{}",
            chrono::Utc::now().timestamp_millis()
        ));
    }
    Err(PipelineError::RemoteTerminal {
        operation: "start_session".to_string(),
        message: format!("status {}: {}", status, body),
    })
}

pub struct HttpModelService {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    // Session token for this run; one service instance per run.
    session: Mutex<Option<String>>,
}

impl HttpModelService {
    pub fn new(client: reqwest::Client, base_url: String, poll_interval: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
            session: Mutex::new(None),
        }
    }

    fn session_token(&self) -> Option<String> {
        match self.session.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_session(&self, token: String) {
        match self.session.lock() {
            Ok(mut guard) => *guard = Some(token),
            Err(poisoned) => *poisoned.into_inner() = Some(token),
        }
    }
}

#[async_trait]
impl JobService for HttpModelService {
    async fn start_session(&self) -> Result<SessionId, PipelineError> {
        let url = format!("{}/call/start_session", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let token = recover_session_failure(status, &body)?;
            self.store_session(token.clone());
            return Ok(SessionId(token));
        }
        let session: SessionResponse = resp.json().await?;
        self.store_session(session.session_id.clone());
        Ok(SessionId(session.session_id))
    }

    async fn upload_asset(&self, local_path: &Path) -> Result<AssetRef, PipelineError> {
        let body =
            tokio::fs::read(local_path)
                .await
                .map_err(|e| PipelineError::RemoteTerminal {
                    operation: "upload_asset".to_string(),
                    message: format!("cannot read {}: {}", local_path.display(), e),
                })?;
        let url = format!("{}/upload", self.base_url);
        let resp = self.client.post(&url).body(body).send().await?;
        if !resp.status().is_success() {
            return Err(PipelineError::RemoteTerminal {
                operation: "upload_asset".to_string(),
                message: format!("status {}", resp.status()),
            });
        }
        let uploaded: UploadResponse = resp.json().await?;
        Ok(AssetRef(uploaded.path))
    }

    async fn submit(
        &self,
        operation: &str,
        mut params: Value,
    ) -> Result<Box<dyn JobHandle>, PipelineError> {
        if let (Some(token), Some(obj)) = (self.session_token(), params.as_object_mut()) {
            obj.insert("session_id".to_string(), Value::String(token));
        }
        let url = format!("{}/call/{}", self.base_url, operation);
        let resp = self.client.post(&url).json(&params).send().await?;
        if !resp.status().is_success() {
            return Err(PipelineError::RemoteTerminal {
                operation: operation.to_string(),
                message: format!("submit failed with status {}", resp.status()),
            });
        }
        let submitted: SubmitResponse = resp.json().await?;
        log::info!("Submitted {} as job {}", operation, submitted.event_id);
        Ok(Box::new(HttpJobHandle {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            poll_interval: self.poll_interval,
            operation: operation.to_string(),
            event_id: submitted.event_id,
        }))
    }
}

pub struct HttpJobHandle {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    operation: String,
    event_id: String,
}

impl HttpJobHandle {
    async fn poll_until_done(&self) -> Result<JobOutput, PipelineError> {
        let url = format!("{}/status/{}", self.base_url, self.event_id);
        let mut captured: Option<JobOutput> = None;
        loop {
            let resp = self.client.get(&url).send().await?;
            if !resp.status().is_success() {
                return Err(PipelineError::RemoteTerminal {
                    operation: self.operation.clone(),
                    message: format!("status poll failed with {}", resp.status()),
                });
            }
            let doc: JobStatusDoc = resp.json().await?;
            if let Some(output) = evaluate_poll(doc, &self.operation, &mut captured)? {
                return Ok(output);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl JobHandle for HttpJobHandle {
    async fn wait(self: Box<Self>, budget: Duration) -> Result<JobOutput, PipelineError> {
        match tokio::time::timeout(budget, self.poll_until_done()).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout {
                stage: self.operation.clone(),
                budget_secs: budget.as_secs(),
            }),
        }
    }
}
