//! Durable artifact storage: key layout and the upload adapter.
//!
//! Keys follow the versioned layout
//! `v2/{users/<userId>|anonymous}/<designId>/<filename>`. Keys from the
//! pre-versioned era lack the `v2` segment and are parsed positionally
//! on a best-effort basis.

use std::path::Path;

use async_trait::async_trait;

use crate::error::PipelineError;

pub const SCHEME_VERSION: &str = "v2";
pub const ANONYMOUS_USER: &str = "anonymous";

/// Destination for local artifacts. Upload failures surface as
/// `StorageUnavailable`; retrying is the caller's decision per site.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload a local file under `key`, returning its durable URL.
    async fn put(&self, local_path: &Path, key: &str) -> Result<String, PipelineError>;
}

pub struct HttpBlobStore {
    client: reqwest::Client,
    endpoint: String,
    public_base: String,
}

impl HttpBlobStore {
    pub fn new(client: reqwest::Client, endpoint: String, public_base: String) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, local_path: &Path, key: &str) -> Result<String, PipelineError> {
        let body = tokio::fs::read(local_path)
            .await
            .map_err(|e| PipelineError::StorageUnavailable {
                key: key.to_string(),
                reason: format!("cannot read {}: {}", local_path.display(), e),
            })?;
        let url = format!("{}/{}", self.endpoint, key);
        let resp = self
            .client
            .put(&url)
            .body(body)
            .send()
            .await
            .map_err(|e| PipelineError::StorageUnavailable {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(PipelineError::StorageUnavailable {
                key: key.to_string(),
                reason: format!("backend returned {}", resp.status()),
            });
        }
        log::info!("Uploaded {} -> {}", local_path.display(), key);
        Ok(format!("{}/{}", self.public_base, key))
    }
}

/// Deterministic storage key for an artifact. Pure and total; inputs
/// are treated as opaque path segments.
pub fn compute_storage_key(user_id: &str, design_id: &str, filename: &str) -> String {
    if user_id.is_empty() || user_id == ANONYMOUS_USER {
        format!(
            "{}/{}/{}/{}",
            SCHEME_VERSION, ANONYMOUS_USER, design_id, filename
        )
    } else {
        format!(
            "{}/users/{}/{}/{}",
            SCHEME_VERSION, user_id, design_id, filename
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub user_id: String,
    pub design_id: String,
    pub filename: String,
}

/// Recover `(userId, designId, filename)` from a key or a full URL.
///
/// Keys produced by [`compute_storage_key`] parse exactly. Legacy keys
/// (no `v2` segment) fall back to positional heuristics: the last two
/// segments are the design folder and filename, and the user id is the
/// segment following a `users` marker when one sits at the expected
/// offset. Legacy URLs with unexpected depth can mis-derive the user
/// id; treat legacy results as best-effort.
pub fn parse_storage_key(input: &str) -> Option<ParsedKey> {
    let path = strip_url_prefix(input);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if let Some(v2_at) = segments.iter().position(|s| *s == SCHEME_VERSION) {
        let rest = &segments[v2_at + 1..];
        return match rest {
            [a, design, filename] if *a == ANONYMOUS_USER => Some(ParsedKey {
                user_id: ANONYMOUS_USER.to_string(),
                design_id: (*design).to_string(),
                filename: (*filename).to_string(),
            }),
            [marker, user, design, filename] if *marker == "users" => Some(ParsedKey {
                user_id: (*user).to_string(),
                design_id: (*design).to_string(),
                filename: (*filename).to_string(),
            }),
            _ => None,
        };
    }

    // Legacy shape, positional.
    if segments.len() < 2 {
        return None;
    }
    let filename = segments[segments.len() - 1].to_string();
    let design_id = segments[segments.len() - 2].to_string();
    let user_id = if segments.len() >= 4 && segments[segments.len() - 4] == "users" {
        segments[segments.len() - 3].to_string()
    } else {
        ANONYMOUS_USER.to_string()
    };
    Some(ParsedKey {
        user_id,
        design_id,
        filename,
    })
}

fn strip_url_prefix(input: &str) -> &str {
    let without_scheme = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"));
    match without_scheme {
        Some(rest) => match rest.find('/') {
            Some(slash) => &rest[slash + 1..],
            None => "",
        },
        None => input,
    }
}
