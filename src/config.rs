//! Configuration surface for the gateway.
//!
//! Everything tunable flows in here at construction time; there is no
//! process-global mutable state. `main.rs` fills this from CLI flags.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Base URL of the remote model service (job submission + polling).
    pub model_base_url: String,
    /// Base URL the blob store accepts PUTs under.
    pub storage_endpoint: String,
    /// Base URL under which uploaded artifacts are publicly reachable.
    pub public_base_url: String,
    /// Command invoked to triangulate a mesh asset for STL conversion.
    pub mesh_import_command: String,
    /// Directory for per-run temporary artifacts.
    pub work_dir: PathBuf,
    /// Per-request timeout on the shared HTTP client, seconds.
    pub http_timeout_secs: u64,
    /// Interval between job status polls, milliseconds.
    pub poll_interval_ms: u64,
    /// Settle delay between the generate and extract stages, seconds.
    pub settle_delay_secs: u64,
    pub retry: RetryConfig,
    pub timeouts: StageTimeouts,
    pub generation: GenerationParams,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            model_base_url: "http://localhost:7860".to_string(),
            storage_endpoint: "http://localhost:9000/artifacts".to_string(),
            public_base_url: "http://localhost:9000/artifacts".to_string(),
            mesh_import_command: "mesh-import".to_string(),
            work_dir: std::env::temp_dir().join("img3d-gateway"),
            http_timeout_secs: 600,
            poll_interval_ms: 1000,
            settle_delay_secs: 5,
            retry: RetryConfig::default(),
            timeouts: StageTimeouts::default(),
            generation: GenerationParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
        }
    }
}

/// Per-stage wait budgets. Design values, not physics: these bound how
/// long a single `wait` on the corresponding remote job may block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTimeouts {
    pub preprocess_secs: u64,
    pub generate_secs: u64,
    pub extract_secs: u64,
    /// Budget for the local mesh-import command during conversion.
    pub mesh_import_secs: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            preprocess_secs: 300,
            generate_secs: 420,
            extract_secs: 300,
            mesh_import_secs: 300,
        }
    }
}

/// Sampler and extraction parameters forwarded to the model service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub seed: u64,
    pub ss_guidance_strength: f64,
    pub ss_sampling_steps: u32,
    pub slat_guidance_strength: f64,
    pub slat_sampling_steps: u32,
    pub multiimage_algo: String,
    /// Mesh simplification ratio for the extract stage.
    pub simplify: f64,
    pub texture_size: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            seed: 0,
            ss_guidance_strength: 7.5,
            ss_sampling_steps: 12,
            slat_guidance_strength: 3.0,
            slat_sampling_steps: 12,
            multiimage_algo: "stochastic".to_string(),
            simplify: 0.95,
            texture_size: 1024,
        }
    }
}
