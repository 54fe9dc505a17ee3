//! Shared application state: configuration, the HTTP client, and the
//! run entrypoints the handlers call.

use std::sync::Arc;
use std::time::Duration;

use crate::artifacts::HttpFetcher;
use crate::config::GatewayConfig;
use crate::io_struct::{ConvertReqInput, GenerateReqInput};
use crate::model_client::HttpModelService;
use crate::pipeline::{self, ConvertOutcome, GenerateOutcome, PipelineDeps, RunFailure};
use crate::stl::CommandGeometryEngine;
use crate::storage::HttpBlobStore;

pub struct AppState {
    pub config: GatewayConfig,
    client: reqwest::Client,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.work_dir)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    // The job service is per-run: the session handshake it performs is
    // scoped to one run and must not leak across concurrent runs.
    fn run_deps(&self) -> PipelineDeps {
        PipelineDeps {
            fetcher: Arc::new(HttpFetcher::new(self.client.clone())),
            jobs: Arc::new(HttpModelService::new(
                self.client.clone(),
                self.config.model_base_url.clone(),
                Duration::from_millis(self.config.poll_interval_ms),
            )),
            store: Arc::new(HttpBlobStore::new(
                self.client.clone(),
                self.config.storage_endpoint.clone(),
                self.config.public_base_url.clone(),
            )),
            geometry: Arc::new(CommandGeometryEngine::new(
                self.config.mesh_import_command.clone(),
                Duration::from_secs(self.config.timeouts.mesh_import_secs),
            )),
        }
    }

    pub async fn generate(&self, req: GenerateReqInput) -> Result<GenerateOutcome, RunFailure> {
        pipeline::run_generate(&self.config, &self.run_deps(), &req).await
    }

    pub async fn convert(&self, req: ConvertReqInput) -> Result<ConvertOutcome, RunFailure> {
        pipeline::run_convert(&self.config, &self.run_deps(), &req).await
    }
}
