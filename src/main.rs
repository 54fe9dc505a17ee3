use clap::Parser;
use tokio::signal;

use img3d_gateway::app_state::AppState;
use img3d_gateway::config::{GatewayConfig, RetryConfig, StageTimeouts};
use img3d_gateway::server;

#[derive(Debug, Parser)]
#[command(name = "img3d-gateway", about = "Image-to-3D asset generation gateway")]
struct CliArgs {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Base URL of the remote model service.
    #[arg(long, default_value = "http://localhost:7860")]
    model_url: String,
    /// Blob store endpoint accepting PUT uploads.
    #[arg(long, default_value = "http://localhost:9000/artifacts")]
    storage_endpoint: String,
    /// Public base URL for uploaded artifacts.
    #[arg(long, default_value = "http://localhost:9000/artifacts")]
    public_base_url: String,
    /// External command used to triangulate meshes for STL conversion.
    #[arg(long, default_value = "mesh-import")]
    mesh_import_command: String,
    /// Directory for run-local temporary files.
    #[arg(long)]
    work_dir: Option<std::path::PathBuf>,
    #[arg(long, default_value_t = 600)]
    http_timeout_secs: u64,
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,
    #[arg(long, default_value_t = 1000)]
    retry_initial_delay_ms: u64,
    #[arg(long, default_value_t = 300)]
    preprocess_timeout_secs: u64,
    #[arg(long, default_value_t = 420)]
    generate_timeout_secs: u64,
    #[arg(long, default_value_t = 300)]
    extract_timeout_secs: u64,
    #[arg(long, default_value_t = 300)]
    mesh_import_timeout_secs: u64,
}

impl CliArgs {
    fn into_config(self) -> GatewayConfig {
        let defaults = GatewayConfig::default();
        GatewayConfig {
            host: self.host,
            port: self.port,
            model_base_url: self.model_url,
            storage_endpoint: self.storage_endpoint,
            public_base_url: self.public_base_url,
            mesh_import_command: self.mesh_import_command,
            work_dir: self.work_dir.unwrap_or_else(|| defaults.work_dir.clone()),
            http_timeout_secs: self.http_timeout_secs,
            poll_interval_ms: self.poll_interval_ms,
            retry: RetryConfig {
                max_attempts: self.max_attempts,
                initial_delay_ms: self.retry_initial_delay_ms,
            },
            timeouts: StageTimeouts {
                preprocess_secs: self.preprocess_timeout_secs,
                generate_secs: self.generate_timeout_secs,
                extract_secs: self.extract_timeout_secs,
                mesh_import_secs: self.mesh_import_timeout_secs,
            },
            ..defaults
        }
    }
}

fn main() -> anyhow::Result<()> {
    let config = CliArgs::parse().into_config();
    let state = AppState::new(config.clone())?;

    actix_web::rt::System::new().block_on(async move {
        tokio::select! {
            res = server::startup(config, state) => {
                res?;
                Ok(())
            }
            _ = signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down");
                Ok(())
            }
        }
    })
}
