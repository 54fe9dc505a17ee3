pub mod app_state;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod io_struct;
pub mod model_client;
pub mod pipeline;
pub mod retry;
pub mod server;
pub mod stl;
pub mod storage;

pub use app_state::AppState;
pub use config::GatewayConfig;
pub use error::PipelineError;
