use crate::app_state::AppState;
use crate::config::GatewayConfig;
use crate::error::PipelineError;
use crate::io_struct::{
    ConvertReqInput, ConvertResponse, ErrorResponse, GenerateReqInput, GenerateResponse,
};
use crate::pipeline::RunFailure;
use actix_web::{HttpRequest, HttpResponse, HttpServer, get, post, web};
use serde_json::json;
use std::io::Write;

#[get("/health")]
pub async fn health(_req: HttpRequest, _: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

#[post("/generate")]
pub async fn generate(
    _req: HttpRequest,
    req: web::Json<GenerateReqInput>,
    app_state: web::Data<AppState>,
) -> HttpResponse {
    match app_state.generate(req.into_inner()).await {
        Ok(outcome) => HttpResponse::Ok().json(GenerateResponse {
            success: true,
            preprocessed_url: outcome.preprocessed_url,
            video_url: outcome.video_url,
            glb_urls: outcome.glb_urls,
            processing_time: outcome.processing_time,
            warning: outcome.warning,
        }),
        Err(failure) => failure_response(failure),
    }
}

#[post("/convert_glb")]
pub async fn convert_glb(
    _req: HttpRequest,
    req: web::Json<ConvertReqInput>,
    app_state: web::Data<AppState>,
) -> HttpResponse {
    match app_state.convert(req.into_inner()).await {
        Ok(outcome) => HttpResponse::Ok().json(ConvertResponse {
            success: true,
            stl_url: outcome.stl_url,
            file_size: outcome.file_size,
        }),
        Err(failure) => failure_response(failure),
    }
}

fn failure_response(failure: RunFailure) -> HttpResponse {
    match &failure.error {
        PipelineError::InvalidRequest { message } => {
            log::warn!("Rejected request: {}", message);
            HttpResponse::BadRequest().json(ErrorResponse {
                error: "Missing required parameters".to_string(),
                error_type: None,
                traceback: None,
            })
        }
        error => {
            if !failure.partial_urls.is_empty() {
                log::warn!(
                    "Run failed with partial artifacts already uploaded: {}",
                    failure.partial_urls.join(", ")
                );
            }
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: error.to_string(),
                error_type: Some(error.kind().to_string()),
                traceback: Some(error_chain(error)),
            })
        }
    }
}

fn error_chain(error: &PipelineError) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join("\ncaused by: ")
}

pub async fn startup(config: GatewayConfig, state: AppState) -> std::io::Result<()> {
    let app_state = web::Data::new(state);

    println!("Starting server at {}:{}", config.host, config.port);

    // default level is info
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .init();

    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(app_state.clone())
            .service(health)
            .service(generate)
            .service(convert_glb)
    })
    .bind((config.host, config.port))?
    .run()
    .await?;

    std::io::Result::Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_maps_to_400_body() {
        let failure = RunFailure {
            error: PipelineError::invalid_request("image_url is required"),
            partial_urls: Vec::new(),
        };
        let resp = failure_response(failure);
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_pipeline_failure_maps_to_500() {
        let failure = RunFailure {
            error: PipelineError::Timeout {
                stage: "image_to_3d".to_string(),
                budget_secs: 420,
            },
            partial_urls: vec!["https://cdn.test/v2/users/u1/d1/preprocessed.png".to_string()],
        };
        let resp = failure_response(failure);
        assert_eq!(
            resp.status(),
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_chain_includes_source() {
        let error = PipelineError::WriteError(std::io::Error::other("disk full"));
        let chain = error_chain(&error);
        assert!(chain.contains("disk full"));
    }
}
