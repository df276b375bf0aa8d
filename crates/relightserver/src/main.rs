use actix_cors::Cors;
use actix_web::{
    get, http::StatusCode, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult,
};
use actix_ws::Message;
use anyhow::Context;
use base64::{engine::general_purpose, Engine as _};
use relightcore::{OutputFormat, PredictionInput, RelightError};
use relightruntime::{Predictor, PredictorConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Where predictor setup has got to
enum SetupState {
    SettingUp,
    Ready(Arc<Predictor>),
    Failed(String),
}

/// Application state shared across handlers
struct AppState {
    setup: RwLock<SetupState>,
}

impl AppState {
    fn new() -> Self {
        Self {
            setup: RwLock::new(SetupState::SettingUp),
        }
    }

    async fn predictor(&self) -> Result<Arc<Predictor>, String> {
        match &*self.setup.read().await {
            SetupState::Ready(predictor) => Ok(predictor.clone()),
            SetupState::SettingUp => Err("predictor is still setting up".to_string()),
            SetupState::Failed(e) => Err(format!("predictor setup failed: {}", e)),
        }
    }
}

/// Request body for a prediction
#[derive(Debug, Deserialize)]
struct PredictionRequest {
    #[serde(default)]
    input: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct Metrics {
    predict_time: f64,
}

/// Response for a finished prediction
#[derive(Debug, Serialize)]
struct PredictionResponse {
    status: &'static str,
    output: Vec<String>,
    metrics: Metrics,
}

/// Error response
#[derive(Debug, Serialize)]
struct FailedResponse {
    status: &'static str,
    error: String,
}

fn failed(status: StatusCode, error: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(FailedResponse {
        status: "failed",
        error: error.into(),
    })
}

/// Bad requests are the caller's fault; everything else is ours
fn status_for(error: &RelightError) -> StatusCode {
    match error {
        RelightError::Input(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn mime_type(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| ext.parse::<OutputFormat>().ok())
        .map(OutputFormat::mime_type)
        .unwrap_or("application/octet-stream")
}

async fn data_uri(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(format!(
        "data:{};base64,{}",
        mime_type(path),
        general_purpose::STANDARD.encode(bytes)
    ))
}

async fn encode_outputs(files: &[PathBuf]) -> std::io::Result<Vec<String>> {
    let mut output = Vec::with_capacity(files.len());
    for file in files {
        output.push(data_uri(file).await?);
    }
    Ok(output)
}

/// Health check endpoint
#[get("/health-check")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    let body = match &*data.setup.read().await {
        SetupState::Ready(_) => serde_json::json!({ "status": "READY" }),
        SetupState::SettingUp => serde_json::json!({ "status": "SETTING_UP" }),
        SetupState::Failed(e) => serde_json::json!({ "status": "SETUP_FAILED", "error": e }),
    };
    HttpResponse::Ok().json(body)
}

/// Run a prediction
#[post("/predictions")]
async fn create_prediction(
    data: web::Data<AppState>,
    req: web::Json<PredictionRequest>,
) -> ActixResult<impl Responder> {
    let predictor = match data.predictor().await {
        Ok(predictor) => predictor,
        Err(e) => return Ok(failed(StatusCode::SERVICE_UNAVAILABLE, e)),
    };

    let input: PredictionInput = match serde_json::from_value(req.into_inner().input) {
        Ok(input) => input,
        Err(e) => return Ok(failed(StatusCode::UNPROCESSABLE_ENTITY, format!("invalid input: {}", e))),
    };

    let started = Instant::now();
    let files = match predictor.predict(&input).await {
        Ok(files) => files,
        Err(e) => {
            error!("Prediction failed: {}", e);
            return Ok(failed(status_for(&e), e.to_string()));
        }
    };

    let output = match encode_outputs(&files).await {
        Ok(output) => output,
        Err(e) => {
            error!("Failed to read prediction output: {}", e);
            return Ok(failed(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    let predict_time = started.elapsed().as_secs_f64();
    info!("Prediction returned {} file(s) in {:.2}s", output.len(), predict_time);

    Ok(HttpResponse::Ok().json(PredictionResponse {
        status: "succeeded",
        output,
        metrics: Metrics { predict_time },
    }))
}

/// WebSocket endpoint for prediction events
#[get("/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let predictor = match data.predictor().await {
        Ok(predictor) => predictor,
        Err(e) => return Ok(failed(StatusCode::SERVICE_UNAVAILABLE, e)),
    };

    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = predictor.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

fn app_config(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(create_prediction)
        .service(websocket_events);
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting relight prediction server");

    let config = PredictorConfig::from_env().context("invalid predictor configuration")?;
    let app_state = web::Data::new(AppState::new());

    let setup_state = app_state.clone();
    actix_web::rt::spawn(async move {
        let state = match Predictor::setup(config).await {
            Ok(predictor) => {
                info!("✅ Predictor ready");
                SetupState::Ready(Arc::new(predictor))
            }
            Err(e) => {
                error!("Predictor setup failed: {}", e);
                SetupState::Failed(e.to_string())
            }
        };
        *setup_state.setup.write().await = state;
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:5000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    let server_state = app_state.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(server_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(app_config)
    })
    .bind(&bind_address)
    .with_context(|| format!("failed to bind {}", bind_address))?
    .run()
    .await?;

    if let Ok(predictor) = app_state.predictor().await {
        predictor.shutdown().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test as actix_test;
    use relightcore::{EngineError, ImageSlot, InputError};

    fn state(setup: SetupState) -> web::Data<AppState> {
        web::Data::new(AppState {
            setup: RwLock::new(setup),
        })
    }

    #[actix_web::test]
    async fn test_health_check_while_setting_up() {
        let app = actix_test::init_service(App::new().app_data(state(SetupState::SettingUp)).configure(app_config)).await;
        let req = actix_test::TestRequest::get().uri("/health-check").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "SETTING_UP");
    }

    #[actix_web::test]
    async fn test_health_check_after_failed_setup() {
        let failed = SetupState::Failed("engine exited".to_string());
        let app = actix_test::init_service(App::new().app_data(state(failed)).configure(app_config)).await;
        let req = actix_test::TestRequest::get().uri("/health-check").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "SETUP_FAILED");
        assert_eq!(body["error"], "engine exited");
    }

    #[actix_web::test]
    async fn test_prediction_before_setup_is_unavailable() {
        let app = actix_test::init_service(App::new().app_data(state(SetupState::SettingUp)).configure(app_config)).await;
        let req = actix_test::TestRequest::post()
            .uri("/predictions")
            .set_json(serde_json::json!({ "input": {} }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["status"], "failed");
    }

    #[test]
    fn test_status_for_errors() {
        let input = RelightError::Input(InputError::QualityOutOfRange(120));
        assert_eq!(status_for(&input), StatusCode::UNPROCESSABLE_ENTITY);

        let download = RelightError::Input(InputError::Download {
            url: "https://example.com/bg.png".to_string(),
            reason: "status 404 Not Found".to_string(),
        });
        assert_eq!(status_for(&download), StatusCode::UNPROCESSABLE_ENTITY);

        let missing = RelightError::Input(InputError::MissingImage {
            slot: ImageSlot::Light,
            node_id: "9".to_string(),
        });
        assert_eq!(status_for(&missing), StatusCode::UNPROCESSABLE_ENTITY);

        let engine = RelightError::Engine(EngineError::ExecutionFailed("boom".to_string()));
        assert_eq!(status_for(&engine), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type(Path::new("/tmp/outputs/a.webp")), "image/webp");
        assert_eq!(mime_type(Path::new("/tmp/outputs/a.JPEG")), "image/jpeg");
        assert_eq!(mime_type(Path::new("/tmp/outputs/a.png")), "image/png");
        assert_eq!(mime_type(Path::new("/tmp/outputs/a.txt")), "application/octet-stream");
    }

    #[actix_web::test]
    async fn test_data_uri() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(data_uri(&path).await.unwrap(), "data:image/png;base64,YWJj");
    }
}
