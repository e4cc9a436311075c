use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::{AppConfig, cuda_available},
    error::ServiceError,
    form::{FormScope, parse_img2img_form},
    model::ModelRegistry,
    proxy::RemoteClient,
};

const OUTPUT_FILENAME: &str = "generated_image.png";

#[derive(Clone)]
pub struct LocalState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
}

#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<AppConfig>,
    pub client: Arc<RemoteClient>,
}

#[derive(Debug, Serialize)]
struct RootResponse {
    message: &'static str,
    device: &'static str,
    model_loaded: bool,
}

#[derive(Debug, Serialize)]
struct LocalHealth {
    status: &'static str,
    device: &'static str,
    cuda_available: bool,
    model_loaded: bool,
    loaded_checkpoint: Option<String>,
    models_folder_exists: bool,
    available_models: usize,
}

#[derive(Debug, Serialize)]
struct ProxyHealth {
    status: &'static str,
}

/// Routes for the in-process inference gateway.
pub fn build_router(config: Arc<AppConfig>, registry: Arc<ModelRegistry>) -> Router {
    let body_limit = config.max_upload_bytes;
    let state = LocalState { config, registry };

    Router::new()
        .route("/", get(root))
        .route("/health", get(local_health))
        .route("/models", get(list_models))
        .route("/img2img", post(generate))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Routes for the gateway that forwards to the hosted API.
pub fn build_proxy_router(config: Arc<AppConfig>, client: Arc<RemoteClient>) -> Router {
    let body_limit = config.max_upload_bytes;
    let state = ProxyState { config, client };

    Router::new()
        .route("/health", get(proxy_health))
        .route("/img2img", post(forward))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn root(State(state): State<LocalState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: "img2img gateway is running",
        device: state.registry.device().label(),
        model_loaded: state.registry.is_loaded(),
    })
}

async fn local_health(State(state): State<LocalState>) -> Json<LocalHealth> {
    let registry = &state.registry;
    Json(LocalHealth {
        status: "healthy",
        device: registry.device().label(),
        cuda_available: cuda_available(),
        model_loaded: registry.is_loaded(),
        loaded_checkpoint: registry.loaded_checkpoint(),
        models_folder_exists: registry.models_dir_exists(),
        available_models: registry.available_models(),
    })
}

async fn proxy_health() -> Json<ProxyHealth> {
    Json(ProxyHealth { status: "ok" })
}

async fn list_models(State(state): State<LocalState>) -> Result<Json<Vec<String>>, ServiceError> {
    let models = state.registry.list_models()?;
    info!(count = models.len(), "listed models");
    Ok(Json(models))
}

async fn generate(
    State(state): State<LocalState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ServiceError> {
    if !state.registry.is_loaded() {
        return Err(ServiceError::ModelNotLoaded);
    }

    let form = parse_img2img_form(multipart.map_err(reject)?, FormScope::Generation).await?;
    let params = form.request.resolve(&state.config.defaults)?;
    let png = state.registry.generate(form.image.data, params).await?;
    info!(bytes = png.len(), "image generated");

    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={OUTPUT_FILENAME}"),
            ),
        ],
        png,
    )
        .into_response())
}

async fn forward(
    State(state): State<ProxyState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ServiceError> {
    let form = parse_img2img_form(multipart.map_err(reject)?, FormScope::Forward).await?;
    let strength = form
        .request
        .strength
        .unwrap_or(state.config.defaults.strength);
    if !(0.0..=1.0).contains(&strength) {
        return Err(ServiceError::BadRequest(format!(
            "strength must be between 0 and 1, got {strength}"
        )));
    }

    let body = state
        .client
        .forward(form.image, &form.request.prompt, strength)
        .await?;
    Ok(Json(body))
}

fn reject(rejection: MultipartRejection) -> ServiceError {
    ServiceError::BadRequest(rejection.body_text())
}
