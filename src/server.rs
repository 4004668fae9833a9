use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::ValueEnum;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::model_gateway::{ModelGateway, OllamaGateway};
use crate::refiner::{Profile, RefineOptions, Refiner};
use crate::templates::{Mode, TemplateSet};

const DEFAULT_PROFILE: &str = "speed";

/// Everything a request handler needs; shared read-only across requests.
pub struct ServerState {
    client: Client,
    cfg: Config,
    templates: TemplateSet,
}

impl ServerState {
    pub fn new(client: Client, cfg: Config, templates: TemplateSet) -> Self {
        Self {
            client,
            cfg,
            templates,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefineBody {
    pub text: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefineReply {
    pub input: String,
    pub mode: &'static str,
    pub profile: String,
    pub refined: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
        }
    }

    fn upstream(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub fn router(state: Arc<ServerState>) -> Result<Router> {
    let cors = cors_layer(&state.cfg)?;
    Ok(Router::new()
        .route("/", get(health))
        .route("/refine", post(refine_prompt))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

/// Binds `addr` and serves until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: ServerState) -> Result<()> {
    let app = router(Arc::new(state))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {addr}"))?;
    info!(addr = %listener.local_addr()?, "refine server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down refine server");
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "message": "refiner is running" }))
}

async fn refine_prompt(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<RefineBody>,
) -> Result<Json<RefineReply>, ApiError> {
    let mode = match body.mode.as_deref() {
        None => Mode::Chatgpt,
        Some(raw) => Mode::from_name(raw).ok_or_else(|| {
            ApiError::unprocessable(format!(
                "unsupported mode '{raw}'; expected one of coding, image, video, chatgpt"
            ))
        })?,
    };
    if body.text.trim().is_empty() {
        return Err(ApiError::unprocessable("text must not be empty"));
    }
    let requested_profile = body
        .profile
        .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
    let profile = resolve_profile(&requested_profile);

    let gateway = OllamaGateway::new(&state.client, &state.cfg);
    let (model, _) = profile.preset(&state.cfg);
    gateway.prewarm(&model).await;

    let refiner = Refiner::new(&gateway, &state.cfg, &state.templates);
    let options = RefineOptions {
        profile,
        ..RefineOptions::new(mode)
    };
    let refined = refiner
        .refine(&body.text, &options, None)
        .await
        .map_err(|err| {
            warn!(error = %format!("{err:#}"), "refine request failed");
            ApiError::upstream(err)
        })?;

    Ok(Json(RefineReply {
        input: body.text,
        mode: mode.as_str(),
        profile: requested_profile,
        refined,
    }))
}

/// Blank means the default; unknown names fall back to `balanced`.
fn resolve_profile(raw: &str) -> Profile {
    let raw = raw.trim();
    if raw.is_empty() {
        return Profile::Speed;
    }
    <Profile as ValueEnum>::from_str(raw, true).unwrap_or(Profile::Balanced)
}

fn cors_layer(cfg: &Config) -> Result<CorsLayer> {
    let pattern = cfg
        .cors_origin_regex
        .as_deref()
        .map(|pattern| {
            Regex::new(&format!("^(?:{pattern})$"))
                .with_context(|| format!("Invalid server.cors_origin_regex '{pattern}'"))
        })
        .transpose()?;
    let exact = cfg.cors_origins.clone();

    Ok(CorsLayer::new()
        .allow_credentials(true)
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _: &Parts| {
                origin
                    .to_str()
                    .is_ok_and(|origin| origin_allowed(origin, &exact, pattern.as_ref()))
            },
        )))
}

fn origin_allowed(origin: &str, exact: &[String], pattern: Option<&Regex>) -> bool {
    exact.iter().any(|allowed| allowed == origin)
        || pattern.is_some_and(|pattern| pattern.is_match(origin))
}
