//! Token validation oracle consulted by a reverse proxy before forwarding
//! requests. `GET /validate/{token}` answers 200 with the caller's identity,
//! 403 for unknown or expired tokens and 500 when the registry is unusable.

pub mod config;
pub mod error;

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::rejection::PathRejection;
use axum::extract::{MatchedPath, Path, State};
use axum::http::{HeaderValue, Request};
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common_auth::{
    CachedRegistry, Clock, FileRegistrySource, RegistryError, RegistrySource, ValidationError,
    Validator,
};
use common_obs::health_router;
use config::{RegistryMode, TokenAuthConfig};
use error::ServiceError;
use serde::Serialize;
use serde_json::json;
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub const SERVICE_NAME: &str = "token-auth";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VALIDATED_USER_HEADER: &str = "x-validated-user";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub validator: Validator,
    pub registry_mode: RegistryMode,
}

#[derive(Debug, Serialize)]
struct ValidationResponse {
    user: String,
    permissions: Vec<String>,
}

/// Wire the registry source selected by `config` into a validator.
///
/// In cached mode the registry is read here, so a missing or corrupt file
/// fails startup instead of the first request.
pub async fn build_state(
    config: &TokenAuthConfig,
    clock: Arc<dyn Clock>,
) -> Result<AppState, RegistryError> {
    let file: Arc<dyn RegistrySource> = Arc::new(FileRegistrySource::new(&config.tokens_path));
    let source: Arc<dyn RegistrySource> = match config.registry_mode {
        RegistryMode::PerRequest => file,
        RegistryMode::Cached => Arc::new(CachedRegistry::new(file).await?),
    };

    Ok(AppState {
        validator: Validator::new(source, clock),
        registry_mode: config.registry_mode,
    })
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/validate/", get(validate_empty))
        .route("/validate/:token", get(validate))
        .route("/admin/reload", post(reload))
        .with_state(state)
        .merge(health_router(SERVICE_NAME, VERSION))
        .layer(from_fn(request_context))
}

// A segment that does not decode to UTF-8 can never be a registry key, so it
// is answered like any other unknown token rather than as a bad request.
async fn validate(
    State(state): State<Arc<AppState>>,
    token: Result<Path<String>, PathRejection>,
) -> Result<Response, ServiceError> {
    match token {
        Ok(Path(token)) => validate_token(&state, &token).await,
        Err(path_error) => {
            tracing::debug!(event = "token_undecodable", error = %path_error);
            Err(rejection(state.validator.reject_malformed().await, 0))
        }
    }
}

// An empty path segment is still a token, just one that never matches.
async fn validate_empty(State(state): State<Arc<AppState>>) -> Result<Response, ServiceError> {
    validate_token(&state, "").await
}

async fn validate_token(state: &AppState, token: &str) -> Result<Response, ServiceError> {
    let identity = state
        .validator
        .validate(token)
        .await
        .map_err(|err| rejection(err, token.len()))?;

    // Names may be UTF-8 but must not smuggle control characters into headers.
    let user_header = HeaderValue::from_bytes(identity.user.as_bytes()).map_err(|_| {
        tracing::error!(
            event = "registry_fault",
            user = %identity.user,
            "user name cannot be carried in a response header"
        );
        ServiceError::Configuration
    })?;

    tracing::debug!(
        event = "token_accepted",
        user = %identity.user,
        permissions = identity.permissions.len(),
        expires = %identity.expires
    );

    let mut response = Json(ValidationResponse {
        user: identity.user,
        permissions: identity.permissions,
    })
    .into_response();
    response
        .headers_mut()
        .insert(VALIDATED_USER_HEADER, user_header);
    Ok(response)
}

fn rejection(err: ValidationError, token_len: usize) -> ServiceError {
    match err {
        ValidationError::InvalidToken { reason } => {
            tracing::debug!(
                event = "token_rejected",
                reason = reason.as_str(),
                token_len
            );
            ServiceError::InvalidToken
        }
        ValidationError::Configuration(error) => {
            tracing::error!(
                event = "registry_fault",
                error = %error,
                "token registry is unusable"
            );
            ServiceError::Configuration
        }
    }
}

async fn reload(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let tokens = reload_registry(&state).await?;
    Ok(Json(json!({
        "status": "reloaded",
        "mode": state.registry_mode.as_str(),
        "tokens": tokens,
    })))
}

/// Re-read the registry. In per-request mode this only checks that the file
/// still loads; in cached mode it replaces the served registry.
pub async fn reload_registry(state: &AppState) -> Result<usize, ServiceError> {
    match state.validator.reload().await {
        Ok(tokens) => {
            tracing::info!(
                event = "registry_reload",
                mode = %state.registry_mode,
                tokens,
                "token registry reloaded"
            );
            Ok(tokens)
        }
        Err(error) => {
            tracing::error!(
                event = "registry_reload",
                mode = %state.registry_mode,
                error = %error,
                "token registry reload failed"
            );
            Err(ServiceError::Configuration)
        }
    }
}

async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    // The raw path carries the token, so only the route template is logged.
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let request_id_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &request_id_value {
        req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }

    let span = info_span!(
        "http.request",
        service = SERVICE_NAME,
        method = %method,
        route = route.as_str(),
        request_id = %request_id
    );

    let start = Instant::now();
    let mut response = async {
        tracing::debug!(event = "request_start");
        next.run(req).await
    }
    .instrument(span.clone())
    .await;

    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    span.in_scope(|| {
        tracing::info!(
            event = "request_end",
            status = response.status().as_u16(),
            latency_ms
        );
    });

    if let Some(value) = request_id_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}
