//! Route handlers and the error-to-status mapping

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Redirect, Response},
};
use cookie::{Cookie, SameSite};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::AppState;
use crate::error::{CliError, Error, ProxyError, SessionError};
use crate::handlers;
use crate::proxy::ProxyRequest;
use crate::session::{Session, default_config, encode_session};

/// Cookie binding a browser to its session key
pub const SESSION_COOKIE: &str = "siem_session";

/// Error response with a `{"detail": ...}` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, detail)
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!("{}: {}", self.status, self.detail);
        } else {
            debug!("{}: {}", self.status, self.detail);
        }
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SecretUnavailable(_) => Self::forbidden("KEYVAULT_SESSION_SECRET not available"),
            SessionError::Decode(reason) => {
                warn!("{}", reason);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load session data")
            }
            err @ SessionError::InvalidProxy { .. } => Self::bad_request(err.to_string()),
        }
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        let status = match &err {
            ProxyError::UnknownProxy { .. } => StatusCode::NOT_FOUND,
            ProxyError::ForbiddenRedirect(_) => StatusCode::FORBIDDEN,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidTarget(_) | ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.to_string())
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Session(err) => err.into(),
            Error::Proxy(err) => err.into(),
            Error::Cli(CliError::NotAuthenticated(reason)) => Self::forbidden(reason),
            err @ Error::Cli(_) => Self::new(StatusCode::BAD_GATEWAY, err.to_string()),
            err @ Error::UnknownAction { .. } => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            err @ (Error::InvalidArguments(_) | Error::Json(_)) => Self::bad_request(err.to_string()),
            err => Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Health check endpoint.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "siem-query-utils",
        "version": crate::VERSION,
    }))
}

/// Redirect to the session's main path under the mount prefix
pub async fn main_path(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let (session, rebind) = bound_session(&state, &headers).await?;
    let target = format!("{}{}", state.root_path(), session.main_path().unwrap_or("/"));
    Ok(with_binding(Redirect::temporary(&target).into_response(), &session, rebind))
}

/// Configured proxy names and their base URLs
pub async fn apis(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let (session, rebind) = bound_session(&state, &headers).await?;
    Ok(with_binding(Json(&session.apis).into_response(), &session, rebind))
}

/// Validate a JSON session object; an empty body validates the defaults
pub async fn config_json(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Session>> {
    let blob = if body.iter().all(u8::is_ascii_whitespace) {
        encode_session(&default_config())
    } else {
        let text = std::str::from_utf8(&body).map_err(|e| ApiError::bad_request(e.to_string()))?;
        handlers::encode_config(text)?
    };
    Ok(Json(handlers::validate_blob(&state.ctx.sessions, &blob)?))
}

#[derive(Debug, Deserialize)]
pub struct SessionBlobParams {
    session: Option<String>,
}

/// Validate a base64 session blob given as `?session=` or as the body
pub async fn config_base64(
    State(state): State<AppState>,
    Query(params): Query<SessionBlobParams>,
    body: Bytes,
) -> ApiResult<Json<Session>> {
    let body = String::from_utf8_lossy(&body).trim().to_string();
    let blob = match params.session {
        Some(blob) => blob,
        None if !body.is_empty() => body,
        None => encode_session(&default_config()),
    };
    Ok(Json(handlers::validate_blob(&state.ctx.sessions, &blob)?))
}

#[derive(Debug, Deserialize)]
pub struct ActionParams {
    auth_token: Option<String>,
    /// JSON array of positional string arguments
    args: Option<String>,
}

/// Run a query action, gated by the shared API token
pub async fn action(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<ActionParams>,
) -> ApiResult<Json<Value>> {
    let Some(expected) = state.ctx.config.server.api_token.as_deref() else {
        return Err(ApiError::forbidden("API_TOKEN not configured"));
    };
    if params.auth_token.as_deref() != Some(expected) {
        return Err(ApiError::forbidden("Invalid auth_token"));
    }

    let args: Vec<String> = match params.args.as_deref().filter(|a| !a.trim().is_empty()) {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| ApiError::bad_request(format!("args must be a JSON array of strings: {}", e)))?,
        None => Vec::new(),
    };
    Ok(Json(handlers::run_action(&state.ctx, &name, &args).await?))
}

/// `/{proxy_name}/` with nothing after the slash
pub async fn proxy_root(
    state: State<AppState>,
    Path(proxy_name): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    proxy(state, Path((proxy_name, String::new())), method, uri, headers, body).await
}

/// Forward to the named proxy of this browser's session
pub async fn proxy(
    State(state): State<AppState>,
    Path((proxy_name, path)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let (session, rebind) = bound_session(&state, &headers).await?;
    let request = ProxyRequest {
        method,
        path,
        query: uri.query().map(str::to_string),
        headers,
        body,
        mount: state.root_path().to_string(),
    };

    let upstream = state.ctx.dispatcher.forward(&session, &proxy_name, request).await?;
    let response = (upstream.status, upstream.headers, upstream.body).into_response();
    Ok(with_binding(response, &session, rebind))
}

/// Session for this browser and whether the cookie must be (re)set
async fn bound_session(state: &AppState, headers: &HeaderMap) -> Result<(Arc<Session>, bool), ApiError> {
    let presented = session_cookie(headers);
    let session = state.ctx.sessions.resolve_for(presented.as_deref()).await?;
    let rebind = presented.as_deref() != Some(session.key.as_str());
    Ok((session, rebind))
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
}

fn with_binding(mut response: Response, session: &Session, rebind: bool) -> Response {
    if !rebind {
        return response;
    }
    let cookie = Cookie::build((SESSION_COOKIE, session.key.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}
