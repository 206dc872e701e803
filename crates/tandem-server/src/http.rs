//! REST handlers. Thin adapters over the directory, lifecycle and relay;
//! every failure is a `ChatError` rendered by [`ApiError`].

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use tandem_core::models::DisconnectReason;
use tandem_core::{ChatError, ConnectionId, ErrorClass, RequestId, UserId};

use crate::server::AppState;

/// HTTP rendering of a domain error: `{"error": {"code", "message"}}`.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self(ChatError::InvalidRequest(e.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self(ChatError::InvalidRequest(e.body_text()))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.class() {
            ErrorClass::Validation => StatusCode::BAD_REQUEST,
            ErrorClass::Authorization => StatusCode::FORBIDDEN,
            ErrorClass::NotFound => StatusCode::NOT_FOUND,
            ErrorClass::Conflict => StatusCode::CONFLICT,
            ErrorClass::Transport => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "request failed");
        } else {
            tracing::debug!(code = self.0.code(), error = %self.0, "request rejected");
        }
        let body = json!({
            "error": {
                "code": self.0.code(),
                "message": self.0.client_message(),
            }
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError(ChatError::InvalidRequest(format!("invalid {what}: {raw}"))))
}

#[derive(Deserialize)]
pub struct UsernameBody {
    username: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestBody {
    from_user_id: UserId,
    to_username: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdBody {
    user_id: UserId,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<UsernameBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(body) = body?;
    let user = state.ctx.directory.register(&body.username)?;
    Ok((StatusCode::CREATED, Json(json!({ "user": user }))))
}

pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<UsernameBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = body?;
    let (user, connection) = state.ctx.directory.login(&body.username)?;
    Ok(Json(json!({ "user": user, "currentConnection": connection })))
}

pub async fn user_by_username(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Value>> {
    let body = match state.ctx.directory.find_by_username(&username)? {
        Some(user) => json!({ "exists": true, "user": user }),
        None => json!({ "exists": false }),
    };
    Ok(Json(body))
}

pub async fn user_by_id(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> ApiResult<Json<Value>> {
    let user_id: UserId = parse_id(&raw, "user id")?;
    let user = state.ctx.directory.get(user_id)?;
    Ok(Json(json!({ "user": user })))
}

pub async fn create_request(
    State(state): State<AppState>,
    body: Result<Json<CreateRequestBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(body) = body?;
    let request = state
        .ctx
        .lifecycle
        .send_request(body.from_user_id, &body.to_username)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "requestId": request.id, "request": request })),
    ))
}

pub async fn pending_requests(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Value>> {
    let requests = state.ctx.lifecycle.list_pending_requests(&username)?;
    Ok(Json(json!({ "requests": requests })))
}

pub async fn accept_request(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<UserIdBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request_id: RequestId = parse_id(&raw, "request id")?;
    let Json(body) = body?;
    let connection = state.ctx.lifecycle.accept(request_id, body.user_id)?;
    Ok(Json(json!({ "connection": connection })))
}

pub async fn reject_request(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<UserIdBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request_id: RequestId = parse_id(&raw, "request id")?;
    let Json(body) = body?;
    state.ctx.lifecycle.reject(request_id, body.user_id)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn disconnect(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<UserIdBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let connection_id: ConnectionId = parse_id(&raw, "connection id")?;
    let Json(body) = body?;
    state
        .ctx
        .lifecycle
        .disconnect(connection_id, body.user_id, DisconnectReason::UserInitiated)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn current_connection(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> ApiResult<Json<Value>> {
    let user_id: UserId = parse_id(&raw, "user id")?;
    let (connection, recent) = state
        .ctx
        .lifecycle
        .current_connection_with_recent(user_id, state.ctx.config.recent_messages_limit)?;
    Ok(Json(json!({ "connection": connection, "recentMessages": recent })))
}

pub async fn messages(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let connection_id: ConnectionId = parse_id(&raw, "connection id")?;
    let Query(query) = query?;
    let messages = state
        .ctx
        .relay
        .history(connection_id, query.limit, query.offset)?;
    Ok(Json(json!({ "messages": messages })))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptimeSecs": state.ctx.uptime_secs(),
        "sessions": state.ctx.registry.session_count(),
    }))
}
