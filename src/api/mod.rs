//! HTTP API for the trading console
//!
//! JSON in, JSON out. Every route except `/health` and `/auth/login` needs an
//! `Authorization: Bearer <token>` header from a prior login. Errors come back
//! as `{ "error": <kind>, "message": <text> }`.

#[cfg(test)]
mod tests;

use crate::account::AccountSpec;
use crate::desk::Desk;
use crate::error::{DeskError, Result};
use crate::gateway::GatewaySpec;
use crate::module::ModuleSpec;
use crate::session::{Session, SessionStore};
use crate::types::Fill;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequestParts, Query, State,
    },
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// State shared across handlers
pub struct AppState {
    pub desk: Arc<Desk>,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(desk: impl Into<Arc<Desk>>, sessions: SessionStore) -> Self {
        Self {
            desk: desk.into(),
            sessions,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for DeskError {
    fn into_response(self) -> Response {
        let status = match &self {
            DeskError::Validation(_) => StatusCode::BAD_REQUEST,
            DeskError::NotFound(_) => StatusCode::NOT_FOUND,
            DeskError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            // the console expects reference conflicts as a server error too
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self);
        }
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Bearer-token session attached to an authenticated request
pub struct AuthSession(pub Session);

impl FromRequestParts<Arc<AppState>> for AuthSession {
    type Rejection = DeskError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| DeskError::Unauthorized("Missing Authorization header".into()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| DeskError::Unauthorized("Expected a bearer token".into()))?;
        state.sessions.validate(token.trim()).map(AuthSession)
    }
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| DeskError::Validation(e.body_text()))
}

fn params<T>(query: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    query
        .map(|Query(v)| v)
        .map_err(|e| DeskError::Validation(e.body_text()))
}

// ============ Query / body shapes ============

#[derive(Deserialize)]
struct NameQuery {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayQuery {
    gateway_id: String,
}

#[derive(Deserialize)]
struct SubscribeRequest {
    instrument: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountQuery {
    account_id: String,
}

#[derive(Deserialize)]
struct ResetQuery {
    #[serde(default)]
    reset: bool,
}

#[derive(Deserialize)]
struct EnabledQuery {
    name: String,
    enabled: bool,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AmountRequest {
    account_id: String,
    amount: Decimal,
}

// ============ Handlers ============

async fn health_check() -> &'static str {
    "OK"
}

async fn login(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<Session>> {
    let req = body(payload)?;
    Ok(Json(state.sessions.login(&req.username, &req.password)?))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    AuthSession(session): AuthSession,
) -> Json<Value> {
    let closed = state.sessions.logout(&session.token);
    Json(json!({ "loggedOut": closed }))
}

async fn create_gateway(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    payload: std::result::Result<Json<GatewaySpec>, JsonRejection>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.desk.create_gateway(body(payload)?)?))
}

async fn list_gateways(State(state): State<Arc<AppState>>, _auth: AuthSession) -> impl IntoResponse {
    Json(state.desk.list_gateways())
}

async fn delete_gateway(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    query: std::result::Result<Query<GatewayQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let q = params(query)?;
    Ok(Json(state.desk.delete_endpoint(&q.gateway_id)?))
}

async fn connect_gateway(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    query: std::result::Result<Query<GatewayQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let q = params(query)?;
    Ok(Json(state.desk.connect_endpoint(&q.gateway_id)?))
}

async fn disconnect_gateway(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    query: std::result::Result<Query<GatewayQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let q = params(query)?;
    Ok(Json(state.desk.disconnect_endpoint(&q.gateway_id)?))
}

async fn subscribe_instrument(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    query: std::result::Result<Query<GatewayQuery>, QueryRejection>,
    payload: std::result::Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let q = params(query)?;
    let req = body(payload)?;
    Ok(Json(state.desk.subscribe_instrument(&q.gateway_id, &req.instrument)?))
}

async fn create_account(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    payload: std::result::Result<Json<AccountSpec>, JsonRejection>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.desk.create_account(body(payload)?)?))
}

async fn list_accounts(State(state): State<Arc<AppState>>, _auth: AuthSession) -> impl IntoResponse {
    Json(state.desk.list_accounts())
}

async fn delete_account(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    query: std::result::Result<Query<AccountQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let q = params(query)?;
    Ok(Json(state.desk.delete_account(&q.account_id)?))
}

async fn deposit(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    payload: std::result::Result<Json<AmountRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = body(payload)?;
    Ok(Json(state.desk.deposit(&req.account_id, req.amount)?))
}

async fn withdraw(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    payload: std::result::Result<Json<AmountRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = body(payload)?;
    Ok(Json(state.desk.withdraw(&req.account_id, req.amount)?))
}

async fn create_module(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    payload: std::result::Result<Json<ModuleSpec>, JsonRejection>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.desk.create_module(&body(payload)?)?))
}

async fn list_modules(State(state): State<Arc<AppState>>, _auth: AuthSession) -> impl IntoResponse {
    Json(state.desk.list_modules())
}

async fn update_module(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    query: std::result::Result<Query<ResetQuery>, QueryRejection>,
    payload: std::result::Result<Json<ModuleSpec>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let q = params(query)?;
    Ok(Json(state.desk.update_module(&body(payload)?, q.reset)?))
}

async fn delete_module(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    query: std::result::Result<Query<NameQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let q = params(query)?;
    Ok(Json(state.desk.delete_module(&q.name)?))
}

async fn set_module_enabled(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    query: std::result::Result<Query<EnabledQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let q = params(query)?;
    Ok(Json(state.desk.set_module_enabled(&q.name, q.enabled)?))
}

async fn toggle_module(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    query: std::result::Result<Query<NameQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let q = params(query)?;
    Ok(Json(state.desk.toggle_module(&q.name)?))
}

async fn list_strategies(State(state): State<Arc<AppState>>, _auth: AuthSession) -> impl IntoResponse {
    Json(state.desk.list_strategies())
}

async fn apply_fill(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    query: std::result::Result<Query<NameQuery>, QueryRejection>,
    payload: std::result::Result<Json<Fill>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let q = params(query)?;
    Ok(Json(state.desk.apply_fill(&q.name, &body(payload)?)?))
}

async fn get_positions(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    query: std::result::Result<Query<NameQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let q = params(query)?;
    Ok(Json(state.desk.positions(&q.name)?))
}

async fn get_runtime(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    query: std::result::Result<Query<NameQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let q = params(query)?;
    Ok(Json(state.desk.runtime(&q.name)?))
}

async fn get_deal_records(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    query: std::result::Result<Query<NameQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let q = params(query)?;
    Ok(Json(state.desk.deal_records(&q.name)?))
}

/// Build the console router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route(
            "/gateway",
            post(create_gateway).get(list_gateways).delete(delete_gateway),
        )
        .route(
            "/gateway/connection",
            post(connect_gateway).delete(disconnect_gateway),
        )
        .route("/gateway/subscription", post(subscribe_instrument))
        .route(
            "/account",
            post(create_account).get(list_accounts).delete(delete_account),
        )
        .route("/account/deposit", post(deposit))
        .route("/account/withdraw", post(withdraw))
        .route(
            "/module",
            post(create_module)
                .get(list_modules)
                .put(update_module)
                .delete(delete_module),
        )
        .route("/module/enabled", put(set_module_enabled))
        .route("/module/toggle", put(toggle_module))
        .route("/module/strategies", get(list_strategies))
        .route("/module/position", post(apply_fill).get(get_positions))
        .route("/module/rt/info", get(get_runtime))
        .route("/module/deal/record", get(get_deal_records))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the console API until `shutdown` resolves
pub async fn start_server(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Console API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
