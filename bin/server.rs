// Card Ledger - Web Server
// REST API over the mutation gateway with Axum

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use card_ledger::config::StoreArgs;
use card_ledger::logging::{init_logging, LogFormat};
use card_ledger::{
    audit_entries_for_collector, find_collector_by_handle, list_audit_entries, list_collectors,
    AuditEntry, Collector, Database, LedgerError, MutationGateway, Receipt, ValidationError,
};
use clap::Parser;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

#[derive(Debug, Parser)]
#[command(name = "card-ledger-server", version, about = "HTTP API for the card ledger")]
struct ServerArgs {
    #[command(flatten)]
    store: StoreArgs,

    #[arg(long, env = "CARD_LEDGER_ADDR", default_value = "0.0.0.0:3000")]
    addr: String,

    #[arg(long, env = "CARD_LEDGER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Database,
    gateway: MutationGateway,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: String) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(message),
        }
    }
}

#[derive(Deserialize)]
struct RecordHoldingRequest {
    handle: String,
    card: String,
    quantity: i64,
    price_paid: Decimal,
}

#[derive(Deserialize)]
struct UpdateHoldingRequest {
    quantity: i64,
    price_paid: Decimal,
}

// ============================================================================
// Errors
// ============================================================================

enum ApiError {
    Ledger(LedgerError),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::Ledger(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

fn ledger_status(e: &LedgerError) -> StatusCode {
    match e {
        LedgerError::Validation(
            ValidationError::UnknownCollector { .. }
            | ValidationError::UnknownCard { .. }
            | ValidationError::UnknownHolding { .. },
        ) => StatusCode::NOT_FOUND,
        LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
        LedgerError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
        LedgerError::Integrity(_) | LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Ledger(e) => (ledger_status(&e), e.to_string()),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        } else {
            tracing::warn!(%status, error = %message, "request rejected");
        }

        (status, Json(ApiResponse::err(message))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Run blocking SQLite work off the async runtime on its own connection.
async fn with_connection<T, F>(state: &AppState, work: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection, &MutationGateway) -> Result<T, ApiError> + Send + 'static,
{
    let db = state.db.clone();
    let gateway = state.gateway.clone();

    let data = tokio::task::spawn_blocking(move || {
        let mut conn = db.connect()?;
        work(&mut conn, &gateway)
    })
    .await
    .context("database task panicked")??;

    Ok(Json(ApiResponse::ok(data)))
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/collectors - Collectors with their totals
async fn get_collectors(State(state): State<AppState>) -> ApiResult<Vec<Collector>> {
    with_connection(&state, |conn, _| Ok(list_collectors(conn)?)).await
}

/// GET /api/audit - Full audit log, oldest first
async fn get_audit_log(State(state): State<AppState>) -> ApiResult<Vec<AuditEntry>> {
    with_connection(&state, |conn, _| Ok(list_audit_entries(conn)?)).await
}

/// GET /api/collectors/:handle/audit - Audit entries for one collector
async fn get_collector_audit(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> ApiResult<Vec<AuditEntry>> {
    with_connection(&state, move |conn, _| {
        let collector = find_collector_by_handle(conn, &handle)?
            .ok_or_else(|| ApiError::NotFound(format!("unknown collector @{}", handle)))?;
        Ok(audit_entries_for_collector(conn, &collector.id)?)
    })
    .await
}

/// POST /api/holdings - Record a holding
async fn create_holding(
    State(state): State<AppState>,
    Json(req): Json<RecordHoldingRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Receipt>>), ApiError> {
    let receipt = with_connection(&state, move |conn, gateway| {
        Ok(gateway.record_holding(conn, &req.handle, &req.card, req.quantity, req.price_paid)?)
    })
    .await?;
    Ok((StatusCode::CREATED, receipt))
}

/// PUT /api/holdings/:id - Change quantity and price paid
async fn update_holding(
    State(state): State<AppState>,
    Path(holding_id): Path<String>,
    Json(req): Json<UpdateHoldingRequest>,
) -> ApiResult<Receipt> {
    with_connection(&state, move |conn, gateway| {
        Ok(gateway.update_holding(conn, &holding_id, req.quantity, req.price_paid)?)
    })
    .await
}

/// DELETE /api/holdings/:id - Remove a holding
async fn delete_holding(
    State(state): State<AppState>,
    Path(holding_id): Path<String>,
) -> ApiResult<Receipt> {
    with_connection(&state, move |conn, gateway| {
        Ok(gateway.remove_holding(conn, &holding_id)?)
    })
    .await
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    init_logging(args.log_format)?;

    let db = args.store.database();
    db.open_and_migrate().context("Failed to prepare database")?;
    tracing::info!(path = %db.path().display(), "database ready");

    let state = AppState {
        db,
        gateway: args.store.gateway(),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/collectors", get(get_collectors))
        .route("/collectors/:handle/audit", get(get_collector_audit))
        .route("/audit", get(get_audit_log))
        .route("/holdings", post(create_holding))
        .route("/holdings/:id", put(update_holding).delete(delete_holding))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", args.addr))?;

    tracing::info!(addr = %args.addr, "🚀 server running");
    axum::serve(listener, app).await.context("Server stopped")?;
    Ok(())
}
