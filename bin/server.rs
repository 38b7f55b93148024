// Marketplace Review - API Server
// Reviewer-facing calls over JSON. The acting reviewer arrives in the
// x-reviewer-id header; sessions are handled upstream.

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use marketplace_review::{
    collect_stats, history, open_database, users, ApprovalOrchestrator, EntityDecision,
    EntityKind, EntityOutcome, EntityRow, Event, PaymentDecision, PaymentEntityType,
    PaymentFilter, PaymentListing, PaymentOutcome, PaymentRequest, PaymentStatus, ReviewConfig,
    ReviewError, ReviewResult, ReviewStats, RoleFilter, User, UserFilter,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const REVIEWER_HEADER: &str = "x-reviewer-id";

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    orchestrator: Arc<ApprovalOrchestrator>,
}

impl AppState {
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> ReviewResult<T>) -> Result<T, ApiError> {
        let conn = self
            .db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".to_string()))?;
        f(&conn).map_err(ApiError::Review)
    }
}

// ============================================================================
// Responses and errors
// ============================================================================

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<ReviewError>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

enum ApiError {
    Review(ReviewError),
    MissingReviewer,
    Internal(String),
}

impl From<ReviewError> for ApiError {
    fn from(err: ReviewError) -> Self {
        ApiError::Review(err)
    }
}

fn status_for(err: &ReviewError) -> StatusCode {
    match err {
        ReviewError::NotFound { .. } => StatusCode::NOT_FOUND,
        ReviewError::InvalidTransition { .. }
        | ReviewError::LinkageAmbiguous { .. }
        | ReviewError::PaymentRequired { .. } => StatusCode::CONFLICT,
        ReviewError::LinkageNotFound { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ReviewError::NotAuthorized { .. } | ReviewError::OverrideNotPermitted { .. } => {
            StatusCode::FORBIDDEN
        }
        ReviewError::Validation { .. } => StatusCode::BAD_REQUEST,
        ReviewError::PaymentUpdateFailed { .. } | ReviewError::StorageUnavailable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Review(err) => {
                if err.is_storage() {
                    error!(error = %err, "request failed");
                }
                (
                    status_for(&err),
                    ErrorBody {
                        code: err.code(),
                        message: err.to_string(),
                        detail: Some(err),
                    },
                )
            }
            ApiError::MissingReviewer => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "not_authorized",
                    message: format!("missing {} header", REVIEWER_HEADER),
                    detail: None,
                },
            ),
            ApiError::Internal(message) => {
                error!(%message, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "internal",
                        message,
                        detail: None,
                    },
                )
            }
        };

        let response: ApiResponse<()> = ApiResponse {
            success: false,
            data: None,
            error: Some(body),
        };
        (status, Json(response)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn reviewer(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(REVIEWER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingReviewer)
}

fn parse_kind(kind: &str) -> Result<EntityKind, ApiError> {
    EntityKind::from_str(kind).map_err(ApiError::Review)
}

// ============================================================================
// Request bodies and queries
// ============================================================================

#[derive(Deserialize)]
struct PendingQuery {
    kind: Option<String>,
}

#[derive(Deserialize)]
struct PaymentQuery {
    status: Option<PaymentStatus>,
    entity_type: Option<PaymentEntityType>,
    page: Option<u32>,
    page_size: Option<u32>,
}

#[derive(Deserialize)]
struct UserQuery {
    search: Option<String>,
    role: Option<RoleFilter>,
    verified: Option<bool>,
}

#[derive(Deserialize)]
struct EntityDecisionBody {
    decision: EntityDecision,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct OverrideBody {
    decision: EntityDecision,
    reason: String,
}

#[derive(Deserialize)]
struct PaymentDecisionBody {
    decision: PaymentDecision,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct NotesBody {
    notes: Option<String>,
}

#[derive(Deserialize)]
struct LinkBody {
    entity_id: String,
}

#[derive(Deserialize)]
struct FlagBody {
    value: bool,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// GET /api/entities/pending?kind=
async fn list_pending(State(state): State<AppState>, Query(q): Query<PendingQuery>) -> ApiResult<Vec<EntityRow>> {
    let kind = q.kind.as_deref().map(parse_kind).transpose()?;
    let rows = state.with_conn(|conn| state.orchestrator.list_pending_entities(conn, kind))?;
    Ok(ApiResponse::ok(rows))
}

/// POST /api/entities/:kind/:id/decision
async fn decide_entity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((kind, id)): Path<(String, String)>,
    Json(body): Json<EntityDecisionBody>,
) -> ApiResult<EntityOutcome> {
    let reviewer = reviewer(&headers)?;
    let kind = parse_kind(&kind)?;
    let outcome = state.with_conn(|conn| {
        state
            .orchestrator
            .decide_entity(conn, &reviewer, kind, &id, body.decision, body.notes.as_deref())
    })?;
    Ok(ApiResponse::ok(outcome))
}

/// POST /api/entities/:kind/:id/override
async fn override_entity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((kind, id)): Path<(String, String)>,
    Json(body): Json<OverrideBody>,
) -> ApiResult<EntityOutcome> {
    let reviewer = reviewer(&headers)?;
    let kind = parse_kind(&kind)?;
    let outcome = state.with_conn(|conn| {
        state
            .orchestrator
            .override_entity_decision(conn, &reviewer, kind, &id, body.decision, &body.reason)
    })?;
    Ok(ApiResponse::ok(outcome))
}

/// GET /api/payments?status=&entity_type=&page=&page_size=
async fn list_payments(State(state): State<AppState>, Query(q): Query<PaymentQuery>) -> ApiResult<PaymentListing> {
    let filter = PaymentFilter {
        status: q.status,
        entity_type: q.entity_type,
        page: q.page.unwrap_or(1),
        page_size: q.page_size.unwrap_or(state.orchestrator.config().default_page_size),
    };
    let listing = state.with_conn(|conn| state.orchestrator.list_payments(conn, &filter))?;
    Ok(ApiResponse::ok(listing))
}

/// POST /api/payments/:id/decision
async fn decide_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<PaymentDecisionBody>,
) -> ApiResult<PaymentOutcome> {
    let reviewer = reviewer(&headers)?;
    let outcome = state.with_conn(|conn| {
        state
            .orchestrator
            .decide_payment(conn, &reviewer, &id, body.decision, body.notes.as_deref())
    })?;
    Ok(ApiResponse::ok(outcome))
}

/// POST /api/payments/:id/reopen
async fn reopen_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<NotesBody>,
) -> ApiResult<PaymentRequest> {
    let reviewer = reviewer(&headers)?;
    let payment = state.with_conn(|conn| {
        state
            .orchestrator
            .reopen_payment(conn, &reviewer, &id, body.notes.as_deref())
    })?;
    Ok(ApiResponse::ok(payment))
}

/// POST /api/payments/:id/link
async fn link_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<LinkBody>,
) -> ApiResult<PaymentRequest> {
    let reviewer = reviewer(&headers)?;
    let payment = state.with_conn(|conn| {
        state
            .orchestrator
            .link_payment(conn, &reviewer, &id, &body.entity_id)
    })?;
    Ok(ApiResponse::ok(payment))
}

/// GET /api/users?search=&role=&verified=
async fn list_users(State(state): State<AppState>, Query(q): Query<UserQuery>) -> ApiResult<Vec<User>> {
    let filter = UserFilter {
        search: q.search,
        role: q.role,
        verified: q.verified,
    };
    let found = state.with_conn(|conn| users::list_users(conn, &filter))?;
    Ok(ApiResponse::ok(found))
}

/// POST /api/users/:id/admin
async fn set_admin(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<FlagBody>,
) -> ApiResult<User> {
    let reviewer = reviewer(&headers)?;
    let user = state.with_conn(|conn| state.orchestrator.set_user_admin(conn, &reviewer, &id, body.value))?;
    Ok(ApiResponse::ok(user))
}

/// POST /api/users/:id/verified
async fn set_verified(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<FlagBody>,
) -> ApiResult<User> {
    let reviewer = reviewer(&headers)?;
    let user = state.with_conn(|conn| state.orchestrator.set_user_verified(conn, &reviewer, &id, body.value))?;
    Ok(ApiResponse::ok(user))
}

/// GET /api/stats
async fn get_stats(State(state): State<AppState>) -> ApiResult<ReviewStats> {
    let stats = state.with_conn(collect_stats)?;
    Ok(ApiResponse::ok(stats))
}

/// GET /api/history/:record_type/:id
async fn get_history(
    State(state): State<AppState>,
    Path((record_type, id)): Path<(String, String)>,
) -> ApiResult<Vec<Event>> {
    let events = state.with_conn(|conn| history(conn, &record_type, &id))?;
    Ok(ApiResponse::ok(events))
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/entities/pending", get(list_pending))
        .route("/entities/:kind/:id/decision", post(decide_entity))
        .route("/entities/:kind/:id/override", post(override_entity))
        .route("/payments", get(list_payments))
        .route("/payments/:id/decision", post(decide_payment))
        .route("/payments/:id/reopen", post(reopen_payment))
        .route("/payments/:id/link", post(link_payment))
        .route("/users", get(list_users))
        .route("/users/:id/admin", post(set_admin))
        .route("/users/:id/verified", post(set_verified))
        .route("/stats", get(get_stats))
        .route("/history/:record_type/:id", get(get_history))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "review_server=info,marketplace_review=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ReviewConfig::from_env()?;
    let conn = open_database(&config.database_path)?;
    info!(path = %config.database_path.display(), "database opened");

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        orchestrator: Arc::new(ApprovalOrchestrator::new(config.clone())),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "review server listening");

    axum::serve(listener, router(state))
        .await
        .context("server stopped unexpectedly")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&ReviewError::not_found("shop", "x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&ReviewError::invalid_transition("payment", "x", "verified", "rejected")),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&ReviewError::NotAuthorized { user_id: "u".into() }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&ReviewError::PaymentUpdateFailed {
                payment_id: "x".into(),
                reason: "disk".into()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_reviewer_header() {
        let mut headers = HeaderMap::new();
        assert!(matches!(reviewer(&headers), Err(ApiError::MissingReviewer)));

        headers.insert(REVIEWER_HEADER, HeaderValue::from_static(" admin-1 "));
        assert_eq!(reviewer(&headers).ok().as_deref(), Some("admin-1"));
    }
}
