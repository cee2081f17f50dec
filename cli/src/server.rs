use std::convert::Infallible;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, patch},
};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::mpsc;
use tower_http::limit::RequestBodyLimitLayer;

use hearth_core::error::SyncError;
use hearth_core::remote::{MemoryRemote, RemoteStore, Row, Session, Table};

use crate::wire::decode_query;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

/// The user every `serve` instance is signed in as.
const HOUSEHOLD_USER: &str = "household";

#[derive(Clone)]
pub struct AppState {
    remote: MemoryRemote,
    api_key: Option<String>,
}

impl AppState {
    pub fn new(remote: MemoryRemote, api_key: Option<String>) -> Self {
        Self { remote, api_key }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotFound { .. } => Self::NotFound(err.to_string()),
            SyncError::Validation(_)
            | SyncError::Remote { .. }
            | SyncError::MalformedEvent { .. } => Self::BadRequest(err.to_string()),
            SyncError::Configuration(_) | SyncError::Network(_) | SyncError::SessionEnded => {
                Self::Internal(anyhow::Error::new(err))
            }
        }
    }
}

fn parse_table(name: &str) -> Result<Table, ApiError> {
    name.parse::<Table>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn require_object(value: &Row, what: &str) -> Result<(), ApiError> {
    if value.is_object() {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("{what} must be a JSON object")))
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn get_session(State(state): State<AppState>) -> Result<Json<Option<Session>>, ApiError> {
    Ok(Json(state.remote.get_session().await?))
}

async fn list_rows(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<Row>>, ApiError> {
    let table = parse_table(&table)?;
    let query = decode_query(&params)?;
    Ok(Json(state.remote.select(table, &query).await?))
}

async fn insert_row(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(row): Json<Row>,
) -> Result<(StatusCode, Json<Row>), ApiError> {
    let table = parse_table(&table)?;
    require_object(&row, "row")?;
    let inserted = state.remote.insert(table, row).await?;
    Ok((StatusCode::CREATED, Json(inserted)))
}

async fn update_row(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, i64)>,
    Json(patch): Json<Row>,
) -> Result<StatusCode, ApiError> {
    let table = parse_table(&table)?;
    require_object(&patch, "patch")?;
    state.remote.update(table, id, patch).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_row(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, i64)>,
) -> Result<StatusCode, ApiError> {
    let table = parse_table(&table)?;
    state.remote.delete(table, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream one table's change events until the client disconnects.
///
/// The subscription lives inside the stream state, so dropping the response
/// body unsubscribes.
async fn changes(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let table = parse_table(&table)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = state.remote.subscribe_changes(table, tx).await?;
    tracing::debug!(%table, "change feed client connected");

    let events = stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
        loop {
            let change = rx.recv().await?;
            match Event::default().json_data(&change) {
                Ok(event) => return Some((Ok::<_, Infallible>(event), (rx, subscription))),
                Err(e) => tracing::warn!(error = %e, "failed to encode change event"),
            }
        }
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// --- Router builder ---

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/session", get(get_session))
        .route("/api/tables/{table}", get(list_rows).post(insert_row))
        .route(
            "/api/tables/{table}/{id}",
            patch(update_row).delete(delete_row),
        )
        .route("/api/changes/{table}", get(changes))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

pub async fn start_server(
    port: u16,
    bind: &str,
    api_key: Option<String>,
    new_api_key: bool,
) -> anyhow::Result<()> {
    let remote = MemoryRemote::new();
    remote.sign_in(HOUSEHOLD_USER);

    let app = build_router(AppState::new(remote, api_key.clone()));

    if let Some(ref key) = api_key {
        eprintln!(
            "API key: {}...{} (see api_key file in data directory)",
            &key[..4],
            &key[key.len() - 4..],
        );
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    if new_api_key {
        eprintln!("Point clients at this server with:");
        eprintln!("  export {}=http://{bind}:{port}", crate::config::URL_VAR);
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("Failed to bind {bind}:{port}"))?;
    eprintln!("Listening on http://{bind}:{port}");
    tracing::info!(%bind, port, "serving in-memory household store");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
