use crate::{
    app::{errors::AppError, AppServices},
    backfill::BackfillBatchResult,
    search::{coerce_integer, RawRequest},
};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::signal;
use tower_http::set_header::SetResponseHeaderLayer;

const BODY_LIMIT: usize = 64 * 1024;
const CORS_ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

#[derive(Clone)]
struct SharedState {
    services: AppServices,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down");
}

pub fn router(services: AppServices) -> Router {
    let shared_state = Arc::new(SharedState { services });

    Router::new()
        .route("/search", any(search))
        .route("/functions/v1/search", any(search))
        .route("/backfill_embeddings", any(backfill))
        .route("/functions/v1/backfill_embeddings", any(backfill))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        ))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

pub async fn serve(bind: &str, services: AppServices) -> anyhow::Result<()> {
    let app = router(services);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("listening on {bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::MalformedRequest(detail) => {
                log::debug!("malformed request: {detail}");
                StatusCode::BAD_REQUEST
            }
            AppError::QueryTooShort => StatusCode::BAD_REQUEST,
            AppError::Misconfigured(missing) => {
                log::error!("service misconfigured, missing: {missing}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Upstream(err) => {
                log::error!("{err}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.public_message()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// CORS preflight. The allow headers are added by the router layers.
fn preflight() -> Response {
    StatusCode::OK.into_response()
}

async fn search(
    State(state): State<Arc<SharedState>>,
    method: Method,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, HttpError> {
    if method == Method::OPTIONS {
        return Ok(preflight());
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) if method == Method::POST => {
            return Err(AppError::MalformedRequest(rejection.body_text()).into());
        }
        // the method check rejects it anyway
        Err(_) => Bytes::new(),
    };

    let response = state
        .services
        .search
        .handle(RawRequest { method, body })
        .await?;

    Ok(Json(response).into_response())
}

async fn backfill(
    State(state): State<Arc<SharedState>>,
    method: Method,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, HttpError> {
    if method == Method::OPTIONS {
        return Ok(preflight());
    }
    if method != Method::POST {
        return Err(AppError::MethodNotAllowed.into());
    }

    // a missing, oversized or unreadable body means "use the default batch size"
    let requested = body
        .inspect_err(|rejection| log::debug!("ignoring backfill body: {}", rejection.body_text()))
        .ok()
        .and_then(|body| serde_json::from_slice::<Value>(&body).ok())
        .and_then(|payload| coerce_integer(payload.get("batch_size")));

    log::debug!("backfill requested with batch_size {requested:?}");

    let result: BackfillBatchResult = state.services.backfill()?.run(requested).await?;

    Ok(Json(result).into_response())
}
