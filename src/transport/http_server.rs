#![forbid(unsafe_code)]
use crate::codec::http::normalise_headers;
use crate::error::Result;
use crate::ingress::{Ingress, IngressError, ProcessMode};
use axum::body::Body;
use axum::extract::State;
use axum::http::{
    header::{CACHE_CONTROL, CONTENT_TYPE},
    HeaderMap, StatusCode,
};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Clone)]
struct HttpIngressState {
    ingress: Arc<Ingress>,
    max_body_bytes: usize,
}

/// `POST /proxy`, `POST /proc` and `GET /health`.
pub fn router(ingress: Arc<Ingress>) -> Router {
    let limit = ingress.engine().config().max_message_size;
    let state = HttpIngressState {
        ingress,
        max_body_bytes: if limit == 0 { usize::MAX } else { limit },
    };
    Router::new()
        .route("/proxy", post(handle_proxy))
        .route("/proc", post(handle_proc))
        .route("/health", get(handle_health))
        .with_state(state)
}

pub async fn serve(ingress: Arc<Ingress>, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "http ingress listening");
    let app = router(ingress);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown.cancelled().await;
    });
    if let Err(err) = server.await {
        error!(address = %addr, %err, "http ingress terminated with error");
        return Err(err.into());
    }
    Ok(())
}

async fn read_body(state: &HttpIngressState, body: Body) -> std::result::Result<Bytes, Response> {
    axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|_| {
            error_response(&IngressError::TooLarge {
                size: state.max_body_bytes.saturating_add(1),
                limit: state.max_body_bytes,
            })
        })
}

async fn handle_proxy(
    State(state): State<HttpIngressState>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let raw = match read_body(&state, body).await {
        Ok(raw) => raw,
        Err(response) => return response,
    };
    let headers = normalise_headers(&headers);
    let ingress = &state.ingress;

    if ingress.is_sync(&headers) || ingress.is_debug(&headers) {
        return match ingress.process(raw, headers, ProcessMode::Send).await {
            Ok(report) => json_response(StatusCode::OK, &json!(report)),
            Err(err) => error_response(&err),
        };
    }

    match ingress.admit(raw, headers).await {
        Ok(admission) => json_response(
            StatusCode::ACCEPTED,
            &json!({ "status": admission.as_str() }),
        ),
        Err(err) => error_response(&err),
    }
}

async fn handle_proc(
    State(state): State<HttpIngressState>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let raw = match read_body(&state, body).await {
        Ok(raw) => raw,
        Err(response) => return response,
    };
    let headers = normalise_headers(&headers);
    match state.ingress.process(raw, headers, ProcessMode::Preview).await {
        Ok(report) => json_response(StatusCode::OK, &json!(report)),
        Err(err) => error_response(&err),
    }
}

async fn handle_health(State(state): State<HttpIngressState>) -> Response {
    let engine = state.ingress.engine();
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "handlers": engine.registry().len(),
            "ts": Utc::now().to_rfc3339(),
        }),
    )
}

fn error_response(err: &IngressError) -> Response {
    json_response(
        err.status_code(),
        &json!({
            "status": "error",
            "error": err.to_string(),
            "ts": Utc::now().to_rfc3339(),
        }),
    )
}

fn json_response(status: StatusCode, payload: &JsonValue) -> Response {
    (
        status,
        [
            (CONTENT_TYPE, "application/json"),
            (CACHE_CONTROL, "no-store"),
        ],
        payload.to_string(),
    )
        .into_response()
}
