//! HTTP surface: the two SOAP service paths plus a health endpoint.

use crate::gateway::SoapGateway;
use crate::schemas::{ApiSurface, SoapRequest, SoapResponse};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::TryStreamExt;
use serde_json::json;
use std::io;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use tracing::debug;

pub fn router(gateway: Arc<SoapGateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(handle_soap)
        .with_state(gateway)
}

async fn health(State(gateway): State<Arc<SoapGateway>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "metrics": gateway.metrics().snapshot(),
    }))
}

async fn handle_soap(State(gateway): State<Arc<SoapGateway>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let api = match ApiSurface::from_path(parts.uri.path()) {
        Some(api) if parts.method == Method::POST => api,
        _ => {
            debug!(method = %parts.method, path = %parts.uri.path(), "No SOAP service at path");
            return SoapResponse::invalid_path().into_response();
        }
    };

    let full_path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    let auth = parts
        .headers
        .get(gateway.mtls_header())
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let reader = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
    let soap_request = SoapRequest::new(api, parts.method, full_path, parts.headers, auth, Box::new(reader));

    gateway.handle(soap_request).await.into_response()
}

impl IntoResponse for SoapResponse {
    fn into_response(self) -> Response {
        let (data, status_code, headers) = self.into_parts();
        let mut response = Response::new(Body::from(data));
        *response.status_mut() =
            StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        *response.headers_mut() = headers;
        response
    }
}
