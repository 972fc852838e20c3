// HTTP Interface for the Agent
//
// Serves the manifest and entrypoints over axum. Priced entrypoints are
// gated by x402: verify before the handler runs, settle only after it
// succeeds.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use super::{AgentError, AgentRuntime};
use crate::x402::{PaymentRequirements, X402Error, HEADER_PAYMENT, HEADER_PAYMENT_RESPONSE};

pub const MANIFEST_PATH: &str = "/.well-known/agent.json";

#[derive(Debug, Deserialize)]
struct InvokeRequest {
    #[serde(default)]
    input: Value,
}

/// Body of a successful invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub run_id: String,
    pub status: String,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_body())).into_response()
    }
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(MANIFEST_PATH, get(get_manifest))
        .route("/entrypoints", get(list_entrypoints))
        .route("/entrypoints/:key/invoke", post(invoke_entrypoint))
        .with_state(runtime)
}

/// Bind `0.0.0.0:<port>` and serve until Ctrl-C.
pub async fn serve(runtime: Arc<AgentRuntime>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    info!("🚀 Agent ready at http://{}{}", addr, MANIFEST_PATH);

    axum::serve(listener, router(runtime))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    info!("👋 Agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown signal received");
}

async fn health_check(State(runtime): State<Arc<AgentRuntime>>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": runtime.meta().name,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn get_manifest(State(runtime): State<Arc<AgentRuntime>>) -> Json<super::Manifest> {
    Json(runtime.manifest())
}

async fn list_entrypoints(State(runtime): State<Arc<AgentRuntime>>) -> Json<Value> {
    let items: Vec<Value> = runtime
        .entrypoints()
        .iter()
        .map(|entrypoint| {
            serde_json::json!({
                "key": entrypoint.key,
                "description": entrypoint.description,
                "price": entrypoint.price,
                "streaming": entrypoint.streaming,
            })
        })
        .collect();
    Json(serde_json::json!({ "items": items }))
}

async fn invoke_entrypoint(
    State(runtime): State<Arc<AgentRuntime>>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(entrypoint) = runtime.entrypoint(&key) else {
        return AgentError::NotFound(key).into_response();
    };

    // Payment is only enforced when the entrypoint is priced and a gate exists.
    let paid = match (runtime.payments(), entrypoint.price.as_deref()) {
        (Some(gate), Some(price)) => {
            let resource = resource_url(&headers, &key);
            let requirements = match gate.requirements(&resource, &entrypoint.description, price) {
                Ok(requirements) => requirements,
                Err(e) => return AgentError::from(e).into_response(),
            };

            let header = headers.get(HEADER_PAYMENT).and_then(|v| v.to_str().ok());
            match gate.verify(header, &requirements).await {
                Ok(verified) => Some((gate, verified)),
                Err(e) => return payment_error(gate, requirements, e),
            }
        }
        _ => None,
    };

    let request: InvokeRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return AgentError::InvalidInput(format!("Invalid request body: {}", e)).into_response()
        }
    };

    info!("📨 Invoking entrypoint '{}'", key);
    let result = match entrypoint.invoke(request.input).await {
        Ok(result) => result,
        Err(e) => {
            warn!(entrypoint = %key, error = %e, "Entrypoint failed, payment not settled");
            return e.into_response();
        }
    };

    let mut response = Json(InvokeResponse {
        run_id: uuid::Uuid::new_v4().to_string(),
        status: "succeeded".to_string(),
        output: result.output,
        model: result.model,
    })
    .into_response();

    if let Some((gate, verified)) = paid {
        let settled = match gate.settle(&verified).await {
            Ok(settled) => settled,
            Err(e) => {
                error!(entrypoint = %key, error = %e, "Settlement failed");
                return payment_error(gate, verified.requirements, e);
            }
        };
        let encoded = settled
            .to_header()
            .ok()
            .and_then(|value| HeaderValue::from_str(&value).ok());
        match (HeaderName::try_from(HEADER_PAYMENT_RESPONSE), encoded) {
            (Ok(name), Some(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => warn!(entrypoint = %key, "Could not encode settlement header"),
        }
    }

    response
}

/// 402 with a fresh challenge for payment errors; mapped error otherwise.
fn payment_error(
    gate: &crate::x402::PaymentGate,
    requirements: PaymentRequirements,
    error: X402Error,
) -> Response {
    if error.http_status() != 402 {
        return AgentError::from(error).into_response();
    }
    if !matches!(error, X402Error::PaymentMissing) {
        warn!("❌ Payment rejected: {}", error);
    }
    (
        StatusCode::PAYMENT_REQUIRED,
        Json(gate.payment_required(requirements, &error)),
    )
        .into_response()
}

fn resource_url(headers: &HeaderMap, key: &str) -> String {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{}/entrypoints/{}/invoke", host, key)
}
