// Agent Runtime
//
// Entrypoint registry, manifest generation and payment wiring for the agent.
// The HTTP surface lives in `http` and only depends on what is exported here.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::x402::{PaymentGate, X402Error};

#[cfg(feature = "service")]
pub mod http;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Entrypoint '{0}' not found")]
    NotFound(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error(transparent)]
    Payment(#[from] X402Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::NotFound(_) => 404,
            Self::Upstream(_) => 502,
            Self::Payment(e) => e.http_status(),
            Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::Upstream(_) => "upstream_failure",
            Self::Payment(_) => "payment_failed",
            Self::Internal(_) => "internal_error",
        }
    }

    /// `{ "error": { "code", "message" } }`
    pub fn to_body(&self) -> Value {
        serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}

/// Name, version and description advertised in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentMeta {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Handler output plus the model tag reported alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput<T> {
    pub output: T,
    pub model: Option<String>,
}

/// A typed entrypoint implementation.
#[async_trait]
pub trait EntrypointHandler: Send + Sync + 'static {
    type Input: DeserializeOwned + JsonSchema + Send;
    type Output: Serialize + JsonSchema + Send;

    /// Schema-level checks run before `handle`.
    fn validate(&self, _input: &Self::Input) -> Result<(), AgentError> {
        Ok(())
    }

    async fn handle(&self, input: Self::Input) -> Result<HandlerOutput<Self::Output>, AgentError>;
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn invoke(&self, input: Value) -> Result<HandlerOutput<Value>, AgentError>;
}

struct Typed<H>(H);

#[async_trait]
impl<H: EntrypointHandler> ErasedHandler for Typed<H> {
    async fn invoke(&self, input: Value) -> Result<HandlerOutput<Value>, AgentError> {
        let input: H::Input = serde_json::from_value(input)
            .map_err(|e| AgentError::InvalidInput(format!("Invalid input: {}", e)))?;
        self.0.validate(&input)?;

        let result = self.0.handle(input).await?;
        let output = serde_json::to_value(result.output)
            .map_err(|e| AgentError::Internal(e.to_string()))?;
        Ok(HandlerOutput {
            output,
            model: result.model,
        })
    }
}

#[derive(Clone)]
pub struct Entrypoint {
    pub key: String,
    pub description: String,
    /// Decimal USD price per invocation; `None` means free.
    pub price: Option<String>,
    pub streaming: bool,
    pub input_schema: Value,
    pub output_schema: Value,
    handler: Arc<dyn ErasedHandler>,
}

impl Entrypoint {
    pub fn new<H: EntrypointHandler>(key: &str, description: &str, handler: H) -> Self {
        Self {
            key: key.to_string(),
            description: description.to_string(),
            price: None,
            streaming: false,
            input_schema: schema_value::<H::Input>(),
            output_schema: schema_value::<H::Output>(),
            handler: Arc::new(Typed(handler)),
        }
    }

    pub fn with_price(mut self, price: &str) -> Self {
        self.price = Some(price.to_string());
        self
    }

    /// Deserialize, validate and run the handler.
    pub async fn invoke(&self, input: Value) -> Result<HandlerOutput<Value>, AgentError> {
        self.handler.invoke(input).await
    }
}

fn schema_value<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub entrypoints: BTreeMap<String, ManifestEntrypoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payments: Vec<ManifestPayment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntrypoint {
    pub description: String,
    pub streaming: bool,
    pub input_schema: Value,
    pub output_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<Pricing>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPayment {
    pub method: String,
    pub payee: String,
    pub network: String,
    pub facilitator_url: String,
}

/// Registered entrypoints plus the optional payment gate.
pub struct AgentRuntime {
    meta: AgentMeta,
    entrypoints: Vec<Entrypoint>,
    payments: Option<PaymentGate>,
}

impl AgentRuntime {
    pub fn new(meta: AgentMeta) -> Self {
        Self {
            meta,
            entrypoints: Vec::new(),
            payments: None,
        }
    }

    pub fn with_payments(mut self, gate: PaymentGate) -> Self {
        self.payments = Some(gate);
        self
    }

    /// Register an entrypoint, replacing any previous one with the same key.
    pub fn add_entrypoint(&mut self, entrypoint: Entrypoint) {
        self.entrypoints.retain(|existing| existing.key != entrypoint.key);
        self.entrypoints.push(entrypoint);
    }

    pub fn meta(&self) -> &AgentMeta {
        &self.meta
    }

    pub fn entrypoint(&self, key: &str) -> Option<&Entrypoint> {
        self.entrypoints.iter().find(|entrypoint| entrypoint.key == key)
    }

    pub fn entrypoints(&self) -> &[Entrypoint] {
        &self.entrypoints
    }

    pub fn payments(&self) -> Option<&PaymentGate> {
        self.payments.as_ref()
    }

    pub fn manifest(&self) -> Manifest {
        let entrypoints = self
            .entrypoints
            .iter()
            .map(|entrypoint| {
                (
                    entrypoint.key.clone(),
                    ManifestEntrypoint {
                        description: entrypoint.description.clone(),
                        streaming: entrypoint.streaming,
                        input_schema: entrypoint.input_schema.clone(),
                        output_schema: entrypoint.output_schema.clone(),
                        pricing: entrypoint.price.as_ref().map(|price| Pricing {
                            invoke: Some(price.clone()),
                            stream: None,
                        }),
                    },
                )
            })
            .collect();

        let payments = self
            .payments
            .iter()
            .map(|gate| {
                let config = gate.config();
                ManifestPayment {
                    method: "x402".to_string(),
                    payee: config.pay_to.clone(),
                    network: config.network.to_string(),
                    facilitator_url: config.facilitator_url.clone(),
                }
            })
            .collect();

        Manifest {
            name: self.meta.name.clone(),
            version: self.meta.version.clone(),
            description: self.meta.description.clone(),
            entrypoints,
            payments,
        }
    }
}
