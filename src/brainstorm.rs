// Brainstorm Entrypoint
//
// Summarises a topic and proposes follow-up ideas through a two-node flow.
// Without an LLM client the handler answers with a fixed placeholder.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::agent::{AgentError, AgentMeta, AgentRuntime, Entrypoint, EntrypointHandler, HandlerOutput};
use crate::config::AgentConfig;
use crate::flow::{Flow, FlowError};
use crate::llm::LlmClient;
use crate::x402::{PaymentGate, PaymentsConfig};

pub const AGENT_NAME: &str = "ax-flow-agent";
pub const AGENT_VERSION: &str = "0.0.1";
pub const AGENT_DESCRIPTION: &str =
    "Demonstrates driving an AxFlow pipeline through createAxLLMClient.";

pub const ENTRYPOINT_KEY: &str = "brainstorm";
pub const ENTRYPOINT_DESCRIPTION: &str = "Strictly Vibe Coding";

/// Model tag reported when no LLM is configured.
pub const FALLBACK_MODEL: &str = "axllm-fallback";

const SUMMARIZER_SIGNATURE: &str =
    r#"topic:string -> summary:string "Two concise sentences describing the topic.""#;
const IDEA_GENERATOR_SIGNATURE: &str =
    r#"summary:string -> ideas:string[] "Three short follow-up ideas.""#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BrainstormInput {
    /// High level topic to explore.
    #[schemars(length(min = 1))]
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BrainstormOutput {
    pub summary: String,
    pub ideas: Vec<String>,
}

/// `summarizer` then `ideaGenerator`.
pub fn brainstorm_flow() -> Result<Flow, FlowError> {
    Flow::builder(["topic"])
        .node("summarizer", SUMMARIZER_SIGNATURE)
        .node("ideaGenerator", IDEA_GENERATOR_SIGNATURE)
        .build()
}

pub fn fallback_output(topic: &str) -> BrainstormOutput {
    BrainstormOutput {
        summary: format!("AxFlow is not configured. Pretend summary for \"{}\".", topic),
        ideas: vec![
            "Set OPENAI_API_KEY to enable the Ax integration.".to_string(),
            "Provide a PRIVATE_KEY so x402 can sign requests.".to_string(),
            "Re-run the request once credentials are configured.".to_string(),
        ],
    }
}

pub struct BrainstormHandler {
    llm: Option<Arc<dyn LlmClient>>,
    flow: Flow,
}

impl BrainstormHandler {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Result<Self, FlowError> {
        Ok(Self {
            llm,
            flow: brainstorm_flow()?,
        })
    }

    pub async fn run(&self, input: BrainstormInput) -> Result<HandlerOutput<BrainstormOutput>, AgentError> {
        let topic = input.topic.trim();
        if topic.is_empty() {
            return Err(AgentError::InvalidInput("Topic cannot be empty.".to_string()));
        }

        let Some(llm) = &self.llm else {
            warn!(topic = %topic, "LLM not configured, returning fallback brainstorm");
            return Ok(HandlerOutput {
                output: fallback_output(topic),
                model: Some(FALLBACK_MODEL.to_string()),
            });
        };

        let mut state = Map::new();
        state.insert("topic".to_string(), Value::String(topic.to_string()));

        let run = self
            .flow
            .forward(llm.as_ref(), state)
            .await
            .map_err(|e| match e {
                FlowError::Llm { .. } | FlowError::InvalidOutput { .. } => {
                    AgentError::Upstream(e.to_string())
                }
                other => AgentError::Internal(other.to_string()),
            })?;

        let summary = run
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let ideas: Vec<String> = run
            .get("ideas")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let model = run.last_usage().map(|usage| usage.model.clone());
        info!(topic = %topic, model = ?model, nodes = run.usage.len(), "Brainstorm completed");

        Ok(HandlerOutput {
            output: BrainstormOutput { summary, ideas },
            model,
        })
    }
}

#[async_trait]
impl EntrypointHandler for BrainstormHandler {
    type Input = BrainstormInput;
    type Output = BrainstormOutput;

    fn validate(&self, input: &BrainstormInput) -> Result<(), AgentError> {
        if input.topic.is_empty() {
            return Err(AgentError::InvalidInput("Provide a topic to analyse.".to_string()));
        }
        Ok(())
    }

    async fn handle(&self, input: BrainstormInput) -> Result<HandlerOutput<BrainstormOutput>, AgentError> {
        self.run(input).await
    }
}

/// Assemble the agent: metadata, payments and the priced brainstorm entrypoint.
pub fn build_agent(
    config: &AgentConfig,
    llm: Option<Arc<dyn LlmClient>>,
) -> Result<AgentRuntime, AgentError> {
    let gate = PaymentGate::new(PaymentsConfig {
        facilitator_url: config.facilitator_url.clone(),
        pay_to: config.pay_to.clone(),
        network: config.network,
    })?;

    let handler =
        BrainstormHandler::new(llm).map_err(|e| AgentError::Internal(e.to_string()))?;

    let mut runtime = AgentRuntime::new(AgentMeta {
        name: AGENT_NAME.to_string(),
        version: AGENT_VERSION.to_string(),
        description: AGENT_DESCRIPTION.to_string(),
    })
    .with_payments(gate);

    runtime.add_entrypoint(
        Entrypoint::new(ENTRYPOINT_KEY, ENTRYPOINT_DESCRIPTION, handler)
            .with_price(&config.price_per_call),
    );

    Ok(runtime)
}
