// Ax Flow Agent
//
// Resolves configuration from the environment, wires the LLM client and the
// x402 payment gate, and serves the agent over HTTP.

use std::sync::Arc;

use anyhow::Result;
use ax_flow_agent::agent::http::serve;
use ax_flow_agent::llm::LlmClient;
use ax_flow_agent::{build_agent, AgentConfig, OpenAiClient};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AgentConfig::from_env();
    info!("🔧 Network: {}", config.network);
    info!("🔧 Facilitator: {}", config.facilitator_url);
    info!("🔧 Pay to: {}", config.pay_to);

    let llm: Option<Arc<dyn LlmClient>> = match OpenAiClient::from_agent_config(&config) {
        Some(client) => {
            info!("🤖 LLM enabled with model {}", client.model());
            Some(Arc::new(client))
        }
        None => {
            warn!("OPENAI_API_KEY not set, brainstorm will return fallback output");
            None
        }
    };

    let runtime = build_agent(&config, llm)
        .map_err(|e| anyhow::anyhow!("Failed to build agent: {}", e))?;

    serve(Arc::new(runtime), config.port).await
}
