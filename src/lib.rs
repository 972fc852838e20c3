// Ax Flow Agent Library
//
// x402-paid brainstorm agent: configuration, LLM flow, agent runtime and the
// smoke test driver. The HTTP server is behind the `service` feature.

pub mod agent;
pub mod brainstorm;
pub mod config;
pub mod flow;
pub mod llm;
pub mod smoke;
pub mod x402;

pub use agent::{AgentError, AgentRuntime, Entrypoint, EntrypointHandler, Manifest};
pub use brainstorm::{build_agent, BrainstormHandler, BrainstormInput, BrainstormOutput};
pub use config::AgentConfig;
pub use flow::{Flow, FlowError, FlowRun, UsageRecord};
pub use llm::{LlmClient, OpenAiClient};
