// Agent Configuration
//
// Resolves the service configuration from an environment mapping.
// Every field has a default, so resolution never fails.

use std::collections::HashMap;

use crate::x402::Network;

/// Price charged per brainstorm invocation, in USD.
pub const PER_CALL_PRICE: &str = "0.03";

pub const DEFAULT_FACILITATOR_URL: &str = "https://facilitator.daydreams.systems";
pub const DEFAULT_PAY_TO: &str = "0xb308ed39d67D0d4BAe5BC2FAEF60c66BBb6AE429";
pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Placeholder shipped in sample env files; never a usable key.
pub const PLACEHOLDER_API_KEY: &str = "THIS-WILL-NOT-BE-USED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub facilitator_url: String,
    pub pay_to: String,
    pub network: Network,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub price_per_call: String,
    pub port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_env_map(&HashMap::new())
    }
}

impl AgentConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Self {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_env_map(&env)
    }

    /// Resolve configuration from an explicit environment mapping.
    pub fn from_env_map(env: &HashMap<String, String>) -> Self {
        let facilitator_url = non_empty(env, "FACILITATOR_URL")
            .unwrap_or_else(|| DEFAULT_FACILITATOR_URL.to_string());

        let pay_to = non_empty(env, "PAYMENTS_RECEIVABLE_ADDRESS")
            .or_else(|| non_empty(env, "PAY_TO"))
            .unwrap_or_else(|| DEFAULT_PAY_TO.to_string());

        let network = non_empty(env, "NETWORK")
            .and_then(|value| value.parse::<Network>().ok())
            .unwrap_or_default();

        let port = non_empty(env, "PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            facilitator_url,
            pay_to,
            network,
            openai_api_key: sanitize_api_key(env.get("OPENAI_API_KEY").map(String::as_str)),
            openai_model: non_empty(env, "OPENAI_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            openai_base_url: non_empty(env, "OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            price_per_call: PER_CALL_PRICE.to_string(),
            port,
        }
    }

    /// Whether an LLM credential is available.
    pub fn llm_enabled(&self) -> bool {
        self.openai_api_key.is_some()
    }
}

/// Trimmed API key, or `None` for empty values and the placeholder sentinel.
pub fn sanitize_api_key(raw: Option<&str>) -> Option<String> {
    let value = raw.unwrap_or_default().trim();
    if value.is_empty() || value == PLACEHOLDER_API_KEY {
        None
    } else {
        Some(value.to_string())
    }
}

fn non_empty(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
