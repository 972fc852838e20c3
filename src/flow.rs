// Prompt Flow
//
// A flow is an ordered list of nodes. Each node is described by a signature
// such as `topic:string -> summary:string "Two concise sentences."` and runs
// as one JSON-mode chat completion. Nodes execute strictly in sequence; a
// node reads its inputs from the accumulated state and merges its outputs
// back into it.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::llm::{ChatMessage, ChatRequest, LlmClient, LlmError, TokenUsage};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid signature '{signature}': {reason}")]
    Signature { signature: String, reason: String },

    #[error("node '{node}' reads '{field}' which no earlier step provides")]
    UnboundInput { node: String, field: String },

    #[error("missing flow input '{field}'")]
    MissingInput { field: String },

    #[error("node '{node}' LLM call failed: {source}")]
    Llm {
        node: String,
        #[source]
        source: LlmError,
    },

    #[error("node '{node}' returned invalid output: {reason}")]
    InvalidOutput { node: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    StringArray,
    Number,
    Boolean,
}

impl FieldType {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "string" => Some(Self::String),
            "string[]" => Some(Self::StringArray),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::StringArray => "string[]",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }

    /// Coerce a model-produced value into this type. Arrays that are not
    /// arrays become empty; missing scalars stay null.
    fn coerce(&self, value: Option<Value>) -> Value {
        match (self, value) {
            (Self::StringArray, Some(Value::Array(items))) => Value::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => Value::String(s),
                        other => Value::String(other.to_string()),
                    })
                    .collect(),
            ),
            (Self::StringArray, _) => Value::Array(Vec::new()),
            (Self::String, Some(Value::String(s))) => Value::String(s),
            (Self::String, Some(Value::Null)) | (_, None) => Value::Null,
            (Self::String, Some(other)) => Value::String(other.to_string()),
            (_, Some(other)) => other,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub description: Option<String>,
}

/// Typed input/output contract of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub inputs: Vec<Field>,
    pub outputs: Vec<Field>,
}

impl Signature {
    pub fn parse(signature: &str) -> Result<Self, FlowError> {
        let invalid = |reason: String| FlowError::Signature {
            signature: signature.to_string(),
            reason,
        };

        let (inputs, outputs) = signature
            .split_once("->")
            .ok_or_else(|| invalid("missing '->'".to_string()))?;
        if outputs.contains("->") {
            return Err(invalid("more than one '->'".to_string()));
        }

        let inputs = parse_fields(inputs).map_err(&invalid)?;
        let outputs = parse_fields(outputs).map_err(&invalid)?;
        if inputs.is_empty() {
            return Err(invalid("no input fields".to_string()));
        }
        if outputs.is_empty() {
            return Err(invalid("no output fields".to_string()));
        }

        Ok(Self { inputs, outputs })
    }
}

fn parse_fields(section: &str) -> Result<Vec<Field>, String> {
    split_outside_quotes(section)
        .into_iter()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(parse_field)
        .collect()
}

fn split_outside_quotes(section: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, ch) in section.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&section[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&section[start..]);
    parts
}

fn parse_field(raw: &str) -> Result<Field, String> {
    let (head, description) = match raw.find('"') {
        Some(open) => {
            let rest = &raw[open + 1..];
            let close = rest
                .rfind('"')
                .ok_or_else(|| format!("unterminated description in '{}'", raw))?;
            (&raw[..open], Some(rest[..close].trim().to_string()))
        }
        None => (raw, None),
    };

    let (name, field_type) = head
        .split_once(':')
        .ok_or_else(|| format!("field '{}' is missing a type", head.trim()))?;
    let name = name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("invalid field name '{}'", name));
    }
    let field_type = FieldType::parse(field_type)
        .ok_or_else(|| format!("unknown type '{}' for field '{}'", field_type.trim(), name))?;

    Ok(Field {
        name: name.to_string(),
        field_type,
        description: description.filter(|d| !d.is_empty()),
    })
}

#[derive(Debug, Clone)]
pub struct FlowNode {
    pub name: String,
    pub signature: Signature,
}

impl FlowNode {
    fn request(&self, state: &Map<String, Value>) -> ChatRequest {
        let mut system = String::from(
            "You transform the given inputs into the requested outputs.\n\
             Respond with a single JSON object containing exactly these fields:",
        );
        for field in &self.signature.outputs {
            system.push_str(&format!("\n- \"{}\" ({})", field.name, field.field_type));
            if let Some(description) = &field.description {
                system.push_str(&format!(": {}", description));
            }
        }

        let user = self
            .signature
            .inputs
            .iter()
            .map(|field| {
                let value = match state.get(&field.name) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                format!("{}: {}", field.name, value)
            })
            .collect::<Vec<_>>()
            .join("\n");

        ChatRequest {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            json_mode: true,
            temperature: None,
        }
    }

    fn extract(&self, content: &str) -> Result<Map<String, Value>, FlowError> {
        let parsed: Value =
            serde_json::from_str(strip_code_fence(content)).map_err(|e| FlowError::InvalidOutput {
                node: self.name.clone(),
                reason: format!("not JSON: {}", e),
            })?;
        let mut object = match parsed {
            Value::Object(object) => object,
            other => {
                return Err(FlowError::InvalidOutput {
                    node: self.name.clone(),
                    reason: format!("expected a JSON object, got {}", other),
                })
            }
        };

        Ok(self
            .signature
            .outputs
            .iter()
            .map(|field| (field.name.clone(), field.field_type.coerce(object.remove(&field.name))))
            .collect())
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}

/// Per-node usage metadata, returned with every flow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub node: String,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
}

/// Outcome of one `forward` call.
#[derive(Debug, Clone)]
pub struct FlowRun {
    pub state: Map<String, Value>,
    pub usage: Vec<UsageRecord>,
}

impl FlowRun {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.state.get(field)
    }

    /// Usage of the final node, which identifies the model that answered.
    pub fn last_usage(&self) -> Option<&UsageRecord> {
        self.usage.last()
    }
}

pub struct FlowBuilder {
    inputs: Vec<String>,
    nodes: Vec<(String, String)>,
}

impl FlowBuilder {
    pub fn node(mut self, name: &str, signature: &str) -> Self {
        self.nodes.push((name.to_string(), signature.to_string()));
        self
    }

    /// Parse every signature and check each node input is bound.
    pub fn build(self) -> Result<Flow, FlowError> {
        let mut available: Vec<String> = self.inputs.clone();
        let mut nodes = Vec::with_capacity(self.nodes.len());

        for (name, raw) in self.nodes {
            let signature = Signature::parse(&raw)?;
            if let Some(field) = signature
                .inputs
                .iter()
                .find(|field| !available.contains(&field.name))
            {
                return Err(FlowError::UnboundInput {
                    node: name,
                    field: field.name.clone(),
                });
            }
            available.extend(signature.outputs.iter().map(|field| field.name.clone()));
            nodes.push(FlowNode { name, signature });
        }

        Ok(Flow {
            inputs: self.inputs,
            nodes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Flow {
    inputs: Vec<String>,
    nodes: Vec<FlowNode>,
}

impl Flow {
    /// Start a flow that takes the named inputs.
    pub fn builder<I, S>(inputs: I) -> FlowBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FlowBuilder {
            inputs: inputs.into_iter().map(Into::into).collect(),
            nodes: Vec::new(),
        }
    }

    pub fn nodes(&self) -> &[FlowNode] {
        &self.nodes
    }

    /// Run every node in order. LLM failures propagate without retry.
    pub async fn forward(
        &self,
        llm: &dyn LlmClient,
        input: Map<String, Value>,
    ) -> Result<FlowRun, FlowError> {
        if let Some(field) = self.inputs.iter().find(|field| !input.contains_key(*field)) {
            return Err(FlowError::MissingInput {
                field: field.clone(),
            });
        }

        let mut state = input;
        let mut usage = Vec::with_capacity(self.nodes.len());

        for node in &self.nodes {
            let started = Instant::now();
            let response = llm
                .chat(node.request(&state))
                .await
                .map_err(|source| FlowError::Llm {
                    node: node.name.clone(),
                    source,
                })?;

            let outputs = node.extract(&response.content)?;
            debug!(
                node = %node.name,
                model = %response.model,
                duration_ms = started.elapsed().as_millis() as u64,
                "Flow node completed"
            );

            state.extend(outputs);
            usage.push(UsageRecord {
                node: node.name.clone(),
                provider: llm.provider().to_string(),
                model: response.model,
                tokens: response.usage,
            });
        }

        Ok(FlowRun { state, usage })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::llm::{ChatRequest, ChatResponse, LlmClient, LlmError};

    /// Scripted LLM that replays canned replies and records every request.
    pub struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, String>>>,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedLlm {
        pub fn new<I: IntoIterator<Item = Result<String, String>>>(replies: I) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn ok<I: IntoIterator<Item = serde_json::Value>>(replies: I) -> Self {
            Self::new(replies.into_iter().map(|reply| Ok(reply.to_string())))
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        fn provider(&self) -> &'static str {
            "scripted"
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted reply left".to_string()));
            match reply {
                Ok(content) => Ok(ChatResponse {
                    content,
                    model: "scripted-model".to_string(),
                    usage: None,
                }),
                Err(message) => Err(LlmError::RequestFailed { message }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedLlm;
    use super::*;
    use serde_json::json;

    fn two_step() -> Flow {
        Flow::builder(["topic"])
            .node("summarizer", r#"topic:string -> summary:string "Two concise sentences.""#)
            .node("ideaGenerator", r#"summary:string -> ideas:string[] "Three short ideas.""#)
            .build()
            .unwrap()
    }

    fn topic(value: &str) -> Map<String, Value> {
        let mut input = Map::new();
        input.insert("topic".to_string(), json!(value));
        input
    }

    #[test]
    fn test_signature_parse() {
        let sig = Signature::parse(
            r#"summary:string, tone:string -> ideas:string[] "Three short, punchy ideas.""#,
        )
        .unwrap();
        assert_eq!(sig.inputs.len(), 2);
        assert_eq!(sig.inputs[1].name, "tone");
        assert_eq!(sig.outputs[0].field_type, FieldType::StringArray);
        assert_eq!(
            sig.outputs[0].description.as_deref(),
            Some("Three short, punchy ideas.")
        );
    }

    #[test]
    fn test_signature_parse_errors() {
        assert!(Signature::parse("topic:string summary:string").is_err());
        assert!(Signature::parse("topic -> summary:string").is_err());
        assert!(Signature::parse("topic:date -> summary:string").is_err());
        assert!(Signature::parse("topic:string -> ").is_err());
        assert!(Signature::parse(r#"topic:string -> summary:string "unterminated"#).is_err());
    }

    #[test]
    fn test_unbound_input_rejected_at_build() {
        let result = Flow::builder(["topic"])
            .node("ideaGenerator", "summary:string -> ideas:string[]")
            .build();
        assert!(matches!(result, Err(FlowError::UnboundInput { .. })));
    }

    #[tokio::test]
    async fn test_forward_runs_nodes_in_order() {
        let llm = ScriptedLlm::ok([
            json!({ "summary": "Bikes with motors. They are popular." }),
            json!({ "ideas": ["Battery swaps", "Cargo models", "City rentals"] }),
        ]);

        let run = two_step().forward(&llm, topic("electric bikes")).await.unwrap();

        assert_eq!(run.get("summary"), Some(&json!("Bikes with motors. They are popular.")));
        assert_eq!(
            run.get("ideas"),
            Some(&json!(["Battery swaps", "Cargo models", "City rentals"]))
        );
        assert_eq!(run.usage.len(), 2);
        assert_eq!(run.usage[0].node, "summarizer");
        assert_eq!(run.last_usage().unwrap().model, "scripted-model");

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].json_mode);
        assert_eq!(requests[0].messages[1].content, "topic: electric bikes");
        assert_eq!(
            requests[1].messages[1].content,
            "summary: Bikes with motors. They are popular."
        );
        assert!(requests[1].messages[0].content.contains("\"ideas\" (string[]): Three short ideas."));
    }

    #[tokio::test]
    async fn test_non_array_ideas_become_empty() {
        let llm = ScriptedLlm::ok([json!({ "summary": "s" }), json!({ "ideas": "just one idea" })]);
        let run = two_step().forward(&llm, topic("x")).await.unwrap();
        assert_eq!(run.get("ideas"), Some(&json!([])));
    }

    #[tokio::test]
    async fn test_fenced_json_accepted() {
        let llm = ScriptedLlm::new([
            Ok("```json\n{\"summary\": \"fenced\"}\n```".to_string()),
            Ok("{\"ideas\": []}".to_string()),
        ]);
        let run = two_step().forward(&llm, topic("x")).await.unwrap();
        assert_eq!(run.get("summary"), Some(&json!("fenced")));
    }

    #[tokio::test]
    async fn test_llm_failure_propagates_without_retry() {
        let llm = ScriptedLlm::new([Err("upstream down".to_string())]);
        let result = two_step().forward(&llm, topic("x")).await;
        assert!(matches!(result, Err(FlowError::Llm { ref node, .. }) if node == "summarizer"));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_json_output() {
        let llm = ScriptedLlm::new([Ok("not json".to_string())]);
        let result = two_step().forward(&llm, topic("x")).await;
        assert!(matches!(result, Err(FlowError::InvalidOutput { .. })));
    }

    #[tokio::test]
    async fn test_missing_flow_input() {
        let llm = ScriptedLlm::ok([]);
        let result = two_step().forward(&llm, Map::new()).await;
        assert!(matches!(result, Err(FlowError::MissingInput { ref field }) if field == "topic"));
        assert_eq!(llm.calls(), 0);
    }
}
