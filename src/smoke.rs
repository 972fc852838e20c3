// Smoke Test Driver
//
// Drives the agent end to end: wait for the manifest (launching the service
// if nothing answers), read the advertised price, then make one paid
// brainstorm call through the x402 client flow.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use url::Url;

use crate::x402::{
    select_requirement, EvmSigner, PaymentRequired, SettleResponse, HEADER_PAYMENT,
    HEADER_PAYMENT_RESPONSE,
};

pub const DEFAULT_AGENT_URL: &str = "http://localhost:8787";
pub const DEFAULT_TEST_TOPIC: &str = "Test topic from script";
pub const MANIFEST_PATH: &str = "/.well-known/agent.json";
pub const BRAINSTORM_PATH: &str = "/entrypoints/brainstorm/invoke";

pub const POLL_ATTEMPTS: u32 = 30;
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Driver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Polling,
    Starting,
    Ready,
    Calling,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SmokeConfig {
    pub base_url: String,
    pub topic: String,
    pub private_key: String,
    pub attempts: u32,
    pub interval: Duration,
    /// Program and arguments used to launch the agent when it is not running.
    pub server_command: Vec<String>,
}

impl SmokeConfig {
    pub fn new(base_url: &str, topic: &str, private_key: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            topic: topic.to_string(),
            private_key: private_key.to_string(),
            attempts: POLL_ATTEMPTS,
            interval: POLL_INTERVAL,
            server_command: default_server_command(),
        }
    }
}

/// `ax-flow-agent` next to the running executable.
pub fn default_server_command() -> Vec<String> {
    let binary = format!("ax-flow-agent{}", std::env::consts::EXE_SUFFIX);
    let path = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&binary)))
        .unwrap_or_else(|| PathBuf::from(&binary));
    vec![path.to_string_lossy().into_owned()]
}

#[derive(Debug, Clone)]
pub struct SmokeReport {
    pub price: Option<String>,
    pub status: u16,
    pub body: Value,
    pub settlement: Option<SettleResponse>,
    pub started_server: bool,
}

/// Rewrite `0.0.0.0` to `localhost` and drop the trailing slash.
/// Anything unparseable becomes the default agent URL.
pub fn normalize_base_url(raw: Option<&str>) -> String {
    let raw = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_AGENT_URL);

    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => return DEFAULT_AGENT_URL.to_string(),
    };
    if url.host_str() == Some("0.0.0.0") && url.set_host(Some("localhost")).is_err() {
        return DEFAULT_AGENT_URL.to_string();
    }

    let normalized = url.to_string();
    normalized
        .strip_suffix('/')
        .unwrap_or(&normalized)
        .to_string()
}

/// `entrypoints.brainstorm.pricing.invoke`, else `.stream`.
pub fn price_hint(manifest: &Value) -> Option<String> {
    let pricing = manifest.get("entrypoints")?.get("brainstorm")?.get("pricing")?;
    pricing
        .get("invoke")
        .filter(|price| !price.is_null())
        .or_else(|| pricing.get("stream"))
        .and_then(|price| match price {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
}

/// JSON when the text parses, the raw text otherwise.
pub fn parse_body(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

/// Poll the manifest until it answers 2xx or the budget runs out.
pub async fn wait_for_manifest(
    client: &reqwest::Client,
    base_url: &str,
    attempts: u32,
    interval: Duration,
) -> bool {
    let url = format!("{}{}", base_url, MANIFEST_PATH);
    for attempt in 1..=attempts {
        match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => return true,
            Ok(response) => debug!(attempt, status = %response.status(), "Manifest not ready"),
            Err(e) => debug!(attempt, error = %e, "Manifest not reachable"),
        }
        tokio::time::sleep(interval).await;
    }
    false
}

pub struct SmokeDriver {
    config: SmokeConfig,
    client: reqwest::Client,
    signer: EvmSigner,
    state: DriverState,
}

impl SmokeDriver {
    pub fn new(config: SmokeConfig) -> Result<Self> {
        let signer = EvmSigner::from_hex(&config.private_key)
            .map_err(|e| anyhow!("Invalid client private key: {}", e))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            config,
            client,
            signer,
            state: DriverState::Polling,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Payer address derived from the client key.
    pub fn payer(&self) -> String {
        self.signer.address()
    }

    fn transition(&mut self, next: DriverState) {
        debug!(from = ?self.state, to = ?next, "Driver state change");
        self.state = next;
    }

    pub async fn run(&mut self) -> Result<SmokeReport> {
        self.transition(DriverState::Polling);
        let mut server: Option<Child> = None;

        if !self.poll().await {
            self.transition(DriverState::Starting);
            info!("Starting agent server...");
            let child = match spawn_server(&self.config.server_command) {
                Ok(child) => child,
                Err(e) => {
                    self.transition(DriverState::Failed);
                    return Err(e);
                }
            };
            server = Some(child);

            if !self.poll().await {
                stop_server(server.take()).await;
                self.transition(DriverState::Failed);
                bail!("Server did not become ready at {}", MANIFEST_PATH);
            }
        }

        self.transition(DriverState::Ready);
        let started_server = server.is_some();
        let result = self.exercise().await;
        stop_server(server).await;

        match result {
            Ok(mut report) => {
                report.started_server = started_server;
                self.transition(DriverState::Done);
                Ok(report)
            }
            Err(e) => {
                self.transition(DriverState::Failed);
                Err(e)
            }
        }
    }

    async fn poll(&self) -> bool {
        wait_for_manifest(
            &self.client,
            &self.config.base_url,
            self.config.attempts,
            self.config.interval,
        )
        .await
    }

    async fn exercise(&mut self) -> Result<SmokeReport> {
        info!("Fetching manifest for pricing...");
        let manifest = self
            .client
            .get(format!("{}{}", self.config.base_url, MANIFEST_PATH))
            .send()
            .await
            .context("Failed to fetch manifest")?
            .text()
            .await
            .map(parse_body)
            .context("Failed to read manifest body")?;
        let price = price_hint(&manifest);
        info!(
            "Brainstorm price (manifest): {}",
            price.as_deref().unwrap_or("unknown")
        );

        self.transition(DriverState::Calling);
        info!("Calling brainstorm (paid) entrypoint...");
        let (status, body, settlement) = self.paid_invoke().await?;

        info!("Brainstorm status: {}", status);
        info!("Brainstorm body: {}", body);

        Ok(SmokeReport {
            price,
            status,
            body,
            settlement,
            started_server: false,
        })
    }

    /// POST the brainstorm input; on 402 sign the first supported requirement
    /// and retry once with `X-PAYMENT`.
    async fn paid_invoke(&self) -> Result<(u16, Value, Option<SettleResponse>)> {
        let url = format!("{}{}", self.config.base_url, BRAINSTORM_PATH);
        let payload = serde_json::json!({ "input": { "topic": self.config.topic } });

        let first = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("Brainstorm request failed")?;
        if first.status() != reqwest::StatusCode::PAYMENT_REQUIRED {
            return read_response(first).await;
        }

        let required: PaymentRequired = first
            .json()
            .await
            .context("402 response is not a payment challenge")?;
        let requirement = select_requirement(&required.accepts)
            .ok_or_else(|| anyhow!("No supported payment requirement in 402 response"))?;
        debug!(
            network = %requirement.network,
            amount = %requirement.max_amount_required,
            "Signing payment"
        );

        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let header = self
            .signer
            .sign_payment(requirement, now)
            .and_then(|payment| payment.to_header())
            .map_err(|e| anyhow!("Failed to sign payment: {}", e))?;

        let paid = self
            .client
            .post(&url)
            .header(HEADER_PAYMENT, header)
            .json(&payload)
            .send()
            .await
            .context("Paid brainstorm request failed")?;
        read_response(paid).await
    }
}

async fn read_response(response: reqwest::Response) -> Result<(u16, Value, Option<SettleResponse>)> {
    let status = response.status().as_u16();
    let settlement = response
        .headers()
        .get(HEADER_PAYMENT_RESPONSE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| SettleResponse::from_header(value).ok());
    let text = response.text().await.context("Failed to read response body")?;
    Ok((status, parse_body(text), settlement))
}

fn spawn_server(command: &[String]) -> Result<Child> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow!("Server command is empty"))?;
    Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start agent server '{}'", program))
}

async fn stop_server(server: Option<Child>) {
    if let Some(mut child) = server {
        if let Err(e) = child.kill().await {
            warn!("Failed to stop agent server: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PAY_TO;
    use crate::x402::{Network, PaymentRequirements, X402_VERSION};
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CLIENT_KEY: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";

    fn config(base_url: &str) -> SmokeConfig {
        SmokeConfig {
            attempts: 2,
            interval: Duration::from_millis(10),
            ..SmokeConfig::new(base_url, DEFAULT_TEST_TOPIC, CLIENT_KEY)
        }
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url(None), "http://localhost:8787");
        assert_eq!(normalize_base_url(Some("")), "http://localhost:8787");
        assert_eq!(normalize_base_url(Some("http://0.0.0.0:9000/")), "http://localhost:9000");
        assert_eq!(
            normalize_base_url(Some("https://agent.example.com/")),
            "https://agent.example.com"
        );
        assert_eq!(normalize_base_url(Some("http://host:1/api/")), "http://host:1/api");
        assert_eq!(normalize_base_url(Some("not a url")), "http://localhost:8787");
    }

    #[test]
    fn test_price_hint() {
        let invoke = json!({ "entrypoints": { "brainstorm": { "pricing": { "invoke": "0.03" } } } });
        assert_eq!(price_hint(&invoke).as_deref(), Some("0.03"));

        let stream = json!({ "entrypoints": { "brainstorm": { "pricing": { "stream": "0.05" } } } });
        assert_eq!(price_hint(&stream).as_deref(), Some("0.05"));

        let null_invoke = json!({
            "entrypoints": { "brainstorm": { "pricing": { "invoke": null, "stream": "0.05" } } }
        });
        assert_eq!(price_hint(&null_invoke).as_deref(), Some("0.05"));

        let free = json!({ "entrypoints": { "brainstorm": { "description": "free" } } });
        assert_eq!(price_hint(&free), None);
        assert_eq!(price_hint(&json!({})), None);
    }

    #[test]
    fn test_parse_body_falls_back_to_text() {
        assert_eq!(parse_body("{\"ok\":true}".to_string()), json!({ "ok": true }));
        assert_eq!(
            parse_body("Internal Server Error".to_string()),
            Value::String("Internal Server Error".to_string())
        );
    }

    #[tokio::test]
    async fn test_wait_sleeps_after_every_failed_attempt() {
        let client = reqwest::Client::new();
        let started = std::time::Instant::now();
        let ready = wait_for_manifest(&client, "http://127.0.0.1:1", 3, Duration::from_millis(100)).await;

        assert!(!ready);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn test_invalid_key_rejected() {
        let mut config = config("http://127.0.0.1:1");
        config.private_key = "0x1234".to_string();
        assert!(SmokeDriver::new(config).is_err());
    }

    #[tokio::test]
    async fn test_full_run_against_running_agent() {
        let server = MockServer::start().await;
        let requirements = PaymentRequirements::exact_usdc(
            Network::Base,
            30_000,
            DEFAULT_PAY_TO,
            &format!("{}{}", server.uri(), BRAINSTORM_PATH),
            "Strictly Vibe Coding",
        );
        let receipt = SettleResponse {
            success: true,
            error_reason: None,
            transaction: Some("0xfeed".to_string()),
            network: Some("base".to_string()),
            payer: None,
        };

        Mock::given(method("GET"))
            .and(path(MANIFEST_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "ax-flow-agent",
                "entrypoints": { "brainstorm": { "pricing": { "invoke": "0.03" } } }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(BRAINSTORM_PATH))
            .and(header_exists(HEADER_PAYMENT))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(HEADER_PAYMENT_RESPONSE, receipt.to_header().unwrap().as_str())
                    .set_body_json(json!({
                        "run_id": "run-1",
                        "status": "succeeded",
                        "output": { "summary": "s", "ideas": [] },
                        "model": "axllm-fallback"
                    })),
            )
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(BRAINSTORM_PATH))
            .respond_with(ResponseTemplate::new(402).set_body_json(PaymentRequired {
                x402_version: X402_VERSION,
                error: "X-PAYMENT header is required".to_string(),
                accepts: vec![requirements],
            }))
            .with_priority(2)
            .expect(1)
            .mount(&server)
            .await;

        let mut driver = SmokeDriver::new(config(&server.uri())).unwrap();
        let report = driver.run().await.unwrap();

        assert_eq!(driver.state(), DriverState::Done);
        assert!(!report.started_server);
        assert_eq!(report.price.as_deref(), Some("0.03"));
        assert_eq!(report.status, 200);
        assert_eq!(report.body["status"], "succeeded");
        assert_eq!(
            report.settlement.and_then(|s| s.transaction).as_deref(),
            Some("0xfeed")
        );
    }

    #[tokio::test]
    async fn test_non_json_body_reported_as_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MANIFEST_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "entrypoints": {} })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(BRAINSTORM_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let mut driver = SmokeDriver::new(config(&server.uri())).unwrap();
        let report = driver.run().await.unwrap();

        assert_eq!(report.price, None);
        assert_eq!(report.status, 500);
        assert_eq!(report.body, Value::String("boom".to_string()));
    }

    #[tokio::test]
    async fn test_non_json_manifest_is_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MANIFEST_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(BRAINSTORM_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "succeeded" })))
            .expect(1)
            .mount(&server)
            .await;

        let mut driver = SmokeDriver::new(config(&server.uri())).unwrap();
        let report = driver.run().await.unwrap();

        assert_eq!(driver.state(), DriverState::Done);
        assert_eq!(report.price, None);
        assert_eq!(report.status, 200);
        assert_eq!(report.body["status"], "succeeded");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_server_never_ready_fails_and_is_killed() {
        let pid_file = std::env::temp_dir().join(format!("ax-flow-agent-{}.pid", uuid::Uuid::new_v4()));
        let mut config = config("http://127.0.0.1:1");
        config.interval = Duration::from_millis(200);
        config.server_command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo $$ > {}; exec sleep 30", pid_file.display()),
        ];

        let mut driver = SmokeDriver::new(config).unwrap();
        let err = driver.run().await.unwrap_err();

        assert_eq!(driver.state(), DriverState::Failed);
        assert_eq!(
            err.to_string(),
            "Server did not become ready at /.well-known/agent.json"
        );

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        let _ = std::fs::remove_file(&pid_file);
        let alive = std::process::Command::new("kill")
            .args(["-0", &pid])
            .stderr(std::process::Stdio::null())
            .status()
            .unwrap()
            .success();
        assert!(!alive, "agent process {} still running", pid);
    }

    #[tokio::test]
    async fn test_server_spawn_failure() {
        let mut config = config("http://127.0.0.1:1");
        config.server_command = vec!["/nonexistent/ax-flow-agent".to_string()];

        let mut driver = SmokeDriver::new(config).unwrap();
        assert!(driver.run().await.is_err());
        assert_eq!(driver.state(), DriverState::Failed);
    }
}
