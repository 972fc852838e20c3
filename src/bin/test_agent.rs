// Ax Flow Agent smoke test
//
// Makes sure the agent is running (starting it if needed) and performs one
// paid brainstorm call.

use clap::Parser;
use colored::Colorize;

use ax_flow_agent::smoke::{
    default_server_command, normalize_base_url, SmokeConfig, SmokeDriver, DEFAULT_TEST_TOPIC,
};

/// End-to-end check of the brainstorm entrypoint with x402 payment
#[derive(Parser)]
#[command(name = "test-agent")]
#[command(version = "0.0.1")]
#[command(about = "Smoke test the ax-flow-agent paid brainstorm entrypoint", long_about = None)]
struct Args {
    /// Agent base URL
    #[arg(long, env = "AGENT_URL")]
    agent_url: Option<String>,

    /// Topic sent to the brainstorm entrypoint
    #[arg(long, env = "TEST_TOPIC", default_value = DEFAULT_TEST_TOPIC)]
    topic: String,

    /// Hex private key paying for the call (falls back to PRIVATE_KEY)
    #[arg(long, env = "CLIENT_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Command used to launch the agent when it is not already running
    #[arg(long)]
    server_command: Option<String>,

    /// Manifest polling attempts per phase
    #[arg(long, default_value_t = 30)]
    attempts: u32,

    /// Delay between polling attempts in milliseconds
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let private_key = args
        .private_key
        .or_else(|| std::env::var("PRIVATE_KEY").ok())
        .filter(|key| !key.trim().is_empty());
    let Some(private_key) = private_key else {
        eprintln!(
            "{} Set CLIENT_PRIVATE_KEY (or PRIVATE_KEY) to fund the paid brainstorm call.",
            "Error:".red().bold()
        );
        std::process::exit(1);
    };

    let base_url = normalize_base_url(args.agent_url.as_deref());
    let mut config = SmokeConfig::new(&base_url, &args.topic, &private_key);
    config.attempts = args.attempts;
    config.interval = std::time::Duration::from_millis(args.interval_ms);
    config.server_command = match args.server_command {
        Some(command) => command.split_whitespace().map(str::to_string).collect(),
        None => default_server_command(),
    };

    let result = match SmokeDriver::new(config) {
        Ok(mut driver) => {
            println!("{} {}", "Agent:".blue().bold(), base_url);
            println!("{} {}", "Payer:".blue().bold(), driver.payer());
            driver.run().await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(report) => {
            let status = if (200..300).contains(&report.status) {
                report.status.to_string().green().bold()
            } else {
                report.status.to_string().yellow().bold()
            };
            println!(
                "{} {}",
                "Price:".blue().bold(),
                report.price.as_deref().unwrap_or("unknown")
            );
            println!("{} {}", "Status:".blue().bold(), status);
            match serde_json::to_string_pretty(&report.body) {
                Ok(body) => println!("{}\n{}", "Body:".blue().bold(), body),
                Err(_) => println!("{}\n{}", "Body:".blue().bold(), report.body),
            }
            if let Some(tx) = report.settlement.and_then(|s| s.transaction) {
                println!("{} {}", "Settlement:".blue().bold(), tx);
            }
            println!("{}", "✅ Smoke test finished".green().bold());
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}
