mod agent;
mod capabilities;
mod config;
mod error;
mod http;
mod llm;
mod sandbox;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::agent::{ExecutionCoordinator, TaskInterpreter};
use crate::capabilities::{builtin, CapabilityContext, CapabilityRegistry};
use crate::config::{Config, DATA_DIR_ENV};
use crate::sandbox::PathGuard;

/// Connect timeout for outbound HTTP made by capabilities.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout for outbound HTTP made by capabilities.
const HTTP_READ_TIMEOUT: Duration = Duration::from_secs(30);

fn print_help() {
    println!(
        "\
tasker-agent v{}

An HTTP task agent: plain-language tasks in, allowlisted sandboxed operations out.

USAGE:
    tasker-agent [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/tasker.toml]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG           Log level filter for tracing
                       (e.g. debug, tasker_agent=debug,warn)
    {DATA_DIR_ENV}    Overrides [sandbox] root
    OPENAI_API_KEY     API key for OpenAI-compatible providers
    ANTHROPIC_API_KEY  API key for Anthropic models

EXAMPLES:
    tasker-agent                                  # uses config/tasker.toml
    tasker-agent /etc/tasker/tasker.toml          # custom config path
    {DATA_DIR_ENV}=/srv/data tasker-agent         # custom sandbox root
    curl -X POST 'localhost:8000/run?task=Sort%20the%20contacts'",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("tasker-agent v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tasker_agent=info")),
        )
        .init();

    println!(
        r#"
   _____         _
  |_   _|_ _ ___| | _____ _ __
    | |/ _` / __| |/ / _ \ '__|
    | | (_| \__ \   <  __/ |
    |_|\__,_|___/_|\_\___|_|   v{}
"#,
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/tasker.toml".to_string());

    info!("Loading configuration from {config_path}");
    let config = Config::load(&config_path)?;

    std::fs::create_dir_all(&config.sandbox.root).with_context(|| {
        format!("Failed to create sandbox root {}", config.sandbox.root.display())
    })?;
    let guard = PathGuard::new(&config.sandbox.root, &config.sandbox.virtual_root)
        .with_context(|| format!("Invalid sandbox root {}", config.sandbox.root.display()))?;
    info!(
        "Sandbox: {} (virtual root {})",
        guard.root().display(),
        config.sandbox.virtual_root
    );

    let llm = llm::from_config(&config.llm)?;
    info!("LLM: {}", llm.description());

    let registry = builtin::register_all(CapabilityRegistry::builder()).build()?;
    info!("Capabilities: {} registered", registry.len());

    let http_client = reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .timeout(HTTP_READ_TIMEOUT)
        .user_agent(config.capabilities.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .context("Failed to build HTTP client")?;

    let interpreter = TaskInterpreter::new(
        llm.clone(),
        Duration::from_secs(config.llm.timeout_secs),
        &registry,
    );
    let ctx = CapabilityContext {
        guard,
        llm,
        http: http_client,
        settings: config.capabilities.clone(),
        handler_timeout: Duration::from_secs(config.sandbox.handler_timeout_secs),
    };
    let coordinator = Arc::new(ExecutionCoordinator::new(
        Arc::new(registry),
        interpreter,
        ctx,
    ));

    http::serve(&config.bind_addr(), http::router(coordinator)).await?;
    info!("Server stopped");
    Ok(())
}
