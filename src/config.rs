use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable that replaces `sandbox.root` after the file is loaded.
pub const DATA_DIR_ENV: &str = "TASKER_DATA_DIR";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// "openai" (any OpenAI-compatible endpoint) or "anthropic"
    pub provider: String,
    pub model: String,
    /// Supports ${ENV_VAR} substitution
    pub api_key: String,
    /// Overrides the provider's default API base URL (e.g. a proxy)
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens_per_request: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Real directory every file operation is confined to
    #[serde(default = "default_sandbox_root")]
    pub root: PathBuf,
    /// Path prefix the model uses for the root (remapped before resolution)
    #[serde(default = "default_virtual_root")]
    pub virtual_root: String,
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: default_sandbox_root(),
            virtual_root: default_virtual_root(),
            handler_timeout_secs: default_handler_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CapabilitiesConfig {
    /// Command prefix for `format_markdown`; the file path is appended
    #[serde(default = "default_formatter")]
    pub formatter: Vec<String>,
    /// Script handed to `uv run` by `install_and_run`
    #[serde(default = "default_datagen_url")]
    pub datagen_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            formatter: default_formatter(),
            datagen_url: default_datagen_url(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from("/data")
}

fn default_virtual_root() -> String {
    "/data".to_string()
}

fn default_handler_timeout() -> u64 {
    120
}

fn default_formatter() -> Vec<String> {
    vec![
        "npx".to_string(),
        "prettier@3.4.2".to_string(),
        "--write".to_string(),
    ]
}

fn default_datagen_url() -> String {
    "https://raw.githubusercontent.com/sanand0/tools-in-data-science-public/tds-2025-01/project-1/datagen.py"
        .to_string()
}

fn default_user_agent() -> String {
    format!("TaskerAgent/{}", env!("CARGO_PKG_VERSION"))
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            config.apply_data_dir(&dir);
        }
        Ok(config)
    }

    /// Parses TOML content, expanding `${VAR}` references first.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        if config.capabilities.formatter.is_empty() {
            anyhow::bail!("capabilities.formatter must name a command");
        }
        Ok(config)
    }

    /// Replaces the sandbox root; blank values are ignored.
    pub fn apply_data_dir(&mut self, dir: &str) {
        let dir = dir.trim();
        if !dir.is_empty() {
            self.sandbox.root = PathBuf::from(dir);
        }
    }

    /// Address the HTTP server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
