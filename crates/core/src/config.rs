use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_RESPONSE_CHANCE: f64 = 0.7;

/// Every environment variable [`AppConfig::load`] reads.
pub const ENV_KEYS: &[&str] = &[
    "PARLEY_BUS_TOPIC",
    "PARLEY_BUS_CONSUMER_PREFIX",
    "PARLEY_BUS_INGRESS_CONSUMER",
    "PARLEY_BUS_CHANNEL_CAPACITY",
    "PARLEY_BUS_RECONNECT_MAX_RETRIES",
    "PARLEY_BUS_RECONNECT_BASE_DELAY_MS",
    "PARLEY_BUS_RECONNECT_MAX_DELAY_MS",
    "PARLEY_CONVERSATION_DEFAULT_ID",
    "PARLEY_ARBITER_HISTORY_WINDOW",
    "PARLEY_ARBITER_SPAM_CAP",
    "PARLEY_ARBITER_OVERHEAR_CHANCE",
    "PARLEY_RUNTIME_PACING_DELAY_MS",
    "PARLEY_RUNTIME_PERSONALITY_SCALED_PACING",
    "PARLEY_RUNTIME_CONTEXT_LIMIT",
    "PARLEY_LLM_PROVIDER",
    "PARLEY_LLM_API_KEY",
    "PARLEY_LLM_BASE_URL",
    "PARLEY_LLM_MODEL",
    "PARLEY_LLM_TIMEOUT_SECS",
    "PARLEY_LLM_MAX_TOKENS",
    "PARLEY_LLM_TEMPERATURE",
    "PARLEY_SERVER_BIND_ADDRESS",
    "PARLEY_SERVER_HEALTH_CHECK_PORT",
    "PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS",
    "PARLEY_LOGGING_LEVEL",
    "PARLEY_LOGGING_FORMAT",
    "PARLEY_LOG_LEVEL",
    "PARLEY_LOG_FORMAT",
];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bus: BusConfig,
    pub conversation: ConversationConfig,
    pub arbiter: ArbiterConfig,
    pub runtime: RuntimeConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub agents: Vec<AgentConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusConfig {
    pub topic: String,
    pub consumer_prefix: String,
    pub ingress_consumer: String,
    pub channel_capacity: usize,
    pub reconnect_max_retries: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationConfig {
    pub default_id: String,
}

/// Tuning for the per-agent response decision.
#[derive(Clone, Debug, PartialEq)]
pub struct ArbiterConfig {
    /// How many of the most recent history entries the anti-spam cap looks at.
    pub history_window: usize,
    /// Maximum number of own messages allowed inside the window before the agent goes quiet.
    pub spam_cap: usize,
    /// Chance that an agent engages with a message nothing else made relevant.
    pub overhear_chance: f64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self { history_window: 5, spam_cap: 2, overhear_chance: 0.3 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub pacing_delay_ms: u64,
    pub personality_scaled_pacing: bool,
    pub context_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { pacing_delay_ms: 4_000, personality_scaled_pacing: false, context_limit: 20 }
    }
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// One `[[agents]]` roster entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_personality")]
    pub personality: String,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub response_chance: Option<f64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, personality: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            personality: personality.into(),
            interests: Vec::new(),
            response_chance: None,
            enabled: true,
            description: None,
        }
    }

    /// Human-readable name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|name| !name.trim().is_empty()).unwrap_or(&self.id)
    }

    pub fn effective_response_chance(&self) -> f64 {
        self.response_chance.unwrap_or(DEFAULT_RESPONSE_CHANCE)
    }
}

fn default_personality() -> String {
    "default".to_string()
}

fn default_enabled() -> bool {
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// Canned personality templates, no model backend.
    Template,
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub bus_topic: Option<String>,
    pub pacing_delay_ms: Option<u64>,
    pub health_check_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Template,
            api_key: None,
            base_url: Some("http://localhost:11434".to_string()),
            model: "llama2".to_string(),
            timeout_secs: 30,
            max_tokens: 150,
            temperature: 0.7,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig {
                topic: "chat-messages".to_string(),
                consumer_prefix: "parley-agent-".to_string(),
                ingress_consumer: "parley-flow".to_string(),
                channel_capacity: 256,
                reconnect_max_retries: 5,
                reconnect_base_delay_ms: 1_000,
                reconnect_max_delay_ms: 30_000,
            },
            conversation: ConversationConfig { default_id: "main-conversation".to_string() },
            arbiter: ArbiterConfig::default(),
            runtime: RuntimeConfig::default(),
            llm: LlmConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            agents: Vec::new(),
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "template" => Ok(Self::Template),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected template|ollama|openai)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parley.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn enabled_agents(&self) -> impl Iterator<Item = &AgentConfig> {
        self.agents.iter().filter(|agent| agent.enabled)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(bus) = patch.bus {
            if let Some(topic) = bus.topic {
                self.bus.topic = topic;
            }
            if let Some(consumer_prefix) = bus.consumer_prefix {
                self.bus.consumer_prefix = consumer_prefix;
            }
            if let Some(ingress_consumer) = bus.ingress_consumer {
                self.bus.ingress_consumer = ingress_consumer;
            }
            if let Some(channel_capacity) = bus.channel_capacity {
                self.bus.channel_capacity = channel_capacity;
            }
            if let Some(max_retries) = bus.reconnect_max_retries {
                self.bus.reconnect_max_retries = max_retries;
            }
            if let Some(base_delay_ms) = bus.reconnect_base_delay_ms {
                self.bus.reconnect_base_delay_ms = base_delay_ms;
            }
            if let Some(max_delay_ms) = bus.reconnect_max_delay_ms {
                self.bus.reconnect_max_delay_ms = max_delay_ms;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(default_id) = conversation.default_id {
                self.conversation.default_id = default_id;
            }
        }

        if let Some(arbiter) = patch.arbiter {
            if let Some(history_window) = arbiter.history_window {
                self.arbiter.history_window = history_window;
            }
            if let Some(spam_cap) = arbiter.spam_cap {
                self.arbiter.spam_cap = spam_cap;
            }
            if let Some(overhear_chance) = arbiter.overhear_chance {
                self.arbiter.overhear_chance = overhear_chance;
            }
        }

        if let Some(runtime) = patch.runtime {
            if let Some(pacing_delay_ms) = runtime.pacing_delay_ms {
                self.runtime.pacing_delay_ms = pacing_delay_ms;
            }
            if let Some(scaled) = runtime.personality_scaled_pacing {
                self.runtime.personality_scaled_pacing = scaled;
            }
            if let Some(context_limit) = runtime.context_limit {
                self.runtime.context_limit = context_limit;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(agents) = patch.agents {
            self.agents = agents;
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PARLEY_BUS_TOPIC") {
            self.bus.topic = value;
        }
        if let Some(value) = read_env("PARLEY_BUS_CONSUMER_PREFIX") {
            self.bus.consumer_prefix = value;
        }
        if let Some(value) = read_env("PARLEY_BUS_INGRESS_CONSUMER") {
            self.bus.ingress_consumer = value;
        }
        if let Some(value) = read_env("PARLEY_BUS_CHANNEL_CAPACITY") {
            self.bus.channel_capacity = parse_usize("PARLEY_BUS_CHANNEL_CAPACITY", &value)?;
        }
        if let Some(value) = read_env("PARLEY_BUS_RECONNECT_MAX_RETRIES") {
            self.bus.reconnect_max_retries =
                parse_u32("PARLEY_BUS_RECONNECT_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("PARLEY_BUS_RECONNECT_BASE_DELAY_MS") {
            self.bus.reconnect_base_delay_ms =
                parse_u64("PARLEY_BUS_RECONNECT_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_BUS_RECONNECT_MAX_DELAY_MS") {
            self.bus.reconnect_max_delay_ms =
                parse_u64("PARLEY_BUS_RECONNECT_MAX_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_CONVERSATION_DEFAULT_ID") {
            self.conversation.default_id = value;
        }

        if let Some(value) = read_env("PARLEY_ARBITER_HISTORY_WINDOW") {
            self.arbiter.history_window = parse_usize("PARLEY_ARBITER_HISTORY_WINDOW", &value)?;
        }
        if let Some(value) = read_env("PARLEY_ARBITER_SPAM_CAP") {
            self.arbiter.spam_cap = parse_usize("PARLEY_ARBITER_SPAM_CAP", &value)?;
        }
        if let Some(value) = read_env("PARLEY_ARBITER_OVERHEAR_CHANCE") {
            self.arbiter.overhear_chance = parse_f64("PARLEY_ARBITER_OVERHEAR_CHANCE", &value)?;
        }

        if let Some(value) = read_env("PARLEY_RUNTIME_PACING_DELAY_MS") {
            self.runtime.pacing_delay_ms = parse_u64("PARLEY_RUNTIME_PACING_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_RUNTIME_PERSONALITY_SCALED_PACING") {
            self.runtime.personality_scaled_pacing =
                parse_bool("PARLEY_RUNTIME_PERSONALITY_SCALED_PACING", &value)?;
        }
        if let Some(value) = read_env("PARLEY_RUNTIME_CONTEXT_LIMIT") {
            self.runtime.context_limit = parse_usize("PARLEY_RUNTIME_CONTEXT_LIMIT", &value)?;
        }

        if let Some(value) = read_env("PARLEY_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("PARLEY_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("PARLEY_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("PARLEY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("PARLEY_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("PARLEY_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f64("PARLEY_LLM_TEMPERATURE", &value)? as f32;
        }

        if let Some(value) = read_env("PARLEY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PARLEY_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("PARLEY_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("PARLEY_LOGGING_LEVEL").or_else(|| read_env("PARLEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLEY_LOGGING_FORMAT").or_else(|| read_env("PARLEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(bus_topic) = overrides.bus_topic {
            self.bus.topic = bus_topic;
        }
        if let Some(pacing_delay_ms) = overrides.pacing_delay_ms {
            self.runtime.pacing_delay_ms = pacing_delay_ms;
        }
        if let Some(health_check_port) = overrides.health_check_port {
            self.server.health_check_port = health_check_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_bus(&self.bus)?;
        validate_conversation(&self.conversation)?;
        validate_arbiter(&self.arbiter)?;
        validate_runtime(&self.runtime)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_agents(&self.agents)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_bus(bus: &BusConfig) -> Result<(), ConfigError> {
    if bus.topic.trim().is_empty() {
        return Err(ConfigError::Validation("bus.topic must not be empty".to_string()));
    }
    if bus.consumer_prefix.trim().is_empty() {
        return Err(ConfigError::Validation(
            "bus.consumer_prefix must not be empty; agent consumer groups are derived from it"
                .to_string(),
        ));
    }
    if bus.ingress_consumer.trim().is_empty() {
        return Err(ConfigError::Validation(
            "bus.ingress_consumer must not be empty".to_string(),
        ));
    }
    if bus.channel_capacity == 0 {
        return Err(ConfigError::Validation(
            "bus.channel_capacity must be greater than zero".to_string(),
        ));
    }
    if bus.reconnect_base_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "bus.reconnect_base_delay_ms must be greater than zero".to_string(),
        ));
    }
    if bus.reconnect_max_delay_ms < bus.reconnect_base_delay_ms {
        return Err(ConfigError::Validation(
            "bus.reconnect_max_delay_ms must be >= bus.reconnect_base_delay_ms".to_string(),
        ));
    }
    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.default_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "conversation.default_id must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_arbiter(arbiter: &ArbiterConfig) -> Result<(), ConfigError> {
    if arbiter.history_window == 0 {
        return Err(ConfigError::Validation(
            "arbiter.history_window must be at least 1".to_string(),
        ));
    }
    if arbiter.spam_cap == 0 || arbiter.spam_cap > arbiter.history_window {
        return Err(ConfigError::Validation(
            "arbiter.spam_cap must be in range 1..=arbiter.history_window".to_string(),
        ));
    }
    validate_probability("arbiter.overhear_chance", arbiter.overhear_chance)
}

fn validate_runtime(runtime: &RuntimeConfig) -> Result<(), ConfigError> {
    if runtime.context_limit == 0 {
        return Err(ConfigError::Validation(
            "runtime.context_limit must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }
    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    let base_url_missing =
        llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
    match llm.provider {
        LlmProvider::Template => {}
        LlmProvider::Ollama => {
            if base_url_missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
        LlmProvider::OpenAi => {
            let key_missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if key_missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai provider (set PARLEY_LLM_API_KEY)"
                        .to_string(),
                ));
            }
            if base_url_missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for openai provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_agents(agents: &[AgentConfig]) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for agent in agents {
        let id = agent.id.trim();
        if id.is_empty() {
            return Err(ConfigError::Validation("agents[].id must not be empty".to_string()));
        }
        if !seen.insert(id.to_string()) {
            return Err(ConfigError::Validation(format!("agents[].id `{id}` is declared twice")));
        }
        if let Some(chance) = agent.response_chance {
            validate_probability(&format!("agents[{id}].response_chance"), chance)?;
        }
    }
    Ok(())
}

fn validate_probability(key: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{key} must be in range 0.0..=1.0, got {value}")))
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    bus: Option<BusPatch>,
    conversation: Option<ConversationPatch>,
    arbiter: Option<ArbiterPatch>,
    runtime: Option<RuntimePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    agents: Option<Vec<AgentConfig>>,
}

#[derive(Debug, Default, Deserialize)]
struct BusPatch {
    topic: Option<String>,
    consumer_prefix: Option<String>,
    ingress_consumer: Option<String>,
    channel_capacity: Option<usize>,
    reconnect_max_retries: Option<u32>,
    reconnect_base_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    default_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ArbiterPatch {
    history_window: Option<usize>,
    spam_cap: Option<usize>,
    overhear_chance: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimePatch {
    pacing_delay_ms: Option<u64>,
    personality_scaled_pacing: Option<bool>,
    context_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
