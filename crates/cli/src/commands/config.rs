use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use parley_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::CommandResult;

/// One reported setting: dotted key, the environment variables that can set it, rendered value.
struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

impl Field {
    fn new(key: &'static str, env_keys: &'static [&'static str], value: impl ToString) -> Self {
        Self { key, env_keys, value: value.to_string() }
    }
}

pub fn run(options: LoadOptions) -> CommandResult {
    let explicit_path = options.config_path.clone();
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            )
        }
    };

    let config_file_path = detect_config_path(explicit_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: override > env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    let agent_source = if config_file_doc.as_ref().is_some_and(|doc| doc.get("agents").is_some()) {
        file_label(config_file_path.as_deref())
    } else {
        "default".to_string()
    };
    if config.agents.is_empty() {
        lines.push(render_line("agents", "<none>", agent_source.clone()));
    }
    for (index, agent) in config.agents.iter().enumerate() {
        let chance = agent
            .response_chance
            .map(|chance| chance.to_string())
            .unwrap_or_else(|| format!("{} (default)", agent.effective_response_chance()));
        let value = format!(
            "{} name={} personality={} interests=[{}] response_chance={} enabled={}",
            agent.id,
            agent.display_name(),
            agent.personality,
            agent.interests.join(", "),
            chance,
            agent.enabled
        );
        lines.push(render_line(&format!("agents[{index}]"), &value, agent_source.clone()));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_token(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    vec![
        Field::new("bus.topic", &["PARLEY_BUS_TOPIC"], &config.bus.topic),
        Field::new(
            "bus.consumer_prefix",
            &["PARLEY_BUS_CONSUMER_PREFIX"],
            &config.bus.consumer_prefix,
        ),
        Field::new(
            "bus.ingress_consumer",
            &["PARLEY_BUS_INGRESS_CONSUMER"],
            &config.bus.ingress_consumer,
        ),
        Field::new(
            "bus.channel_capacity",
            &["PARLEY_BUS_CHANNEL_CAPACITY"],
            config.bus.channel_capacity,
        ),
        Field::new(
            "bus.reconnect_max_retries",
            &["PARLEY_BUS_RECONNECT_MAX_RETRIES"],
            config.bus.reconnect_max_retries,
        ),
        Field::new(
            "conversation.default_id",
            &["PARLEY_CONVERSATION_DEFAULT_ID"],
            &config.conversation.default_id,
        ),
        Field::new(
            "arbiter.history_window",
            &["PARLEY_ARBITER_HISTORY_WINDOW"],
            config.arbiter.history_window,
        ),
        Field::new("arbiter.spam_cap", &["PARLEY_ARBITER_SPAM_CAP"], config.arbiter.spam_cap),
        Field::new(
            "arbiter.overhear_chance",
            &["PARLEY_ARBITER_OVERHEAR_CHANCE"],
            config.arbiter.overhear_chance,
        ),
        Field::new(
            "runtime.pacing_delay_ms",
            &["PARLEY_RUNTIME_PACING_DELAY_MS"],
            config.runtime.pacing_delay_ms,
        ),
        Field::new(
            "runtime.personality_scaled_pacing",
            &["PARLEY_RUNTIME_PERSONALITY_SCALED_PACING"],
            config.runtime.personality_scaled_pacing,
        ),
        Field::new(
            "runtime.context_limit",
            &["PARLEY_RUNTIME_CONTEXT_LIMIT"],
            config.runtime.context_limit,
        ),
        Field::new(
            "llm.provider",
            &["PARLEY_LLM_PROVIDER"],
            format!("{:?}", config.llm.provider).to_lowercase(),
        ),
        Field::new("llm.model", &["PARLEY_LLM_MODEL"], &config.llm.model),
        Field::new(
            "llm.base_url",
            &["PARLEY_LLM_BASE_URL"],
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new("llm.api_key", &["PARLEY_LLM_API_KEY"], api_key),
        Field::new("llm.timeout_secs", &["PARLEY_LLM_TIMEOUT_SECS"], config.llm.timeout_secs),
        Field::new("llm.max_tokens", &["PARLEY_LLM_MAX_TOKENS"], config.llm.max_tokens),
        Field::new("llm.temperature", &["PARLEY_LLM_TEMPERATURE"], config.llm.temperature),
        Field::new(
            "server.bind_address",
            &["PARLEY_SERVER_BIND_ADDRESS"],
            &config.server.bind_address,
        ),
        Field::new(
            "server.health_check_port",
            &["PARLEY_SERVER_HEALTH_CHECK_PORT"],
            config.server.health_check_port,
        ),
        Field::new(
            "logging.level",
            &["PARLEY_LOGGING_LEVEL", "PARLEY_LOG_LEVEL"],
            &config.logging.level,
        ),
        Field::new(
            "logging.format",
            &["PARLEY_LOGGING_FORMAT", "PARLEY_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_lowercase(),
        ),
    ]
}

fn detect_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then_some(path);
    }

    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            return file_label(config_file_path);
        }
    }

    "default".to_string()
}

fn file_label(config_file_path: Option<&Path>) -> String {
    let file_path = config_file_path
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "config file".to_string());
    format!("file ({file_path})")
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
