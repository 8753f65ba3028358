use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use parley_cli::commands::simulate::SimulateOptions;
use parley_cli::commands::{config, doctor, simulate};
use parley_core::config::{LoadOptions, ENV_KEYS};
use serde_json::Value;
use tempfile::TempDir;

const ROSTER: &str = r#"
[runtime]
pacing_delay_ms = 10

[[agents]]
id = "agent-ada"
name = "Ada"
personality = "technical"
interests = ["rust"]

[[agents]]
id = "agent-milo"
personality = "social"
enabled = false
"#;

#[test]
fn config_reports_sources_and_redacts_api_key() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(&dir, ROSTER);
    with_env(
        &[("PARLEY_LLM_API_KEY", "sk-live-secret"), ("PARLEY_BUS_TOPIC", "room-1")],
        || {
            let result = config::run(options_for(&path));
            assert_eq!(result.exit_code, 0);

            let output = result.output;
            assert!(output.contains("- bus.topic = room-1 (source: env (PARLEY_BUS_TOPIC))"));
            assert!(output.contains("- runtime.pacing_delay_ms = 10 (source: file ("));
            assert!(output.contains("- arbiter.spam_cap = 2 (source: default)"));
            assert!(output.contains("- llm.api_key = sk-*** (source: env (PARLEY_LLM_API_KEY))"));
            assert!(!output.contains("sk-live-secret"));
            assert!(output.contains("agents[0] = agent-ada name=Ada personality=technical"));
            assert!(output.contains("response_chance=0.7 (default)"));
            assert!(output.contains("agents[1] = agent-milo name=agent-milo"));
        },
    );
}

#[test]
fn config_without_agents_reports_an_empty_roster() {
    with_env(&[], || {
        let result = config::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("- agents = <none> (source: default)"));
        assert!(!result.output.contains("agents[0]"));
    });
}

#[test]
fn config_returns_validation_failure_as_json() {
    with_env(&[("PARLEY_ARBITER_OVERHEAR_CHANCE", "1.5")], || {
        let result = config::run(LoadOptions::default());
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_passes_with_template_backend_and_roster() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(&dir, ROSTER);
    with_env(&[], || {
        let result = doctor::run(options_for(&path), true);
        assert_eq!(result.exit_code, 0, "unexpected report: {}", result.output);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "pass");
        let checks = report["checks"].as_array().cloned().unwrap_or_default();
        let names: Vec<&str> = checks.iter().filter_map(|check| check["name"].as_str()).collect();
        assert_eq!(names, ["config_validation", "agent_roster", "llm_backend"]);
        assert!(checks[1]["details"].as_str().unwrap_or_default().contains("1 enabled"));
    });
}

#[test]
fn doctor_fails_without_agents_and_skips_after_config_errors() {
    with_env(&[], || {
        let result = doctor::run(LoadOptions::default(), false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("- [fail] agent_roster"));
    });

    with_env(&[("PARLEY_LLM_PROVIDER", "openai")], || {
        let result = doctor::run(LoadOptions::default(), true);
        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(report["checks"][0]["status"], "fail");
        assert_eq!(report["checks"][1]["status"], "skipped");
        assert_eq!(report["checks"][2]["status"], "skipped");
    });
}

#[test]
fn simulate_runs_a_conversation_with_the_default_cast() {
    with_env(&[], || {
        let result = simulate::run(
            LoadOptions::default(),
            &SimulateOptions {
                seed: 11,
                pacing_ms: 0,
                settle_ms: 300,
                messages: vec!["hi all, I love programming".to_string()],
            },
        );
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let report = parse_payload(&result.output);
        assert_eq!(report["command"], "simulate");
        assert_eq!(report["status"], "ok");
        assert_eq!(report["conversation_id"], "main-conversation");
        assert!(report["participant_count"].as_u64().unwrap_or_default() >= 4);
        assert_eq!(report["transcript"][0]["sender"], "operator");
        assert_eq!(report["transcript"][0]["text"], "hi all, I love programming");
    });
}

#[test]
fn simulate_rejects_invalid_config() {
    with_env(&[("PARLEY_RUNTIME_CONTEXT_LIMIT", "0")], || {
        let result = simulate::run(
            LoadOptions::default(),
            &SimulateOptions { seed: 1, pacing_ms: 0, settle_ms: 0, messages: Vec::new() },
        );
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "config_validation");
    });
}

fn options_for(path: &Path) -> LoadOptions {
    LoadOptions {
        config_path: Some(path.to_path_buf()),
        require_file: true,
        ..LoadOptions::default()
    }
}

fn write_config(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("parley.toml");
    fs::write(&path, body).expect("write config");
    path
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let previous_values: Vec<(&str, Option<String>)> =
        ENV_KEYS.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in ENV_KEYS {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
