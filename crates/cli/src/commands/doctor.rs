use std::time::Duration;

use parley_agent::{HttpTextGenerator, TextGenerator};
use parley_core::config::{AppConfig, LlmProvider, LoadOptions};
use serde::Serialize;

use crate::commands::{escape_json, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\
                 \"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_agent_roster(&config));
            checks.push(check_llm_backend(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(skipped("agent_roster"));
            checks.push(skipped("llm_backend"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn skipped(name: &'static str) -> DoctorCheck {
    DoctorCheck {
        name,
        status: CheckStatus::Skipped,
        details: "skipped because configuration did not load".to_string(),
    }
}

fn check_agent_roster(config: &AppConfig) -> DoctorCheck {
    let enabled: Vec<&str> = config.enabled_agents().map(|agent| agent.id.as_str()).collect();
    if enabled.is_empty() {
        return DoctorCheck {
            name: "agent_roster",
            status: CheckStatus::Fail,
            details: "no enabled [[agents]] entries; nobody would ever reply".to_string(),
        };
    }

    let disabled = config.agents.len() - enabled.len();
    DoctorCheck {
        name: "agent_roster",
        status: CheckStatus::Pass,
        details: format!(
            "{} enabled ({}), {disabled} disabled",
            enabled.len(),
            enabled.join(", ")
        ),
    }
}

/// Template replies need nothing; model backends must be constructible and answer HTTP.
fn check_llm_backend(config: &AppConfig) -> DoctorCheck {
    if config.llm.provider == LlmProvider::Template {
        return DoctorCheck {
            name: "llm_backend",
            status: CheckStatus::Pass,
            details: "template replies; no model backend required".to_string(),
        };
    }

    let generator = match HttpTextGenerator::from_config(&config.llm) {
        Ok(generator) => generator,
        Err(error) => {
            return DoctorCheck {
                name: "llm_backend",
                status: CheckStatus::Fail,
                details: error.to_string(),
            }
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "llm_backend",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let base_url = config.llm.base_url.clone().unwrap_or_default();
    let timeout = Duration::from_secs(config.llm.timeout_secs.min(5));
    let result = runtime.block_on(async {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| format!("failed to build http client: {error}"))?;
        client
            .get(&base_url)
            .send()
            .await
            .map(|response| response.status())
            .map_err(|error| format!("`{base_url}` is unreachable: {error}"))
    });

    match result {
        Ok(status) => DoctorCheck {
            name: "llm_backend",
            status: CheckStatus::Pass,
            details: format!(
                "{} backend at `{}` answered with HTTP {}",
                generator.backend(),
                generator.endpoint(),
                status.as_u16()
            ),
        },
        Err(details) => DoctorCheck { name: "llm_backend", status: CheckStatus::Fail, details },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
