pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use parley_core::config::LoadOptions;

use crate::commands::simulate::SimulateOptions;

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Parley operator CLI",
    long_about = "Inspect parley configuration, run preflight checks, and simulate conversations.",
    after_help = "Examples:\n  parley doctor --json\n  parley config\n  parley simulate \"hi all\""
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file to load instead of ./parley.toml")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, agent roster, and text-generation backend readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run a conversation in-process with template agents and print it")]
    Simulate {
        #[arg(long, default_value_t = 7, help = "Seed for the arbiter's random draws")]
        seed: u64,
        #[arg(long, default_value_t = 250, help = "Pacing delay before each agent reply")]
        pacing_ms: u64,
        #[arg(long, default_value_t = 1_500, help = "How long to let agents talk per message")]
        settle_ms: u64,
        #[arg(value_name = "MESSAGE", help = "User messages to publish, in order")]
        messages: Vec<String>,
    },
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            ..LoadOptions::default()
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();

    let result = match cli.command {
        Command::Config => commands::config::run(options),
        Command::Doctor { json } => commands::doctor::run(options, json),
        Command::Simulate { seed, pacing_ms, settle_ms, messages } => commands::simulate::run(
            options,
            &SimulateOptions { seed, pacing_ms, settle_ms, messages },
        ),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
