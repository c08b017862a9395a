//! Project orchestrator CLI.
//!
//! Operates on `.orchestrator/` under `--root` (default: current directory).
//! Every command prints JSON to stdout; diagnostics go to stderr.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use orchestrator::core::brief::IntakeRequest;
use orchestrator::exit_codes;
use orchestrator::io::config::load_config;
use orchestrator::io::init::{InitOptions, OrchestratorPaths, init_orchestrator};
use orchestrator::io::store::StoreHealth;
use orchestrator::{Orchestrator, logging};

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Advance projects through intake, planning, estimation and execution"
)]
struct Cli {
    /// Directory containing `.orchestrator/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.orchestrator/` with a default config.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Check `.orchestrator/config.toml` and print the effective config.
    Validate,
    /// Submit a new project and step it once.
    Intake {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        /// One of design, development, research, content, data-ml.
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        due_date: Option<String>,
        #[arg(long)]
        owner: Option<String>,
    },
    /// Advance one project by at most one stage.
    Step { project_id: String },
    /// Advance a batch of active projects.
    Heartbeat {
        /// Maximum projects to step (default: heartbeat.batch_size).
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print a project with its brief, plan, board and recent events.
    Show { project_id: String },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli.root.as_path();
    match cli.command {
        Command::Init { force } => cmd_init(root, force),
        Command::Validate => cmd_validate(root),
        Command::Intake {
            title,
            description,
            category,
            due_date,
            owner,
        } => {
            let request = IntakeRequest {
                title,
                description,
                category_hint: category,
                due_date,
                owner,
                attachments: Vec::new(),
            };
            let orchestrator = open(root)?;
            print_json(&orchestrator.intake(&request)?)?;
            Ok(exit_codes::OK)
        }
        Command::Step { project_id } => {
            let orchestrator = open(root)?;
            let result = orchestrator.step(&project_id)?;
            print_json(&result)?;
            Ok(if result.action.is_some() {
                exit_codes::OK
            } else if result.is_exhausted() {
                exit_codes::EXHAUSTED
            } else {
                exit_codes::NO_ACTION
            })
        }
        Command::Heartbeat { limit } => {
            let orchestrator = open(root)?;
            print_json(&orchestrator.advance_active(limit)?)?;
            Ok(exit_codes::OK)
        }
        Command::Show { project_id } => {
            let orchestrator = open(root)?;
            print_json(&orchestrator.snapshot(&project_id)?)?;
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_orchestrator(root, &InitOptions { force })?;
    println!("{}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let paths = OrchestratorPaths::new(root);
    let config = load_config(&paths.config_path)?;
    print!(
        "{}",
        toml::to_string_pretty(&config).context("serialize config toml")?
    );
    Ok(exit_codes::OK)
}

fn open(root: &Path) -> Result<Orchestrator> {
    let paths = OrchestratorPaths::new(root);
    let config = load_config(&paths.config_path)?;
    let (orchestrator, health) = Orchestrator::from_config(root, &config)?;
    if let StoreHealth::Degraded { reason } = &health {
        eprintln!("warning: store degraded, changes will not persist: {reason}");
    }
    Ok(orchestrator)
}

/// Serialize `value` to pretty-printed JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["orchestrator", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["orchestrator", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_step_with_root() {
        let cli = Cli::parse_from(["orchestrator", "step", "p-1", "--root", "/srv/app"]);
        assert!(matches!(cli.command, Command::Step { ref project_id } if project_id == "p-1"));
        assert_eq!(cli.root, PathBuf::from("/srv/app"));
    }

    #[test]
    fn parse_intake_and_heartbeat() {
        let cli = Cli::parse_from([
            "orchestrator",
            "intake",
            "--title",
            "Portal",
            "--description",
            "Self-service portal",
            "--category",
            "design",
        ]);
        assert!(matches!(
            cli.command,
            Command::Intake { ref category, .. } if category.as_deref() == Some("design")
        ));

        let cli = Cli::parse_from(["orchestrator", "heartbeat", "--limit", "3"]);
        assert!(matches!(cli.command, Command::Heartbeat { limit: Some(3) }));
    }
}
