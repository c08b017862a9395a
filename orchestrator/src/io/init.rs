//! Initialization helpers for `.orchestrator/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{OrchestratorConfig, write_config};

/// All canonical paths within `.orchestrator/` for a project root.
#[derive(Debug, Clone)]
pub struct OrchestratorPaths {
    pub root: PathBuf,
    pub orchestrator_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
}

impl OrchestratorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let orchestrator_dir = root.join(".orchestrator");
        Self {
            root,
            gitignore_path: orchestrator_dir.join(".gitignore"),
            config_path: orchestrator_dir.join("config.toml"),
            orchestrator_dir,
        }
    }
}

/// Options for `init_orchestrator`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config with defaults.
    pub force: bool,
}

/// Create `.orchestrator/` scaffolding in `root` with a default config.
///
/// Fails if `.orchestrator/` already exists unless `options.force` is set.
/// The database itself is created lazily on first open.
pub fn init_orchestrator(root: &Path, options: &InitOptions) -> Result<OrchestratorPaths> {
    let paths = OrchestratorPaths::new(root);
    if paths.orchestrator_dir.exists() && !paths.orchestrator_dir.is_dir() {
        return Err(anyhow!(
            "orchestrator init: .orchestrator exists but is not a directory"
        ));
    }
    if paths.orchestrator_dir.exists() && !options.force {
        return Err(anyhow!(
            "orchestrator init: .orchestrator already exists (use --force to overwrite)"
        ));
    }

    fs::create_dir_all(&paths.orchestrator_dir)
        .with_context(|| format!("create directory {}", paths.orchestrator_dir.display()))?;
    fs::write(&paths.gitignore_path, ORCHESTRATOR_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &OrchestratorConfig::default())?;

    Ok(paths)
}

const ORCHESTRATOR_GITIGNORE: &str = "*.db\n*.db-wal\n*.db-shm\n";
