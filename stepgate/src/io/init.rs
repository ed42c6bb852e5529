//! Initialization helpers for `.stepgate/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{StepgateConfig, write_config};

/// All canonical paths within `.stepgate/` for a workspace root.
#[derive(Debug, Clone)]
pub struct StepgatePaths {
    pub root: PathBuf,
    pub stepgate_dir: PathBuf,
    pub jobs_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl StepgatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let stepgate_dir = root.join(".stepgate");
        Self {
            root: root.clone(),
            jobs_dir: stepgate_dir.join("jobs"),
            config_path: stepgate_dir.join("config.toml"),
            gitignore_path: stepgate_dir.join(".gitignore"),
            stepgate_dir,
        }
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite the existing config file. Jobs are never touched.
    pub force: bool,
}

/// Create `.stepgate/` scaffolding in `root`.
///
/// Fails if `.stepgate/` already exists unless `options.force` is set.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<StepgatePaths> {
    let paths = StepgatePaths::new(root);
    if paths.stepgate_dir.exists() && !paths.stepgate_dir.is_dir() {
        return Err(anyhow!(
            "stepgate init: .stepgate exists but is not a directory"
        ));
    }
    if paths.stepgate_dir.exists() && !options.force {
        return Err(anyhow!(
            "stepgate init: .stepgate already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.stepgate_dir)?;
    create_dir(&paths.jobs_dir)?;
    write_config(&paths.config_path, &StepgateConfig::default())?;
    fs::write(&paths.gitignore_path, STEPGATE_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

const STEPGATE_GITIGNORE: &str = "jobs/\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.stepgate_dir.is_dir());
        assert!(paths.jobs_dir.is_dir());
        assert!(paths.config_path.is_file());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read"),
            STEPGATE_GITIGNORE
        );
        assert_eq!(
            load_config(&paths.config_path).expect("load"),
            StepgateConfig::default()
        );
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_workspace(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_keeps_jobs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        let marker = paths.jobs_dir.join("keep.txt");
        fs::write(&marker, "x").expect("write");
        fs::write(&paths.config_path, "[shell]\ntimeout_secs = 9\n").expect("write");

        init_workspace(temp.path(), &InitOptions { force: true }).expect("re-init");
        assert!(marker.exists());
        assert_eq!(
            load_config(&paths.config_path).expect("load").shell.timeout_secs,
            60
        );
    }
}
