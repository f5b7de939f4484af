//! Deploy configuration: project settings plus one record per stage.
//!
//! Loaded from JSON (`elvard.json`). Discovery order: explicit path,
//! `ELVARD_CONFIG`, `./elvard.json`, `~/.config/elvard/elvard.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::paths;
use crate::server::Server;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployConfig {
    /// Python package holding the settings modules.
    pub project: String,
    pub repository: String,
    pub server: Server,
    /// Login used for root-scoped tasks. Defaults to `root@<server.host>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_server: Option<Server>,
    #[serde(default = "default_activate")]
    pub activate: String,
    #[serde(default = "default_wsgi")]
    pub wsgi: String,
    #[serde(default = "default_requirements")]
    pub requirements: String,
    #[serde(default = "default_source_dir")]
    pub source_dir: String,
    pub stages: BTreeMap<String, StageConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    pub directory: String,
    /// Settings module suffix, e.g. `staging` for `<project>.settings.staging`.
    pub settings: String,
    /// Branch deployed to this stage.
    pub master: String,
    /// Branch merged into `master` before pushing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slave: Option<String>,
    /// Apache site identifier for a2ensite/a2dissite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wsgi: Option<String>,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<Server>,
}

fn default_activate() -> String {
    "env/bin/activate".to_string()
}

fn default_wsgi() -> String {
    "apache/django.wsgi".to_string()
}

fn default_requirements() -> String {
    "requirements.txt".to_string()
}

fn default_source_dir() -> String {
    "src".to_string()
}

fn default_backup_dir() -> String {
    "backup".to_string()
}

/// Join `path` onto `base` unless it is already absolute.
pub fn join_remote(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

impl DeployConfig {
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.keys().cloned().collect()
    }

    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.get(name)
    }

    /// SSH target for a stage: the stage override, else the project server.
    pub fn server_for(&self, stage: &StageConfig) -> Server {
        stage.server.clone().unwrap_or_else(|| self.server.clone())
    }

    pub fn root_server_for(&self, stage: Option<&StageConfig>) -> Server {
        if let Some(root) = &self.root_server {
            return root.clone();
        }
        let base = stage.map(|s| self.server_for(s)).unwrap_or_else(|| self.server.clone());
        base.with_user("root")
    }

    /// Absolute path of the activation script for a stage.
    pub fn activate_path(&self, stage: &StageConfig) -> String {
        join_remote(&stage.directory, &self.activate)
    }

    /// Absolute path of the WSGI reload trigger for a stage.
    pub fn wsgi_path(&self, stage: &StageConfig) -> String {
        let wsgi = stage.wsgi.as_deref().unwrap_or(&self.wsgi);
        join_remote(&stage.directory, wsgi)
    }

    pub fn backup_path(&self, stage: &StageConfig) -> String {
        join_remote(&stage.directory, &stage.backup_dir)
    }

    pub fn settings_module(&self, stage: &StageConfig) -> String {
        format!("{}.settings.{}", self.project, stage.settings)
    }

    /// Structural checks serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.project.trim().is_empty() {
            return Err(Error::config_invalid_value("project", None, "must not be empty"));
        }
        if self.repository.trim().is_empty() {
            return Err(Error::config_invalid_value("repository", None, "must not be empty"));
        }
        if !self.server.is_valid() {
            return Err(Error::config_invalid_value(
                "server",
                Some(self.server.host_string()),
                "host and user are required",
            ));
        }
        if self.stages.is_empty() {
            return Err(Error::config_invalid_value(
                "stages",
                None,
                "at least one stage must be configured",
            ));
        }

        for (name, stage) in &self.stages {
            let key = |field: &str| format!("stages.{}.{}", name, field);
            if !stage.directory.starts_with('/') {
                return Err(Error::config_invalid_value(
                    key("directory"),
                    Some(stage.directory.clone()),
                    "must be an absolute path",
                ));
            }
            if stage.master.trim().is_empty() {
                return Err(Error::config_invalid_value(key("master"), None, "must not be empty"));
            }
            if stage.settings.trim().is_empty() {
                return Err(Error::config_invalid_value(
                    key("settings"),
                    None,
                    "must not be empty",
                ));
            }
            if let Some(server) = &stage.server {
                if !server.is_valid() {
                    return Err(Error::config_invalid_value(
                        key("server"),
                        Some(server.host_string()),
                        "host and user are required",
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Parse and validate a config document.
pub fn from_str(raw: &str, origin: &str) -> Result<DeployConfig> {
    let config: DeployConfig =
        serde_json::from_str(raw).map_err(|e| Error::config_invalid_json(origin, e))?;
    config.validate()?;
    Ok(config)
}

pub fn load_from(path: &Path) -> Result<DeployConfig> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", display)))
    })?;
    from_str(&raw, &display)
}

/// Resolve which config file to use without reading it.
pub fn resolve_path(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(paths::expand(path)));
    }

    if let Ok(path) = std::env::var(paths::CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(paths::expand(&path)));
        }
    }

    let local = paths::local_config()?;
    if local.exists() {
        return Ok(local);
    }

    let global = paths::global_config()?;
    if global.exists() {
        return Ok(global);
    }

    Err(Error::config_missing_key(
        paths::CONFIG_FILE_NAME,
        Some(local.display().to_string()),
    )
    .with_hint(format!(
        "Create {} or pass --config <path> (also read from {})",
        paths::CONFIG_FILE_NAME,
        paths::CONFIG_ENV_VAR
    )))
}

pub fn load(explicit: Option<&str>) -> Result<DeployConfig> {
    let path = resolve_path(explicit)?;
    load_from(&path)
}
