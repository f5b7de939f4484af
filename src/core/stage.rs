//! Stage selection.
//!
//! A [`Deployment`] starts with no stage. `staging` / `stable` tasks select
//! one; every stage-dependent step calls [`Deployment::require_stage`] before
//! issuing any command.

use serde::Serialize;

use crate::config::{DeployConfig, StageConfig};
use crate::error::{Error, Result};
use crate::server::Server;
use crate::utils::validation;

pub const STAGING: &str = "staging";
pub const STABLE: &str = "stable";

/// Tasks that select a stage, in the order shown in hints.
pub const STAGE_TASKS: &[&str] = &[STABLE, STAGING];

/// A resolved stage: name, its config, and the SSH target it deploys to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub name: String,
    pub config: StageConfig,
    pub server: Server,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Selection {
    pub fn is_stable(&self) -> bool {
        self.name == STABLE
    }

    /// Prefix a status line with the stage name.
    pub fn msg(&self, msg: &str) -> String {
        format!("{}: {}", self.name, msg)
    }
}

#[derive(Debug, Clone)]
pub struct Deployment {
    config: DeployConfig,
    selection: Option<Selection>,
}

impl Deployment {
    pub fn new(config: DeployConfig) -> Self {
        Self {
            config,
            selection: None,
        }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn project(&self) -> &str {
        &self.config.project
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Select a configured stage. An unknown name leaves the current
    /// selection untouched.
    pub fn select_stage(&mut self, name: &str) -> Result<&Selection> {
        let selection = self.resolve(name, None)?;
        Ok(&*self.selection.insert(selection))
    }

    /// Select the production stage, optionally recording a release tag.
    pub fn select_release(&mut self, tag: Option<&str>) -> Result<&Selection> {
        let tag = tag
            .map(|t| validation::require_ref_name(t, "tagname").map(str::to_string))
            .transpose()?;
        let selection = self.resolve(STABLE, tag)?;
        Ok(&*self.selection.insert(selection))
    }

    /// The selected stage, or `stage.not_selected` naming `task`.
    pub fn require_stage(&self, task: &str) -> Result<&Selection> {
        self.selection
            .as_ref()
            .ok_or_else(|| Error::stage_not_selected(task, STAGE_TASKS))
    }

    fn resolve(&self, name: &str, tag: Option<String>) -> Result<Selection> {
        let stage = self
            .config
            .stage(name)
            .ok_or_else(|| Error::stage_not_found(name, self.config.stage_names()))?;

        Ok(Selection {
            name: name.to_string(),
            server: self.config.server_for(stage),
            config: stage.clone(),
            tag,
        })
    }
}
