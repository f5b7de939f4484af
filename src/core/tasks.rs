//! Task registry: the table of operations callable from the command line.
//!
//! Invocations use `name[:arg,key=value,...]`, e.g. `stable:v1.2.0` or
//! `dump_database:dest=/tmp`. A literal comma inside a value is written `\,`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::pipeline;
use crate::session::Connection;
use crate::stage::{Deployment, STABLE, STAGING};
use crate::steps;
use crate::utils::suggest;

pub type Params = BTreeMap<&'static str, String>;

type Handler = fn(&mut Deployment, &mut Connection, &Params) -> Result<()>;

pub struct Task {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [&'static str],
    handler: Handler,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
}

/// One parsed command-line task invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskCall {
    pub name: String,
    pub positional: Vec<String>,
    pub named: Vec<(String, String)>,
}

fn split_args(raw: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            ',' => args.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    args.push(current);
    args
}

impl TaskCall {
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, raw_args) = match spec.split_once(':') {
            Some((name, args)) => (name, Some(args)),
            None => (spec, None),
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation_invalid_argument(
                "task",
                format!("'{}' has no task name", spec),
                None,
                None,
            ));
        }

        let mut call = TaskCall {
            name: name.to_string(),
            ..Self::default()
        };

        let Some(raw_args) = raw_args else {
            return Ok(call);
        };

        for arg in split_args(raw_args) {
            match arg.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    call.named.push((key.trim().to_string(), value.to_string()))
                }
                _ => call.positional.push(arg),
            }
        }

        Ok(call)
    }
}

impl Task {
    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            name: self.name.to_string(),
            description: self.description.to_string(),
            params: self.params.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Map positional and named arguments onto declared parameters.
    pub fn bind(&self, call: &TaskCall) -> Result<Params> {
        let mut params = Params::new();

        if call.positional.len() > self.params.len() {
            return Err(Error::validation_invalid_argument(
                self.name,
                format!(
                    "'{}' takes at most {} argument(s), got {}",
                    self.name,
                    self.params.len(),
                    call.positional.len()
                ),
                None,
                None,
            ));
        }

        for (name, value) in self.params.iter().zip(&call.positional) {
            params.insert(*name, value.clone());
        }

        for (key, value) in &call.named {
            let Some(name) = self.params.iter().find(|p| **p == key.as_str()) else {
                return Err(Error::validation_invalid_argument(
                    self.name,
                    format!("'{}' has no parameter '{}'", self.name, key),
                    Some(key.clone()),
                    Some(self.params.iter().map(|p| p.to_string()).collect()),
                ));
            };
            if params.insert(*name, value.clone()).is_some() {
                return Err(Error::validation_invalid_argument(
                    self.name,
                    format!("'{}' got parameter '{}' twice", self.name, key),
                    Some(key.clone()),
                    None,
                ));
            }
        }

        Ok(params)
    }
}

fn task(
    name: &'static str,
    description: &'static str,
    params: &'static [&'static str],
    handler: Handler,
) -> Task {
    Task {
        name,
        description,
        params,
        handler,
    }
}

fn non_empty<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str).filter(|v| !v.trim().is_empty())
}

pub struct TaskRegistry {
    tasks: Vec<Task>,
}

impl TaskRegistry {
    pub fn builtin() -> Self {
        let tasks = vec![
            task(STAGING, "Configure staging environment.", &[], |d, _, _| {
                d.select_stage(STAGING).map(|_| ())
            }),
            task(
                STABLE,
                "Configure stable environment, optionally tagging the release.",
                &["tagname"],
                |d, _, p| d.select_release(non_empty(p, "tagname")).map(|_| ()),
            ),
            task(
                steps::SETUP_STATICFILES,
                "Create public directories for static and media files.",
                &[],
                |d, c, _| steps::create_static_dirs(d, c),
            ),
            task(
                steps::UPDATE_STATICFILES,
                "Update static files via collectstatic command.",
                &[],
                |d, c, _| steps::collect_static_assets(d, c),
            ),
            task(
                steps::SETUP_VIRTUALENV,
                "Create new bare virtual environment.",
                &[],
                |d, c, _| steps::create_virtualenv(d, c),
            ),
            task(
                steps::UPDATE_VIRTUALENV,
                "Install new packages to virtual environment.",
                &[],
                |d, c, _| steps::install_dependencies(d, c),
            ),
            task(
                steps::UPDATE_DATABASE,
                "Sync database and fake-apply South migrations.",
                &[],
                |d, c, _| steps::migrate_database(d, c),
            ),
            task(
                steps::DUMP_DATABASE,
                "Dump database to a dated JSON file and download it.",
                &["dest"],
                |d, c, p| steps::dump_database(d, c, non_empty(p, "dest").map(Path::new)).map(|_| ()),
            ),
            task(
                steps::SETUP_REPOSITORY,
                "Clone specific branch from repository.",
                &[],
                |d, c, _| steps::clone_repository(d, c),
            ),
            task(
                steps::DEPLOY,
                "Full deployment of python code via git.",
                &[],
                |d, c, _| steps::deploy(d, c),
            ),
            task(
                steps::RESTART_WSGI,
                "Restart WSGI server.",
                &[],
                |d, c, _| steps::restart_server(d, c),
            ),
            task(
                steps::ENABLE_SITE,
                "Enable Apache site and reload (as root).",
                &["site"],
                |d, c, p| steps::enable_site(d, c, non_empty(p, "site")),
            ),
            task(
                steps::DISABLE_SITE,
                "Disable Apache site and reload (as root).",
                &["site"],
                |d, c, p| steps::disable_site(d, c, non_empty(p, "site")),
            ),
            task(
                pipeline::SETUP,
                "Full setup: clone repository, create virtualenv and public directories.",
                &[],
                |d, c, _| pipeline::setup(d, c),
            ),
            task(
                pipeline::UPDATE,
                "Full update: push/pull code, install packages, collect static files, restart.",
                &[],
                |d, c, _| pipeline::update(d, c),
            ),
        ];

        Self { tasks }
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn list(&self) -> Vec<TaskInfo> {
        self.tasks.iter().map(Task::info).collect()
    }

    fn lookup(&self, name: &str) -> Result<&Task> {
        self.get(name).ok_or_else(|| {
            let similar = suggest::find_similar(name, self.tasks.iter().map(|t| t.name));
            let mut err = Error::validation_invalid_argument(
                "task",
                format!("Unknown task '{}'", name),
                Some(name.to_string()),
                None,
            );
            if !similar.is_empty() {
                err = err.with_hint(format!("Did you mean: {}?", similar.join(", ")));
            }
            err.with_hint("Run 'elvard --list' to see available tasks")
        })
    }

    /// Run tasks left to right against one deployment and connection.
    ///
    /// Every invocation is resolved before anything runs, so a typo in the
    /// last task name issues no commands. Execution stops at the first error.
    pub fn run(
        &self,
        calls: &[TaskCall],
        deployment: &mut Deployment,
        conn: &mut Connection,
    ) -> Result<Vec<String>> {
        let resolved = calls
            .iter()
            .map(|call| {
                let task = self.lookup(&call.name)?;
                Ok((task, task.bind(call)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut completed = Vec::new();
        for (task, params) in resolved {
            (task.handler)(deployment, conn, &params).map_err(|e| {
                e.with_hint(format!(
                    "Task '{}' failed after {} completed task(s); nothing was rolled back",
                    task.name,
                    completed.len()
                ))
            })?;
            completed.push(task.name.to_string());
        }

        Ok(completed)
    }
}
