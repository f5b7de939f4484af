//! Scoped remote command context.
//!
//! A [`Connection`] keeps a stack of scopes (working directory, command
//! prefixes, host override). Each scope is pushed by a method returning a
//! [`Scoped`] guard; dropping the guard pops everything it pushed, on the
//! success path and on `?` early returns alike. Remote commands are rendered
//! as `cd <dir> && <prefix>... && <command>` and sent as one string, so the
//! directory change and activation always precede the command itself.

use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::config::join_remote;
use crate::error::{CommandFailedDetails, Error, Result, TargetDetails, TransferFailedDetails};
use crate::executor::{CommandKind, CommandRecord, Executor};
use crate::server::Server;
use crate::ssh::CommandOutput;
use crate::stage::Deployment;
use crate::utils::shell;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    Cd(String),
    Prefix(String),
    Host(Server),
}

pub struct Connection {
    executor: Box<dyn Executor>,
    scopes: Vec<Scope>,
    records: Vec<CommandRecord>,
}

/// Guard returned by the scope methods. Derefs to the [`Connection`] so
/// nested scopes and commands go through it.
pub struct Scoped<'a> {
    conn: &'a mut Connection,
    depth: usize,
}

impl Deref for Scoped<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl DerefMut for Scoped<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
    }
}

impl Drop for Scoped<'_> {
    fn drop(&mut self) {
        self.conn.scopes.truncate(self.depth);
    }
}

impl Connection {
    pub fn new(executor: Box<dyn Executor>) -> Self {
        Self {
            executor,
            scopes: Vec::new(),
            records: Vec::new(),
        }
    }

    fn enter(&mut self, scopes: Vec<Scope>) -> Scoped<'_> {
        let depth = self.scopes.len();
        self.scopes.extend(scopes);
        Scoped { conn: self, depth }
    }

    /// Change the remote working directory. Relative paths join onto the
    /// enclosing `cd`.
    pub fn cd(&mut self, path: impl Into<String>) -> Scoped<'_> {
        self.enter(vec![Scope::Cd(path.into())])
    }

    /// Run `command &&` before every remote command in scope.
    pub fn prefix(&mut self, command: impl Into<String>) -> Scoped<'_> {
        self.enter(vec![Scope::Prefix(command.into())])
    }

    /// Send remote commands in scope to `server`.
    pub fn host(&mut self, server: Server) -> Scoped<'_> {
        self.enter(vec![Scope::Host(server)])
    }

    /// Number of active scopes.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn cwd(&self) -> Option<String> {
        self.scopes.iter().fold(None, |cwd, scope| match (scope, cwd) {
            (Scope::Cd(path), Some(base)) => Some(join_remote(&base, path)),
            (Scope::Cd(path), None) => Some(path.clone()),
            (_, cwd) => cwd,
        })
    }

    pub fn server(&self) -> Option<&Server> {
        self.scopes.iter().rev().find_map(|scope| match scope {
            Scope::Host(server) => Some(server),
            _ => None,
        })
    }

    /// The command string actually sent to the remote shell.
    pub fn render(&self, command: &str) -> String {
        let mut parts = Vec::new();
        if let Some(cwd) = self.cwd() {
            parts.push(format!("cd {}", shell::quote_path(&cwd)));
        }
        for scope in &self.scopes {
            if let Scope::Prefix(prefix) = scope {
                parts.push(prefix.clone());
            }
        }
        parts.push(command.to_string());
        parts.join(" && ")
    }

    pub fn records(&self) -> &[CommandRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<CommandRecord> {
        self.records
    }

    fn require_server(&self) -> Result<Server> {
        self.server().cloned().ok_or_else(|| {
            Error::internal_unexpected("Remote command issued outside of a host scope")
        })
    }

    /// Run a command on the scoped host. Non-zero exit is `remote.command_failed`.
    pub fn run(&mut self, command: &str) -> Result<CommandOutput> {
        let server = self.require_server()?;
        let rendered = self.render(command);

        log_status!("run", "[{}] {}", server.host_string(), command);
        let output = self.executor.remote(&server, &rendered)?;
        self.records.push(CommandRecord {
            kind: CommandKind::Remote,
            host: Some(server.host_string()),
            command: rendered.clone(),
            exit_code: output.exit_code,
        });

        if !output.success {
            // ssh exits 255 when the connection itself failed
            let transport_failed = output.exit_code == 255;
            let err = Error::remote_command_failed(CommandFailedDetails {
                command: rendered,
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
                target: TargetDetails {
                    host: Some(server.host.clone()),
                    user: Some(server.user.clone()),
                },
            });
            if transport_failed {
                return Err(err.with_retryable(true).with_hint(format!(
                    "Could not reach {}; check SSH access and rerun",
                    server.host_string()
                )));
            }
            return Err(err);
        }

        Ok(output)
    }

    /// Run a command on the operator's machine. Remote scopes do not apply.
    pub fn local(&mut self, command: &str) -> Result<CommandOutput> {
        log_status!("local", "{}", command);
        let output = self.executor.local(command)?;
        self.records.push(CommandRecord {
            kind: CommandKind::Local,
            host: None,
            command: command.to_string(),
            exit_code: output.exit_code,
        });

        if !output.success {
            return Err(Error::local_command_failed(CommandFailedDetails {
                command: command.to_string(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
                target: TargetDetails {
                    host: None,
                    user: None,
                },
            }));
        }

        Ok(output)
    }

    /// Copy a file from the scoped host to the operator's machine.
    /// Relative remote paths resolve against the scoped working directory.
    pub fn get(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        let server = self.require_server()?;
        let remote_path = match self.cwd() {
            Some(cwd) => join_remote(&cwd, remote_path),
            None => remote_path.to_string(),
        };

        log_status!("get", "[{}] {} -> {}", server.host_string(), remote_path, local_path.display());
        let output = self.executor.fetch(&server, &remote_path, local_path)?;
        self.records.push(CommandRecord {
            kind: CommandKind::Fetch,
            host: Some(server.host_string()),
            command: format!("get {} {}", remote_path, local_path.display()),
            exit_code: output.exit_code,
        });

        if !output.success {
            return Err(Error::transfer_failed(TransferFailedDetails {
                remote_path,
                local_path: local_path.display().to_string(),
                error: output.stderr.trim().to_string(),
                host: Some(server.host_string()),
            }));
        }

        Ok(())
    }
}

fn stage_scopes(deployment: &Deployment, task: &str, subpath: Option<&str>) -> Result<Vec<Scope>> {
    let stage = deployment.require_stage(task)?;
    let directory = match subpath {
        Some(sub) => join_remote(&stage.config.directory, sub),
        None => stage.config.directory.clone(),
    };
    let activate = deployment.config().activate_path(&stage.config);

    Ok(vec![
        Scope::Host(stage.server.clone()),
        Scope::Cd(directory),
        Scope::Prefix(format!("source {}", shell::quote_path(&activate))),
    ])
}

/// Enter the selected stage's directory (optionally `subpath` below it) on
/// its host with the virtualenv activated.
pub fn with_remote_session<'a>(
    conn: &'a mut Connection,
    deployment: &Deployment,
    task: &str,
    subpath: Option<&str>,
) -> Result<Scoped<'a>> {
    let scopes = stage_scopes(deployment, task, subpath)?;
    Ok(conn.enter(scopes))
}

/// Remote session in the source checkout with the Django settings module
/// exported, for `manage.py` commands.
pub fn with_app_management_session<'a>(
    conn: &'a mut Connection,
    deployment: &Deployment,
    task: &str,
) -> Result<Scoped<'a>> {
    let stage = deployment.require_stage(task)?;
    let settings = deployment.config().settings_module(&stage.config);

    let mut scopes = vec![Scope::Prefix(format!(
        "export DJANGO_SETTINGS_MODULE={}",
        shell::double_quote(&settings)
    ))];
    scopes.extend(stage_scopes(
        deployment,
        task,
        Some(&deployment.config().source_dir),
    )?);
    Ok(conn.enter(scopes))
}

/// Host scope for a stage without directory or virtualenv.
pub fn with_stage_host<'a>(
    conn: &'a mut Connection,
    deployment: &Deployment,
    task: &str,
) -> Result<Scoped<'a>> {
    let stage = deployment.require_stage(task)?;
    Ok(conn.host(stage.server.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DryRunExecutor;

    fn conn() -> Connection {
        Connection::new(Box::new(DryRunExecutor))
    }

    #[test]
    fn render_without_scopes_is_plain_command() {
        assert_eq!(conn().render("uptime"), "uptime");
    }

    #[test]
    fn cd_comes_before_prefixes() {
        let mut c = conn();
        let mut p = c.prefix("source env/bin/activate");
        let d = p.cd("/srv/app");
        assert_eq!(
            d.render("pip freeze"),
            "cd '/srv/app' && source env/bin/activate && pip freeze"
        );
    }

    #[test]
    fn relative_cd_joins_enclosing_directory() {
        let mut c = conn();
        let mut outer = c.cd("/srv/app");
        let inner = outer.cd("src");
        assert_eq!(inner.cwd().as_deref(), Some("/srv/app/src"));
    }

    #[test]
    fn dropping_guard_restores_scope() {
        let mut c = conn();
        {
            let mut h = c.host(Server::new("example.com", "deploy"));
            let _d = h.cd("/srv/app");
        }
        assert_eq!(c.depth(), 0);
        assert_eq!(c.render("ls"), "ls");
        assert!(c.server().is_none());
    }

    #[test]
    fn run_requires_host_scope() {
        let mut c = conn();
        let err = c.run("ls").unwrap_err();
        assert_eq!(err.code.as_str(), "internal.unexpected");
        assert!(c.records().is_empty());
    }

    #[test]
    fn innermost_host_wins() {
        let mut c = conn();
        let mut outer = c.host(Server::new("example.com", "deploy"));
        let mut inner = outer.host(Server::new("example.com", "root"));
        inner.run("service apache2 reload").unwrap();
        assert_eq!(inner.records()[0].host.as_deref(), Some("root@example.com"));
    }

    #[test]
    fn local_ignores_remote_scopes() {
        let mut c = conn();
        let mut d = c.cd("/srv/app");
        d.local("git checkout master").unwrap();
        assert_eq!(d.records()[0].command, "git checkout master");
        assert_eq!(d.records()[0].kind, CommandKind::Local);
    }
}
