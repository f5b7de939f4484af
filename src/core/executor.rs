// Command transport - routes remote commands over SSH, local commands to `sh -c`

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::server::Server;
use crate::ssh::{execute_local_command, CommandOutput, SshClient};

/// Runs fully rendered command strings. Scoping (cd, prefixes, host
/// overrides) happens in [`crate::session::Connection`] before a command
/// reaches the executor.
///
/// `Err` is reserved for failures to set up the transport; a command that
/// ran and exited non-zero comes back as an unsuccessful `CommandOutput`.
pub trait Executor {
    fn remote(&mut self, server: &Server, command: &str) -> Result<CommandOutput>;

    fn local(&mut self, command: &str) -> Result<CommandOutput>;

    fn fetch(&mut self, server: &Server, remote_path: &str, local_path: &Path)
        -> Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Remote,
    Local,
    Fetch,
}

/// One command issued during a run, in issue order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub kind: CommandKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub command: String,
    pub exit_code: i32,
}

/// Real transport: `ssh` for remote hosts, `sh -c` locally.
#[derive(Default)]
pub struct ShellExecutor {
    clients: HashMap<String, SshClient>,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&mut self, server: &Server) -> Result<&SshClient> {
        let key = server.host_string();
        if !self.clients.contains_key(&key) {
            let client = SshClient::from_server(server)?;
            self.clients.insert(key.clone(), client);
        }
        self.clients
            .get(&key)
            .ok_or_else(|| Error::internal_unexpected("SSH client cache miss"))
    }
}

impl Executor for ShellExecutor {
    fn remote(&mut self, server: &Server, command: &str) -> Result<CommandOutput> {
        Ok(self.client(server)?.execute(command))
    }

    fn local(&mut self, command: &str) -> Result<CommandOutput> {
        Ok(execute_local_command(command))
    }

    fn fetch(
        &mut self,
        server: &Server,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<CommandOutput> {
        Ok(self.client(server)?.download_file(remote_path, local_path))
    }
}

/// Prints what would run and reports success without touching any host.
#[derive(Debug, Default)]
pub struct DryRunExecutor;

impl Executor for DryRunExecutor {
    fn remote(&mut self, server: &Server, command: &str) -> Result<CommandOutput> {
        log_status!("dry-run", "[{}] run: {}", server.host_string(), command);
        Ok(CommandOutput::ok())
    }

    fn local(&mut self, command: &str) -> Result<CommandOutput> {
        log_status!("dry-run", "[localhost] local: {}", command);
        Ok(CommandOutput::ok())
    }

    fn fetch(
        &mut self,
        server: &Server,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<CommandOutput> {
        log_status!(
            "dry-run",
            "[{}] get: {} -> {}",
            server.host_string(),
            remote_path,
            local_path.display()
        );
        Ok(CommandOutput::ok())
    }
}
