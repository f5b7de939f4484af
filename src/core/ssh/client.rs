use crate::error::{Error, Result};
use crate::paths;
use crate::server::{is_local_host, Server};
use crate::utils::shell;
use std::path::Path;
use std::process::{Command, Stdio};

pub struct SshClient {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    /// When true, all commands run locally instead of over SSH.
    /// Set automatically when the server host is localhost/127.0.0.1/::1.
    pub is_local: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    fn spawn_error(err: impl std::fmt::Display, what: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("{}: {}", what, err),
            success: false,
            exit_code: -1,
        }
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(out: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        }
    }
}

impl SshClient {
    pub fn from_server(server: &Server) -> Result<Self> {
        let identity_file = match &server.identity_file {
            Some(path) if !path.is_empty() => {
                let expanded = paths::expand(path);
                if !Path::new(&expanded).exists() {
                    return Err(Error::ssh_identity_file_not_found(
                        server.host.clone(),
                        expanded,
                    ));
                }
                Some(expanded)
            }
            _ => None,
        };

        let is_local = is_local_host(&server.host);
        if is_local {
            log_status!("ssh", "Server '{}' is localhost, using local execution", server.host);
        }

        Ok(Self {
            host: server.host.clone(),
            user: server.user.clone(),
            port: server.port,
            identity_file,
            is_local,
        })
    }

    fn build_ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        // Detect dead connections and refuse password prompts; a live but
        // slow command is never cut short.
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        args.push(format!("{}@{}", self.user, self.host));

        // The remote sshd hands this string to the login shell, which must be
        // bash for `source` in activation prefixes.
        args.push(format!("bash -l -c {}", shell::escape_command_for_shell(command)));

        args
    }

    /// Run a command once. Failures are reported in the output, never retried.
    pub fn execute(&self, command: &str) -> CommandOutput {
        if self.is_local {
            let wrapped = format!("bash -c {}", shell::escape_command_for_shell(command));
            return execute_local_command(&wrapped);
        }

        let args = self.build_ssh_args(command);
        match Command::new("ssh").args(&args).output() {
            Ok(out) => out.into(),
            Err(e) => CommandOutput::spawn_error(e, "SSH error"),
        }
    }

    /// Stream a remote file's bytes into a local file (`cat` over SSH).
    ///
    /// Bytes land in a temporary file beside `local_path`, which replaces
    /// `local_path` only once the transfer succeeded. A failed transfer
    /// leaves any existing file at `local_path` untouched.
    pub fn download_file(&self, remote_path: &str, local_path: &Path) -> CommandOutput {
        let remote_command = format!("cat {}", shell::quote_path(remote_path));

        let parent = match local_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let partial = match tempfile::NamedTempFile::new_in(parent) {
            Ok(file) => file,
            Err(e) => return CommandOutput::spawn_error(e, "Failed to create local file"),
        };
        let file = match partial.as_file().try_clone() {
            Ok(file) => file,
            Err(e) => return CommandOutput::spawn_error(e, "Failed to open local file"),
        };

        let mut cmd = if self.is_local {
            local_shell(&remote_command)
        } else {
            let mut cmd = Command::new("ssh");
            cmd.args(self.build_ssh_args(&remote_command));
            cmd
        };
        cmd.stdout(Stdio::from(file));

        let result: CommandOutput = match cmd.output() {
            Ok(out) => out.into(),
            Err(e) => CommandOutput::spawn_error(e, "SSH error"),
        };

        if result.success {
            if let Err(e) = partial.persist(local_path) {
                return CommandOutput::spawn_error(e, "Failed to save local file");
            }
        }

        result
    }
}

fn local_shell(command: &str) -> Command {
    #[cfg(windows)]
    let cmd = {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    };

    #[cfg(not(windows))]
    let cmd = {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    };

    cmd
}

pub fn execute_local_command(command: &str) -> CommandOutput {
    match local_shell(command).output() {
        Ok(out) => out.into(),
        Err(e) => CommandOutput::spawn_error(e, "Command error"),
    }
}
