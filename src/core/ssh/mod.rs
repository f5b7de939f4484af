mod client;

pub use client::{execute_local_command, CommandOutput, SshClient};
