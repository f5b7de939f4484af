use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Config file name looked up in the working directory and the config dir.
pub const CONFIG_FILE_NAME: &str = "elvard.json";

/// Environment variable overriding config file discovery.
pub const CONFIG_ENV_VAR: &str = "ELVARD_CONFIG";

/// Base elvard config directory (universal ~/.config/elvard/ on all platforms)
pub fn elvard() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("elvard"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("elvard"))
    }
}

/// Global elvard.json config file path
pub fn global_config() -> Result<PathBuf> {
    Ok(elvard()?.join(CONFIG_FILE_NAME))
}

/// Config file in the current working directory
pub fn local_config() -> Result<PathBuf> {
    let cwd = env::current_dir()
        .map_err(|e| Error::internal_io(e.to_string(), Some("current dir".to_string())))?;
    Ok(cwd.join(CONFIG_FILE_NAME))
}

/// Expand `~` and environment variables in a user-supplied path.
pub fn expand(path: &str) -> String {
    shellexpand::full(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| shellexpand::tilde(path).into_owned())
}
