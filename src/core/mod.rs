// Public modules
pub mod config;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod ssh;
pub mod stage;
pub mod steps;
pub mod tasks;

// Internal modules - not part of public API
pub(crate) mod paths;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Hint, Result};
pub use executor::{CommandKind, CommandRecord, DryRunExecutor, Executor, ShellExecutor};
pub use session::{Connection, Scoped};
pub use stage::Deployment;
