//! Composite pipelines. Fixed order, no branching beyond what the steps
//! encode, no rollback when a later step fails.

use crate::error::Result;
use crate::session::Connection;
use crate::stage::Deployment;
use crate::steps;

pub const SETUP: &str = "setup";
pub const UPDATE: &str = "update";

/// Clone the repository, create the virtualenv and the static directories.
pub fn setup(deployment: &Deployment, conn: &mut Connection) -> Result<()> {
    steps::clone_repository(deployment, conn)?;
    steps::create_virtualenv(deployment, conn)?;
    steps::create_static_dirs(deployment, conn)?;
    Ok(())
}

/// Push and pull new code, install packages, collect static files and
/// restart the WSGI process.
pub fn update(deployment: &Deployment, conn: &mut Connection) -> Result<()> {
    steps::deploy(deployment, conn)?;
    steps::install_dependencies(deployment, conn)?;
    steps::collect_static_assets(deployment, conn)?;
    steps::restart_server(deployment, conn)?;
    Ok(())
}
