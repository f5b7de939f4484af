//! Individual deployment steps.
//!
//! Every step takes the [`Deployment`] explicitly and issues its commands
//! through a [`Connection`]. None of them catch or retry: the first failing
//! command is returned as the step's error, with earlier side effects left in
//! place.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::config::join_remote;
use crate::error::{Error, Result};
use crate::session::{with_app_management_session, with_remote_session, with_stage_host, Connection};
use crate::stage::Deployment;
use crate::utils::shell::{quote_arg, quote_path};

pub const SETUP_STATICFILES: &str = "setup_staticfiles";
pub const UPDATE_STATICFILES: &str = "update_staticfiles";
pub const SETUP_VIRTUALENV: &str = "setup_virtualenv";
pub const UPDATE_VIRTUALENV: &str = "update_virtualenv";
pub const UPDATE_DATABASE: &str = "update_database";
pub const DUMP_DATABASE: &str = "dump_database";
pub const SETUP_REPOSITORY: &str = "setup_repository";
pub const DEPLOY: &str = "deploy";
pub const RESTART_WSGI: &str = "restart_wsgi";
pub const ENABLE_SITE: &str = "enable_site";
pub const DISABLE_SITE: &str = "disable_site";

/// Create `public/media` and `public/static` in the stage directory.
pub fn create_static_dirs(deployment: &Deployment, conn: &mut Connection) -> Result<()> {
    let stage = deployment.require_stage(SETUP_STATICFILES)?;
    log_status!("static", "{}", stage.msg("Creating static files directories..."));

    let mut host = with_stage_host(conn, deployment, SETUP_STATICFILES)?;
    let mut dir = host.cd(stage.config.directory.clone());
    dir.run("mkdir -p public/media public/static")?;
    Ok(())
}

pub fn collect_static_assets(deployment: &Deployment, conn: &mut Connection) -> Result<()> {
    let stage = deployment.require_stage(UPDATE_STATICFILES)?;
    log_status!("static", "{}", stage.msg("Updating static files..."));

    let mut session = with_app_management_session(conn, deployment, UPDATE_STATICFILES)?;
    session.run("python manage.py collectstatic --noinput")?;
    Ok(())
}

/// Create a bare virtualenv at `<directory>/env`.
pub fn create_virtualenv(deployment: &Deployment, conn: &mut Connection) -> Result<()> {
    let stage = deployment.require_stage(SETUP_VIRTUALENV)?;
    log_status!("virtualenv", "{}", stage.msg("Creating virtual environment..."));

    let env_dir = join_remote(&stage.config.directory, "env");
    let mut host = with_stage_host(conn, deployment, SETUP_VIRTUALENV)?;
    host.run(&format!("virtualenv {}", quote_path(&env_dir)))?;
    Ok(())
}

pub fn install_dependencies(deployment: &Deployment, conn: &mut Connection) -> Result<()> {
    let stage = deployment.require_stage(UPDATE_VIRTUALENV)?;
    log_status!("virtualenv", "{}", stage.msg("Installing packages..."));

    let requirements = quote_arg(&deployment.config().requirements);
    let mut session = with_remote_session(conn, deployment, UPDATE_VIRTUALENV, None)?;
    session.run(&format!("pip install -r {}", requirements))?;
    Ok(())
}

/// `syncdb` then mark South migrations as applied.
pub fn migrate_database(deployment: &Deployment, conn: &mut Connection) -> Result<()> {
    let stage = deployment.require_stage(UPDATE_DATABASE)?;
    log_status!("database", "{}", stage.msg("Updating database..."));

    let mut session = with_app_management_session(conn, deployment, UPDATE_DATABASE)?;
    session.run("python manage.py syncdb --all --noinput")?;
    session.run("python manage.py migrate --fake --noinput")?;
    Ok(())
}

fn dump_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `YYYY-MM-DD.json`
pub fn dump_file_name(date: NaiveDate) -> String {
    format!("{}.json", dump_date(date))
}

/// Dump all data to `<backup>/<date>/<date>.json`, fetch it into `dest`
/// (default: the current directory) and remove the remote copy. Returns the
/// local path.
pub fn dump_database(
    deployment: &Deployment,
    conn: &mut Connection,
    dest: Option<&Path>,
) -> Result<PathBuf> {
    dump_database_on(deployment, conn, chrono::Local::now().date_naive(), dest)
}

/// [`dump_database`] with an explicit dump date.
///
/// When the fetch fails the remote dump is kept and its path is reported in
/// a hint, so the backup is never lost between the two hosts.
pub fn dump_database_on(
    deployment: &Deployment,
    conn: &mut Connection,
    date: NaiveDate,
    dest: Option<&Path>,
) -> Result<PathBuf> {
    let stage = deployment.require_stage(DUMP_DATABASE)?;
    log_status!("database", "{}", stage.msg("Dumping database..."));

    let file_name = dump_file_name(date);
    let backup_dir = join_remote(
        &deployment.config().backup_path(&stage.config),
        &dump_date(date),
    );
    let remote_file = join_remote(&backup_dir, &file_name);
    let local_file = dest.unwrap_or_else(|| Path::new(".")).join(&file_name);

    let mut session = with_app_management_session(conn, deployment, DUMP_DATABASE)?;
    session.run(&format!("mkdir -p {}", quote_path(&backup_dir)))?;
    session.run(&format!(
        "python manage.py dumpdata > {}",
        quote_path(&remote_file)
    ))?;
    session.get(&remote_file, &local_file).map_err(|e| {
        e.with_hint(format!("Remote dump kept at {}", remote_file))
    })?;
    session.run(&format!("rm {}", quote_path(&remote_file)))?;

    log_status!("database", "{}", stage.msg(&format!("Saved {}", local_file.display())));
    Ok(local_file)
}

/// First-time provisioning: clone the stage branch, then create the static
/// directories inside the checkout.
pub fn clone_repository(deployment: &Deployment, conn: &mut Connection) -> Result<()> {
    let stage = deployment.require_stage(SETUP_REPOSITORY)?;
    log_status!("setup", "{}", stage.msg("Cloning repository..."));

    {
        let mut host = with_stage_host(conn, deployment, SETUP_REPOSITORY)?;
        host.run(&format!(
            "git clone -b {} {} {}",
            quote_arg(&stage.config.master),
            quote_arg(&deployment.config().repository),
            quote_path(&stage.config.directory)
        ))?;
    }

    create_static_dirs(deployment, conn)
}

/// Promote code through git: merge and push locally, then merge the pushed
/// branch into the remote checkout. A `stable` release with a tag gets a
/// signed tag between the merge and the push.
pub fn deploy(deployment: &Deployment, conn: &mut Connection) -> Result<()> {
    let stage = deployment.require_stage(DEPLOY)?;
    let master = quote_arg(&stage.config.master);

    log_status!("deploy", "{}", stage.msg("Updating local branches..."));
    conn.local(&format!("git checkout {}", master))?;
    if let Some(slave) = &stage.config.slave {
        conn.local(&format!("git merge {}", quote_arg(slave)))?;
    }
    if let (true, Some(tag)) = (stage.is_stable(), &stage.tag) {
        let tag = quote_arg(tag);
        conn.local(&format!("git tag -s {} -m {}", tag, tag))?;
    }
    conn.local(&format!("git push origin {} --tags", master))?;

    log_status!("deploy", "{}", stage.msg("Pushing to upstream..."));
    {
        let mut host = with_stage_host(conn, deployment, DEPLOY)?;
        let mut checkout = host.cd(stage.config.directory.clone());
        checkout.run("git fetch")?;
        checkout.run("git fetch --tags")?;
        checkout.run(&format!(
            "git merge {}",
            quote_arg(&format!("origin/{}", stage.config.master))
        ))?;
    }

    log_status!("deploy", "{}", stage.msg("Complete"));
    Ok(())
}

/// Touch the WSGI trigger file so mod_wsgi reloads the application.
pub fn restart_server(deployment: &Deployment, conn: &mut Connection) -> Result<()> {
    let stage = deployment.require_stage(RESTART_WSGI)?;
    log_status!("wsgi", "{}", stage.msg("Restarting WSGI process..."));

    let wsgi = deployment.config().wsgi_path(&stage.config);
    let mut host = with_stage_host(conn, deployment, RESTART_WSGI)?;
    host.run(&format!("touch {}", quote_path(&wsgi)))?;
    Ok(())
}

pub fn enable_site(deployment: &Deployment, conn: &mut Connection, site: Option<&str>) -> Result<()> {
    toggle_site(deployment, conn, site, ENABLE_SITE, "a2ensite")
}

pub fn disable_site(deployment: &Deployment, conn: &mut Connection, site: Option<&str>) -> Result<()> {
    toggle_site(deployment, conn, site, DISABLE_SITE, "a2dissite")
}

/// Site to toggle: the explicit argument, else the selected stage's `site`.
fn resolve_site(deployment: &Deployment, site: Option<&str>, task: &str) -> Result<String> {
    if let Some(site) = site {
        return Ok(site.to_string());
    }

    let stage = deployment.require_stage(task)?;
    stage.config.site.clone().ok_or_else(|| {
        Error::config_missing_key(format!("stages.{}.site", stage.name), None)
            .with_hint(format!("Pass the site explicitly: 'elvard {}:<site>'", task))
    })
}

fn toggle_site(
    deployment: &Deployment,
    conn: &mut Connection,
    site: Option<&str>,
    task: &str,
    tool: &str,
) -> Result<()> {
    let site = resolve_site(deployment, site, task)?;
    let stage_config = deployment.selection().map(|s| &s.config);
    let root = deployment.config().root_server_for(stage_config);

    log_status!("apache", "{} {} on {}", tool, site, root.host_string());
    let mut host = conn.host(root);
    host.run(&format!("{} {}", tool, quote_arg(&site)))?;
    host.run("service apache2 reload")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_file_name_is_iso_date() {
        let date = NaiveDate::from_ymd_opt(2013, 4, 7).unwrap();
        assert_eq!(dump_file_name(date), "2013-04-07.json");
    }
}
