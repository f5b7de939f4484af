use std::io::Write;
use std::path::Path;

use chrono::NaiveDate;

use elvard::config::{self, DeployConfig};
use elvard::server::Server;
use elvard::ssh::CommandOutput;
use elvard::tasks::{TaskCall, TaskRegistry};
use elvard::{pipeline, steps, CommandKind, Connection, Deployment, Executor, Result};

const CONFIG: &str = r#"{
    "project": "tomas_ehrlich",
    "repository": "git@example.com:elvard.git",
    "server": {"host": "example.com", "user": "deploy"},
    "stages": {
        "staging": {
            "directory": "/srv/staging",
            "settings": "staging",
            "master": "staging",
            "slave": "master",
            "site": "elvard-staging"
        },
        "stable": {
            "directory": "/srv/stable",
            "settings": "production",
            "master": "stable",
            "slave": "staging"
        }
    }
}"#;

/// Reports success for everything except commands containing `fail_on`.
#[derive(Default)]
struct Recorder {
    fail_on: Option<&'static str>,
    fail_fetch: bool,
}

impl Recorder {
    fn failing_on(pattern: &'static str) -> Self {
        Self {
            fail_on: Some(pattern),
            ..Self::default()
        }
    }

    fn outcome(&self, command: &str) -> CommandOutput {
        match self.fail_on {
            Some(pattern) if command.contains(pattern) => failed(),
            _ => CommandOutput::ok(),
        }
    }
}

fn failed() -> CommandOutput {
    CommandOutput {
        stderr: "boom".to_string(),
        exit_code: 1,
        ..CommandOutput::default()
    }
}

impl Executor for Recorder {
    fn remote(&mut self, _server: &Server, command: &str) -> Result<CommandOutput> {
        Ok(self.outcome(command))
    }

    fn local(&mut self, command: &str) -> Result<CommandOutput> {
        Ok(self.outcome(command))
    }

    fn fetch(&mut self, _server: &Server, _remote: &str, _local: &Path) -> Result<CommandOutput> {
        Ok(if self.fail_fetch { failed() } else { CommandOutput::ok() })
    }
}

fn deployment() -> Deployment {
    Deployment::new(config::from_str(CONFIG, "test").unwrap())
}

fn staging() -> Deployment {
    let mut d = deployment();
    d.select_stage("staging").unwrap();
    d
}

fn commands(conn: &Connection) -> Vec<&str> {
    conn.records().iter().map(|r| r.command.as_str()).collect()
}

#[test]
fn stage_dependent_step_without_stage_issues_nothing() {
    let d = deployment();
    let mut conn = Connection::new(Box::new(Recorder::default()));

    let err = steps::clone_repository(&d, &mut conn).unwrap_err();

    assert_eq!(err.code.as_str(), "stage.not_selected");
    assert!(conn.records().is_empty());
}

#[test]
fn staging_update_runs_in_order_and_ends_with_wsgi_touch() {
    let d = staging();
    let mut conn = Connection::new(Box::new(Recorder::default()));

    pipeline::update(&d, &mut conn).unwrap();

    assert_eq!(
        commands(&conn),
        vec![
            "git checkout staging",
            "git merge master",
            "git push origin staging --tags",
            "cd '/srv/staging' && git fetch",
            "cd '/srv/staging' && git fetch --tags",
            "cd '/srv/staging' && git merge origin/staging",
            "cd '/srv/staging' && source '/srv/staging/env/bin/activate' && pip install -r requirements.txt",
            "cd '/srv/staging/src' && export DJANGO_SETTINGS_MODULE=\"tomas_ehrlich.settings.staging\" && source '/srv/staging/env/bin/activate' && python manage.py collectstatic --noinput",
            "touch '/srv/staging/apache/django.wsgi'",
        ]
    );
    assert_eq!(conn.records()[0].kind, CommandKind::Local);
    assert_eq!(conn.records()[3].host.as_deref(), Some("deploy@example.com"));
    assert_eq!(conn.depth(), 0);
}

#[test]
fn staging_deploy_never_tags() {
    let d = staging();
    let mut conn = Connection::new(Box::new(Recorder::default()));

    steps::deploy(&d, &mut conn).unwrap();

    assert!(commands(&conn).iter().all(|c| !c.starts_with("git tag")));
}

#[test]
fn stable_release_tags_once_between_merge_and_push() {
    let mut d = deployment();
    d.select_release(Some("v1.2.0")).unwrap();
    let mut conn = Connection::new(Box::new(Recorder::default()));

    steps::deploy(&d, &mut conn).unwrap();

    let cmds = commands(&conn);
    let tags: Vec<usize> = cmds
        .iter()
        .enumerate()
        .filter(|(_, c)| c.starts_with("git tag"))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(tags.len(), 1);
    assert_eq!(cmds[tags[0]], "git tag -s v1.2.0 -m v1.2.0");

    let merge = cmds.iter().position(|c| *c == "git merge staging").unwrap();
    let push = cmds.iter().position(|c| c.starts_with("git push")).unwrap();
    assert!(merge < tags[0] && tags[0] < push);
}

#[test]
fn stable_without_tag_does_not_tag() {
    let mut d = deployment();
    d.select_release(None).unwrap();
    let mut conn = Connection::new(Box::new(Recorder::default()));

    steps::deploy(&d, &mut conn).unwrap();

    assert!(commands(&conn).iter().all(|c| !c.starts_with("git tag")));
}

#[test]
fn setup_clones_then_creates_env_and_dirs() {
    let d = staging();
    let mut conn = Connection::new(Box::new(Recorder::default()));

    pipeline::setup(&d, &mut conn).unwrap();

    assert_eq!(
        commands(&conn),
        vec![
            "git clone -b staging git@example.com:elvard.git '/srv/staging'",
            "cd '/srv/staging' && mkdir -p public/media public/static",
            "virtualenv '/srv/staging/env'",
            "cd '/srv/staging' && mkdir -p public/media public/static",
        ]
    );
}

#[test]
fn first_failure_aborts_and_restores_scopes() {
    let d = staging();
    let mut conn = Connection::new(Box::new(Recorder::failing_on("pip install")));

    let err = pipeline::update(&d, &mut conn).unwrap_err();

    assert_eq!(err.code.as_str(), "remote.command_failed");
    assert_eq!(err.details["exitCode"], 1);
    assert!(commands(&conn).last().unwrap().ends_with("pip install -r requirements.txt"));
    assert!(commands(&conn).iter().all(|c| !c.contains("collectstatic")));
    assert_eq!(conn.depth(), 0);
    assert_eq!(conn.render("ls"), "ls");
}

#[test]
fn failed_local_git_stops_before_remote_work() {
    let d = staging();
    let mut conn = Connection::new(Box::new(Recorder::failing_on("git merge master")));

    let err = steps::deploy(&d, &mut conn).unwrap_err();

    assert_eq!(err.code.as_str(), "local.command_failed");
    assert!(conn.records().iter().all(|r| r.kind == CommandKind::Local));
}

#[test]
fn migrate_runs_syncdb_then_fake_migrate() {
    let d = staging();
    let mut conn = Connection::new(Box::new(Recorder::default()));

    steps::migrate_database(&d, &mut conn).unwrap();

    let cmds = commands(&conn);
    assert_eq!(cmds.len(), 2);
    assert!(cmds[0].ends_with("python manage.py syncdb --all --noinput"));
    assert!(cmds[1].ends_with("python manage.py migrate --fake --noinput"));
}

#[test]
fn dump_fetches_then_removes_remote_copy() {
    let d = staging();
    let dest = tempfile::tempdir().unwrap();
    let date = NaiveDate::from_ymd_opt(2013, 4, 7).unwrap();
    let mut conn = Connection::new(Box::new(Recorder::default()));

    let local = steps::dump_database_on(&d, &mut conn, date, Some(dest.path())).unwrap();

    assert_eq!(local, dest.path().join("2013-04-07.json"));
    let kinds: Vec<CommandKind> = conn.records().iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![CommandKind::Remote, CommandKind::Remote, CommandKind::Fetch, CommandKind::Remote]
    );
    let cmds = commands(&conn);
    assert!(cmds[0].ends_with("mkdir -p '/srv/staging/backup/2013-04-07'"));
    assert!(cmds[1]
        .ends_with("python manage.py dumpdata > '/srv/staging/backup/2013-04-07/2013-04-07.json'"));
    assert_eq!(
        cmds[2],
        format!(
            "get /srv/staging/backup/2013-04-07/2013-04-07.json {}",
            local.display()
        )
    );
    assert!(cmds[3].ends_with("rm '/srv/staging/backup/2013-04-07/2013-04-07.json'"));
}

#[test]
fn failed_fetch_keeps_remote_dump() {
    let d = staging();
    let dest = tempfile::tempdir().unwrap();
    let date = NaiveDate::from_ymd_opt(2013, 4, 7).unwrap();
    let mut conn = Connection::new(Box::new(Recorder {
        fail_fetch: true,
        ..Recorder::default()
    }));

    let err = steps::dump_database_on(&d, &mut conn, date, Some(dest.path())).unwrap_err();

    assert_eq!(err.code.as_str(), "transfer.failed");
    assert!(commands(&conn).iter().all(|c| !c.contains("rm ")));
    assert!(err
        .hints
        .iter()
        .any(|h| h.message.contains("/srv/staging/backup/2013-04-07/2013-04-07.json")));
}

#[test]
fn enable_site_runs_as_root_with_stage_site() {
    let d = staging();
    let mut conn = Connection::new(Box::new(Recorder::default()));

    steps::enable_site(&d, &mut conn, None).unwrap();

    assert_eq!(commands(&conn), vec!["a2ensite elvard-staging", "service apache2 reload"]);
    assert!(conn
        .records()
        .iter()
        .all(|r| r.host.as_deref() == Some("root@example.com")));
}

#[test]
fn disable_site_accepts_explicit_site_without_stage() {
    let d = deployment();
    let mut conn = Connection::new(Box::new(Recorder::default()));

    steps::disable_site(&d, &mut conn, Some("elvard")).unwrap();

    assert_eq!(commands(&conn), vec!["a2dissite elvard", "service apache2 reload"]);
}

#[test]
fn site_without_argument_or_stage_site_is_config_error() {
    let mut d = deployment();
    d.select_stage("stable").unwrap();
    let mut conn = Connection::new(Box::new(Recorder::default()));

    let err = steps::enable_site(&d, &mut conn, None).unwrap_err();

    assert_eq!(err.code.as_str(), "config.missing_key");
    assert!(conn.records().is_empty());
}

#[test]
fn registry_runs_stage_then_pipeline() {
    let registry = TaskRegistry::builtin();
    let calls = ["stable:v2.0", "deploy", "restart_wsgi"]
        .iter()
        .map(|s| TaskCall::parse(s).unwrap())
        .collect::<Vec<_>>();
    let mut d = deployment();
    let mut conn = Connection::new(Box::new(Recorder::default()));

    let done = registry.run(&calls, &mut d, &mut conn).unwrap();

    assert_eq!(done, vec!["stable", "deploy", "restart_wsgi"]);
    assert_eq!(d.selection().unwrap().tag.as_deref(), Some("v2.0"));
    assert_eq!(commands(&conn).last().copied(), Some("touch '/srv/stable/apache/django.wsgi'"));
}

#[test]
fn registry_typo_issues_no_commands() {
    let registry = TaskRegistry::builtin();
    let calls = ["staging", "updaet"]
        .iter()
        .map(|s| TaskCall::parse(s).unwrap())
        .collect::<Vec<_>>();
    let mut d = deployment();
    let mut conn = Connection::new(Box::new(Recorder::default()));

    let err = registry.run(&calls, &mut d, &mut conn).unwrap_err();

    assert_eq!(err.code.as_str(), "validation.invalid_argument");
    assert!(err.hints.iter().any(|h| h.message.contains("update")));
    assert!(d.selection().is_none());
    assert!(conn.records().is_empty());
}

#[test]
fn registry_unknown_stage_stops_the_run() {
    let registry = TaskRegistry::builtin();
    let calls = ["staging", "deploy"]
        .iter()
        .map(|s| TaskCall::parse(s).unwrap())
        .collect::<Vec<_>>();
    let raw = CONFIG.replace("\"staging\": {", "\"preview\": {");
    let mut d = Deployment::new(config::from_str(&raw, "test").unwrap());
    let mut conn = Connection::new(Box::new(Recorder::default()));

    let err = registry.run(&calls, &mut d, &mut conn).unwrap_err();

    assert_eq!(err.code.as_str(), "stage.not_found");
    assert!(conn.records().is_empty());
}

#[test]
fn config_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();

    let path = file.path().to_string_lossy().to_string();
    let loaded: DeployConfig = config::load(Some(path.as_str())).unwrap();

    assert_eq!(loaded.project, "tomas_ehrlich");
    assert_eq!(loaded.stage_names(), vec!["stable", "staging"]);
}

struct Unreachable;

impl Executor for Unreachable {
    fn remote(&mut self, _server: &Server, _command: &str) -> Result<CommandOutput> {
        Ok(CommandOutput {
            stderr: "ssh: connect to host example.com port 22: Connection refused".to_string(),
            exit_code: 255,
            ..CommandOutput::default()
        })
    }

    fn local(&mut self, _command: &str) -> Result<CommandOutput> {
        Ok(CommandOutput::ok())
    }

    fn fetch(&mut self, _server: &Server, _remote: &str, _local: &Path) -> Result<CommandOutput> {
        Ok(CommandOutput::ok())
    }
}

#[test]
fn unreachable_host_is_flagged_retryable_but_not_retried() {
    let d = staging();
    let mut conn = Connection::new(Box::new(Unreachable));

    let err = steps::restart_server(&d, &mut conn).unwrap_err();

    assert_eq!(err.retryable, Some(true));
    assert_eq!(conn.records().len(), 1);
}
