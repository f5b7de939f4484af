use serde::Serialize;

use elvard::config;
use elvard::executor::{CommandRecord, DryRunExecutor, Executor, ShellExecutor};
use elvard::tasks::{TaskCall, TaskRegistry};
use elvard::{Connection, Deployment};

use super::CmdResult;

pub struct RunArgs {
    pub config: Option<String>,
    pub dry_run: bool,
    pub tasks: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub dry_run: bool,
    pub tasks: Vec<String>,
    pub commands: Vec<CommandRecord>,
}

pub fn run(args: RunArgs, registry: &TaskRegistry) -> CmdResult<RunOutput> {
    if args.tasks.is_empty() {
        return Err(elvard::Error::validation_missing_argument(vec![
            "tasks".to_string(),
        ])
        .with_hint("Usage: elvard staging update")
        .with_hint("Run 'elvard --list' to see available tasks"));
    }

    let calls = args
        .tasks
        .iter()
        .map(|spec| TaskCall::parse(spec))
        .collect::<elvard::Result<Vec<_>>>()?;

    let mut deployment = Deployment::new(config::load(args.config.as_deref())?);

    let executor: Box<dyn Executor> = if args.dry_run {
        Box::new(DryRunExecutor)
    } else {
        Box::new(ShellExecutor::new())
    };
    let mut conn = Connection::new(executor);

    let tasks = registry.run(&calls, &mut deployment, &mut conn)?;
    let selection = deployment.selection();

    Ok((
        RunOutput {
            command: "tasks.run".to_string(),
            stage: selection.map(|s| s.name.clone()),
            tag: selection.and_then(|s| s.tag.clone()),
            dry_run: args.dry_run,
            tasks,
            commands: conn.into_records(),
        },
        0,
    ))
}
