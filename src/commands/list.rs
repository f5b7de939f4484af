use serde::Serialize;

use elvard::tasks::{TaskInfo, TaskRegistry};

use super::CmdResult;

#[derive(Serialize)]
pub struct ListOutput {
    pub command: String,
    pub tasks: Vec<TaskInfo>,
}

pub fn run(registry: &TaskRegistry) -> CmdResult<ListOutput> {
    Ok((
        ListOutput {
            command: "tasks.list".to_string(),
            tasks: registry.list(),
        },
        0,
    ))
}
