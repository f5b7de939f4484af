use clap::Parser;

mod commands;
mod output;

use commands::{list, run};
use elvard::tasks::TaskRegistry;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "elvard")]
#[command(version = VERSION)]
#[command(about = "Stage-scoped deployment tasks: clone, update, migrate, restart")]
#[command(after_help = "Examples:\n  elvard staging setup\n  elvard staging update\n  elvard stable:v1.2.0 deploy restart_wsgi\n  elvard stable dump_database:dest=./backups")]
struct Cli {
    /// Deploy config file (default: $ELVARD_CONFIG, ./elvard.json, ~/.config/elvard/elvard.json)
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Print the commands that would run without executing them
    #[arg(long)]
    dry_run: bool,

    /// List available tasks
    #[arg(short, long)]
    list: bool,

    /// Tasks to run in order, as name[:arg,key=value]
    #[arg(value_name = "TASK")]
    tasks: Vec<String>,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let registry = TaskRegistry::builtin();

    let (json_result, exit_code) = if cli.list {
        output::map_cmd_result_to_json(list::run(&registry))
    } else {
        output::map_cmd_result_to_json(run::run(
            run::RunArgs {
                config: cli.config,
                dry_run: cli.dry_run,
                tasks: cli.tasks,
            },
            &registry,
        ))
    };

    if output::print_json_result(json_result).is_err() {
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
