//! CLI command implementations
//!
//! The CLI is the control surface standing in for the HTTP layer: every
//! orchestrator operation maps to one command here. Commands return data;
//! the `print_*` helpers render it for humans, and `--json` callers get
//! the serialized value instead.

mod init;
mod repos;
mod run;
mod tasks;

pub use init::cmd_init;
pub use repos::{cmd_add, cmd_list_repositories, cmd_remove, print_deletion, print_repositories};
pub use run::{cmd_health, cmd_queue, cmd_run_scheduler, cmd_run_task, print_health, print_queue};
pub use tasks::{
    cmd_cancel, cmd_list_tasks, cmd_status, cmd_submit, print_task_detail, print_tasks,
};
