//! `burrow child-mode`: the re-executed half of `burrow run`.
//!
//! Runs as PID 1 of the new PID namespace. Any setup failure exits with
//! [`CHILD_SETUP_FAILURE`] so the parent can tell it from a failing command.

use burrow_core::RuntimeConfig;
use burrow_runtime::{default_backend, ContainerEngine, ReexecCommand, CHILD_SETUP_FAILURE};
use clap::Args;

#[derive(Args, Debug)]
pub struct ChildArgs {
    /// Container whose descriptor to load
    pub container_id: String,

    /// Command override forwarded from `burrow run`
    #[arg(last = true)]
    pub args: Vec<String>,
}

pub fn execute(args: ChildArgs, config: &RuntimeConfig) -> i32 {
    // The child never re-executes itself again.
    let backend = default_backend(ReexecCommand::current_exe(Vec::new()));
    let engine = ContainerEngine::new(config, backend);

    match engine.run_in_namespace(&args.container_id, &args.args) {
        Ok(status) => status,
        Err(e) => {
            tracing::error!(container = %args.container_id, error = %e, "Sandbox setup failed");
            eprintln!("Error: {e}");
            if let Some(hint) = e.hint() {
                eprintln!("Hint: {hint}");
            }
            CHILD_SETUP_FAILURE
        }
    }
}
