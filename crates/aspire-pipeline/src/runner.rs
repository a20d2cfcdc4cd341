//! External tool invocation.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::ToolError;
use crate::plan::WorkItem;

/// Runs one work item to completion.
///
/// Implementations are called from several worker threads at once.
pub trait ToolRunner: Sync {
    fn run(&self, item: &WorkItem, timeout: Duration) -> Result<(), ToolError>;
}

/// Spawns the tool as a child process and kills it when the timeout expires.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, item: &WorkItem, timeout: Duration) -> Result<(), ToolError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| ToolError::Spawn {
                program: item.program.clone(),
                source,
            })?;
        runtime.block_on(run_process(item, timeout))?;
        check_outputs(item)
    }
}

async fn run_process(item: &WorkItem, timeout: Duration) -> Result<(), ToolError> {
    debug!(program = %item.program, args = ?item.args, "spawning tool");
    let child = Command::new(&item.program)
        .args(&item.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: item.program.clone(),
            source,
        })?;

    // Dropping the future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| ToolError::Spawn {
            program: item.program.clone(),
            source,
        })?,
        Err(_) => {
            return Err(ToolError::TimedOut {
                program: item.program.clone(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };
    if output.status.success() {
        Ok(())
    } else {
        Err(ToolError::Failed {
            program: item.program.clone(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// A zero exit status only counts when the declared outputs exist.
pub fn check_outputs(item: &WorkItem) -> Result<(), ToolError> {
    match item.expected_outputs.iter().find(|path| !path.exists()) {
        Some(path) => Err(ToolError::MissingOutput {
            program: item.program.clone(),
            path: path.clone(),
        }),
        None => Ok(()),
    }
}
