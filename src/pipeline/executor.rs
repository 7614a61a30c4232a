//! Stage execution.
//!
//! The pipeline only talks to a [`StageExecutor`]; [`CommandExecutor`] runs
//! real external tools, tests plug in stubs.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

use super::stage::{StageFailure, StageInvocation, StageOutput};

#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Run one stage to completion.
    ///
    /// A stage that produces an artifact must leave it at
    /// `invocation.output`; the pipeline moves it into place afterwards.
    async fn execute(&self, invocation: &StageInvocation) -> Result<StageOutput, StageFailure>;
}

/// Runs stage commands as child processes with captured output.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandExecutor;

#[async_trait]
impl StageExecutor for CommandExecutor {
    async fn execute(&self, invocation: &StageInvocation) -> Result<StageOutput, StageFailure> {
        let start = Instant::now();
        let stage = invocation.stage;

        let Some((exe, args)) = invocation.command.split_first() else {
            return Err(StageFailure::EmptyCommand { stage });
        };

        // Dropping the future (timeout or cancellation) kills the child
        let child = Command::new(exe)
            .args(args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StageFailure::Spawn {
                stage,
                program: exe.clone(),
                source,
            })?;

        let output = tokio::time::timeout(invocation.timeout, child.wait_with_output())
            .await
            .map_err(|_| StageFailure::TimedOut {
                stage,
                timeout: invocation.timeout,
            })?
            .map_err(|e| StageFailure::io(stage, "waiting for child", e))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(StageFailure::NonZeroExit {
                stage,
                exit_code,
                stdout,
                stderr,
            });
        }

        Ok(StageOutput {
            exit_code,
            stdout,
            stderr,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::StageKind;
    use std::path::PathBuf;
    use std::time::Duration;

    fn invocation(command: &[&str], timeout: Duration) -> StageInvocation {
        StageInvocation {
            stage: StageKind::Compile,
            command: command.iter().map(ToString::to_string).collect(),
            cwd: PathBuf::from("."),
            input: None,
            output: None,
            timeout,
        }
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let out = CommandExecutor
            .execute(&invocation(&["echo", "hello"], Duration::from_secs(10)))
            .await
            .expect("execute failed");
        assert_eq!(out.exit_code, 0);
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command_keeps_output() {
        let err = CommandExecutor
            .execute(&invocation(
                &["sh", "-c", "echo partial; echo broken >&2; exit 3"],
                Duration::from_secs(10),
            ))
            .await
            .unwrap_err();
        match err {
            StageFailure::NonZeroExit {
                stage,
                exit_code,
                stdout,
                stderr,
            } => {
                assert_eq!(stage, StageKind::Compile);
                assert_eq!(exit_code, 3);
                assert_eq!(stdout.trim(), "partial");
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("unexpected failure: {other}"),
        }
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let err = CommandExecutor
            .execute(&invocation(&["sleep", "5"], Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, StageFailure::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_execute_missing_program() {
        let err = CommandExecutor
            .execute(&invocation(&["definitely-not-a-real-tool-xyz"], Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, StageFailure::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_execute_empty_command() {
        let err = CommandExecutor
            .execute(&invocation(&[], Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, StageFailure::EmptyCommand { .. }));
    }
}
