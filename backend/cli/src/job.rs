use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use daylock_core::DailyJob;

/// Job body that shells out to a configured command.
///
/// The command is run through `sh -c`, so pipelines and redirects work. A
/// non-zero exit status is a job failure; the tail of stderr becomes the
/// persisted error message.
pub struct CommandJob {
    command: String,
}

impl CommandJob {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl DailyJob for CommandJob {
    fn name(&self) -> &str {
        "command"
    }

    async fn run(&self) -> Result<()> {
        info!(command = %self.command, "Executing job command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "command exited with {}: {}",
            output.status,
            stderr.trim_end()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeding_command_is_ok() {
        assert!(CommandJob::new("true").run().await.is_ok());
    }

    #[tokio::test]
    async fn failing_command_reports_exit_and_stderr() {
        let err = CommandJob::new("echo nope >&2; exit 3")
            .run()
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit status: 3") || msg.contains("exit code: 3"));
        assert!(msg.contains("nope"));
    }
}
