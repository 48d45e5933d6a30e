use std::process::Stdio;
use tokio::process::Command;

use crate::handler::SourceError;

const SHELL: &str = "/bin/sh";

fn shell(command: &str) -> Command {
    let mut cmd = Command::new(SHELL);
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

/// Exit-status probe: up when the command exits with status 0.
#[derive(Debug, Clone)]
pub struct ShellCheck {
    command: String,
}

impl ShellCheck {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Run the probe to completion. Output is discarded.
    ///
    /// Failing to spawn the shell is a query error; a non-zero exit is a
    /// successful query reporting "down". The child is killed if the
    /// returned future is dropped.
    pub async fn status(&self) -> Result<bool, SourceError> {
        let status = shell(&self.command)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| SourceError::Query(format!("failed to run `{}`: {}", self.command, e)))?;
        Ok(status.success())
    }
}

/// Launch `command` without waiting for it to finish.
pub fn spawn_detached(command: &str) -> Result<(), SourceError> {
    let child = shell(command)
        .spawn()
        .map_err(|e| SourceError::Write(format!("failed to run `{}`: {}", command, e)))?;
    log::debug!("Spawned `{}` (pid {:?})", command, child.id());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_follows_exit_code() {
        assert!(ShellCheck::new("true").status().await.unwrap());
        assert!(!ShellCheck::new("false").status().await.unwrap());
        assert!(!ShellCheck::new("exit 3").status().await.unwrap());
    }

    #[tokio::test]
    async fn test_output_is_ignored() {
        let check = ShellCheck::new("echo noise; echo more >&2; exit 0");
        assert!(check.status().await.unwrap());
    }

    #[tokio::test]
    async fn test_spawn_detached_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let command = format!("touch '{}'", marker.display());

        spawn_detached(&command).unwrap();

        for _ in 0..100 {
            if marker.exists() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("detached command never ran");
    }
}
