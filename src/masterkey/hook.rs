//! External master-password hook.
//!
//! The hosting installation may configure a command whose stdout is the
//! master password. The run is timeout-bounded so a hung hook surfaces as
//! a failure instead of stalling the process.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait HookRunner: Send + Sync {
    /// Runs the hook and returns its trimmed stdout. Empty output means the
    /// hook has no key to offer and the user must be asked.
    async fn run(&self, command: &str) -> Result<String>;
}

/// Runs the configured command through the shell.
#[derive(Debug, Clone)]
pub struct CommandHookRunner {
    timeout: Duration,
}

impl CommandHookRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HookRunner for CommandHookRunner {
    async fn run(&self, command: &str) -> Result<String> {
        debug!("invoking master password hook");

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| anyhow::anyhow!("hook timed out after {:?}", self.timeout))?
            .context("failed to run master password hook")?;

        if !output.status.success() {
            bail!("hook exited with {}", output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
