//! Local backend: agent sessions are tmux sessions on this machine.

use async_trait::async_trait;
use tokio::process::Command;

use crate::backend::{Backend, StartOpts};
use crate::beads::ExecutionTarget;
use crate::errors::GtError;

/// Default command started in a fresh agent session.
const DEFAULT_AGENT_COMMAND: &str = "claude";

pub struct LocalBackend {
    tmux: String,
}

impl LocalBackend {
    pub fn new() -> LocalBackend {
        LocalBackend { tmux: "tmux".into() }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, GtError> {
        Command::new(&self.tmux)
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    GtError::Fatal("tmux binary not found on PATH".into())
                }
                _ => GtError::Io(e),
            })
    }

    /// Run a tmux command, mapping a "can't find session" failure to
    /// [`GtError::SessionNotFound`].
    async fn run_on(&self, key: &str, args: &[&str]) -> Result<(), GtError> {
        let output = self.run(args).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("can't find session") || stderr.contains("no server running") {
            return Err(GtError::SessionNotFound(key.to_string()));
        }
        Err(GtError::Backend(format!("tmux {}: {}", args.join(" "), stderr.trim())))
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn target(&self) -> ExecutionTarget {
        ExecutionTarget::Local
    }

    async fn has_session(&self, key: &str) -> Result<bool, GtError> {
        let output = self.run(&["has-session", "-t", &exact(key)]).await?;
        Ok(output.status.success())
    }

    async fn start_session(&self, key: &str, opts: &StartOpts) -> Result<(), GtError> {
        if self.has_session(key).await? {
            return Ok(());
        }
        let mut args: Vec<String> = vec!["new-session".into(), "-d".into(), "-s".into(), key.into()];
        if let Some(dir) = &opts.work_dir {
            args.push("-c".into());
            args.push(dir.to_string_lossy().into_owned());
        }
        for (name, value) in &opts.env {
            args.push("-e".into());
            args.push(format!("{name}={value}"));
        }
        args.push(opts.command.clone().unwrap_or_else(|| DEFAULT_AGENT_COMMAND.into()));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&arg_refs).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // A racing starter is fine — idempotent on running instance.
            if stderr.contains("duplicate session") {
                return Ok(());
            }
            return Err(GtError::Backend(format!("tmux new-session: {}", stderr.trim())));
        }
        tracing::info!(session = key, "started local session");
        Ok(())
    }

    async fn nudge_session(&self, key: &str, text: &str) -> Result<(), GtError> {
        self.run_on(key, &["send-keys", "-t", &exact(key), text, "Enter"]).await
    }

    async fn stop_session(&self, key: &str, force: bool) -> Result<(), GtError> {
        if !force {
            // Give the agent a chance to flush before the kill.
            let _ = self.run_on(key, &["send-keys", "-t", &exact(key), "C-c"]).await;
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }
        self.run_on(key, &["kill-session", "-t", &exact(key)]).await
    }

    async fn switch_session(&self, key: &str, env: &[(String, String)]) -> Result<(), GtError> {
        if !self.has_session(key).await? {
            return Err(GtError::SessionNotFound(key.to_string()));
        }
        let env_prefix: String = env
            .iter()
            .map(|(name, value)| format!("{name}={value} "))
            .collect();
        let command = format!("{env_prefix}{DEFAULT_AGENT_COMMAND}");
        self.run_on(key, &["respawn-window", "-k", "-t", &exact(key), &command]).await
    }

    async fn attach_session(&self, key: &str) -> Result<(), GtError> {
        if !self.has_session(key).await? {
            return Err(GtError::SessionNotFound(key.to_string()));
        }
        // Terminal handoff: replace this process with the tmux client.
        use std::os::unix::process::CommandExt;
        let err = std::process::Command::new(&self.tmux)
            .args(["attach-session", "-t", &exact(key)])
            .exec();
        Err(GtError::Backend(format!("exec tmux attach failed: {err}")))
    }

    async fn list_sessions(&self) -> Result<Vec<String>, GtError> {
        let output = self.run(&["list-sessions", "-F", "#{session_name}"]).await?;
        if !output.status.success() {
            // No server running means no sessions, not an error.
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

/// tmux treats `-t name` as a prefix match; `=name` forces an exact one.
fn exact(key: &str) -> String {
    format!("={key}")
}
