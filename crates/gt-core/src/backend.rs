//! Runtime backends hosting agent sessions.
//!
//! The two runtimes have genuinely different lifecycle semantics — a tmux
//! session is created and killed by this process, a pod is created by an
//! external controller and only nudged/stopped from here — so the contract
//! stays a capability interface rather than a common "process" model.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::beads::ExecutionTarget;
use crate::errors::GtError;
use crate::k8s::K8sBackend;
use crate::manifest::TownConfig;
use crate::tmux::LocalBackend;

/// Options for starting a session. `command` defaults to the agent runtime
/// launcher; `env` is layered over the inherited environment.
#[derive(Debug, Clone, Default)]
pub struct StartOpts {
    pub work_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub command: Option<String>,
}

/// Capability contract over a session runtime.
///
/// A nudge delivered immediately after `start_session` may land before the
/// agent reaches its input prompt; the dispatcher owns the retry/mailbox
/// protocol for that window.
#[async_trait]
pub trait Backend: Send + Sync {
    fn target(&self) -> ExecutionTarget;

    /// True iff the session (or pod) exists and is running.
    async fn has_session(&self, key: &str) -> Result<bool, GtError>;

    /// Create the session. Idempotent on an existing running instance.
    async fn start_session(&self, key: &str, opts: &StartOpts) -> Result<(), GtError>;

    /// Deliver a one-shot input event. Missing targets return
    /// [`GtError::SessionNotFound`] so callers can fall back.
    async fn nudge_session(&self, key: &str, text: &str) -> Result<(), GtError>;

    /// Tear down. Graceful unless `force`.
    async fn stop_session(&self, key: &str, force: bool) -> Result<(), GtError>;

    /// Restart the agent process inside an existing session with updated
    /// environment. The transport (tmux session / pod) survives.
    async fn switch_session(&self, key: &str, env: &[(String, String)]) -> Result<(), GtError>;

    /// Replace the current process with an interactive client attached to
    /// the session. Only returns on failure.
    async fn attach_session(&self, key: &str) -> Result<(), GtError>;

    /// Session keys currently running under this backend.
    async fn list_sessions(&self) -> Result<Vec<String>, GtError>;
}

/// Construct the backend for an execution target.
pub async fn backend_for(
    target: ExecutionTarget,
    config: &TownConfig,
) -> Result<Box<dyn Backend>, GtError> {
    match target {
        ExecutionTarget::Local => Ok(Box::new(LocalBackend::new())),
        ExecutionTarget::K8s => Ok(Box::new(K8sBackend::connect(config).await?)),
    }
}

/// All backends reachable from this process. K8s is skipped (with a note)
/// when no cluster is reachable — discovery tolerates partial failure.
pub async fn available_backends(
    config: &TownConfig,
) -> (Vec<Box<dyn Backend>>, Vec<String>) {
    let mut backends: Vec<Box<dyn Backend>> = vec![Box::new(LocalBackend::new())];
    let mut notes = Vec::new();
    if k8s_configured() {
        match K8sBackend::connect(config).await {
            Ok(backend) => backends.push(Box::new(backend)),
            Err(e) => notes.push(format!("k8s backend unavailable: {e}")),
        }
    }
    (backends, notes)
}

/// A K8s backend is only attempted when the process is in-cluster or a
/// namespace is configured, so laptop runs stay quiet.
fn k8s_configured() -> bool {
    std::env::var_os("KUBERNETES_SERVICE_HOST").is_some()
        || std::env::var_os("GT_K8S_NAMESPACE").is_some()
}
