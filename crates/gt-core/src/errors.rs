use std::path::PathBuf;

/// Unified error type for the gt system.
#[derive(Debug, thiserror::Error)]
pub enum GtError {
    /// Bad argument, unknown target, invalid category, missing flag.
    #[error("{0}")]
    Usage(String),

    #[error("bead not found: {0}")]
    BeadNotFound(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("rig not found: {0}")]
    RigNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("not a town (no town manifest above {0})")]
    TownNotFound(PathBuf),

    /// Bead already exists, name already allocated. Recoverable via --force.
    #[error("conflict: {0}")]
    Conflict(String),

    /// RPC, K8s or subprocess timeout / network blip. Retryable.
    #[error("transient: {0}")]
    Transient(String),

    /// Corrupted routes file, missing bd binary, un-parseable workspace.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("beads error: {0}")]
    Beads(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GtError {
    /// True for the NotFound family — callers like the dispatcher use this
    /// to decide whether to fall back to spawning.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GtError::BeadNotFound(_)
                | GtError::AgentNotFound(_)
                | GtError::RigNotFound(_)
                | GtError::SessionNotFound(_)
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GtError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_family() {
        assert!(GtError::BeadNotFound("gt-x".into()).is_not_found());
        assert!(GtError::SessionNotFound("gt-gastown-nux".into()).is_not_found());
        assert!(!GtError::Conflict("dup".into()).is_not_found());
        assert!(!GtError::Transient("blip".into()).is_not_found());
    }

    #[test]
    fn transient_is_retryable() {
        assert!(GtError::Transient("timeout".into()).is_transient());
        assert!(!GtError::Fatal("corrupt routes".into()).is_transient());
    }
}
