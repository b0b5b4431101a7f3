//! Typed access to the beads issue database.
//!
//! Beads is an external system; this module wraps the contract the core
//! needs — CRUD, the hook-bead slot, lists, export, and the formula trio —
//! behind the [`Beads`] trait. [`bd::BdClient`] drives the `bd` binary and
//! routes every call to the correct database; [`memory::MemoryBeads`] backs
//! unit tests and dry runs.

pub mod bd;
pub mod fields;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GtError;

/// Bead types the core distinguishes. Anything that can be slung as work
/// (`task|bug|feature|gate|route`) is a valid hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadKind {
    Task,
    Bug,
    Feature,
    Agent,
    Config,
    Route,
    Decision,
    Gate,
    Message,
}

impl BeadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BeadKind::Task => "task",
            BeadKind::Bug => "bug",
            BeadKind::Feature => "feature",
            BeadKind::Agent => "agent",
            BeadKind::Config => "config",
            BeadKind::Route => "route",
            BeadKind::Decision => "decision",
            BeadKind::Gate => "gate",
            BeadKind::Message => "message",
        }
    }

    pub fn parse(s: &str) -> Option<BeadKind> {
        match s {
            "task" => Some(BeadKind::Task),
            "bug" => Some(BeadKind::Bug),
            "feature" => Some(BeadKind::Feature),
            "agent" => Some(BeadKind::Agent),
            "config" => Some(BeadKind::Config),
            "route" => Some(BeadKind::Route),
            "decision" => Some(BeadKind::Decision),
            "gate" => Some(BeadKind::Gate),
            "message" => Some(BeadKind::Message),
            _ => None,
        }
    }

    /// Can a bead of this type be attached to an agent as work?
    pub fn is_workable(&self) -> bool {
        matches!(
            self,
            BeadKind::Task | BeadKind::Bug | BeadKind::Feature | BeadKind::Gate | BeadKind::Route
        )
    }
}

impl fmt::Display for BeadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadStatus {
    Open,
    Closed,
}

/// Agent lifecycle states stored on the agent bead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Spawning,
    Working,
    Stuck,
    Done,
    Stopping,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Spawning => "spawning",
            AgentState::Working => "working",
            AgentState::Stuck => "stuck",
            AgentState::Done => "done",
            AgentState::Stopping => "stopping",
        }
    }

    pub fn parse(s: &str) -> Option<AgentState> {
        match s {
            "idle" => Some(AgentState::Idle),
            "spawning" => Some(AgentState::Spawning),
            "working" => Some(AgentState::Working),
            "stuck" => Some(AgentState::Stuck),
            "done" => Some(AgentState::Done),
            "stopping" => Some(AgentState::Stopping),
            _ => None,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an agent's session runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTarget {
    #[default]
    Local,
    K8s,
}

impl ExecutionTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionTarget::Local => "local",
            ExecutionTarget::K8s => "k8s",
        }
    }

    pub fn parse(s: &str) -> Option<ExecutionTarget> {
        match s {
            "local" => Some(ExecutionTarget::Local),
            "k8s" => Some(ExecutionTarget::K8s),
            _ => None,
        }
    }

    /// Label form carried on agent beads, e.g. `execution_target:k8s`.
    pub fn label(&self) -> String {
        format!("execution_target:{}", self.as_str())
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the refinery integrates an agent's finished work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Mr,
    Direct,
    Local,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Mr => "mr",
            MergeStrategy::Direct => "direct",
            MergeStrategy::Local => "local",
        }
    }

    pub fn parse(s: &str) -> Option<MergeStrategy> {
        match s {
            "mr" => Some(MergeStrategy::Mr),
            "direct" => Some(MergeStrategy::Direct),
            "local" => Some(MergeStrategy::Local),
            _ => None,
        }
    }
}

/// A bead as the core sees it. The description blob carries typed
/// sub-records parsed by [`fields`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    pub kind: BeadKind,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: BeadStatus,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignee: Option<String>,
}

impl Bead {
    pub fn is_open(&self) -> bool {
        self.status == BeadStatus::Open
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Arguments for creating a bead. `id` pins the canonical ID (agent beads);
/// otherwise the store generates one from `prefix_hint`.
#[derive(Debug, Clone, Default)]
pub struct CreateBead {
    pub kind: Option<BeadKind>,
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
    pub prefix_hint: Option<String>,
}

/// A partial update. `assignee: Some(None)` clears the field.
#[derive(Debug, Clone, Default)]
pub struct BeadPatch {
    pub description: Option<String>,
    pub labels: Option<Vec<String>>,
    pub assignee: Option<Option<String>>,
    pub status: Option<BeadStatus>,
}

/// The beads-library contract the core depends on.
#[async_trait]
pub trait Beads: Send + Sync {
    /// Fetch one bead. `allow_stale` permits serving from the local JSONL
    /// replica instead of the live database.
    async fn show(&self, id: &str, allow_stale: bool) -> Result<Option<Bead>, GtError>;

    async fn create(&self, spec: CreateBead) -> Result<String, GtError>;

    async fn update(&self, id: &str, patch: BeadPatch) -> Result<(), GtError>;

    async fn close(&self, id: &str, reason: &str) -> Result<(), GtError>;

    /// Idempotent: reopening an open bead just applies the patch.
    async fn reopen(&self, id: &str, patch: BeadPatch) -> Result<(), GtError>;

    /// Hard delete, no tombstone. Config-bead CRUD only.
    async fn delete(&self, id: &str) -> Result<(), GtError>;

    /// Atomic write of the agent's single hook slot. `None` clears it.
    async fn set_hook_bead(&self, agent_id: &str, hook_id: Option<&str>) -> Result<(), GtError>;

    async fn list_by_kind(&self, kind: BeadKind) -> Result<Vec<Bead>, GtError>;

    async fn list_by_label(&self, label: &str) -> Result<Vec<Bead>, GtError>;

    /// Open decision beads awaiting an answer.
    async fn list_pending_decisions(&self) -> Result<Vec<Bead>, GtError>;

    /// Write the JSONL replica of all issues to the beads directory.
    async fn export(&self) -> Result<(), GtError>;

    /// Prepare a formula for instantiation.
    async fn cook(&self, formula: &str) -> Result<(), GtError>;

    /// Instantiate a cooked formula with variables; returns the wisp root.
    async fn wisp(&self, formula: &str, vars: &[(String, String)]) -> Result<String, GtError>;

    /// Bond a wisp root onto a base bead, forming a compound whose root is
    /// the wisp root. The base bead keeps its own identity — hooks point at
    /// the base, molecules at the wisp.
    async fn bond(&self, wisp_root: &str, base: &str) -> Result<(), GtError>;
}

/// Open agent beads, i.e. the declared agent set.
pub async fn list_agents(store: &dyn Beads) -> Result<Vec<Bead>, GtError> {
    Ok(store
        .list_by_kind(BeadKind::Agent)
        .await?
        .into_iter()
        .filter(|b| b.is_open())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trip() {
        for kind in [BeadKind::Task, BeadKind::Agent, BeadKind::Config, BeadKind::Decision] {
            assert_eq!(BeadKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(BeadKind::parse("molecule"), None);
    }

    #[test]
    fn workable_kinds() {
        assert!(BeadKind::Task.is_workable());
        assert!(BeadKind::Gate.is_workable());
        assert!(!BeadKind::Agent.is_workable());
        assert!(!BeadKind::Config.is_workable());
    }

    #[test]
    fn execution_target_label() {
        assert_eq!(ExecutionTarget::K8s.label(), "execution_target:k8s");
        assert_eq!(ExecutionTarget::parse("k8s"), Some(ExecutionTarget::K8s));
        assert_eq!(ExecutionTarget::default(), ExecutionTarget::Local);
    }

    #[test]
    fn bead_serde_snake_case() {
        let bead = Bead {
            id: "gt-abc".into(),
            kind: BeadKind::Task,
            title: "Fix the flare stack".into(),
            description: String::new(),
            status: BeadStatus::Open,
            labels: vec!["execution_target:k8s".into()],
            assignee: None,
        };
        let json = serde_json::to_string(&bead).unwrap();
        assert!(json.contains(r#""kind":"task""#));
        assert!(json.contains(r#""status":"open""#));
        let parsed: Bead = serde_json::from_str(&json).unwrap();
        assert!(parsed.has_label("execution_target:k8s"));
    }
}
