//! In-memory beads store. Backs unit tests and `--dry-run` paths where no
//! live database should be touched.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::beads::{
    fields::AgentFields, Bead, BeadKind, BeadPatch, BeadStatus, Beads, CreateBead,
};
use crate::errors::GtError;

#[derive(Default)]
pub struct MemoryBeads {
    inner: Mutex<HashMap<String, Bead>>,
    /// Where `export` writes its JSONL replica, when set.
    export_path: Mutex<Option<PathBuf>>,
}

impl MemoryBeads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_export_path(self, path: PathBuf) -> Self {
        *self.export_path.lock() = Some(path);
        self
    }

    /// Seed a bead directly, bypassing create-time ID generation.
    pub fn insert(&self, bead: Bead) {
        self.inner.lock().insert(bead.id.clone(), bead);
    }

    pub fn get(&self, id: &str) -> Option<Bead> {
        self.inner.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn generate_id(&self, prefix_hint: Option<&str>) -> String {
        let prefix = prefix_hint.unwrap_or("gt").trim_end_matches('-');
        format!("{prefix}-{}", nanoid::nanoid!(8))
    }
}

fn apply_patch(bead: &mut Bead, patch: BeadPatch) {
    if let Some(description) = patch.description {
        bead.description = description;
    }
    if let Some(labels) = patch.labels {
        bead.labels = labels;
    }
    if let Some(assignee) = patch.assignee {
        bead.assignee = assignee;
    }
    if let Some(status) = patch.status {
        bead.status = status;
    }
}

#[async_trait]
impl Beads for MemoryBeads {
    async fn show(&self, id: &str, _allow_stale: bool) -> Result<Option<Bead>, GtError> {
        Ok(self.inner.lock().get(id).cloned())
    }

    async fn create(&self, spec: CreateBead) -> Result<String, GtError> {
        let mut inner = self.inner.lock();
        let id = match spec.id {
            Some(id) => {
                if inner.get(&id).map(|b| b.is_open()).unwrap_or(false) {
                    return Err(GtError::Conflict(format!("bead already exists: {id}")));
                }
                id
            }
            None => self.generate_id(spec.prefix_hint.as_deref()),
        };
        let bead = Bead {
            id: id.clone(),
            kind: spec.kind.unwrap_or(BeadKind::Task),
            title: spec.title,
            description: spec.description,
            status: BeadStatus::Open,
            labels: spec.labels,
            assignee: None,
        };
        inner.insert(id.clone(), bead);
        Ok(id)
    }

    async fn update(&self, id: &str, patch: BeadPatch) -> Result<(), GtError> {
        let mut inner = self.inner.lock();
        let bead = inner
            .get_mut(id)
            .ok_or_else(|| GtError::BeadNotFound(id.to_string()))?;
        apply_patch(bead, patch);
        Ok(())
    }

    async fn close(&self, id: &str, _reason: &str) -> Result<(), GtError> {
        let mut inner = self.inner.lock();
        let bead = inner
            .get_mut(id)
            .ok_or_else(|| GtError::BeadNotFound(id.to_string()))?;
        bead.status = BeadStatus::Closed;
        Ok(())
    }

    async fn reopen(&self, id: &str, patch: BeadPatch) -> Result<(), GtError> {
        let mut inner = self.inner.lock();
        let bead = inner
            .get_mut(id)
            .ok_or_else(|| GtError::BeadNotFound(id.to_string()))?;
        bead.status = BeadStatus::Open;
        apply_patch(bead, patch);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), GtError> {
        self.inner
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GtError::BeadNotFound(id.to_string()))
    }

    async fn set_hook_bead(&self, agent_id: &str, hook_id: Option<&str>) -> Result<(), GtError> {
        let mut inner = self.inner.lock();
        let bead = inner
            .get_mut(agent_id)
            .ok_or_else(|| GtError::AgentNotFound(agent_id.to_string()))?;
        let mut fields = AgentFields::parse(&bead.description).ok_or_else(|| {
            GtError::Beads(format!("{agent_id} carries no agent record"))
        })?;
        fields.hook_bead = hook_id.map(|h| h.to_string());
        bead.description = fields.apply(&bead.description);
        Ok(())
    }

    async fn list_by_kind(&self, kind: BeadKind) -> Result<Vec<Bead>, GtError> {
        let mut beads: Vec<Bead> =
            self.inner.lock().values().filter(|b| b.kind == kind).cloned().collect();
        beads.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(beads)
    }

    async fn list_by_label(&self, label: &str) -> Result<Vec<Bead>, GtError> {
        let mut beads: Vec<Bead> =
            self.inner.lock().values().filter(|b| b.has_label(label)).cloned().collect();
        beads.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(beads)
    }

    async fn list_pending_decisions(&self) -> Result<Vec<Bead>, GtError> {
        let mut beads: Vec<Bead> = self
            .inner
            .lock()
            .values()
            .filter(|b| b.kind == BeadKind::Decision && b.is_open())
            .cloned()
            .collect();
        beads.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(beads)
    }

    async fn export(&self) -> Result<(), GtError> {
        let path = self.export_path.lock().clone();
        if let Some(path) = path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut beads: Vec<Bead> = self.inner.lock().values().cloned().collect();
            beads.sort_by(|a, b| a.id.cmp(&b.id));
            let mut out = String::new();
            for bead in beads {
                out.push_str(&serde_json::to_string(&bead)?);
                out.push('\n');
            }
            std::fs::write(path, out)?;
        }
        Ok(())
    }

    async fn cook(&self, _formula: &str) -> Result<(), GtError> {
        Ok(())
    }

    async fn wisp(&self, formula: &str, vars: &[(String, String)]) -> Result<String, GtError> {
        let description = vars
            .iter()
            .map(|(k, v)| format!("- [{k}]: {v}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.create(CreateBead {
            kind: Some(BeadKind::Task),
            title: format!("wisp: {formula}"),
            description,
            prefix_hint: Some("wisp".into()),
            ..Default::default()
        })
        .await
    }

    async fn bond(&self, wisp_root: &str, base: &str) -> Result<(), GtError> {
        let mut inner = self.inner.lock();
        if !inner.contains_key(base) {
            return Err(GtError::BeadNotFound(base.to_string()));
        }
        let root = inner
            .get_mut(wisp_root)
            .ok_or_else(|| GtError::BeadNotFound(wisp_root.to_string()))?;
        root.labels.push(format!("bonded:{base}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beads::AgentState;
    use crate::identity::Role;

    fn agent_bead(id: &str, fields: &AgentFields) -> Bead {
        Bead {
            id: id.into(),
            kind: BeadKind::Agent,
            title: id.into(),
            description: fields.apply(""),
            status: BeadStatus::Open,
            labels: vec![],
            assignee: None,
        }
    }

    #[tokio::test]
    async fn create_with_pinned_id_conflicts_when_open() {
        let store = MemoryBeads::new();
        let spec = CreateBead {
            kind: Some(BeadKind::Agent),
            id: Some("gt-gastown-polecat-nux".into()),
            title: "nux".into(),
            ..Default::default()
        };
        store.create(spec.clone()).await.unwrap();
        assert!(matches!(store.create(spec).await, Err(GtError::Conflict(_))));
    }

    #[tokio::test]
    async fn reopen_is_idempotent() {
        let store = MemoryBeads::new();
        let id = store
            .create(CreateBead { title: "work".into(), ..Default::default() })
            .await
            .unwrap();
        store.close(&id, "done").await.unwrap();
        store.reopen(&id, BeadPatch::default()).await.unwrap();
        store.reopen(&id, BeadPatch::default()).await.unwrap();
        assert_eq!(store.get(&id).unwrap().status, BeadStatus::Open);
    }

    #[tokio::test]
    async fn set_hook_bead_rewrites_slot() {
        let store = MemoryBeads::new();
        let fields = AgentFields::new(Role::Polecat, "gastown");
        store.insert(agent_bead("gt-gastown-polecat-nux", &fields));

        store.set_hook_bead("gt-gastown-polecat-nux", Some("gt-abc")).await.unwrap();
        let bead = store.get("gt-gastown-polecat-nux").unwrap();
        let parsed = AgentFields::parse(&bead.description).unwrap();
        assert_eq!(parsed.hook_bead.as_deref(), Some("gt-abc"));
        assert_eq!(parsed.agent_state, AgentState::Idle);

        store.set_hook_bead("gt-gastown-polecat-nux", None).await.unwrap();
        let bead = store.get("gt-gastown-polecat-nux").unwrap();
        assert_eq!(AgentFields::parse(&bead.description).unwrap().hook_bead, None);
    }

    #[tokio::test]
    async fn export_writes_sorted_replica() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".beads/issues.jsonl");
        let store = MemoryBeads::new().with_export_path(path.clone());
        store
            .create(CreateBead { title: "b".into(), id: Some("gt-b".into()), ..Default::default() })
            .await
            .unwrap();
        store
            .create(CreateBead { title: "a".into(), id: Some("gt-a".into()), ..Default::default() })
            .await
            .unwrap();
        store.export().await.unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("gt-a"));
        assert!(lines[1].contains("gt-b"));
    }
}
