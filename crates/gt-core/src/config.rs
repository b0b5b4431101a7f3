//! Scope-resolved configuration from config beads.
//!
//! Config beads are stored at `hq-cfg-<slug>` with a category, a scope
//! (`*`, `<town>`, `<town>/<rig>` plus optional `role:`/`agent:` labels)
//! and an opaque JSON metadata blob. Resolution enumerates every bead
//! matching a category and scope, orders them least- to most-specific, and
//! merges.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::beads::fields::ConfigFields;
use crate::beads::{Bead, BeadKind, BeadPatch, Beads, CreateBead};
use crate::errors::GtError;
use crate::identity::Role;

/// The fixed category set. Unknown slugs are rejected everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Identity,
    ClaudeHooks,
    Mcp,
    RigRegistry,
    AgentPreset,
    RoleDefinition,
    SlackRouting,
    Accounts,
    Daemon,
    Messaging,
    Escalation,
}

pub const ALL_CATEGORIES: &[Category] = &[
    Category::Identity,
    Category::ClaudeHooks,
    Category::Mcp,
    Category::RigRegistry,
    Category::AgentPreset,
    Category::RoleDefinition,
    Category::SlackRouting,
    Category::Accounts,
    Category::Daemon,
    Category::Messaging,
    Category::Escalation,
];

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Identity => "identity",
            Category::ClaudeHooks => "claude-hooks",
            Category::Mcp => "mcp",
            Category::RigRegistry => "rig-registry",
            Category::AgentPreset => "agent-preset",
            Category::RoleDefinition => "role-definition",
            Category::SlackRouting => "slack-routing",
            Category::Accounts => "accounts",
            Category::Daemon => "daemon",
            Category::Messaging => "messaging",
            Category::Escalation => "escalation",
        }
    }

    pub fn parse(s: &str) -> Result<Category, GtError> {
        ALL_CATEGORIES
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| GtError::Usage(format!("unknown config category: {s}")))
    }

    /// Layered categories deep-merge their JSON; the rest shallow-override.
    pub fn is_layered(&self) -> bool {
        matches!(self, Category::ClaudeHooks)
    }

    /// The well-known file `materialize` writes under a work directory.
    pub fn materialize_path(&self) -> Option<&'static str> {
        match self {
            Category::ClaudeHooks => Some(".claude/settings.json"),
            Category::Mcp => Some(".mcp.json"),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contributing config bead, preserved for auditing.
#[derive(Debug, Clone, Serialize)]
pub struct Layer {
    pub bead_id: String,
    pub scope: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub layers: Vec<Layer>,
    pub merged: Value,
}

/// The scope a resolution is asked for.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub town: String,
    pub rig: Option<String>,
    pub role: Option<Role>,
    pub agent: Option<String>,
}

/// Specificity of one config bead relative to a scope query. `None` means
/// the bead does not apply. Ordering: global < town < rig, then role-
/// labelled beads above all unlabelled, agent-labelled above those.
fn specificity(fields: &ConfigFields, bead: &Bead, scope: &Scope) -> Option<(u8, u8)> {
    let base = if fields.rig == "*" {
        0
    } else if fields.rig == scope.town {
        1
    } else {
        let rig = scope.rig.as_deref()?;
        if fields.rig == format!("{}/{}", scope.town, rig) {
            2
        } else {
            return None;
        }
    };

    let role_label = bead.labels.iter().find_map(|l| l.strip_prefix("role:"));
    let agent_label = bead.labels.iter().find_map(|l| l.strip_prefix("agent:"));

    let level = match (role_label, agent_label) {
        (_, Some(agent)) => {
            if scope.agent.as_deref() != Some(agent) {
                return None;
            }
            2
        }
        (Some(role), None) => {
            if scope.role.map(|r| r.as_str()) != Some(role) {
                return None;
            }
            1
        }
        (None, None) => 0,
    };
    Some((level, base))
}

/// Deep recursive merge: nested objects merge key-wise, arrays replace
/// wholesale, `null` deletes the key from the accumulator.
pub fn deep_merge(acc: &mut Value, layer: &Value) {
    match (acc, layer) {
        (Value::Object(acc_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                if value.is_null() {
                    acc_map.remove(key);
                } else if let Some(existing) = acc_map.get_mut(key) {
                    if existing.is_object() && value.is_object() {
                        deep_merge(existing, value);
                    } else {
                        *existing = value.clone();
                    }
                } else {
                    acc_map.insert(key.clone(), value.clone());
                }
            }
        }
        (acc, layer) => *acc = layer.clone(),
    }
}

/// Shallow override: later layers overwrite whole keys; `null` deletes.
pub fn shallow_merge(acc: &mut Value, layer: &Value) {
    match (acc, layer) {
        (Value::Object(acc_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                if value.is_null() {
                    acc_map.remove(key);
                } else {
                    acc_map.insert(key.clone(), value.clone());
                }
            }
        }
        (acc, layer) => *acc = layer.clone(),
    }
}

/// Resolve the effective configuration for a category at a scope.
pub async fn resolve(
    store: &dyn Beads,
    category: Category,
    scope: &Scope,
) -> Result<Resolution, GtError> {
    let beads = store.list_by_kind(BeadKind::Config).await?;
    let mut applicable: Vec<((u8, u8), Layer)> = Vec::new();
    for bead in beads.iter().filter(|b| b.is_open()) {
        let Some(fields) = ConfigFields::parse(&bead.description) else {
            continue;
        };
        if fields.category != category.as_str() {
            continue;
        }
        let Some(rank) = specificity(&fields, bead, scope) else {
            continue;
        };
        let metadata: Value = serde_json::from_str(&fields.metadata)
            .map_err(|e| GtError::Beads(format!("{}: invalid metadata JSON: {e}", bead.id)))?;
        applicable.push((
            rank,
            Layer { bead_id: bead.id.clone(), scope: fields.rig.clone(), metadata },
        ));
    }
    // Stable order: specificity, then bead ID for determinism among peers.
    applicable.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.bead_id.cmp(&b.1.bead_id)));

    let mut merged = Value::Object(serde_json::Map::new());
    for (_, layer) in &applicable {
        if category.is_layered() {
            deep_merge(&mut merged, &layer.metadata);
        } else {
            shallow_merge(&mut merged, &layer.metadata);
        }
    }
    Ok(Resolution { layers: applicable.into_iter().map(|(_, l)| l).collect(), merged })
}

/// A problem `verify` found with the config-bead population.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigIssue {
    pub bead_id: Option<String>,
    pub problem: String,
}

/// Sweep all config beads for invalid categories, broken JSON, and missing
/// expected categories.
pub async fn verify(store: &dyn Beads) -> Result<Vec<ConfigIssue>, GtError> {
    let beads = store.list_by_kind(BeadKind::Config).await?;
    let mut issues = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for bead in beads.iter().filter(|b| b.is_open()) {
        match ConfigFields::parse(&bead.description) {
            None => issues.push(ConfigIssue {
                bead_id: Some(bead.id.clone()),
                problem: "missing config record".into(),
            }),
            Some(fields) => {
                match Category::parse(&fields.category) {
                    Ok(category) => {
                        seen.insert(category);
                    }
                    Err(_) => issues.push(ConfigIssue {
                        bead_id: Some(bead.id.clone()),
                        problem: format!("invalid category: {}", fields.category),
                    }),
                }
                if let Err(e) = serde_json::from_str::<Value>(&fields.metadata) {
                    issues.push(ConfigIssue {
                        bead_id: Some(bead.id.clone()),
                        problem: format!("invalid metadata JSON: {e}"),
                    });
                }
                // A role/agent dimension without a base scope is a bead
                // that can never win resolution.
                if fields.rig.is_empty() {
                    issues.push(ConfigIssue {
                        bead_id: Some(bead.id.clone()),
                        problem: "empty scope (use *, town, or town/rig)".into(),
                    });
                }
            }
        }
    }
    for expected in [Category::Identity, Category::RigRegistry] {
        if !seen.contains(&expected) {
            issues.push(ConfigIssue {
                bead_id: None,
                problem: format!("no config beads for expected category: {expected}"),
            });
        }
    }
    Ok(issues)
}

/// Write the merged result to the category's well-known file under
/// `work_dir`.
pub async fn materialize(
    store: &dyn Beads,
    work_dir: &Path,
    category: Category,
    scope: &Scope,
) -> Result<std::path::PathBuf, GtError> {
    let rel = category.materialize_path().ok_or_else(|| {
        GtError::Usage(format!("category {category} has no materialized form"))
    })?;
    let resolution = resolve(store, category, scope).await?;
    let path = work_dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(&resolution.merged)?)?;
    Ok(path)
}

/// Canonical bead ID for a config slug.
pub fn config_bead_id(slug: &str) -> String {
    format!("hq-cfg-{slug}")
}

/// Create a config bead. The `(slug, scope)` pair is the uniqueness unit.
pub async fn create_config_bead(
    store: &dyn Beads,
    slug: &str,
    fields: &ConfigFields,
    labels: Vec<String>,
) -> Result<String, GtError> {
    Category::parse(&fields.category)?;
    store
        .create(CreateBead {
            kind: Some(BeadKind::Config),
            id: Some(config_bead_id(slug)),
            title: format!("config: {slug}"),
            description: fields.apply(""),
            labels,
            prefix_hint: None,
        })
        .await
}

pub async fn update_config_bead(
    store: &dyn Beads,
    slug: &str,
    fields: &ConfigFields,
) -> Result<(), GtError> {
    Category::parse(&fields.category)?;
    let id = config_bead_id(slug);
    let bead = store
        .show(&id, false)
        .await?
        .ok_or_else(|| GtError::BeadNotFound(id.clone()))?;
    store
        .update(
            &id,
            BeadPatch { description: Some(fields.apply(&bead.description)), ..Default::default() },
        )
        .await
}

/// Hard delete — config beads leave no tombstone.
pub async fn delete_config_bead(store: &dyn Beads, slug: &str) -> Result<(), GtError> {
    store.delete(&config_bead_id(slug)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beads::memory::MemoryBeads;
    use crate::beads::BeadStatus;

    fn config_bead(id: &str, rig: &str, category: &str, metadata: &str, labels: &[&str]) -> Bead {
        let fields = ConfigFields {
            rig: rig.into(),
            category: category.into(),
            metadata: metadata.into(),
        };
        Bead {
            id: id.into(),
            kind: BeadKind::Config,
            title: id.into(),
            description: fields.apply(""),
            status: BeadStatus::Open,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            assignee: None,
        }
    }

    #[tokio::test]
    async fn resolve_empty_store() {
        let store = MemoryBeads::new();
        let scope = Scope { town: "wasteland".into(), ..Default::default() };
        let res = resolve(&store, Category::ClaudeHooks, &scope).await.unwrap();
        assert!(res.layers.is_empty());
        assert_eq!(res.merged, serde_json::json!({}));
    }

    #[tokio::test]
    async fn resolve_layers_in_specificity_order() {
        // Three layers: global {A:1}, town {A:2,B:2}, role:polecat {B:null,C:3}
        let store = MemoryBeads::new();
        store.insert(config_bead("hq-cfg-a", "*", "claude-hooks", r#"{"A":1}"#, &[]));
        store.insert(config_bead("hq-cfg-b", "wasteland", "claude-hooks", r#"{"A":2,"B":2}"#, &[]));
        store.insert(config_bead(
            "hq-cfg-c",
            "*",
            "claude-hooks",
            r#"{"B":null,"C":3}"#,
            &["role:polecat"],
        ));
        let scope = Scope {
            town: "wasteland".into(),
            role: Some(Role::Polecat),
            ..Default::default()
        };
        let res = resolve(&store, Category::ClaudeHooks, &scope).await.unwrap();
        assert_eq!(res.layers.len(), 3);
        assert_eq!(res.layers[0].bead_id, "hq-cfg-a");
        assert_eq!(res.layers[1].bead_id, "hq-cfg-b");
        assert_eq!(res.layers[2].bead_id, "hq-cfg-c");
        assert_eq!(res.merged, serde_json::json!({"A": 2, "C": 3}));
    }

    #[tokio::test]
    async fn rig_scope_requires_matching_rig() {
        let store = MemoryBeads::new();
        store.insert(config_bead("hq-cfg-r", "wasteland/gastown", "mcp", r#"{"x":1}"#, &[]));
        let no_rig = Scope { town: "wasteland".into(), ..Default::default() };
        let res = resolve(&store, Category::Mcp, &no_rig).await.unwrap();
        assert!(res.layers.is_empty());

        let with_rig = Scope {
            town: "wasteland".into(),
            rig: Some("gastown".into()),
            ..Default::default()
        };
        let res = resolve(&store, Category::Mcp, &with_rig).await.unwrap();
        assert_eq!(res.layers.len(), 1);
    }

    #[tokio::test]
    async fn agent_label_outranks_role_label() {
        let store = MemoryBeads::new();
        store.insert(config_bead(
            "hq-cfg-role",
            "*",
            "agent-preset",
            r#"{"model":"standard"}"#,
            &["role:polecat"],
        ));
        store.insert(config_bead(
            "hq-cfg-agent",
            "*",
            "agent-preset",
            r#"{"model":"heavy"}"#,
            &["agent:Toast"],
        ));
        let scope = Scope {
            town: "wasteland".into(),
            role: Some(Role::Polecat),
            agent: Some("Toast".into()),
            ..Default::default()
        };
        let res = resolve(&store, Category::AgentPreset, &scope).await.unwrap();
        assert_eq!(res.merged["model"], "heavy");
    }

    #[test]
    fn deep_merge_semantics() {
        let mut acc = serde_json::json!({"hooks": {"pre": ["a"], "post": ["b"]}, "keep": 1});
        deep_merge(&mut acc, &serde_json::json!({"hooks": {"pre": ["c"]}}));
        assert_eq!(acc["hooks"]["pre"], serde_json::json!(["c"]));
        assert_eq!(acc["hooks"]["post"], serde_json::json!(["b"]));
        assert_eq!(acc["keep"], 1);

        deep_merge(&mut acc, &serde_json::json!({"keep": null}));
        assert!(acc.get("keep").is_none());
        assert!(acc.get("hooks").is_some());
    }

    #[test]
    fn shallow_merge_replaces_whole_keys() {
        let mut acc = serde_json::json!({"a": {"x": 1, "y": 2}});
        shallow_merge(&mut acc, &serde_json::json!({"a": {"x": 3}}));
        assert_eq!(acc, serde_json::json!({"a": {"x": 3}}));
        shallow_merge(&mut acc, &serde_json::json!({"a": null}));
        assert_eq!(acc, serde_json::json!({}));
    }

    #[tokio::test]
    async fn verify_flags_bad_beads() {
        let store = MemoryBeads::new();
        store.insert(config_bead("hq-cfg-ok", "*", "identity", r#"{"n":1}"#, &[]));
        store.insert(config_bead("hq-cfg-bad-cat", "*", "turbo", r#"{}"#, &[]));
        store.insert(config_bead("hq-cfg-bad-json", "*", "mcp", "{not json", &[]));
        let issues = verify(&store).await.unwrap();
        let problems: Vec<&str> = issues.iter().map(|i| i.problem.as_str()).collect();
        assert!(problems.iter().any(|p| p.contains("invalid category: turbo")));
        assert!(problems.iter().any(|p| p.contains("invalid metadata JSON")));
        assert!(problems.iter().any(|p| p.contains("rig-registry")));
    }

    #[tokio::test]
    async fn materialize_writes_well_known_file() {
        let store = MemoryBeads::new();
        store.insert(config_bead("hq-cfg-hooks", "*", "claude-hooks", r#"{"h":1}"#, &[]));
        let dir = tempfile::tempdir().unwrap();
        let scope = Scope { town: "wasteland".into(), ..Default::default() };
        let path = materialize(&store, dir.path(), Category::ClaudeHooks, &scope)
            .await
            .unwrap();
        assert!(path.ends_with(".claude/settings.json"));
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&content).unwrap(), serde_json::json!({"h": 1}));
    }

    #[tokio::test]
    async fn config_crud_is_hard_delete() {
        let store = MemoryBeads::new();
        let fields = ConfigFields {
            rig: "*".into(),
            category: "daemon".into(),
            metadata: r#"{"interval": 30}"#.into(),
        };
        create_config_bead(&store, "daemon", &fields, vec![]).await.unwrap();
        assert!(store.get("hq-cfg-daemon").is_some());
        delete_config_bead(&store, "daemon").await.unwrap();
        assert!(store.get("hq-cfg-daemon").is_none());
    }

    #[test]
    fn unknown_category_rejected() {
        assert!(Category::parse("claude-hooks").is_ok());
        assert!(Category::parse("guzzoline").is_err());
    }
}
