//! Typed sub-records inside bead descriptions.
//!
//! A description is a Markdown blob. Structured fields live under
//! well-known level-2 headings as `- [key]: value` lines:
//!
//! ```text
//! Free prose stays untouched.
//!
//! ## Agent
//! - [role_type]: polecat
//! - [rig]: gastown
//! - [agent_state]: spawning
//! ```
//!
//! Parsing is lenient — unknown headings and prose round-trip unchanged.
//! Emitting is strict — keys come out in canonical order, and rewriting a
//! section preserves everything around it.

use std::collections::BTreeMap;

use crate::beads::{AgentState, ExecutionTarget, MergeStrategy};
use crate::identity::Role;

pub const AGENT_HEADING: &str = "Agent";
pub const ATTACHMENT_HEADING: &str = "Attachment";
pub const CONFIG_HEADING: &str = "Config";

/// Collect the `- [key]: value` lines under `## <heading>`. Lenient: a
/// missing section yields an empty map, malformed lines are skipped.
pub fn section_fields(description: &str, heading: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let mut in_section = false;
    for line in description.lines() {
        if let Some(h) = line.strip_prefix("## ") {
            in_section = h.trim() == heading;
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some((key, value)) = parse_field_line(line) {
            fields.insert(key.to_string(), value.to_string());
        }
    }
    fields
}

fn parse_field_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start().strip_prefix("- [")?;
    let (key, rest) = rest.split_once("]:")?;
    Some((key.trim(), rest.trim()))
}

/// Rewrite `## <heading>` with `pairs` in the given order, preserving all
/// other content. Pairs with empty values are omitted; an absent section is
/// appended. Passing no non-empty pairs removes the section.
pub fn with_section(description: &str, heading: &str, pairs: &[(&str, String)]) -> String {
    let mut body = String::new();
    for (key, value) in pairs {
        if value.is_empty() {
            continue;
        }
        body.push_str(&format!("- [{key}]: {value}\n"));
    }

    let mut out = String::new();
    let mut in_section = false;
    let mut emitted = false;
    for line in description.lines() {
        if let Some(h) = line.strip_prefix("## ") {
            if h.trim() == heading {
                in_section = true;
                if !body.is_empty() {
                    out.push_str(&format!("## {heading}\n"));
                    out.push_str(&body);
                    emitted = true;
                }
                continue;
            }
            in_section = false;
        }
        if in_section {
            // Drop the old section body, keep anything that is not a field
            // line (prose inside the section survives the rewrite).
            if parse_field_line(line).is_some() || line.trim().is_empty() {
                continue;
            }
        }
        out.push_str(line);
        out.push('\n');
    }

    if !emitted && !body.is_empty() {
        if !out.is_empty() && !out.ends_with("\n\n") {
            out.push('\n');
        }
        out.push_str(&format!("## {heading}\n"));
        out.push_str(&body);
    }
    // A description with no trailing newline comes back without one.
    if !description.ends_with('\n') && out.ends_with('\n') {
        out.pop();
    }
    out
}

/// The agent-bead sub-record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFields {
    pub role_type: Role,
    /// Empty for town-level agents.
    pub rig: String,
    pub agent_state: AgentState,
    pub hook_bead: Option<String>,
    pub execution_target: ExecutionTarget,
    pub owned_formulas: Vec<String>,
}

impl AgentFields {
    pub fn new(role_type: Role, rig: impl Into<String>) -> Self {
        AgentFields {
            role_type,
            rig: rig.into(),
            agent_state: AgentState::Idle,
            hook_bead: None,
            execution_target: ExecutionTarget::Local,
            owned_formulas: Vec::new(),
        }
    }

    /// Parse from a description. `None` when there is no agent record or
    /// the role is missing/unknown.
    pub fn parse(description: &str) -> Option<AgentFields> {
        let map = section_fields(description, AGENT_HEADING);
        let role_type = Role::parse(map.get("role_type")?)?;
        Some(AgentFields {
            role_type,
            rig: map.get("rig").cloned().unwrap_or_default(),
            agent_state: map
                .get("agent_state")
                .and_then(|s| AgentState::parse(s))
                .unwrap_or(AgentState::Idle),
            hook_bead: map.get("hook_bead").filter(|s| !s.is_empty()).cloned(),
            execution_target: map
                .get("execution_target")
                .and_then(|s| ExecutionTarget::parse(s))
                .unwrap_or_default(),
            owned_formulas: map
                .get("owned_formulas")
                .map(|s| {
                    s.split(',')
                        .map(|f| f.trim().to_string())
                        .filter(|f| !f.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// Rewrite the agent record into `description`.
    pub fn apply(&self, description: &str) -> String {
        with_section(
            description,
            AGENT_HEADING,
            &[
                ("role_type", self.role_type.as_str().to_string()),
                ("rig", self.rig.clone()),
                ("agent_state", self.agent_state.as_str().to_string()),
                ("hook_bead", self.hook_bead.clone().unwrap_or_default()),
                ("execution_target", self.execution_target.as_str().to_string()),
                ("owned_formulas", self.owned_formulas.join(", ")),
            ],
        )
    }
}

/// Dispatcher-set attachment fields on a hook bead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentFields {
    pub attached_args: Option<String>,
    pub attached_molecule: Option<String>,
    pub dispatched_by: Option<String>,
    pub merge_strategy: Option<MergeStrategy>,
    pub no_merge: bool,
    pub convoy_owned: bool,
}

impl AttachmentFields {
    pub fn parse(description: &str) -> AttachmentFields {
        let map = section_fields(description, ATTACHMENT_HEADING);
        AttachmentFields {
            attached_args: map.get("attached_args").filter(|s| !s.is_empty()).cloned(),
            attached_molecule: map.get("attached_molecule").filter(|s| !s.is_empty()).cloned(),
            dispatched_by: map.get("dispatched_by").filter(|s| !s.is_empty()).cloned(),
            merge_strategy: map.get("merge_strategy").and_then(|s| MergeStrategy::parse(s)),
            no_merge: map.get("no_merge").map(|s| s == "true").unwrap_or(false),
            convoy_owned: map.get("convoy_owned").map(|s| s == "true").unwrap_or(false),
        }
    }

    pub fn apply(&self, description: &str) -> String {
        with_section(
            description,
            ATTACHMENT_HEADING,
            &[
                ("attached_args", self.attached_args.clone().unwrap_or_default()),
                ("attached_molecule", self.attached_molecule.clone().unwrap_or_default()),
                ("dispatched_by", self.dispatched_by.clone().unwrap_or_default()),
                (
                    "merge_strategy",
                    self.merge_strategy.map(|m| m.as_str().to_string()).unwrap_or_default(),
                ),
                ("no_merge", if self.no_merge { "true".into() } else { String::new() }),
                ("convoy_owned", if self.convoy_owned { "true".into() } else { String::new() }),
            ],
        )
    }
}

/// The config-bead sub-record. `rig` is the scope field: `*`, `<town>`, or
/// `<town>/<rig>`; `metadata` is an opaque JSON blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFields {
    pub rig: String,
    pub category: String,
    pub metadata: String,
}

impl ConfigFields {
    pub fn parse(description: &str) -> Option<ConfigFields> {
        let map = section_fields(description, CONFIG_HEADING);
        Some(ConfigFields {
            rig: map.get("rig").cloned().unwrap_or_else(|| "*".to_string()),
            category: map.get("category")?.clone(),
            metadata: map.get("metadata").cloned().unwrap_or_else(|| "{}".to_string()),
        })
    }

    pub fn apply(&self, description: &str) -> String {
        with_section(
            description,
            CONFIG_HEADING,
            &[
                ("rig", self.rig.clone()),
                ("category", self.category.clone()),
                ("metadata", self.metadata.clone()),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_agent_record() {
        let desc = "Polecat worker for gastown.\n\n\
                    ## Agent\n\
                    - [role_type]: polecat\n\
                    - [rig]: gastown\n\
                    - [agent_state]: spawning\n\
                    - [hook_bead]: gt-abc\n\
                    - [execution_target]: k8s\n";
        let fields = AgentFields::parse(desc).unwrap();
        assert_eq!(fields.role_type, Role::Polecat);
        assert_eq!(fields.rig, "gastown");
        assert_eq!(fields.agent_state, AgentState::Spawning);
        assert_eq!(fields.hook_bead.as_deref(), Some("gt-abc"));
        assert_eq!(fields.execution_target, ExecutionTarget::K8s);
    }

    #[test]
    fn parse_is_lenient() {
        assert!(AgentFields::parse("no record here").is_none());
        // Unknown state falls back to idle, missing target to local
        let desc = "## Agent\n- [role_type]: witness\n- [agent_state]: dancing\n";
        let fields = AgentFields::parse(desc).unwrap();
        assert_eq!(fields.agent_state, AgentState::Idle);
        assert_eq!(fields.execution_target, ExecutionTarget::Local);
    }

    #[test]
    fn apply_preserves_prose_and_unknown_sections() {
        let desc = "Intro prose.\n\n\
                    ## Intent\n\
                    Ship the flare stack fix.\n\n\
                    ## Agent\n\
                    - [role_type]: polecat\n\
                    - [rig]: gastown\n\
                    - [agent_state]: idle\n";
        let mut fields = AgentFields::parse(desc).unwrap();
        fields.agent_state = AgentState::Working;
        fields.hook_bead = Some("gt-9".into());
        let out = fields.apply(desc);
        assert!(out.contains("Intro prose."));
        assert!(out.contains("## Intent"));
        assert!(out.contains("Ship the flare stack fix."));
        assert!(out.contains("- [agent_state]: working"));
        assert!(out.contains("- [hook_bead]: gt-9"));
        // Round-trip
        assert_eq!(AgentFields::parse(&out).unwrap(), fields);
    }

    #[test]
    fn apply_appends_missing_section() {
        let out = AgentFields::new(Role::Witness, "gastown").apply("Watcher of the rig.");
        assert!(out.starts_with("Watcher of the rig."));
        assert!(out.contains("## Agent"));
        assert!(out.contains("- [role_type]: witness"));
    }

    #[test]
    fn attachment_round_trip() {
        let fields = AttachmentFields {
            attached_args: Some("--fast".into()),
            attached_molecule: Some("wisp-1".into()),
            dispatched_by: Some("mayor".into()),
            merge_strategy: Some(MergeStrategy::Mr),
            no_merge: false,
            convoy_owned: true,
        };
        let out = fields.apply("The hook itself.");
        assert_eq!(AttachmentFields::parse(&out), fields);
        // Empty optionals stay out of the emitted record
        assert!(!out.contains("no_merge"));
    }

    #[test]
    fn config_fields_default_scope_is_global() {
        let desc = "## Config\n- [category]: claude-hooks\n- [metadata]: {\"a\":1}\n";
        let fields = ConfigFields::parse(desc).unwrap();
        assert_eq!(fields.rig, "*");
        assert_eq!(fields.category, "claude-hooks");
    }

    #[test]
    fn canonical_key_order_is_stable() {
        let a = AgentFields::new(Role::Polecat, "gastown").apply("");
        let role_at = a.find("role_type").unwrap();
        let rig_at = a.find("[rig]").unwrap();
        let state_at = a.find("agent_state").unwrap();
        assert!(role_at < rig_at && rig_at < state_at);
    }
}
