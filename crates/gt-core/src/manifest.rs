use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// The town manifest, stored at `.gastown/config.toml` under the town root.
/// Its presence is what makes a directory tree a town.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TownConfig {
    pub name: String,
    /// Default bead-ID prefix for rigs that do not configure their own.
    #[serde(default = "default_prefix")]
    pub default_prefix: String,
    /// Namespace the K8s backend looks for agent pods in.
    #[serde(default = "default_k8s_namespace")]
    pub k8s_namespace: String,
    /// tmux session key agents use inside their pods. A convention of the
    /// pod image, so it is configuration rather than a constant.
    #[serde(default = "default_agent_session_key")]
    pub agent_session_key: String,
    /// Unread-mail count above which preflight flags an inbox.
    #[serde(default = "default_mail_threshold")]
    pub mail_threshold: usize,
}

fn default_prefix() -> String {
    "gt".into()
}

fn default_k8s_namespace() -> String {
    "gastown".into()
}

fn default_agent_session_key() -> String {
    "claude".into()
}

fn default_mail_threshold() -> usize {
    10
}

impl TownConfig {
    /// Effective in-pod session key, `GT_K8S_SESSION_KEY` winning over the
    /// manifest value.
    pub fn session_key(&self) -> String {
        std::env::var("GT_K8S_SESSION_KEY").unwrap_or_else(|_| self.agent_session_key.clone())
    }
}

/// Filesystem fallback `mayor/town.json`. Beads is authoritative once
/// seeded; this record covers the bootstrap window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TownRecord {
    pub name: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// One rig entry in `mayor/rigs.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigEntry {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub git_url: Option<String>,
    #[serde(default)]
    pub execution_target: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigsRecord {
    #[serde(default)]
    pub rigs: HashMap<String, RigEntry>,
}

/// `mayor/accounts.json` — account slugs to credential descriptors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountsRecord {
    #[serde(default)]
    pub accounts: HashMap<String, AccountEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEntry {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub credential_env: Option<String>,
}

/// Load and parse a TOML config file.
pub fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load and parse a JSON record file, `None` if it does not exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_town_config() {
        let toml_str = r#"
name = "wasteland"
default_prefix = "wl"
k8s_namespace = "wasteland-agents"
"#;
        let config: TownConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.name, "wasteland");
        assert_eq!(config.default_prefix, "wl");
        assert_eq!(config.k8s_namespace, "wasteland-agents");
    }

    #[test]
    fn town_config_defaults() {
        let config: TownConfig = toml::from_str(r#"name = "wasteland""#).unwrap();
        assert_eq!(config.default_prefix, "gt");
        assert_eq!(config.k8s_namespace, "gastown");
        assert_eq!(config.agent_session_key, "claude");
        assert_eq!(config.mail_threshold, 10);
    }

    #[test]
    fn parse_rigs_record() {
        let json = r#"{"rigs": {"gastown": {"prefix": "gt", "git_url": "git@example.com:gastown.git"}}}"#;
        let record: RigsRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.rigs["gastown"].prefix.as_deref(), Some("gt"));
    }

    #[test]
    fn load_json_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let got: Option<RigsRecord> = load_json(&dir.path().join("rigs.json")).unwrap();
        assert!(got.is_none());
    }
}
