//! The live beads store: drives the external `bd` binary.
//!
//! Every mutating call is routed to the database that owns the bead ID via
//! the town's route table. Reads may opt into the on-disk JSONL replica
//! (`.beads/issues.jsonl`) instead of spawning a subprocess.
//!
//! The `bd` surface relied on here: `show/create/update/close/reopen/delete`,
//! `slot set|clear`, `list`, `export`, and the formula verbs
//! `cook/wisp/bond`. All read commands take `--json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::beads::{Bead, BeadKind, BeadPatch, BeadStatus, Beads, CreateBead};
use crate::errors::GtError;
use crate::routes::RouteTable;
use crate::workspace::Workspace;

const BD_TIMEOUT: Duration = Duration::from_secs(30);

pub struct BdClient {
    town_root: PathBuf,
    routes: RouteTable,
}

impl BdClient {
    pub fn new(ws: &Workspace) -> Result<BdClient, GtError> {
        if std::env::var_os("BEADS_DIR").is_some() {
            // Routes-based redirect wins; a process-wide override makes
            // cross-database operations land in the wrong store.
            tracing::warn!(
                "BEADS_DIR is set; gt routes beads by prefix and ignores it"
            );
        }
        Ok(BdClient { town_root: ws.root.clone(), routes: ws.routes()? })
    }

    /// The working directory `bd` runs in for a given bead ID: the parent
    /// of the owning `.beads` directory.
    fn db_root(&self, bead_id: &str) -> PathBuf {
        let db = self.routes.resolve(bead_id);
        db.parent().map(Path::to_path_buf).unwrap_or_else(|| self.town_root.clone())
    }

    async fn run(&self, cwd: &Path, args: &[&str]) -> Result<String, GtError> {
        let output = tokio::time::timeout(
            BD_TIMEOUT,
            Command::new("bd").args(args).current_dir(cwd).output(),
        )
        .await
        .map_err(|_| GtError::Transient(format!("bd {} timed out", args.join(" "))))?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                GtError::Fatal("bd binary not found on PATH".into())
            }
            _ => GtError::Io(e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("not found") || stderr.contains("no such issue") {
                return Err(GtError::BeadNotFound(
                    args.get(1).unwrap_or(&"").to_string(),
                ));
            }
            return Err(GtError::Beads(format!("bd {}: {stderr}", args.join(" "))));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Scan the replica for one bead without touching the live database.
    fn show_stale(&self, id: &str) -> Result<Option<Bead>, GtError> {
        let replica = self.routes.resolve(id).join("issues.jsonl");
        if !replica.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(replica)?;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let issue: BdIssue = match serde_json::from_str(line) {
                Ok(issue) => issue,
                Err(_) => continue,
            };
            if issue.id == id {
                return Ok(Some(issue.into_bead()?));
            }
        }
        Ok(None)
    }

    async fn list(&self, extra: &[&str]) -> Result<Vec<Bead>, GtError> {
        // Lists span both the town database and every rig database; merge
        // and dedup by ID, town copy winning.
        let mut roots = vec![self.town_root.clone()];
        for rig in self.rigs()? {
            roots.push(self.town_root.join(rig));
        }
        let mut seen = std::collections::BTreeMap::new();
        for root in roots {
            if !root.join(".beads").is_dir() {
                continue;
            }
            let mut args = vec!["list", "--json"];
            args.extend_from_slice(extra);
            let stdout = self.run(&root, &args).await?;
            for issue in parse_issue_list(&stdout)? {
                let bead = issue.into_bead()?;
                seen.entry(bead.id.clone()).or_insert(bead);
            }
        }
        Ok(seen.into_values().collect())
    }

    fn rigs(&self) -> Result<Vec<String>, GtError> {
        // Re-derive rather than holding a Workspace: the route table already
        // carries the layout.
        let ws = Workspace::open(&self.town_root)?;
        ws.rigs()
    }
}

#[async_trait]
impl Beads for BdClient {
    async fn show(&self, id: &str, allow_stale: bool) -> Result<Option<Bead>, GtError> {
        if allow_stale {
            if let Some(bead) = self.show_stale(id)? {
                return Ok(Some(bead));
            }
        }
        let cwd = self.db_root(id);
        match self.run(&cwd, &["show", id, "--json"]).await {
            Ok(stdout) => {
                let issue: BdIssue = serde_json::from_str(stdout.trim())?;
                Ok(Some(issue.into_bead()?))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, spec: CreateBead) -> Result<String, GtError> {
        let route_key = spec
            .id
            .clone()
            .or_else(|| spec.prefix_hint.as_ref().map(|p| format!("{p}-")))
            .unwrap_or_default();
        let cwd = self.db_root(&route_key);

        let kind = spec.kind.unwrap_or(BeadKind::Task);
        let mut args: Vec<String> = vec![
            "create".into(),
            "--type".into(),
            kind.as_str().into(),
            "--title".into(),
            spec.title,
            "--description".into(),
            spec.description,
            "--json".into(),
        ];
        if let Some(id) = &spec.id {
            args.push("--id".into());
            args.push(id.clone());
        } else if let Some(prefix) = &spec.prefix_hint {
            args.push("--prefix".into());
            args.push(prefix.clone());
        }
        for label in &spec.labels {
            args.push("--label".into());
            args.push(label.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run(&cwd, &arg_refs).await?;

        #[derive(Deserialize)]
        struct Created {
            id: String,
        }
        let created: Created = serde_json::from_str(stdout.trim())?;
        Ok(created.id)
    }

    async fn update(&self, id: &str, patch: BeadPatch) -> Result<(), GtError> {
        let cwd = self.db_root(id);
        let mut args: Vec<String> = vec!["update".into(), id.into()];
        if let Some(description) = patch.description {
            args.push("--description".into());
            args.push(description);
        }
        if let Some(labels) = patch.labels {
            args.push("--set-labels".into());
            args.push(labels.join(","));
        }
        match patch.assignee {
            Some(Some(assignee)) => {
                args.push("--assignee".into());
                args.push(assignee);
            }
            Some(None) => {
                args.push("--no-assignee".into());
            }
            None => {}
        }
        if let Some(status) = patch.status {
            args.push("--status".into());
            args.push(
                match status {
                    BeadStatus::Open => "open",
                    BeadStatus::Closed => "closed",
                }
                .into(),
            );
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&cwd, &arg_refs).await?;
        Ok(())
    }

    async fn close(&self, id: &str, reason: &str) -> Result<(), GtError> {
        let cwd = self.db_root(id);
        self.run(&cwd, &["close", id, "--reason", reason]).await?;
        Ok(())
    }

    async fn reopen(&self, id: &str, patch: BeadPatch) -> Result<(), GtError> {
        let cwd = self.db_root(id);
        self.run(&cwd, &["reopen", id]).await?;
        self.update(id, patch).await
    }

    async fn delete(&self, id: &str) -> Result<(), GtError> {
        let cwd = self.db_root(id);
        self.run(&cwd, &["delete", id, "--force"]).await?;
        Ok(())
    }

    async fn set_hook_bead(&self, agent_id: &str, hook_id: Option<&str>) -> Result<(), GtError> {
        let cwd = self.db_root(agent_id);
        match hook_id {
            Some(hook) => {
                self.run(&cwd, &["slot", "set", agent_id, "hook_bead", hook]).await?;
            }
            None => {
                self.run(&cwd, &["slot", "clear", agent_id, "hook_bead"]).await?;
            }
        }
        Ok(())
    }

    async fn list_by_kind(&self, kind: BeadKind) -> Result<Vec<Bead>, GtError> {
        self.list(&["--type", kind.as_str()]).await
    }

    async fn list_by_label(&self, label: &str) -> Result<Vec<Bead>, GtError> {
        self.list(&["--label", label]).await
    }

    async fn list_pending_decisions(&self) -> Result<Vec<Bead>, GtError> {
        self.list(&["--type", "decision", "--status", "open"]).await
    }

    async fn export(&self) -> Result<(), GtError> {
        self.run(&self.town_root, &["export"]).await?;
        for rig in self.rigs()? {
            let root = self.town_root.join(&rig);
            if root.join(".beads").is_dir() {
                self.run(&root, &["export"]).await?;
            }
        }
        Ok(())
    }

    async fn cook(&self, formula: &str) -> Result<(), GtError> {
        self.run(&self.town_root, &["cook", formula]).await?;
        Ok(())
    }

    async fn wisp(&self, formula: &str, vars: &[(String, String)]) -> Result<String, GtError> {
        let mut args: Vec<String> = vec!["wisp".into(), formula.into(), "--json".into()];
        for (key, value) in vars {
            args.push("--var".into());
            args.push(format!("{key}={value}"));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run(&self.town_root, &arg_refs).await?;

        #[derive(Deserialize)]
        struct Wisped {
            root: String,
        }
        let wisped: Wisped = serde_json::from_str(stdout.trim())?;
        Ok(wisped.root)
    }

    async fn bond(&self, wisp_root: &str, base: &str) -> Result<(), GtError> {
        let cwd = self.db_root(base);
        self.run(&cwd, &["bond", wisp_root, base]).await?;
        Ok(())
    }
}

/// Wire shape of a `bd` issue. Field names follow the JSON `bd` emits.
#[derive(Debug, Deserialize)]
struct BdIssue {
    id: String,
    #[serde(rename = "type", alias = "issue_type")]
    kind: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_status")]
    status: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    assignee: Option<String>,
}

fn default_status() -> String {
    "open".into()
}

impl BdIssue {
    fn into_bead(self) -> Result<Bead, GtError> {
        let kind = BeadKind::parse(&self.kind)
            .ok_or_else(|| GtError::Beads(format!("unknown bead type: {}", self.kind)))?;
        Ok(Bead {
            id: self.id,
            kind,
            title: self.title,
            description: self.description,
            status: if self.status == "closed" { BeadStatus::Closed } else { BeadStatus::Open },
            labels: self.labels,
            assignee: self.assignee.filter(|a| !a.is_empty()),
        })
    }
}

fn parse_issue_list(stdout: &str) -> Result<Vec<BdIssue>, GtError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Probe the beads daemon's health endpoint when one is configured.
/// Returns `None` when no daemon URL is set.
pub async fn daemon_health() -> Option<Result<(), GtError>> {
    let url = daemon_url()?;
    let client = match reqwest::Client::builder().timeout(Duration::from_secs(5)).build() {
        Ok(client) => client,
        Err(e) => return Some(Err(GtError::Transient(e.to_string()))),
    };
    let mut request = client.get(format!("{}/health", url.trim_end_matches('/')));
    if let Ok(token) = std::env::var("BD_DAEMON_TOKEN") {
        request = request.bearer_auth(token);
    }
    Some(match request.send().await {
        Ok(resp) if resp.status().is_success() => Ok(()),
        Ok(resp) => Err(GtError::Transient(format!("bd daemon returned {}", resp.status()))),
        Err(e) => Err(GtError::Transient(format!("bd daemon unreachable: {e}"))),
    })
}

fn daemon_url() -> Option<String> {
    if let Ok(url) = std::env::var("BD_DAEMON_HTTP_URL") {
        if !url.is_empty() {
            return Some(url);
        }
    }
    let host = std::env::var("BD_DAEMON_HOST").ok().filter(|h| !h.is_empty())?;
    let port = std::env::var("BD_DAEMON_HTTP_PORT").ok().filter(|p| !p.is_empty())?;
    Some(format!("http://{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::scaffold_town;
    use std::fs;

    #[test]
    fn stale_show_reads_replica() {
        let dir = tempfile::tempdir().unwrap();
        scaffold_town(dir.path(), "wasteland");
        fs::write(
            dir.path().join(".beads/issues.jsonl"),
            concat!(
                r#"{"id":"hq-mayor","type":"agent","title":"mayor","status":"open"}"#,
                "\n",
                r#"{"id":"hq-cfg-mcp","type":"config","title":"mcp","status":"closed"}"#,
                "\n",
            ),
        )
        .unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let client = BdClient::new(&ws).unwrap();

        let bead = client.show_stale("hq-mayor").unwrap().unwrap();
        assert_eq!(bead.kind, BeadKind::Agent);
        assert!(bead.is_open());

        let cfg = client.show_stale("hq-cfg-mcp").unwrap().unwrap();
        assert_eq!(cfg.status, BeadStatus::Closed);

        assert!(client.show_stale("hq-nope").unwrap().is_none());
    }

    #[test]
    fn issue_list_parses_empty_and_array() {
        assert!(parse_issue_list("").unwrap().is_empty());
        assert!(parse_issue_list("  \n").unwrap().is_empty());
        let issues =
            parse_issue_list(r#"[{"id":"gt-1","type":"task","title":"t","status":"open"}]"#)
                .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, "gt-1");
    }

    #[test]
    fn unknown_issue_type_is_an_error() {
        let issue = BdIssue {
            id: "gt-1".into(),
            kind: "molecule".into(),
            title: String::new(),
            description: String::new(),
            status: "open".into(),
            labels: vec![],
            assignee: None,
        };
        assert!(issue.into_bead().is_err());
    }

    #[test]
    #[serial_test::serial(env)]
    fn daemon_url_prefers_full_url() {
        // Pure env composition logic, checked without touching the network.
        std::env::remove_var("BD_DAEMON_HTTP_URL");
        std::env::remove_var("BD_DAEMON_HOST");
        std::env::remove_var("BD_DAEMON_HTTP_PORT");
        assert_eq!(daemon_url(), None);
    }
}
