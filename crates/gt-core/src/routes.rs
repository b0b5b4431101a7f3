use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dirs;
use crate::errors::GtError;
use crate::workspace::Workspace;

/// One prefix-to-path routing record from `.beads/routes.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub prefix: String,
    /// Path relative to the town root; empty string routes to the town
    /// database itself.
    pub path: String,
}

/// Deterministic bead-ID router. The routes file is authoritative; missing
/// entries fall back to name-based heuristics so a freshly seeded town
/// works before routes are written.
#[derive(Debug)]
pub struct RouteTable {
    town_root: PathBuf,
    routes: Vec<Route>,
    rigs: Vec<String>,
    rig_prefixes: Vec<(String, String)>,
}

impl RouteTable {
    pub fn load(ws: &Workspace) -> Result<RouteTable, GtError> {
        let path = dirs::routes_path(&ws.root);
        let mut routes = Vec::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let route: Route = serde_json::from_str(line).map_err(|e| {
                    GtError::Fatal(format!(
                        "corrupt routes file {} line {}: {e}",
                        path.display(),
                        lineno + 1
                    ))
                })?;
                routes.push(route);
            }
        }
        let rigs = ws.rigs()?;
        let rig_prefixes = rigs
            .iter()
            .map(|r| (ws.rig_prefix(r), r.clone()))
            .collect();
        Ok(RouteTable { town_root: ws.root.clone(), routes, rigs, rig_prefixes })
    }

    /// Resolve a bead ID to the beads database directory that owns it.
    /// Every ID has exactly one destination in a consistent town.
    pub fn resolve(&self, bead_id: &str) -> PathBuf {
        let prefix = bead_id.split('-').next().unwrap_or(bead_id);
        self.resolve_prefix(prefix)
    }

    /// Resolve a bare prefix token.
    pub fn resolve_prefix(&self, prefix: &str) -> PathBuf {
        // Authoritative: routes.jsonl. Entries may carry the trailing dash.
        for route in &self.routes {
            if route.prefix.trim_end_matches('-') == prefix {
                if route.path.is_empty() {
                    return dirs::town_beads_dir(&self.town_root);
                }
                return self.town_root.join(&route.path).join(".beads");
            }
        }
        // Heuristics: hq is the town; a rig's configured prefix or a rig
        // named like the prefix routes to that rig.
        if prefix == "hq" {
            return dirs::town_beads_dir(&self.town_root);
        }
        for (rig_prefix, rig) in &self.rig_prefixes {
            if rig_prefix == prefix {
                return dirs::rig_beads_dir(&self.town_root, rig);
            }
        }
        for rig in &self.rigs {
            if rig == prefix {
                return dirs::rig_beads_dir(&self.town_root, rig);
            }
        }
        dirs::town_beads_dir(&self.town_root)
    }

    /// The rig that owns a bead ID, if the ID routes to a rig database.
    pub fn rig_for(&self, bead_id: &str) -> Option<String> {
        let db = self.resolve(bead_id);
        let rig_dir = db.parent()?;
        if rig_dir == self.town_root {
            return None;
        }
        let name = rig_dir.file_name()?.to_string_lossy().to_string();
        self.rigs.contains(&name).then_some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{scaffold_town, Workspace};
    use std::fs;

    fn town_with_rigs() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        scaffold_town(dir.path(), "wasteland");
        fs::create_dir_all(dir.path().join("gastown/.beads")).unwrap();
        fs::create_dir_all(dir.path().join("beads/.beads")).unwrap();
        fs::write(
            dir.path().join("mayor/rigs.json"),
            r#"{"rigs": {"beads": {"prefix": "bd"}, "gastown": {}}}"#,
        )
        .unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        (dir, ws)
    }

    #[test]
    fn routes_file_is_authoritative() {
        let (dir, ws) = town_with_rigs();
        fs::write(
            dirs::routes_path(dir.path()),
            "{\"prefix\": \"gt-\", \"path\": \"gastown\"}\n{\"prefix\": \"hq-\", \"path\": \"\"}\n",
        )
        .unwrap();
        let table = ws.routes().unwrap();
        assert_eq!(
            table.resolve("gt-gastown-polecat-Toast"),
            dir.path().join("gastown/.beads")
        );
        assert_eq!(table.resolve("hq-mayor"), dir.path().join(".beads"));
    }

    #[test]
    fn heuristic_fallback_without_routes() {
        let (dir, ws) = town_with_rigs();
        let table = ws.routes().unwrap();
        // hq routes to the town database
        assert_eq!(table.resolve("hq-cfg-identity"), dir.path().join(".beads"));
        // A rig's configured prefix routes to its database
        assert_eq!(table.resolve("bd-123"), dir.path().join("beads/.beads"));
        // Unknown prefixes land in the town database
        assert_eq!(table.resolve("zz-999"), dir.path().join(".beads"));
    }

    #[test]
    fn corrupt_routes_are_fatal() {
        let (dir, ws) = town_with_rigs();
        fs::write(dirs::routes_path(dir.path()), "not json\n").unwrap();
        match ws.routes() {
            Err(GtError::Fatal(msg)) => assert!(msg.contains("routes")),
            other => panic!("expected fatal error, got {other:?}"),
        }
    }

    #[test]
    fn rig_for_distinguishes_town_and_rig() {
        let (_dir, ws) = town_with_rigs();
        let table = ws.routes().unwrap();
        assert_eq!(table.rig_for("bd-1"), Some("beads".to_string()));
        assert_eq!(table.rig_for("hq-mayor"), None);
    }
}
