use std::path::{Path, PathBuf};

use crate::errors::GtError;
use crate::identity::RESERVED_RIG_NAMES;
use crate::manifest::{self, RigsRecord, TownConfig};
use crate::{dirs, routes::RouteTable};

/// Directory names under the town root that are never rigs.
const NON_RIG_DIRS: &[&str] = &["mayor", "daemon", "deacon"];

/// A located town: root directory, manifest, and the rig layout around it.
#[derive(Debug)]
pub struct Workspace {
    pub root: PathBuf,
    pub config: TownConfig,
    rigs_record: RigsRecord,
}

impl Workspace {
    /// Locate the town from the current working directory, falling back to
    /// `GT_TOWN_ROOT` then `GT_ROOT` when CWD detection fails (a detached or
    /// deleted working copy leaves the process with no usable CWD).
    pub fn discover() -> Result<Workspace, GtError> {
        let start = std::env::current_dir().ok();
        let root = start
            .as_deref()
            .and_then(find_town_root)
            .or_else(env_town_root)
            .ok_or_else(|| {
                GtError::TownNotFound(start.unwrap_or_else(|| PathBuf::from(".")))
            })?;
        Workspace::open(&root)
    }

    /// Open a town rooted at `root`.
    pub fn open(root: &Path) -> Result<Workspace, GtError> {
        let manifest_path = dirs::manifest_path(root);
        let config: TownConfig = if manifest_path.exists() {
            manifest::load_toml(&manifest_path)
                .map_err(|e| GtError::Fatal(format!("un-parseable town manifest: {e}")))?
        } else if dirs::mayor_dir(root).is_dir() {
            // Secondary marker only — synthesize a manifest from the
            // fallback record if present.
            let record: Option<manifest::TownRecord> =
                manifest::load_json(&dirs::mayor_dir(root).join("town.json"))
                    .map_err(|e| GtError::Fatal(format!("un-parseable town.json: {e}")))?;
            let name = record
                .map(|r| r.name)
                .unwrap_or_else(|| "town".to_string());
            toml::from_str(&format!("name = {name:?}"))
                .map_err(|e| GtError::Fatal(e.to_string()))?
        } else {
            return Err(GtError::TownNotFound(root.to_path_buf()));
        };
        let rigs_record: RigsRecord =
            manifest::load_json(&dirs::mayor_dir(root).join("rigs.json"))
                .map_err(|e| GtError::Fatal(format!("un-parseable rigs.json: {e}")))?
                .unwrap_or_default();
        Ok(Workspace { root: root.to_path_buf(), config, rigs_record })
    }

    /// Enumerate rigs: direct children of the town root with a beads
    /// database or a polecats directory, excluding reserved and hidden
    /// directories. Sorted for deterministic output.
    pub fn rigs(&self) -> Result<Vec<String>, GtError> {
        let mut rigs = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.')
                || NON_RIG_DIRS.contains(&name.as_str())
                || RESERVED_RIG_NAMES.contains(&name.as_str())
            {
                continue;
            }
            let path = entry.path();
            if path.join(".beads").is_dir() || path.join("polecats").is_dir() {
                rigs.push(name);
            }
        }
        rigs.sort();
        Ok(rigs)
    }

    /// The bead-ID prefix configured for a rig (rigs.json), or the town
    /// default.
    pub fn rig_prefix(&self, rig: &str) -> String {
        self.rigs_record
            .rigs
            .get(rig)
            .and_then(|r| r.prefix.clone())
            .unwrap_or_else(|| self.config.default_prefix.clone())
    }

    /// Load the routing table for this town.
    pub fn routes(&self) -> Result<RouteTable, GtError> {
        RouteTable::load(self)
    }

    pub fn rig_entry(&self, rig: &str) -> Option<&manifest::RigEntry> {
        self.rigs_record.rigs.get(rig)
    }
}

/// Walk up from `start` looking for the town manifest, then for a mayor
/// directory as the secondary marker.
pub fn find_town_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if dirs::manifest_path(&current).exists() {
            return Some(current);
        }
        if !current.pop() {
            break;
        }
    }
    let mut current = start.to_path_buf();
    loop {
        if dirs::mayor_dir(&current).is_dir() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

fn env_town_root() -> Option<PathBuf> {
    for var in ["GT_TOWN_ROOT", "GT_ROOT"] {
        if let Ok(root) = std::env::var(var) {
            if !root.is_empty() {
                return Some(PathBuf::from(root));
            }
        }
    }
    None
}

#[cfg(test)]
pub(crate) fn scaffold_town(root: &Path, name: &str) {
    std::fs::create_dir_all(root.join(".gastown")).unwrap();
    std::fs::write(
        dirs::manifest_path(root),
        format!("name = {name:?}\n"),
    )
    .unwrap();
    dirs::ensure_town_dirs(root).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn find_town_root_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        scaffold_town(dir.path(), "wasteland");

        let nested = dir.path().join("gastown").join("crew").join("dan");
        fs::create_dir_all(&nested).unwrap();

        let found = find_town_root(&nested).unwrap();
        assert_eq!(found, dir.path());
    }

    #[test]
    fn mayor_dir_is_secondary_marker() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("mayor")).unwrap();
        assert_eq!(find_town_root(dir.path()).unwrap(), dir.path());
        // Workspace::open synthesizes a config
        let ws = Workspace::open(dir.path()).unwrap();
        assert_eq!(ws.config.name, "town");
    }

    #[test]
    fn find_town_root_returns_none_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_town_root(dir.path()).is_none());
    }

    #[test]
    fn rig_enumeration_skips_reserved_and_bare_dirs() {
        let dir = tempfile::tempdir().unwrap();
        scaffold_town(dir.path(), "wasteland");
        // Two real rigs, one bare directory, reserved/hidden noise
        fs::create_dir_all(dir.path().join("gastown/.beads")).unwrap();
        fs::create_dir_all(dir.path().join("beads/polecats")).unwrap();
        fs::create_dir_all(dir.path().join("scratch")).unwrap();
        fs::create_dir_all(dir.path().join("daemon/.beads")).unwrap();
        fs::create_dir_all(dir.path().join(".hidden/.beads")).unwrap();

        let ws = Workspace::open(dir.path()).unwrap();
        assert_eq!(ws.rigs().unwrap(), vec!["beads", "gastown"]);
    }

    #[test]
    fn rig_prefix_falls_back_to_town_default() {
        let dir = tempfile::tempdir().unwrap();
        scaffold_town(dir.path(), "wasteland");
        fs::write(
            dir.path().join("mayor/rigs.json"),
            r#"{"rigs": {"beads": {"prefix": "bd"}}}"#,
        )
        .unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        assert_eq!(ws.rig_prefix("beads"), "bd");
        assert_eq!(ws.rig_prefix("gastown"), "gt");
    }
}
