use std::path::{Path, PathBuf};

/// Town manifest location relative to the town root. Presence of this file
/// is the primary workspace marker.
pub fn manifest_path(town_root: &Path) -> PathBuf {
    town_root.join(".gastown").join("config.toml")
}

/// The mayor's directory — secondary workspace marker and home of the
/// filesystem fallback records (town.json, rigs.json, accounts.json).
pub fn mayor_dir(town_root: &Path) -> PathBuf {
    town_root.join("mayor")
}

/// Town-level beads database directory.
pub fn town_beads_dir(town_root: &Path) -> PathBuf {
    town_root.join(".beads")
}

/// Prefix-to-path routing table inside the town beads directory.
pub fn routes_path(town_root: &Path) -> PathBuf {
    town_beads_dir(town_root).join("routes.jsonl")
}

/// A specific rig's directory.
pub fn rig_dir(town_root: &Path, rig: &str) -> PathBuf {
    town_root.join(rig)
}

/// A rig's beads database directory.
pub fn rig_beads_dir(town_root: &Path, rig: &str) -> PathBuf {
    rig_dir(town_root, rig).join(".beads")
}

/// Polecat worktree directory within a rig.
pub fn polecat_dir(town_root: &Path, rig: &str, name: &str) -> PathBuf {
    rig_dir(town_root, rig).join("polecats").join(name)
}

/// Crew workspace directory within a rig.
pub fn crew_dir(town_root: &Path, rig: &str, name: &str) -> PathBuf {
    rig_dir(town_root, rig).join("crew").join(name)
}

/// Witness work directory within a rig.
pub fn witness_dir(town_root: &Path, rig: &str) -> PathBuf {
    rig_dir(town_root, rig).join("witness")
}

/// Refinery work directory within a rig.
pub fn refinery_dir(town_root: &Path, rig: &str) -> PathBuf {
    rig_dir(town_root, rig).join("refinery")
}

/// Mailbox root. Each agent's inbox lives under its identity path.
pub fn mail_dir(town_root: &Path) -> PathBuf {
    town_root.join(".mail")
}

/// Runtime scratch state (inject queues, hook error log).
pub fn runtime_dir(town_root: &Path) -> PathBuf {
    town_root.join(".runtime")
}

/// Per-session injection queue directory.
pub fn inject_queue_dir(town_root: &Path) -> PathBuf {
    runtime_dir(town_root).join("inject-queue")
}

/// Ensure the directories a rig needs exist.
pub fn ensure_rig_dirs(town_root: &Path, rig: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(rig_dir(town_root, rig).join("polecats"))?;
    std::fs::create_dir_all(rig_dir(town_root, rig).join("crew"))?;
    std::fs::create_dir_all(witness_dir(town_root, rig))?;
    std::fs::create_dir_all(refinery_dir(town_root, rig))?;
    Ok(())
}

/// Ensure the base town directory structure exists.
pub fn ensure_town_dirs(town_root: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(mayor_dir(town_root))?;
    std::fs::create_dir_all(town_beads_dir(town_root))?;
    std::fs::create_dir_all(mail_dir(town_root))?;
    std::fs::create_dir_all(inject_queue_dir(town_root))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polecat_dir_structure() {
        let dir = polecat_dir(Path::new("/town"), "gastown", "furiosa");
        assert_eq!(dir, PathBuf::from("/town/gastown/polecats/furiosa"));
    }

    #[test]
    fn crew_dir_structure() {
        let dir = crew_dir(Path::new("/town"), "gastown", "dan");
        assert_eq!(dir, PathBuf::from("/town/gastown/crew/dan"));
    }

    #[test]
    fn routes_live_in_town_beads() {
        assert_eq!(
            routes_path(Path::new("/town")),
            PathBuf::from("/town/.beads/routes.jsonl")
        );
    }
}
