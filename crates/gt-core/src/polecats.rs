//! Polecat allocation: a reusable name pool persisted per rig, and the git
//! worktree each local polecat works in.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::GtError;

/// The pool polecat names are drawn from. Names return to the pool when a
/// polecat is retired, so they recur across runs.
const POLECAT_NAMES: &[&str] = &[
    "nux", "slit", "rictus", "capable", "toast",
    "cheedo", "dag", "angharad", "morsov", "ace",
    "valkyrie", "keeper", "glory", "corpus", "buzzard",
];

#[derive(Debug, Default, Serialize, Deserialize)]
struct PoolState {
    #[serde(default)]
    in_use: Vec<String>,
}

fn pool_path(town_root: &Path, rig: &str) -> PathBuf {
    crate::dirs::rig_dir(town_root, rig).join("polecats").join(".pool.json")
}

fn load_pool(town_root: &Path, rig: &str) -> Result<PoolState, GtError> {
    let path = pool_path(town_root, rig);
    if !path.exists() {
        return Ok(PoolState::default());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn save_pool(town_root: &Path, rig: &str, state: &PoolState) -> Result<(), GtError> {
    let path = pool_path(town_root, rig);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(state)?)?;
    Ok(())
}

/// Allocate the next free polecat name in a rig. Falls back to numbered
/// variants when the base pool is exhausted.
pub fn allocate_name(town_root: &Path, rig: &str) -> Result<String, GtError> {
    let mut state = load_pool(town_root, rig)?;
    let name = next_free(&state.in_use);
    state.in_use.push(name.clone());
    save_pool(town_root, rig, &state)?;
    Ok(name)
}

/// Mark a specific name as in use (idempotent). Used when a caller slings
/// at a polecat by name rather than drawing from the pool.
pub fn claim_name(town_root: &Path, rig: &str, name: &str) -> Result<(), GtError> {
    let mut state = load_pool(town_root, rig)?;
    if !state.in_use.iter().any(|n| n == name) {
        state.in_use.push(name.to_string());
        save_pool(town_root, rig, &state)?;
    }
    Ok(())
}

/// Return a name to the pool.
pub fn release_name(town_root: &Path, rig: &str, name: &str) -> Result<(), GtError> {
    let mut state = load_pool(town_root, rig)?;
    state.in_use.retain(|n| n != name);
    save_pool(town_root, rig, &state)
}

pub fn names_in_use(town_root: &Path, rig: &str) -> Result<Vec<String>, GtError> {
    Ok(load_pool(town_root, rig)?.in_use)
}

fn next_free(in_use: &[String]) -> String {
    for name in POLECAT_NAMES {
        if !in_use.iter().any(|n| n == name) {
            return (*name).to_string();
        }
    }
    // Exhausted: cycle with a numeric suffix.
    for round in 2.. {
        for name in POLECAT_NAMES {
            let candidate = format!("{name}-{round}");
            if !in_use.iter().any(|n| n == &candidate) {
                return candidate;
            }
        }
    }
    unreachable!("name pool cycles forever")
}

/// Ensure a polecat's worktree exists under `<rig>/polecats/<name>`,
/// repairing stale allocations (name registered but no worktree on disk).
/// Idempotent on a healthy worktree.
pub fn ensure_worktree(town_root: &Path, rig: &str, name: &str) -> Result<PathBuf, GtError> {
    let rig_root = crate::dirs::rig_dir(town_root, rig);
    let path = crate::dirs::polecat_dir(town_root, rig, name);
    let repo = git2::Repository::open(&rig_root)?;

    if path.join(".git").exists() {
        return Ok(path);
    }

    // Repair: a registered worktree whose directory is gone (or was only
    // half-created) blocks re-adding under the same name.
    if let Ok(stale) = repo.find_worktree(name) {
        let mut prune_opts = git2::WorktreePruneOptions::new();
        prune_opts.valid(true).working_tree(true);
        stale.prune(Some(&mut prune_opts))?;
        tracing::warn!(rig, polecat = name, "pruned stale worktree registration");
    }
    if path.exists() {
        std::fs::remove_dir_all(&path)?;
    }
    std::fs::create_dir_all(path.parent().unwrap_or(&rig_root))?;

    // Each polecat works on its own branch off the rig's current head.
    let branch_name = format!("polecat-{name}");
    let head = repo.head()?.peel_to_commit()?;
    let branch = match repo.find_branch(&branch_name, git2::BranchType::Local) {
        Ok(branch) => branch,
        Err(_) => repo.branch(&branch_name, &head, false)?,
    };
    let reference = branch.into_reference();

    let mut opts = git2::WorktreeAddOptions::new();
    opts.reference(Some(&reference));
    repo.worktree(name, &path, Some(&opts))?;
    tracing::info!(rig, polecat = name, path = %path.display(), "created polecat worktree");
    Ok(path)
}
