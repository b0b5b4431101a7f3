//! Self-identity: which agent is this process running as?
//!
//! Detection order: `GT_ROLE` (a full path or a bare role token, with
//! `GT_RIG`/`GT_CREW` filling in the rest), then `BD_ACTOR` from the shell
//! integration, then inference from the working directory's position under
//! the town root. Runs once per process; thread the struct, not globals.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::identity::{parse_path, AgentIdentity, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleContext {
    pub identity: Option<AgentIdentity>,
    /// The directory this agent calls home (its worktree or role dir).
    pub home: PathBuf,
}

impl RoleContext {
    pub fn role(&self) -> Option<Role> {
        self.identity.as_ref().map(|i| i.role)
    }

    pub fn rig(&self) -> Option<&str> {
        self.identity.as_ref().and_then(|i| i.rig.as_deref())
    }

    pub fn agent_name(&self) -> Option<&str> {
        self.identity.as_ref().and_then(|i| i.name.as_deref())
    }

    /// The actor string stamped into event logs and `dispatched_by`.
    pub fn actor(&self) -> String {
        match &self.identity {
            Some(identity) => identity.path(),
            None => "operator".to_string(),
        }
    }
}

/// Detect from the environment and `cwd` relative to `town_root`.
pub fn detect(town_root: &Path, cwd: &Path) -> RoleContext {
    let identity = identity_from_env().or_else(|| identity_from_cwd(town_root, cwd));
    RoleContext { identity, home: cwd.to_path_buf() }
}

/// Process-wide cached detection.
pub fn detect_cached(town_root: &Path) -> &'static RoleContext {
    static CONTEXT: OnceLock<RoleContext> = OnceLock::new();
    CONTEXT.get_or_init(|| {
        let cwd = std::env::current_dir().unwrap_or_else(|_| town_root.to_path_buf());
        detect(town_root, &cwd)
    })
}

fn identity_from_env() -> Option<AgentIdentity> {
    if let Ok(role) = std::env::var("GT_ROLE") {
        if !role.is_empty() {
            // A full path wins outright.
            if let Some(identity) = parse_path(&role) {
                return Some(identity);
            }
            // Bare role token + GT_RIG / GT_CREW
            let rig = std::env::var("GT_RIG").ok().filter(|r| !r.is_empty());
            let crew = std::env::var("GT_CREW").ok().filter(|c| !c.is_empty());
            match (Role::parse(&role), rig) {
                (Some(Role::Mayor), _) => return Some(AgentIdentity::mayor()),
                (Some(Role::Deacon), _) => return Some(AgentIdentity::deacon()),
                (Some(Role::Witness), Some(rig)) => return Some(AgentIdentity::witness(rig)),
                (Some(Role::Refinery), Some(rig)) => return Some(AgentIdentity::refinery(rig)),
                (Some(Role::Crew), Some(rig)) => {
                    if let Some(crew) = crew {
                        return Some(AgentIdentity::crew(rig, crew));
                    }
                }
                _ => {}
            }
        }
    }
    if let Ok(actor) = std::env::var("BD_ACTOR") {
        if let Some(identity) = parse_path(&actor) {
            return Some(identity);
        }
    }
    // A session handle inherited from the launcher or tmux itself.
    for var in ["GT_SESSION", "TMUX_SESSION"] {
        if let Ok(session) = std::env::var(var) {
            if let Some(identity) = crate::identity::categorize(&session) {
                return Some(identity);
            }
        }
    }
    None
}

/// Infer from where the process sits under the town root:
/// `<rig>/crew/<name>`, `<rig>/polecats/<name>`, `<rig>/witness`,
/// `<rig>/refinery`, `mayor`, `deacon`.
fn identity_from_cwd(town_root: &Path, cwd: &Path) -> Option<AgentIdentity> {
    let rel = cwd.strip_prefix(town_root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
    match parts.as_slice() {
        [] => None,
        ["mayor", ..] => Some(AgentIdentity::mayor()),
        ["deacon", ..] => Some(AgentIdentity::deacon()),
        [rig, "witness", ..] => Some(AgentIdentity::witness(*rig)),
        [rig, "refinery", ..] => Some(AgentIdentity::refinery(*rig)),
        [rig, "crew", name, ..] => Some(AgentIdentity::crew(*rig, *name)),
        [rig, "polecats", name, ..] => Some(AgentIdentity::polecat(*rig, *name)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in ["GT_ROLE", "GT_RIG", "GT_CREW", "BD_ACTOR", "GT_SESSION", "TMUX_SESSION"] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial(env)]
    fn session_env_is_a_fallback() {
        clear_env();
        std::env::set_var("GT_SESSION", "gt-gastown-Toast");
        let ctx = detect(Path::new("/town"), Path::new("/elsewhere"));
        assert_eq!(ctx.identity, Some(AgentIdentity::polecat("gastown", "Toast")));
        clear_env();
    }

    #[test]
    #[serial(env)]
    fn env_full_path_wins() {
        clear_env();
        std::env::set_var("GT_ROLE", "gastown/polecats/Toast");
        let ctx = detect(Path::new("/town"), Path::new("/somewhere/else"));
        assert_eq!(ctx.identity, Some(AgentIdentity::polecat("gastown", "Toast")));
        assert_eq!(ctx.actor(), "gastown/polecats/Toast");
        clear_env();
    }

    #[test]
    #[serial(env)]
    fn env_bare_role_with_rig() {
        clear_env();
        std::env::set_var("GT_ROLE", "witness");
        std::env::set_var("GT_RIG", "gastown");
        let ctx = detect(Path::new("/town"), Path::new("/town"));
        assert_eq!(ctx.identity, Some(AgentIdentity::witness("gastown")));
        clear_env();
    }

    #[test]
    #[serial(env)]
    fn bd_actor_is_second_priority() {
        clear_env();
        std::env::set_var("BD_ACTOR", "gastown/crew/dan");
        let ctx = detect(Path::new("/town"), Path::new("/town"));
        assert_eq!(ctx.identity, Some(AgentIdentity::crew("gastown", "dan")));
        clear_env();
    }

    #[test]
    #[serial(env)]
    fn cwd_inference() {
        clear_env();
        let town = Path::new("/town");
        for (cwd, expect) in [
            ("/town/mayor", AgentIdentity::mayor()),
            ("/town/gastown/witness", AgentIdentity::witness("gastown")),
            ("/town/gastown/crew/dan/src", AgentIdentity::crew("gastown", "dan")),
            ("/town/gastown/polecats/Toast", AgentIdentity::polecat("gastown", "Toast")),
        ] {
            let ctx = detect(town, Path::new(cwd));
            assert_eq!(ctx.identity, Some(expect), "cwd = {cwd}");
        }
        // Outside the town: no identity, actor falls back
        let ctx = detect(town, Path::new("/elsewhere"));
        assert_eq!(ctx.identity, None);
        assert_eq!(ctx.actor(), "operator");
        clear_env();
    }
}
