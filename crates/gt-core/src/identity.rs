use std::fmt;

use serde::{Deserialize, Serialize};

/// Session-name prefix for town-level agents (mayor, deacon).
pub const TOWN_SESSION_PREFIX: &str = "hq";

/// Session-name prefix for rig-level agents. Bead IDs use the rig's
/// configured prefix instead, which only defaults to the same token.
pub const RIG_SESSION_PREFIX: &str = "gt";

/// Names a rig can never take — they collide with role tokens and the
/// reserved mayor directory.
pub const RESERVED_RIG_NAMES: &[&str] =
    &["mayor", "deacon", "crew", "witness", "refinery", "polecats"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Mayor,
    Deacon,
    Witness,
    Refinery,
    Crew,
    Polecat,
    Dog,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Mayor => "mayor",
            Role::Deacon => "deacon",
            Role::Witness => "witness",
            Role::Refinery => "refinery",
            Role::Crew => "crew",
            Role::Polecat => "polecat",
            Role::Dog => "dog",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "mayor" => Some(Role::Mayor),
            "deacon" => Some(Role::Deacon),
            "witness" => Some(Role::Witness),
            "refinery" => Some(Role::Refinery),
            "crew" => Some(Role::Crew),
            "polecat" => Some(Role::Polecat),
            "dog" => Some(Role::Dog),
            _ => None,
        }
    }

    /// Town-level roles have no rig.
    pub fn is_town_level(&self) -> bool {
        matches!(self, Role::Mayor | Role::Deacon | Role::Dog)
    }

    /// Roles that carry a per-agent name besides the rig.
    pub fn is_named(&self) -> bool {
        matches!(self, Role::Crew | Role::Polecat | Role::Dog)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved agent identity. The three equivalent representations
/// (path form, session form, bead ID form) all convert through this struct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub role: Role,
    pub rig: Option<String>,
    pub name: Option<String>,
}

impl AgentIdentity {
    pub fn mayor() -> Self {
        Self { role: Role::Mayor, rig: None, name: None }
    }

    pub fn deacon() -> Self {
        Self { role: Role::Deacon, rig: None, name: None }
    }

    pub fn dog(name: impl Into<String>) -> Self {
        Self { role: Role::Dog, rig: None, name: Some(name.into()) }
    }

    pub fn witness(rig: impl Into<String>) -> Self {
        Self { role: Role::Witness, rig: Some(rig.into()), name: None }
    }

    pub fn refinery(rig: impl Into<String>) -> Self {
        Self { role: Role::Refinery, rig: Some(rig.into()), name: None }
    }

    pub fn crew(rig: impl Into<String>, name: impl Into<String>) -> Self {
        Self { role: Role::Crew, rig: Some(rig.into()), name: Some(name.into()) }
    }

    pub fn polecat(rig: impl Into<String>, name: impl Into<String>) -> Self {
        Self { role: Role::Polecat, rig: Some(rig.into()), name: Some(name.into()) }
    }

    /// Canonical session form. Never emits the legacy witness layout.
    pub fn session_name(&self) -> String {
        match (&self.role, &self.rig, &self.name) {
            (Role::Mayor, _, _) => format!("{TOWN_SESSION_PREFIX}-mayor"),
            (Role::Deacon, _, _) => format!("{TOWN_SESSION_PREFIX}-deacon"),
            (Role::Dog, _, Some(name)) => format!("{TOWN_SESSION_PREFIX}-dog-{name}"),
            (Role::Witness, Some(rig), _) => format!("{RIG_SESSION_PREFIX}-{rig}-witness"),
            (Role::Refinery, Some(rig), _) => format!("{RIG_SESSION_PREFIX}-{rig}-refinery"),
            (Role::Crew, Some(rig), Some(name)) => {
                format!("{RIG_SESSION_PREFIX}-{rig}-crew-{name}")
            }
            (Role::Polecat, Some(rig), Some(name)) => format!("{RIG_SESSION_PREFIX}-{rig}-{name}"),
            // Structurally incomplete identities only arise from hand-built
            // values; emit the bare role so the caller sees what broke.
            _ => self.role.as_str().to_string(),
        }
    }

    /// Canonical bead ID. Town-level agents always use the `hq-` prefix;
    /// rig-level agents consult `prefix_fn` for the rig's configured prefix.
    pub fn bead_id(&self, prefix_fn: impl Fn(&str) -> String) -> String {
        match (&self.role, &self.rig, &self.name) {
            (Role::Mayor, _, _) => format!("{TOWN_SESSION_PREFIX}-mayor"),
            (Role::Deacon, _, _) => format!("{TOWN_SESSION_PREFIX}-deacon"),
            (Role::Dog, _, Some(name)) => format!("{TOWN_SESSION_PREFIX}-dog-{name}"),
            (role, Some(rig), name) => {
                let prefix = prefix_fn(rig);
                match name {
                    Some(name) => format!("{prefix}-{rig}-{}-{name}", role.as_str()),
                    None => format!("{prefix}-{rig}-{}", role.as_str()),
                }
            }
            _ => self.role.as_str().to_string(),
        }
    }

    /// Human-facing path form: `mayor`, `<rig>/witness`, `<rig>/crew/<name>`,
    /// `<rig>/polecats/<name>`.
    pub fn path(&self) -> String {
        match (&self.role, &self.rig, &self.name) {
            (Role::Mayor, _, _) => "mayor".into(),
            (Role::Deacon, _, _) => "deacon".into(),
            (Role::Dog, _, Some(name)) => format!("dogs/{name}"),
            (Role::Witness, Some(rig), _) => format!("{rig}/witness"),
            (Role::Refinery, Some(rig), _) => format!("{rig}/refinery"),
            (Role::Crew, Some(rig), Some(name)) => format!("{rig}/crew/{name}"),
            (Role::Polecat, Some(rig), Some(name)) => format!("{rig}/polecats/{name}"),
            _ => self.role.as_str().to_string(),
        }
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Classify a session-form string. Total over strings: unknown inputs
/// (empty, bare prefix, unknown `hq-*`) return `None`, never an error.
///
/// The legacy witness layout `gt-witness-<rig>` is accepted here but
/// [`AgentIdentity::session_name`] always emits the canonical form.
pub fn categorize(session: &str) -> Option<AgentIdentity> {
    match session {
        "hq-mayor" => return Some(AgentIdentity::mayor()),
        "hq-deacon" => return Some(AgentIdentity::deacon()),
        _ => {}
    }
    // Any other hq-* (including dogs, which have no session form) is absent.
    let rest = session.strip_prefix("gt-")?;
    if rest.is_empty() {
        return None;
    }
    let parts: Vec<&str> = rest.split('-').collect();
    // gt-<rig>-witness | gt-<rig>-refinery
    if parts.len() == 2 && parts[0] != "witness" {
        match parts[1] {
            "witness" => return Some(AgentIdentity::witness(parts[0])),
            "refinery" => return Some(AgentIdentity::refinery(parts[0])),
            _ => {}
        }
    }
    // gt-<rig>-crew-<name...> — the name keeps its hyphens
    if parts.len() >= 3 && parts[1] == "crew" {
        return Some(AgentIdentity::crew(parts[0], parts[2..].join("-")));
    }
    // Legacy witness layout: gt-witness-<rig>
    if parts.len() >= 2 && parts[0] == "witness" {
        return Some(AgentIdentity::witness(parts[1..].join("-")));
    }
    // gt-<rig>-<name...> — polecat, name keeps case and hyphens
    if parts.len() >= 2 && !RESERVED_RIG_NAMES.contains(&parts[0]) {
        return Some(AgentIdentity::polecat(parts[0], parts[1..].join("-")));
    }
    None
}

/// Parse a canonical bead ID back into an identity. The prefix token is not
/// interpreted beyond the town `hq-` check — the rig sits at position 2 and
/// the role token at position 3.
pub fn parse_bead_id(id: &str) -> Option<AgentIdentity> {
    match id {
        "hq-mayor" => return Some(AgentIdentity::mayor()),
        "hq-deacon" => return Some(AgentIdentity::deacon()),
        _ => {}
    }
    if let Some(name) = id.strip_prefix("hq-dog-") {
        if !name.is_empty() {
            return Some(AgentIdentity::dog(name));
        }
    }
    let parts: Vec<&str> = id.split('-').collect();
    if parts.len() < 3 {
        return None;
    }
    let (rig, role) = (parts[1], parts[2]);
    if RESERVED_RIG_NAMES.contains(&rig) {
        return None;
    }
    match role {
        "witness" if parts.len() == 3 => Some(AgentIdentity::witness(rig)),
        "refinery" if parts.len() == 3 => Some(AgentIdentity::refinery(rig)),
        "crew" if parts.len() > 3 => Some(AgentIdentity::crew(rig, parts[3..].join("-"))),
        "polecat" if parts.len() > 3 => Some(AgentIdentity::polecat(rig, parts[3..].join("-"))),
        _ => None,
    }
}

/// Parse the human path form. Rejects rig names from the reserved set so a
/// rig can never shadow a role token.
pub fn parse_path(path: &str) -> Option<AgentIdentity> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        ["mayor"] => Some(AgentIdentity::mayor()),
        ["deacon"] => Some(AgentIdentity::deacon()),
        ["dogs", name] => Some(AgentIdentity::dog(*name)),
        [rig, rest @ ..] if !RESERVED_RIG_NAMES.contains(rig) => match rest {
            ["witness"] => Some(AgentIdentity::witness(*rig)),
            ["refinery"] => Some(AgentIdentity::refinery(*rig)),
            ["crew", name] => Some(AgentIdentity::crew(*rig, *name)),
            ["polecats", name] => Some(AgentIdentity::polecat(*rig, *name)),
            _ => None,
        },
        _ => None,
    }
}

/// Validate a prospective rig name against the reserved set.
pub fn validate_rig_name(name: &str) -> Result<(), crate::GtError> {
    if name.is_empty() {
        return Err(crate::GtError::Usage("rig name is empty".into()));
    }
    if RESERVED_RIG_NAMES.contains(&name) {
        return Err(crate::GtError::Usage(format!(
            "rig name '{name}' is reserved"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_table() {
        assert_eq!(categorize("hq-mayor"), Some(AgentIdentity::mayor()));
        assert_eq!(categorize("hq-deacon"), Some(AgentIdentity::deacon()));
        assert_eq!(
            categorize("gt-gastown-witness"),
            Some(AgentIdentity::witness("gastown"))
        );
        assert_eq!(
            categorize("gt-gastown-refinery"),
            Some(AgentIdentity::refinery("gastown"))
        );
        assert_eq!(
            categorize("gt-gastown-crew-my-worker"),
            Some(AgentIdentity::crew("gastown", "my-worker"))
        );
        assert_eq!(
            categorize("gt-gastown-Toast"),
            Some(AgentIdentity::polecat("gastown", "Toast"))
        );
        // Polecat names keep their hyphens
        assert_eq!(
            categorize("gt-gastown-rock-rider"),
            Some(AgentIdentity::polecat("gastown", "rock-rider"))
        );
    }

    #[test]
    fn categorize_legacy_witness() {
        assert_eq!(
            categorize("gt-witness-gastown"),
            Some(AgentIdentity::witness("gastown"))
        );
    }

    #[test]
    fn categorize_rejects_unknown() {
        assert_eq!(categorize(""), None);
        assert_eq!(categorize("0"), None);
        assert_eq!(categorize("gt-"), None);
        assert_eq!(categorize("hq-boot"), None);
        assert_eq!(categorize("gt-gastown"), None);
        assert_eq!(categorize("not-a-session"), None);
    }

    #[test]
    fn session_round_trip_is_canonical() {
        // Canonical inputs round-trip byte-for-byte
        for s in [
            "hq-mayor",
            "hq-deacon",
            "gt-gastown-witness",
            "gt-gastown-refinery",
            "gt-gastown-crew-dan",
            "gt-gastown-Toast",
            "gt-gastown-rock-rider",
        ] {
            let id = categorize(s).unwrap();
            assert_eq!(id.session_name(), s);
        }
        // Legacy inputs normalize to the canonical layout
        let id = categorize("gt-witness-gastown").unwrap();
        assert_eq!(id.session_name(), "gt-gastown-witness");
    }

    #[test]
    fn legacy_and_canonical_witness_agree() {
        assert_eq!(
            categorize("gt-witness-gastown"),
            categorize("gt-gastown-witness")
        );
    }

    #[test]
    fn bead_ids_use_rig_prefix() {
        let prefix = |_: &str| "gt".to_string();
        assert_eq!(AgentIdentity::mayor().bead_id(prefix), "hq-mayor");
        assert_eq!(
            AgentIdentity::witness("gastown").bead_id(prefix),
            "gt-gastown-witness"
        );
        assert_eq!(
            AgentIdentity::polecat("gastown", "Toast").bead_id(prefix),
            "gt-gastown-polecat-Toast"
        );
        assert_eq!(
            AgentIdentity::crew("gastown", "dan").bead_id(prefix),
            "gt-gastown-crew-dan"
        );
        // A rig-configured prefix flows through
        let custom = |_: &str| "wx".to_string();
        assert_eq!(
            AgentIdentity::polecat("gastown", "nux").bead_id(custom),
            "wx-gastown-polecat-nux"
        );
    }

    #[test]
    fn bead_id_role_token_matches_role() {
        let prefix = |_: &str| "gt".to_string();
        for id in [
            AgentIdentity::witness("gastown"),
            AgentIdentity::refinery("gastown"),
            AgentIdentity::crew("gastown", "dan"),
            AgentIdentity::polecat("gastown", "nux"),
        ] {
            let bead = id.bead_id(prefix);
            assert!(bead.contains(id.role.as_str()), "{bead}");
            assert_eq!(parse_bead_id(&bead).unwrap().role, id.role);
        }
    }

    #[test]
    fn parse_bead_id_round_trip() {
        for (id, expect) in [
            ("hq-mayor", AgentIdentity::mayor()),
            ("gt-gastown-polecat-Toast", AgentIdentity::polecat("gastown", "Toast")),
            ("gt-gastown-crew-my-worker", AgentIdentity::crew("gastown", "my-worker")),
            ("wx-beads-witness", AgentIdentity::witness("beads")),
        ] {
            assert_eq!(parse_bead_id(id), Some(expect));
        }
        assert_eq!(parse_bead_id("hq-cfg-identity"), None);
        assert_eq!(parse_bead_id("gt-abc"), None);
    }

    #[test]
    fn path_forms() {
        assert_eq!(parse_path("mayor"), Some(AgentIdentity::mayor()));
        assert_eq!(
            parse_path("gastown/polecats/Toast"),
            Some(AgentIdentity::polecat("gastown", "Toast"))
        );
        assert_eq!(
            parse_path("gastown/crew/dan"),
            Some(AgentIdentity::crew("gastown", "dan"))
        );
        assert_eq!(parse_path("gastown/witness"), Some(AgentIdentity::witness("gastown")));
        // Reserved rig names never parse
        assert_eq!(parse_path("crew/witness"), None);
        assert_eq!(parse_path("gastown/unknown"), None);

        let id = AgentIdentity::polecat("gastown", "Toast");
        assert_eq!(parse_path(&id.path()), Some(id));
    }

    #[test]
    fn reserved_rig_names_rejected() {
        for name in RESERVED_RIG_NAMES {
            assert!(validate_rig_name(name).is_err());
        }
        assert!(validate_rig_name("gastown").is_ok());
    }
}
