//! The live view of agents in the town: declared agent beads merged with
//! running backend sessions.

use std::collections::BTreeMap;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;

use crate::backend::Backend;
use crate::beads::fields::AgentFields;
use crate::beads::{self, AgentState, Beads, ExecutionTarget};
use crate::identity::{categorize, parse_bead_id, AgentIdentity};

/// One row of the registry view.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSession {
    /// Canonical session name — the merge key. Legacy session layouts
    /// collapse onto the same key as their canonical form.
    pub session: String,
    pub identity: Option<AgentIdentity>,
    /// The declared agent bead, when one exists.
    pub bead_id: Option<String>,
    /// Declared state; `None` renders as `unknown`.
    pub state: Option<AgentState>,
    /// Liveness from the backend probe; `None` when not checked.
    pub alive: Option<bool>,
    pub target: ExecutionTarget,
}

impl AgentSession {
    pub fn rig(&self) -> Option<&str> {
        self.identity.as_ref().and_then(|i| i.rig.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoverOpts {
    pub check_liveness: bool,
}

/// Discovery result. Backend failures annotate `errors` and contribute no
/// rows — they never abort the discovery.
#[derive(Debug, Default, Serialize)]
pub struct Discovery {
    pub agents: Vec<AgentSession>,
    pub errors: Vec<String>,
}

/// Discover all agents: the union of declared and running, keyed by
/// canonical session name. Deterministic given a fixed snapshot.
pub async fn discover_all(
    store: &dyn Beads,
    backends: &[Box<dyn Backend>],
    opts: DiscoverOpts,
) -> Discovery {
    let merged: Mutex<BTreeMap<String, AgentSession>> = Mutex::new(BTreeMap::new());
    let errors: Mutex<Vec<String>> = Mutex::new(Vec::new());

    // Declared side: agent beads.
    match beads::list_agents(store).await {
        Ok(declared) => {
            let mut map = merged.lock();
            for bead in declared {
                let Some(identity) = parse_bead_id(&bead.id) else {
                    errors.lock().push(format!("unparseable agent bead id: {}", bead.id));
                    continue;
                };
                let fields = AgentFields::parse(&bead.description);
                // The declared target is authoritative; the label wins over
                // the description field when both are present.
                let target = if bead.has_label(&ExecutionTarget::K8s.label()) {
                    ExecutionTarget::K8s
                } else {
                    fields.as_ref().map(|f| f.execution_target).unwrap_or_default()
                };
                let session = identity.session_name();
                map.insert(
                    session.clone(),
                    AgentSession {
                        session,
                        identity: Some(identity),
                        bead_id: Some(bead.id.clone()),
                        state: fields.map(|f| f.agent_state),
                        alive: None,
                        target,
                    },
                );
            }
        }
        Err(e) => errors.lock().push(format!("agent bead list failed: {e}")),
    }

    // Running side: every backend, concurrently, fetch-merge into the map.
    let listings = join_all(backends.iter().map(|backend| async move {
        (backend.target(), backend.list_sessions().await)
    }))
    .await;
    for (target, listing) in listings {
        match listing {
            Ok(sessions) => {
                let mut map = merged.lock();
                for raw in sessions {
                    // Sessions that do not parse as agents are not ours.
                    let Some(identity) = categorize(&raw) else { continue };
                    let session = identity.session_name();
                    match map.get_mut(&session) {
                        Some(row) => {
                            row.alive = Some(true);
                            // Declared target stays authoritative.
                            if row.bead_id.is_none() {
                                row.target = target;
                            }
                        }
                        None => {
                            map.insert(
                                session.clone(),
                                AgentSession {
                                    session,
                                    identity: Some(identity),
                                    bead_id: None,
                                    state: None,
                                    alive: Some(true),
                                    target,
                                },
                            );
                        }
                    }
                }
            }
            Err(e) => errors.lock().push(format!("{target} session list failed: {e}")),
        }
    }

    // Liveness probes for declared agents the listings did not cover.
    if opts.check_liveness {
        let unprobed: Vec<(String, ExecutionTarget)> = merged
            .lock()
            .values()
            .filter(|row| row.alive.is_none())
            .map(|row| (row.session.clone(), row.target))
            .collect();
        let probes = join_all(unprobed.into_iter().map(|(session, target)| async move {
            let backend = backends.iter().find(|b| b.target() == target);
            let alive = match backend {
                Some(backend) => backend.has_session(&session).await,
                None => Ok(false),
            };
            (session, alive)
        }))
        .await;
        let mut map = merged.lock();
        for (session, alive) in probes {
            match alive {
                Ok(alive) => {
                    if let Some(row) = map.get_mut(&session) {
                        row.alive = Some(alive);
                    }
                }
                Err(e) => errors.lock().push(format!("liveness probe {session}: {e}")),
            }
        }
    }

    Discovery {
        agents: merged.into_inner().into_values().collect(),
        errors: errors.into_inner(),
    }
}

/// Discover agents in one rig.
pub async fn discover_rig(
    store: &dyn Beads,
    backends: &[Box<dyn Backend>],
    rig: &str,
    opts: DiscoverOpts,
) -> Discovery {
    let mut discovery = discover_all(store, backends, opts).await;
    discovery.agents.retain(|a| a.rig() == Some(rig));
    discovery
}
