//! The sling protocol: atomically attach a hook bead to a target agent and
//! get that agent working.

use serde::Serialize;

use crate::backend::{Backend, StartOpts};
use crate::beads::fields::{AgentFields, AttachmentFields};
use crate::beads::{
    AgentState, Bead, BeadKind, BeadPatch, Beads, CreateBead, ExecutionTarget, MergeStrategy,
};
use crate::errors::GtError;
use crate::identity::{parse_path, AgentIdentity, Role};
use crate::mail::MailRouter;
use crate::polecats;
use crate::rolectx::RoleContext;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Default)]
pub struct SlingRequest {
    /// Role path, rig name, or bare polecat/crew name.
    pub target: String,
    /// Hook bead ID. Optional when `formula` names the work instead.
    pub hook: Option<String>,
    pub formula: Option<String>,
    pub args: Option<String>,
    /// Credentials account the spawned session should use.
    pub account: Option<String>,
    /// Override for the agent command started in a fresh session.
    pub agent_override: Option<String>,
    pub execution_target: Option<ExecutionTarget>,
    pub merge_strategy: Option<MergeStrategy>,
    pub no_merge: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlingOutcome {
    pub agent_bead: String,
    pub session: String,
    pub hook: String,
    pub target: ExecutionTarget,
    pub spawned: bool,
    pub nudged: bool,
    /// The nudge went to the agent's mailbox instead of its session.
    pub mailed: bool,
    pub warnings: Vec<String>,
}

pub struct Dispatcher<'a> {
    pub ws: &'a Workspace,
    pub store: &'a dyn Beads,
    pub mail: &'a MailRouter,
    pub ctx: &'a RoleContext,
    pub backends: &'a [Box<dyn Backend>],
}

/// What a target string resolved to.
enum ResolvedTarget {
    Agent(AgentIdentity),
    /// A rig name: allocate a fresh polecat from the rig's pool.
    FreshPolecat { rig: String },
}

impl<'a> Dispatcher<'a> {
    pub async fn sling(&self, req: &SlingRequest) -> Result<SlingOutcome, GtError> {
        let mut warnings = Vec::new();

        // Work first: a bad hook must reject before any agent mutation.
        let hook = self.resolve_hook(req).await?;

        let identity = match self.resolve_target(&req.target)? {
            ResolvedTarget::Agent(identity) => identity,
            ResolvedTarget::FreshPolecat { rig } => {
                let name = polecats::allocate_name(&self.ws.root, &rig)?;
                AgentIdentity::polecat(rig, name)
            }
        };
        let target = self.execution_target(&identity, req);
        let agent_bead = identity.bead_id(|rig| self.ws.rig_prefix(rig));
        let session = identity.session_name();
        let backend = self.backend(target);

        if let Some(account) = &req.account {
            if !self.account_known(account) {
                warnings.push(format!("account '{account}' is not in mayor/accounts.json"));
            }
        }

        // Spawn decision: does the agent need to come up?
        let existing = self.store.show(&agent_bead, false).await?;
        let running = match backend {
            Some(backend) => match backend.has_session(&session).await {
                Ok(running) => running,
                Err(e) => {
                    warnings.push(format!("liveness check failed, assuming down: {e}"));
                    false
                }
            },
            None => false,
        };
        let needs_spawn = identity.role == Role::Polecat
            && (!existing.as_ref().map(Bead::is_open).unwrap_or(false) || !running);

        let mut spawned = false;
        if needs_spawn && target == ExecutionTarget::Local {
            let rig = identity.rig.as_deref().unwrap_or_default();
            let name = identity.name.as_deref().unwrap_or_default();
            polecats::claim_name(&self.ws.root, rig, name)?;
            polecats::ensure_worktree(&self.ws.root, rig, name)?;
        }

        // Hook attachment, step 1: create-or-reopen with the hook in the
        // create call itself.
        self.create_or_reopen_agent(&identity, &agent_bead, existing, &hook.id, target)
            .await?;

        // Step 2–3: read back; on a lost race, one retry through the slot
        // API on whichever database owns the agent bead.
        let readback = self.store.show(&agent_bead, false).await?;
        let slotted = readback
            .as_ref()
            .and_then(|b| AgentFields::parse(&b.description))
            .and_then(|f| f.hook_bead)
            .map(|h| h == hook.id)
            .unwrap_or(false);
        if !slotted {
            if let Err(e) = self.store.set_hook_bead(&agent_bead, Some(&hook.id)).await {
                // Assignee-based attachment below still records the work.
                warnings.push(format!("hook slot write failed ({e}); relying on assignee"));
            }
        }

        // Step 4: annotate the hook bead with the attachment record and
        // assign it to the agent.
        self.annotate_hook(&hook, &agent_bead, req).await?;

        // Bring up the session / let the controller see the spawning bead.
        if needs_spawn {
            match target {
                ExecutionTarget::Local => {
                    let backend = backend.ok_or_else(|| {
                        GtError::Backend("no local backend available".into())
                    })?;
                    backend.start_session(&session, &self.start_opts(&identity, req)).await?;
                    spawned = true;
                }
                ExecutionTarget::K8s => {
                    // The controller watches for spawning beads with the
                    // k8s label and creates the pod; dispatch does not wait.
                    spawned = true;
                }
            }
        }

        // Nudge delivery.
        let nudge = nudge_text(&hook.id, &hook.title, req.args.as_deref());
        let (nudged, mailed) = self.deliver_nudge(&identity, &session, target, &nudge).await?;

        // Best-effort witness wakeup so monitoring starts with the work.
        // The refinery wakes later, when a merge request actually exists.
        if identity.role != Role::Witness {
            if let Some(rig) = identity.rig.as_deref() {
                self.wake_witness(rig, &session).await;
            }
        }

        Ok(SlingOutcome {
            agent_bead,
            session,
            hook: hook.id,
            target,
            spawned,
            nudged,
            mailed,
            warnings,
        })
    }

    /// Resolve the work input: an existing hook bead, or a formula to
    /// instantiate around one.
    async fn resolve_hook(&self, req: &SlingRequest) -> Result<Bead, GtError> {
        let base = match (&req.hook, &req.formula) {
            (Some(hook), _) => self
                .store
                .show(hook, false)
                .await?
                .ok_or_else(|| GtError::BeadNotFound(hook.clone()))?,
            (None, Some(formula)) => {
                let id = self
                    .store
                    .create(CreateBead {
                        kind: Some(BeadKind::Task),
                        title: format!("run: {formula}"),
                        description: String::new(),
                        prefix_hint: Some(self.ws.config.default_prefix.clone()),
                        ..Default::default()
                    })
                    .await?;
                self.store
                    .show(&id, false)
                    .await?
                    .ok_or_else(|| GtError::BeadNotFound(id))?
            }
            (None, None) => {
                return Err(GtError::Usage("sling needs a hook bead or --formula".into()))
            }
        };
        if !base.kind.is_workable() {
            return Err(GtError::Usage(format!(
                "{} is a {} bead and cannot be slung as work",
                base.id, base.kind
            )));
        }
        // An agent's hook slot must point at open work.
        if !base.is_open() && !req.force {
            return Err(GtError::Conflict(format!(
                "{} is closed; use --force to re-sling it",
                base.id
            )));
        }

        // Formula instantiation: cook, wisp with the base bead's facts,
        // bond the wisp root onto the base. The agent's hook stays the
        // BASE bead; the wisp travels in attached_molecule.
        if let Some(formula) = &req.formula {
            self.store.cook(formula).await?;
            let vars = vec![
                ("feature".to_string(), base.title.clone()),
                ("issue".to_string(), base.id.clone()),
            ];
            let wisp_root = self.store.wisp(formula, &vars).await?;
            self.store.bond(&wisp_root, &base.id).await?;

            let mut attachment = AttachmentFields::parse(&base.description);
            attachment.attached_molecule = Some(wisp_root);
            self.store
                .update(
                    &base.id,
                    BeadPatch {
                        description: Some(attachment.apply(&base.description)),
                        ..Default::default()
                    },
                )
                .await?;
            // Re-read so later annotation starts from the bonded state.
            return self
                .store
                .show(&base.id, false)
                .await?
                .ok_or_else(|| GtError::BeadNotFound(base.id.clone()));
        }
        Ok(base)
    }

    fn resolve_target(&self, target: &str) -> Result<ResolvedTarget, GtError> {
        if target.is_empty() {
            return Err(GtError::Usage("empty sling target".into()));
        }
        if target.contains('/') {
            return parse_path(target)
                .map(ResolvedTarget::Agent)
                .ok_or_else(|| GtError::Usage(format!("unknown target path: {target}")));
        }
        // Role shortcuts.
        match target {
            "mayor" => return Ok(ResolvedTarget::Agent(AgentIdentity::mayor())),
            "deacon" => return Ok(ResolvedTarget::Agent(AgentIdentity::deacon())),
            "witness" | "refinery" => {
                let rig = self.ctx.rig().ok_or_else(|| {
                    GtError::Usage(format!("bare '{target}' needs a rig context"))
                })?;
                let identity = if target == "witness" {
                    AgentIdentity::witness(rig)
                } else {
                    AgentIdentity::refinery(rig)
                };
                return Ok(ResolvedTarget::Agent(identity));
            }
            _ => {}
        }
        // A rig name expands to "fresh polecat in this rig".
        if self.ws.rigs()?.iter().any(|r| r == target) {
            return Ok(ResolvedTarget::FreshPolecat { rig: target.to_string() });
        }
        // A crew member of the current rig, if one exists on disk.
        if let Some(rig) = self.ctx.rig() {
            if crate::dirs::crew_dir(&self.ws.root, rig, target).is_dir() {
                return Ok(ResolvedTarget::Agent(AgentIdentity::crew(rig, target)));
            }
            return Ok(ResolvedTarget::Agent(AgentIdentity::polecat(rig, target)));
        }
        Err(GtError::Usage(format!(
            "cannot resolve target '{target}' outside a rig (try <rig>/polecats/{target})"
        )))
    }

    fn execution_target(&self, identity: &AgentIdentity, req: &SlingRequest) -> ExecutionTarget {
        if let Some(target) = req.execution_target {
            return target;
        }
        identity
            .rig
            .as_deref()
            .and_then(|rig| self.ws.rig_entry(rig))
            .and_then(|entry| entry.execution_target.as_deref())
            .and_then(ExecutionTarget::parse)
            .unwrap_or_default()
    }

    fn backend(&self, target: ExecutionTarget) -> Option<&dyn Backend> {
        self.backends.iter().find(|b| b.target() == target).map(|b| b.as_ref())
    }

    fn account_known(&self, account: &str) -> bool {
        let path = crate::dirs::mayor_dir(&self.ws.root).join("accounts.json");
        match crate::manifest::load_json::<crate::manifest::AccountsRecord>(&path) {
            Ok(Some(record)) => record.accounts.contains_key(account),
            // No accounts file yet: nothing to validate against.
            Ok(None) => true,
            Err(_) => false,
        }
    }

    async fn create_or_reopen_agent(
        &self,
        identity: &AgentIdentity,
        agent_bead: &str,
        existing: Option<Bead>,
        hook: &str,
        target: ExecutionTarget,
    ) -> Result<(), GtError> {
        let rig = identity.rig.clone().unwrap_or_default();
        match existing {
            None => {
                let mut fields = AgentFields::new(identity.role, rig);
                fields.agent_state = AgentState::Spawning;
                fields.hook_bead = Some(hook.to_string());
                fields.execution_target = target;
                let mut labels = vec![format!("role:{}", identity.role)];
                if target == ExecutionTarget::K8s {
                    labels.push(target.label());
                }
                self.store
                    .create(CreateBead {
                        kind: Some(BeadKind::Agent),
                        id: Some(agent_bead.to_string()),
                        title: identity.path(),
                        description: fields.apply(""),
                        labels,
                        prefix_hint: None,
                    })
                    .await?;
            }
            Some(bead) => {
                // Reopen is idempotent: clear closed status, refresh fields,
                // keep whatever prose the bead carries.
                let mut fields = AgentFields::parse(&bead.description)
                    .unwrap_or_else(|| AgentFields::new(identity.role, rig));
                fields.agent_state = AgentState::Spawning;
                fields.hook_bead = Some(hook.to_string());
                fields.execution_target = target;
                let mut labels = bead.labels.clone();
                if target == ExecutionTarget::K8s && !labels.contains(&target.label()) {
                    labels.push(target.label());
                }
                self.store
                    .reopen(
                        agent_bead,
                        BeadPatch {
                            description: Some(fields.apply(&bead.description)),
                            labels: Some(labels),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn annotate_hook(
        &self,
        hook: &Bead,
        agent_bead: &str,
        req: &SlingRequest,
    ) -> Result<(), GtError> {
        let mut attachment = AttachmentFields::parse(&hook.description);
        attachment.attached_args = req.args.clone();
        attachment.dispatched_by = Some(self.ctx.actor());
        attachment.merge_strategy = req.merge_strategy;
        attachment.no_merge = req.no_merge;
        self.store
            .update(
                &hook.id,
                BeadPatch {
                    description: Some(attachment.apply(&hook.description)),
                    assignee: Some(Some(agent_bead.to_string())),
                    ..Default::default()
                },
            )
            .await
    }

    fn start_opts(&self, identity: &AgentIdentity, req: &SlingRequest) -> StartOpts {
        let mut env = vec![
            ("GT_ROLE".to_string(), identity.path()),
            ("BD_ACTOR".to_string(), identity.path()),
            ("GT_SESSION".to_string(), identity.session_name()),
        ];
        if let Some(rig) = &identity.rig {
            env.push(("GT_RIG".to_string(), rig.clone()));
        }
        if let Some(account) = &req.account {
            env.push(("GT_ACCOUNT".to_string(), account.clone()));
        }
        let work_dir = match (&identity.rig, &identity.name) {
            (Some(rig), Some(name)) if identity.role == Role::Polecat => {
                Some(crate::dirs::polecat_dir(&self.ws.root, rig, name))
            }
            _ => None,
        };
        StartOpts { work_dir, env, command: req.agent_override.clone() }
    }

    async fn deliver_nudge(
        &self,
        identity: &AgentIdentity,
        session: &str,
        target: ExecutionTarget,
        nudge: &str,
    ) -> Result<(bool, bool), GtError> {
        match target {
            ExecutionTarget::Local => {
                let backend = self
                    .backend(target)
                    .ok_or_else(|| GtError::Backend("no local backend available".into()))?;
                backend.nudge_session(session, nudge).await?;
                Ok((true, false))
            }
            ExecutionTarget::K8s => {
                let delivered = match self.backend(target) {
                    Some(backend) => backend.nudge_session(session, nudge).await,
                    None => Err(GtError::SessionNotFound(session.to_string())),
                };
                match delivered {
                    Ok(()) => Ok((true, false)),
                    Err(e) if e.is_not_found() || e.is_transient() => {
                        // The pod is not up yet; the SessionStart hook will
                        // drain the mailbox when the agent comes alive.
                        self.mail.send(identity, &self.ctx.actor(), "Work slung", nudge)?;
                        Ok((false, true))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn wake_witness(&self, rig: &str, about: &str) {
        let witness = AgentIdentity::witness(rig).session_name();
        for backend in self.backends {
            let nudged = backend
                .nudge_session(&witness, &format!("Dispatch in {rig}: watch {about}."))
                .await;
            if nudged.is_ok() {
                return;
            }
        }
    }
}

/// The nudge an agent receives when work lands on its hook.
pub fn nudge_text(hook: &str, title: &str, args: Option<&str>) -> String {
    let mut text = format!(
        "Work slung: `{hook}` ({title}). Start working on it now — run `gt hook` to see the hook, then begin."
    );
    if let Some(args) = args {
        text.push_str(&format!(" Args: {args}"));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beads::memory::MemoryBeads;
    use crate::beads::BeadStatus;
    use crate::workspace::scaffold_town;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::Path;

    /// Backend that records starts and nudges, optionally refusing nudges.
    struct RecordingBackend {
        target: ExecutionTarget,
        running: Mutex<Vec<String>>,
        starts: Mutex<Vec<String>>,
        nudges: Mutex<Vec<(String, String)>>,
        refuse_nudge: bool,
    }

    impl RecordingBackend {
        fn new(target: ExecutionTarget) -> Self {
            RecordingBackend {
                target,
                running: Mutex::new(vec![]),
                starts: Mutex::new(vec![]),
                nudges: Mutex::new(vec![]),
                refuse_nudge: false,
            }
        }
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        fn target(&self) -> ExecutionTarget {
            self.target
        }
        async fn has_session(&self, key: &str) -> Result<bool, GtError> {
            Ok(self.running.lock().iter().any(|s| s == key))
        }
        async fn start_session(&self, key: &str, _opts: &StartOpts) -> Result<(), GtError> {
            self.starts.lock().push(key.to_string());
            self.running.lock().push(key.to_string());
            Ok(())
        }
        async fn nudge_session(&self, key: &str, text: &str) -> Result<(), GtError> {
            if self.refuse_nudge {
                return Err(GtError::SessionNotFound(key.to_string()));
            }
            self.nudges.lock().push((key.to_string(), text.to_string()));
            Ok(())
        }
        async fn stop_session(&self, _key: &str, _force: bool) -> Result<(), GtError> {
            Ok(())
        }
        async fn switch_session(
            &self,
            _key: &str,
            _env: &[(String, String)],
        ) -> Result<(), GtError> {
            Ok(())
        }
        async fn attach_session(&self, _key: &str) -> Result<(), GtError> {
            Ok(())
        }
        async fn list_sessions(&self) -> Result<Vec<String>, GtError> {
            Ok(self.running.lock().clone())
        }
    }

    struct Rig {
        _dir: tempfile::TempDir,
        ws: Workspace,
        store: MemoryBeads,
        mail_root: std::path::PathBuf,
    }

    fn town() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        scaffold_town(dir.path(), "wasteland");
        std::fs::create_dir_all(dir.path().join("gastown/.beads")).unwrap();
        std::fs::create_dir_all(dir.path().join("gastown/crew/dan")).unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let store = MemoryBeads::new();
        let mail_root = dir.path().to_path_buf();
        Rig { _dir: dir, ws, store, mail_root }
    }

    fn hook_bead(id: &str, title: &str) -> Bead {
        Bead {
            id: id.into(),
            kind: BeadKind::Task,
            title: title.into(),
            description: String::new(),
            status: BeadStatus::Open,
            labels: vec![],
            assignee: None,
        }
    }

    fn ctx() -> RoleContext {
        RoleContext { identity: Some(AgentIdentity::mayor()), home: "/".into() }
    }

    #[tokio::test]
    async fn sling_spawns_fresh_polecat_with_hook_attached() {
        // A never-seen polecat gets an agent bead with the hook slotted
        // in the same write.
        let rig = town();
        rig.store.insert(hook_bead("gt-abc", "Fix the flare"));
        let mail = MailRouter::new(&rig.mail_root);
        let ctx = ctx();
        let backends: Vec<Box<dyn Backend>> =
            vec![Box::new(RecordingBackend::new(ExecutionTarget::Local))];
        let dispatcher = Dispatcher {
            ws: &rig.ws,
            store: &rig.store,
            mail: &mail,
            ctx: &ctx,
            backends: &backends,
        };

        let outcome = dispatcher
            .sling(&SlingRequest {
                target: "gastown/polecats/Toast".into(),
                hook: Some("gt-abc".into()),
                // No git repo under gastown in this fixture, so run the
                // k8s spawn path which skips the worktree.
                execution_target: Some(ExecutionTarget::K8s),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(outcome.agent_bead, "gt-gastown-polecat-Toast");
        assert_eq!(outcome.session, "gt-gastown-Toast");
        assert!(outcome.spawned);

        let agent = rig.store.get("gt-gastown-polecat-Toast").unwrap();
        assert!(agent.is_open());
        assert!(agent.has_label("execution_target:k8s"));
        let fields = AgentFields::parse(&agent.description).unwrap();
        assert_eq!(fields.role_type, Role::Polecat);
        assert_eq!(fields.rig, "gastown");
        assert_eq!(fields.agent_state, AgentState::Spawning);
        assert_eq!(fields.hook_bead.as_deref(), Some("gt-abc"));
        assert_eq!(fields.execution_target, ExecutionTarget::K8s);

        let hook = rig.store.get("gt-abc").unwrap();
        let attachment = AttachmentFields::parse(&hook.description);
        assert_eq!(attachment.dispatched_by.as_deref(), Some("mayor"));
        assert_eq!(hook.assignee.as_deref(), Some("gt-gastown-polecat-Toast"));
    }

    #[tokio::test]
    async fn sling_is_idempotent_on_redispatch() {
        // Re-dispatching the same (target, hook) pair changes nothing.
        let rig = town();
        rig.store.insert(hook_bead("gt-abc", "Fix the flare"));
        let mail = MailRouter::new(&rig.mail_root);
        let ctx = ctx();
        let local = RecordingBackend::new(ExecutionTarget::Local);
        local.running.lock().push("gt-gastown-Toast".into());
        let backends: Vec<Box<dyn Backend>> = vec![Box::new(local)];
        let dispatcher = Dispatcher {
            ws: &rig.ws,
            store: &rig.store,
            mail: &mail,
            ctx: &ctx,
            backends: &backends,
        };
        // Seed the agent as already existing and running with the hook.
        let req = SlingRequest {
            target: "gastown/polecats/Toast".into(),
            hook: Some("gt-abc".into()),
            ..Default::default()
        };
        let before = {
            let mut fields = AgentFields::new(Role::Polecat, "gastown");
            fields.hook_bead = Some("gt-abc".into());
            rig.store.insert(Bead {
                id: "gt-gastown-polecat-Toast".into(),
                kind: BeadKind::Agent,
                title: "gastown/polecats/Toast".into(),
                description: fields.apply(""),
                status: BeadStatus::Open,
                labels: vec![],
                assignee: None,
            });
            rig.store.len()
        };

        let outcome = dispatcher.sling(&req).await.unwrap();
        assert!(!outcome.spawned);
        assert!(outcome.nudged);
        // No duplicate bead, hook still slotted, no session started.
        assert_eq!(rig.store.len(), before);
        let agent = rig.store.get("gt-gastown-polecat-Toast").unwrap();
        let fields = AgentFields::parse(&agent.description).unwrap();
        assert_eq!(fields.hook_bead.as_deref(), Some("gt-abc"));
        let local = backends[0].as_ref();
        assert!(local.list_sessions().await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn k8s_nudge_falls_back_to_mailbox() {
        // Agent bead exists but its pod is not up: the nudge lands in
        // the mailbox and the slot is still written.
        let rig = town();
        rig.store.insert(hook_bead("gt-abc", "Remote work"));
        let mail = MailRouter::new(&rig.mail_root);
        let ctx = ctx();
        let mut k8s = RecordingBackend::new(ExecutionTarget::K8s);
        k8s.refuse_nudge = true;
        let backends: Vec<Box<dyn Backend>> = vec![Box::new(k8s)];
        let dispatcher = Dispatcher {
            ws: &rig.ws,
            store: &rig.store,
            mail: &mail,
            ctx: &ctx,
            backends: &backends,
        };

        let identity = AgentIdentity::polecat("gastown", "Remote");
        let before = mail.count(&identity).unwrap();
        let outcome = dispatcher
            .sling(&SlingRequest {
                target: "gastown/polecats/Remote".into(),
                hook: Some("gt-abc".into()),
                execution_target: Some(ExecutionTarget::K8s),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(outcome.mailed);
        assert!(!outcome.nudged);
        assert_eq!(mail.count(&identity).unwrap(), before + 1);
        // The hook slot is still set.
        let agent = rig.store.get("gt-gastown-polecat-Remote").unwrap();
        let fields = AgentFields::parse(&agent.description).unwrap();
        assert_eq!(fields.hook_bead.as_deref(), Some("gt-abc"));
    }

    #[tokio::test]
    async fn unknown_target_and_missing_hook_reject() {
        let rig = town();
        let mail = MailRouter::new(&rig.mail_root);
        let ctx = ctx();
        let backends: Vec<Box<dyn Backend>> =
            vec![Box::new(RecordingBackend::new(ExecutionTarget::Local))];
        let dispatcher = Dispatcher {
            ws: &rig.ws,
            store: &rig.store,
            mail: &mail,
            ctx: &ctx,
            backends: &backends,
        };

        rig.store.insert(hook_bead("gt-abc", "work"));
        let err = dispatcher
            .sling(&SlingRequest {
                target: "gastown/flamethrowers/Toast".into(),
                hook: Some("gt-abc".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GtError::Usage(_)));

        let err = dispatcher
            .sling(&SlingRequest {
                target: "gastown/polecats/Toast".into(),
                hook: Some("gt-missing".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GtError::BeadNotFound(_)));
        // Rejection happened before any agent bead was written.
        assert!(rig.store.get("gt-gastown-polecat-Toast").is_none());
    }

    #[tokio::test]
    async fn agent_beads_cannot_be_hooks() {
        let rig = town();
        let mail = MailRouter::new(&rig.mail_root);
        let ctx = ctx();
        let backends: Vec<Box<dyn Backend>> =
            vec![Box::new(RecordingBackend::new(ExecutionTarget::Local))];
        let dispatcher = Dispatcher {
            ws: &rig.ws,
            store: &rig.store,
            mail: &mail,
            ctx: &ctx,
            backends: &backends,
        };
        rig.store.insert(Bead {
            id: "gt-gastown-witness".into(),
            kind: BeadKind::Agent,
            title: "w".into(),
            description: String::new(),
            status: BeadStatus::Open,
            labels: vec![],
            assignee: None,
        });
        let err = dispatcher
            .sling(&SlingRequest {
                target: "gastown/polecats/Toast".into(),
                hook: Some("gt-gastown-witness".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GtError::Usage(_)));
    }

    #[tokio::test]
    async fn formula_bonds_wisp_but_hooks_base_bead() {
        let rig = town();
        rig.store.insert(hook_bead("gt-base", "New feature"));
        let mail = MailRouter::new(&rig.mail_root);
        let ctx = ctx();
        let backends: Vec<Box<dyn Backend>> =
            vec![Box::new(RecordingBackend::new(ExecutionTarget::Local))];
        let dispatcher = Dispatcher {
            ws: &rig.ws,
            store: &rig.store,
            mail: &mail,
            ctx: &ctx,
            backends: &backends,
        };

        let outcome = dispatcher
            .sling(&SlingRequest {
                target: "gastown/polecats/Toast".into(),
                hook: Some("gt-base".into()),
                formula: Some("mol-polecat-work".into()),
                execution_target: Some(ExecutionTarget::K8s),
                ..Default::default()
            })
            .await
            .unwrap();

        // The hook is the base bead, not the wisp root.
        assert_eq!(outcome.hook, "gt-base");
        let agent = rig.store.get(&outcome.agent_bead).unwrap();
        let fields = AgentFields::parse(&agent.description).unwrap();
        assert_eq!(fields.hook_bead.as_deref(), Some("gt-base"));

        // The wisp is attached as the molecule and bonded to the base.
        let base = rig.store.get("gt-base").unwrap();
        let attachment = AttachmentFields::parse(&base.description);
        let molecule = attachment.attached_molecule.expect("molecule attached");
        let wisp = rig.store.get(&molecule).expect("wisp root exists");
        assert!(wisp.has_label("bonded:gt-base"));
    }

    #[tokio::test]
    async fn rig_name_target_draws_from_pool() {
        let rig = town();
        rig.store.insert(hook_bead("gt-abc", "work"));
        let mail = MailRouter::new(&rig.mail_root);
        let ctx = ctx();
        let backends: Vec<Box<dyn Backend>> =
            vec![Box::new(RecordingBackend::new(ExecutionTarget::Local))];
        let dispatcher = Dispatcher {
            ws: &rig.ws,
            store: &rig.store,
            mail: &mail,
            ctx: &ctx,
            backends: &backends,
        };

        let outcome = dispatcher
            .sling(&SlingRequest {
                target: "gastown".into(),
                hook: Some("gt-abc".into()),
                execution_target: Some(ExecutionTarget::K8s),
                ..Default::default()
            })
            .await
            .unwrap();
        // First pool name.
        assert_eq!(outcome.agent_bead, "gt-gastown-polecat-nux");
    }

    #[test]
    fn nudge_text_shape() {
        let text = nudge_text("gt-abc", "Fix it", None);
        assert!(text.starts_with("Work slung: `gt-abc` (Fix it)."));
        assert!(text.contains("run `gt hook`"));
        assert!(!text.contains("Args:"));
        let with_args = nudge_text("gt-abc", "Fix it", Some("--fast"));
        assert!(with_args.ends_with("Args: --fast"));
    }
}
