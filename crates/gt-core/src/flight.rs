//! Preflight and postflight: the workspace invariants checked before a
//! batch run and the cleanups performed after one.

use std::path::Path;

use futures_util::future::join_all;
use serde::Serialize;

use crate::backend::Backend;
use crate::beads::{bd, AgentState, Beads};
use crate::errors::GtError;
use crate::identity::Role;
use crate::mail::MailRouter;
use crate::polecats;
use crate::registry::{self, DiscoverOpts};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Info,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

/// Structured flight report. `ok` mirrors `errors.is_empty()`.
#[derive(Debug, Default, Serialize)]
pub struct FlightReport {
    pub ok: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub checks: Vec<CheckResult>,
    /// Cleanup actions taken (postflight) or that a real run would take.
    pub cleaned: Vec<String>,
}

impl FlightReport {
    fn pass(&mut self, name: &str, detail: impl Into<String>) {
        self.checks.push(CheckResult {
            name: name.into(),
            status: CheckStatus::Pass,
            detail: detail.into(),
        });
    }

    fn info(&mut self, name: &str, detail: impl Into<String>) {
        self.checks.push(CheckResult {
            name: name.into(),
            status: CheckStatus::Info,
            detail: detail.into(),
        });
    }

    fn warn(&mut self, name: &str, detail: impl Into<String>) {
        let detail = detail.into();
        self.warnings.push(detail.clone());
        self.checks.push(CheckResult { name: name.into(), status: CheckStatus::Warn, detail });
    }

    fn fail(&mut self, name: &str, detail: impl Into<String>) {
        let detail = detail.into();
        self.errors.push(detail.clone());
        self.checks.push(CheckResult { name: name.into(), status: CheckStatus::Fail, detail });
    }

    fn finish(mut self) -> FlightReport {
        self.ok = self.errors.is_empty();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlightOpts {
    /// Restrict rig-scoped checks and cleanups to one rig.
    pub rig: Option<String>,
    /// Report without cleaning.
    pub dry_run: bool,
    /// Postflight: archive already-read mail.
    pub archive_mail: bool,
}

/// One row of the process table.
#[derive(Debug, Clone)]
pub struct ProcessEntry {
    pub pid: i32,
    pub ppid: i32,
    pub command: String,
}

/// A snapshot of the process table, injectable so checks stay
/// deterministic under test.
#[derive(Debug, Default)]
pub struct ProcessTable(pub Vec<ProcessEntry>);

impl ProcessTable {
    pub async fn read() -> Result<ProcessTable, GtError> {
        let output = tokio::process::Command::new("ps")
            .args(["axo", "pid=,ppid=,args="])
            .output()
            .await?;
        if !output.status.success() {
            return Err(GtError::Transient("ps failed".into()));
        }
        let mut entries = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let mut parts = line.trim().splitn(3, char::is_whitespace);
            let (Some(pid), Some(ppid), Some(command)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let (Ok(pid), Ok(ppid)) = (pid.parse(), ppid.trim().parse()) else { continue };
            entries.push(ProcessEntry { pid, ppid, command: command.trim().to_string() });
        }
        Ok(ProcessTable(entries))
    }

    /// Orphaned agent processes. An agent normally lives under a tmux
    /// server; one reparented to init has lost its session.
    pub fn orphans(&self) -> Vec<&ProcessEntry> {
        self.0
            .iter()
            .filter(|p| p.ppid == 1 && p.command.contains("claude") && p.command.contains("gt-"))
            .collect()
    }
}

/// Everything a flight needs. Built once by the CLI, fakes injected by
/// tests.
pub struct Flight<'a> {
    pub ws: &'a Workspace,
    pub store: &'a dyn Beads,
    pub mail: &'a MailRouter,
    pub backends: &'a [Box<dyn Backend>],
    pub procs: ProcessTable,
}

impl<'a> Flight<'a> {
    /// Assert workspace invariants before a batch run.
    pub async fn preflight(&self, opts: &FlightOpts) -> FlightReport {
        let mut report = FlightReport::default();

        // 1. Town git tree on main/master and clean.
        git_tree_checks(&self.ws.root, &mut report);

        // 2. Unread mail above threshold is informational.
        self.mail_checks(&mut report);

        // 3. Agent states and missing sessions.
        let discovery = registry::discover_all(
            self.store,
            self.backends,
            DiscoverOpts { check_liveness: true },
        )
        .await;
        for err in &discovery.errors {
            report.info("discovery", err.clone());
        }
        for agent in &discovery.agents {
            if agent.state == Some(AgentState::Stuck) {
                report.warn("agents", format!("{} is stuck", agent.session));
            }
            // Supervisory agents are expected to be up whenever declared;
            // polecats come and go, crew and dogs run on their own terms.
            let supervisory = matches!(
                agent.identity.as_ref().map(|i| i.role),
                Some(Role::Witness | Role::Refinery | Role::Mayor | Role::Deacon)
            );
            if agent.bead_id.is_some() && supervisory && agent.alive == Some(false) {
                report.warn("agents", format!("{} has no running session", agent.session));
            }
        }

        // 4. Orphaned agent processes.
        let orphans = self.procs.orphans();
        for orphan in &orphans {
            report.warn(
                "orphans",
                format!("orphan agent process {} ({})", orphan.pid, orphan.command),
            );
        }
        if !opts.dry_run {
            for orphan in &orphans {
                clean_process(orphan.pid, &mut report);
            }
        }

        // 5. Per-rig completeness, one worker per rig.
        let rigs = self.selected_rigs(opts, &mut report);
        let completeness = join_all(rigs.iter().map(|rig| {
            let discovery = &discovery;
            async move {
                let mut problems = Vec::new();
                let has = |role: Role| {
                    discovery.agents.iter().any(|a| {
                        a.bead_id.is_some()
                            && a.rig() == Some(rig.as_str())
                            && a.identity.as_ref().map(|i| i.role) == Some(role)
                    })
                };
                if !has(Role::Witness) {
                    problems.push(format!("rig {rig} has no witness"));
                }
                if !has(Role::Refinery) {
                    problems.push(format!("rig {rig} has no refinery"));
                }
                match polecats::names_in_use(&self.ws.root, rig) {
                    Ok(names) if names.is_empty() => {
                        problems.push(format!("rig {rig} has no polecats allocated"));
                    }
                    Ok(_) => {}
                    Err(e) => problems.push(format!("rig {rig}: {e}")),
                }
                problems
            }
        }))
        .await;
        for problem in completeness.into_iter().flatten() {
            report.warn("rigs", problem);
        }

        // 6. Export so the on-disk replica is current.
        match self.store.export().await {
            Ok(()) => report.pass("export", "beads replica exported"),
            Err(e) => report.fail("export", format!("beads export failed: {e}")),
        }
        if let Some(Err(e)) = bd::daemon_health().await {
            report.info("daemon", format!("bd daemon probe: {e}"));
        }

        report.finish()
    }

    /// Clean up after a batch run.
    pub async fn postflight(&self, opts: &FlightOpts) -> FlightReport {
        let mut report = FlightReport::default();

        // 1. Optionally archive read mail.
        if opts.archive_mail {
            match self.mail.addresses() {
                Ok(addresses) => {
                    for addr in addresses {
                        if opts.dry_run {
                            continue;
                        }
                        match self.mail.archive_read(&addr) {
                            Ok(0) => {}
                            Ok(n) => report
                                .cleaned
                                .push(format!("archived {n} read message(s) for {addr}")),
                            Err(e) => report.warn("mail", format!("{addr}: {e}")),
                        }
                    }
                }
                Err(e) => report.warn("mail", format!("mailbox walk failed: {e}")),
            }
        }

        // 2. Delete merged integration branches, one worker per rig.
        let rigs = self.selected_rigs(opts, &mut report);
        let sweeps = join_all(rigs.iter().map(|rig| {
            let rig_root = crate::dirs::rig_dir(&self.ws.root, rig);
            let dry_run = opts.dry_run;
            async move { (rig.clone(), cleanup_merged_branches(&rig_root, dry_run)) }
        }))
        .await;
        for (rig, swept) in sweeps {
            match swept {
                Ok(branches) => {
                    for branch in branches {
                        let verb = if opts.dry_run { "would delete" } else { "deleted" };
                        report.cleaned.push(format!("{verb} {rig}:{branch}"));
                    }
                }
                Err(e) => report.warn("branches", format!("{rig}: {e}")),
            }
        }

        // 3. Orphan processes.
        let orphans = self.procs.orphans();
        for orphan in &orphans {
            if opts.dry_run {
                report.cleaned.push(format!("would kill orphan {}", orphan.pid));
            } else {
                clean_process(orphan.pid, &mut report);
            }
        }

        // 4. Export.
        match self.store.export().await {
            Ok(()) => report.pass("export", "beads replica exported"),
            Err(e) => report.fail("export", format!("beads export failed: {e}")),
        }

        report.finish()
    }

    fn selected_rigs(&self, opts: &FlightOpts, report: &mut FlightReport) -> Vec<String> {
        match (&opts.rig, self.ws.rigs()) {
            (Some(rig), _) => vec![rig.clone()],
            (None, Ok(rigs)) => rigs,
            (None, Err(e)) => {
                report.warn("rigs", format!("rig enumeration failed: {e}"));
                Vec::new()
            }
        }
    }

    fn mail_checks(&self, report: &mut FlightReport) {
        let threshold = self.ws.config.mail_threshold;
        match self.mail.addresses() {
            Ok(addresses) => {
                for addr in addresses {
                    match self.mail.count(&addr) {
                        Ok(count) if count > threshold => {
                            report.info(
                                "mail",
                                format!("{addr} has {count} unread messages (threshold {threshold})"),
                            );
                        }
                        Ok(_) => {}
                        Err(e) => report.warn("mail", format!("{addr}: {e}")),
                    }
                }
            }
            Err(e) => report.warn("mail", format!("mailbox walk failed: {e}")),
        }
    }
}

fn git_tree_checks(root: &Path, report: &mut FlightReport) {
    let repo = match git2::Repository::open(root) {
        Ok(repo) => repo,
        Err(_) => {
            report.info("git", "town is not a git repository");
            return;
        }
    };
    match repo.head() {
        Ok(head) => {
            let branch = head.shorthand().unwrap_or("(detached)").to_string();
            if branch == "main" || branch == "master" {
                report.pass("git", format!("on branch {branch}"));
            } else {
                report.warn("git", format!("town is on branch '{branch}', not main/master"));
            }
        }
        Err(e) => report.warn("git", format!("cannot read HEAD: {e}")),
    }
    let mut status_opts = git2::StatusOptions::new();
    status_opts.include_untracked(true);
    match repo.statuses(Some(&mut status_opts)) {
        Ok(statuses) if statuses.is_empty() => report.pass("git", "tree is clean"),
        Ok(statuses) => {
            report.warn("git", format!("town git tree is dirty ({} changed files)", statuses.len()));
        }
        Err(e) => report.warn("git", format!("cannot read status: {e}")),
    };
}

fn clean_process(pid: i32, report: &mut FlightReport) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => report.cleaned.push(format!("killed orphan {pid}")),
        Err(e) => report.warn("orphans", format!("failed to kill {pid}: {e}")),
    }
}

/// Integration branches are disposable once merged: branch names beginning
/// with these prefixes get swept.
const SWEEP_PREFIXES: &[&str] = &["beads-sync", "gt-", "polecat-"];

fn cleanup_merged_branches(rig_root: &Path, dry_run: bool) -> Result<Vec<String>, GtError> {
    let repo = match git2::Repository::open(rig_root) {
        Ok(repo) => repo,
        // A rig without a git repo has no branches to sweep.
        Err(_) => return Ok(Vec::new()),
    };
    let main = ["main", "master"]
        .iter()
        .find_map(|name| repo.find_branch(name, git2::BranchType::Local).ok());
    let Some(main) = main else {
        return Ok(Vec::new());
    };
    let main_tip = main.get().peel_to_commit()?.id();

    let mut swept = Vec::new();
    let branches: Vec<String> = repo
        .branches(Some(git2::BranchType::Local))?
        .filter_map(|b| b.ok())
        .filter_map(|(branch, _)| branch.name().ok().flatten().map(String::from))
        .filter(|name| SWEEP_PREFIXES.iter().any(|p| name.starts_with(p)))
        .collect();
    for name in branches {
        let mut branch = repo.find_branch(&name, git2::BranchType::Local)?;
        if branch.is_head() {
            continue;
        }
        let tip = branch.get().peel_to_commit()?.id();
        // Merged iff the branch tip is an ancestor of main.
        if repo.merge_base(tip, main_tip)? == tip {
            if !dry_run {
                branch.delete()?;
            }
            swept.push(name);
        }
    }
    Ok(swept)
}
