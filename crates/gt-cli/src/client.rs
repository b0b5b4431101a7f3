//! Shared command setup: locate the town, open the beads client, detect
//! who we are.

use gt_core::backend::{self, Backend};
use gt_core::beads::bd::BdClient;
use gt_core::mail::MailRouter;
use gt_core::rolectx::{self, RoleContext};
use gt_core::workspace::Workspace;

pub struct CliContext {
    pub ws: Workspace,
    pub store: BdClient,
    pub mail: MailRouter,
    pub role: RoleContext,
}

impl CliContext {
    pub fn load() -> anyhow::Result<CliContext> {
        let ws = Workspace::discover()?;
        tracing::debug!(root = %ws.root.display(), town = ws.config.name, "town located");
        let store = BdClient::new(&ws)?;
        let mail = MailRouter::new(&ws.root);
        let role = rolectx::detect_cached(&ws.root).clone();
        Ok(CliContext { ws, store, mail, role })
    }

    /// Backends reachable from this process; unreachable ones turn into
    /// warnings rather than failures.
    pub async fn backends(&self) -> (Vec<Box<dyn Backend>>, Vec<String>) {
        backend::available_backends(&self.ws.config).await
    }
}
