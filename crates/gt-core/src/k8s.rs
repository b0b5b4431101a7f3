//! K8s backend: each agent lives in a pod, its interactive session inside.
//!
//! Pods are labelled `gastown.dev/agent=<session>` by the controller that
//! creates them. This backend never creates pods — spawning is expressed by
//! writing an agent bead in `spawning` state and letting the controller
//! reconcile — but it nudges, switches, stops, and attaches.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, DeleteParams, ListParams};
use kube::Client;

use crate::backend::{Backend, StartOpts};
use crate::beads::ExecutionTarget;
use crate::errors::GtError;
use crate::manifest::TownConfig;

/// Label carrying the canonical session name on agent pods.
pub const AGENT_LABEL: &str = "gastown.dev/agent";

const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

pub struct K8sBackend {
    client: Client,
    namespace: String,
    /// tmux session key inside the pod image.
    session_key: String,
}

impl K8sBackend {
    /// Connect using in-cluster config or the local kubeconfig.
    pub async fn connect(config: &TownConfig) -> Result<K8sBackend, GtError> {
        let client = Client::try_default()
            .await
            .map_err(|e| GtError::Transient(format!("failed to create k8s client: {e}")))?;
        let namespace = std::env::var("GT_K8S_NAMESPACE")
            .ok()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| config.k8s_namespace.clone());
        Ok(K8sBackend { client, namespace, session_key: config.session_key() })
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Resolve a session key to its running pod.
    async fn find_pod(&self, key: &str) -> Result<Option<Pod>, GtError> {
        let lp = ListParams::default().labels(&format!("{AGENT_LABEL}={key}"));
        let list = self
            .pods()
            .list(&lp)
            .await
            .map_err(|e| GtError::Transient(format!("pod list failed: {e}")))?;
        Ok(list.into_iter().find(is_running))
    }

    async fn pod_name(&self, key: &str) -> Result<String, GtError> {
        let pod = self
            .find_pod(key)
            .await?
            .ok_or_else(|| GtError::SessionNotFound(key.to_string()))?;
        pod.metadata
            .name
            .ok_or_else(|| GtError::Backend("pod has no name".into()))
    }

    /// Run a command inside the agent's pod over SPDY exec.
    async fn exec(&self, key: &str, command: Vec<String>) -> Result<(), GtError> {
        let pod_name = self.pod_name(key).await?;
        let ap = AttachParams::default().stdout(true).stderr(true);
        let pods = self.pods();
        let exec = pods.exec(&pod_name, command, &ap);
        let attached = tokio::time::timeout(EXEC_TIMEOUT, exec)
            .await
            .map_err(|_| GtError::Transient(format!("exec into {pod_name} timed out")))?
            .map_err(|e| GtError::Backend(format!("exec into {pod_name}: {e}")))?;
        tokio::time::timeout(EXEC_TIMEOUT, attached.join())
            .await
            .map_err(|_| GtError::Transient(format!("exec in {pod_name} timed out")))?
            .map_err(|e| GtError::Backend(format!("exec in {pod_name}: {e}")))?;
        Ok(())
    }
}

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|phase| phase == "Running")
        .unwrap_or(false)
}

#[async_trait]
impl Backend for K8sBackend {
    fn target(&self) -> ExecutionTarget {
        ExecutionTarget::K8s
    }

    async fn has_session(&self, key: &str) -> Result<bool, GtError> {
        Ok(self.find_pod(key).await?.is_some())
    }

    async fn start_session(&self, key: &str, _opts: &StartOpts) -> Result<(), GtError> {
        // Pod creation belongs to the controller watching spawning agent
        // beads. Dispatch succeeds once the bead is written; this records
        // intent only.
        tracing::info!(session = key, "k8s start is controller-driven; nothing to do here");
        Ok(())
    }

    async fn nudge_session(&self, key: &str, text: &str) -> Result<(), GtError> {
        self.exec(
            key,
            vec![
                "tmux".into(),
                "send-keys".into(),
                "-t".into(),
                self.session_key.clone(),
                text.into(),
                "Enter".into(),
            ],
        )
        .await
    }

    async fn stop_session(&self, key: &str, force: bool) -> Result<(), GtError> {
        let pod_name = self.pod_name(key).await?;
        let dp = if force {
            DeleteParams::default().grace_period(0)
        } else {
            DeleteParams::default()
        };
        self.pods()
            .delete(&pod_name, &dp)
            .await
            .map_err(|e| GtError::Backend(format!("pod delete {pod_name}: {e}")))?;
        tracing::info!(session = key, pod = pod_name, "deleted agent pod");
        Ok(())
    }

    async fn switch_session(&self, key: &str, env: &[(String, String)]) -> Result<(), GtError> {
        // Respawn the in-pod agent process; the pod (transport) survives.
        let env_prefix: String =
            env.iter().map(|(name, value)| format!("{name}={value} ")).collect();
        self.exec(
            key,
            vec![
                "tmux".into(),
                "respawn-window".into(),
                "-k".into(),
                "-t".into(),
                self.session_key.clone(),
                format!("{env_prefix}claude"),
            ],
        )
        .await
    }

    async fn attach_session(&self, key: &str) -> Result<(), GtError> {
        let pod_name = self.pod_name(key).await?;
        // Terminal handoff via kubectl, which owns the TTY plumbing.
        use std::os::unix::process::CommandExt;
        let err = std::process::Command::new("kubectl")
            .args([
                "exec",
                "-it",
                "-n",
                &self.namespace,
                &pod_name,
                "--",
                "tmux",
                "attach-session",
                "-t",
                &self.session_key,
            ])
            .exec();
        Err(GtError::Backend(format!("exec kubectl failed: {err}")))
    }

    async fn list_sessions(&self) -> Result<Vec<String>, GtError> {
        let lp = ListParams::default().labels(AGENT_LABEL);
        let list = self
            .pods()
            .list(&lp)
            .await
            .map_err(|e| GtError::Transient(format!("pod list failed: {e}")))?;
        let mut sessions: Vec<String> = list
            .into_iter()
            .filter(is_running)
            .filter_map(|pod| {
                pod.metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(AGENT_LABEL))
                    .cloned()
            })
            .collect();
        sessions.sort();
        sessions.dedup();
        Ok(sessions)
    }
}
