use std::process::ExitCode;
use std::time::Duration;

use clap::Args;
use gt_core::beads::Beads;

use crate::client::CliContext;
use crate::output;

/// Backoff for the idle poll loop: base 30s, doubling, capped.
const BACKOFF_BASE: Duration = Duration::from_secs(30);
const BACKOFF_CAP: Duration = Duration::from_secs(240);

#[derive(Debug, Args)]
pub struct YieldCommand {
    /// Give up after this many seconds (or $GT_YIELD_TIMEOUT)
    #[arg(long)]
    pub timeout: Option<u64>,
    /// What to wait for
    #[arg(long, value_enum, default_value = "any")]
    pub on: YieldOn,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum YieldOn {
    Inbox,
    Decision,
    Any,
}

pub async fn run(cmd: &YieldCommand) -> anyhow::Result<ExitCode> {
    let ctx = CliContext::load()?;
    let timeout = cmd
        .timeout
        .or_else(|| {
            std::env::var("GT_YIELD_TIMEOUT").ok().and_then(|t| t.parse().ok())
        })
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(1800));

    let identity = ctx.role.identity.clone();
    let deadline = tokio::time::Instant::now() + timeout;
    let mut backoff = BACKOFF_BASE;

    loop {
        if cmd.on != YieldOn::Decision {
            if let Some(identity) = &identity {
                let unread = ctx.mail.count(identity)?;
                if unread > 0 {
                    report(cmd.json, "inbox", unread);
                    return Ok(ExitCode::SUCCESS);
                }
            }
        }
        if cmd.on != YieldOn::Inbox {
            let pending = ctx.store.list_pending_decisions().await?;
            if !pending.is_empty() {
                report(cmd.json, "decision", pending.len());
                return Ok(ExitCode::SUCCESS);
            }
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            if cmd.json {
                output::emit_json(
                    false,
                    &[],
                    &["yield timed out".into()],
                    serde_json::json!({}),
                );
            }
            return Ok(ExitCode::FAILURE);
        }
        let sleep = backoff.min(deadline - now);
        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = tokio::signal::ctrl_c() => {
                return Ok(ExitCode::FAILURE);
            }
        }
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

fn report(json: bool, signal: &str, count: usize) {
    if json {
        output::emit_json(
            true,
            &[],
            &[],
            serde_json::json!({"signal": signal, "count": count}),
        );
    } else {
        output::ok(&format!("{signal}: {count} waiting"));
    }
}
