use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Subcommand};
use gt_core::config::{self, Category, Scope};

use crate::client::CliContext;
use crate::output;

#[derive(Debug, Subcommand)]
pub enum HooksCommand {
    /// List the hook commands resolved for this agent
    List {
        #[arg(long)]
        json: bool,
    },
    /// Validate the resolved hook configuration
    Test,
    /// Run the hooks configured for an event
    Fire(FireArgs),
    /// Record a hook failure for later triage
    ReportError {
        #[arg(long)]
        message: String,
    },
    /// Show recorded hook failures
    Errors {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
pub struct FireArgs {
    /// Event name, e.g. SessionStart, PostToolUse, Stop
    pub event: String,
}

fn error_log_path(town_root: &std::path::Path) -> PathBuf {
    gt_core::dirs::runtime_dir(town_root).join("hook-errors.jsonl")
}

fn agent_scope(ctx: &CliContext) -> Scope {
    Scope {
        town: ctx.ws.config.name.clone(),
        rig: ctx.role.rig().map(String::from),
        role: ctx.role.role(),
        agent: ctx.role.agent_name().map(String::from),
    }
}

/// Pull `(event, command)` pairs out of a merged claude-hooks document.
/// The layout mirrors Claude settings: `hooks.<Event>[].hooks[].command`.
fn hook_commands(merged: &serde_json::Value) -> Vec<(String, String)> {
    let mut commands = Vec::new();
    let Some(events) = merged.get("hooks").and_then(|h| h.as_object()) else {
        return commands;
    };
    for (event, matchers) in events {
        let Some(matchers) = matchers.as_array() else { continue };
        for matcher in matchers {
            let Some(hooks) = matcher.get("hooks").and_then(|h| h.as_array()) else { continue };
            for hook in hooks {
                if let Some(command) = hook.get("command").and_then(|c| c.as_str()) {
                    commands.push((event.clone(), command.to_string()));
                }
            }
        }
    }
    commands
}

pub async fn run(cmd: &HooksCommand) -> anyhow::Result<ExitCode> {
    let ctx = CliContext::load()?;
    let scope = agent_scope(&ctx);
    match cmd {
        HooksCommand::List { json } => {
            let resolution =
                config::resolve(&ctx.store, Category::ClaudeHooks, &scope).await?;
            let commands = hook_commands(&resolution.merged);
            if *json {
                output::emit_json(
                    true,
                    &[],
                    &[],
                    serde_json::json!({"hooks": commands, "layers": resolution.layers.len()}),
                );
            } else {
                for (event, command) in &commands {
                    println!("{event:<16} {command}");
                }
                if commands.is_empty() {
                    println!("no hooks configured for this scope");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        HooksCommand::Test => {
            let resolution =
                config::resolve(&ctx.store, Category::ClaudeHooks, &scope).await?;
            let mut problems = Vec::new();
            if let Some(events) = resolution.merged.get("hooks").and_then(|h| h.as_object()) {
                for (event, matchers) in events {
                    if !matchers.is_array() {
                        problems.push(format!("hooks.{event} is not an array"));
                        continue;
                    }
                    for (i, matcher) in matchers.as_array().into_iter().flatten().enumerate() {
                        let hooks = matcher.get("hooks").and_then(|h| h.as_array());
                        match hooks {
                            None => problems.push(format!("hooks.{event}[{i}] has no hooks list")),
                            Some(hooks) => {
                                for hook in hooks {
                                    if hook.get("command").and_then(|c| c.as_str()).is_none() {
                                        problems.push(format!(
                                            "hooks.{event}[{i}] entry missing command"
                                        ));
                                    }
                                }
                            }
                        }
                    }
                }
            }
            for problem in &problems {
                output::warn(problem);
            }
            if problems.is_empty() {
                output::ok("hook configuration is well-formed");
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        HooksCommand::Fire(args) => {
            let resolution =
                config::resolve(&ctx.store, Category::ClaudeHooks, &scope).await?;
            let commands: Vec<String> = hook_commands(&resolution.merged)
                .into_iter()
                .filter(|(event, _)| event == &args.event)
                .map(|(_, command)| command)
                .collect();
            if commands.is_empty() {
                // No-op convention: nothing configured, exit 1 silently.
                return Ok(ExitCode::FAILURE);
            }
            let mut failed = false;
            for command in &commands {
                let status = tokio::process::Command::new("sh")
                    .args(["-c", command])
                    .status()
                    .await?;
                if !status.success() {
                    failed = true;
                    append_error(
                        &ctx,
                        &format!("{} hook failed ({status}): {command}", args.event),
                    )?;
                    output::err(&format!("hook failed: {command}"));
                }
            }
            Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }
        HooksCommand::ReportError { message } => {
            append_error(&ctx, message)?;
            Ok(ExitCode::SUCCESS)
        }
        HooksCommand::Errors { json } => {
            let path = error_log_path(&ctx.ws.root);
            let content = if path.exists() {
                std::fs::read_to_string(&path)?
            } else {
                String::new()
            };
            if *json {
                let entries: Vec<serde_json::Value> = content
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .filter_map(|l| serde_json::from_str(l).ok())
                    .collect();
                output::emit_json(true, &[], &[], serde_json::json!({"errors": entries}));
            } else if content.is_empty() {
                println!("no recorded hook errors");
            } else {
                print!("{content}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn append_error(ctx: &CliContext, message: &str) -> anyhow::Result<()> {
    use std::io::Write;
    let path = error_log_path(&ctx.ws.root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let entry = serde_json::json!({
        "at": chrono::Utc::now().to_rfc3339(),
        "agent": ctx.role.actor(),
        "message": message,
    });
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{entry}")?;
    Ok(())
}
