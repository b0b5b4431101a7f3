//! Per-agent mailboxes and the prompt-injection queue.
//!
//! Inboxes are append-only JSONL files addressed by identity path. The
//! injection queue serializes system-reminder fragments per Claude session
//! so concurrent hooks never interleave writes to an agent's stdin.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dirs;
use crate::errors::GtError;
use crate::identity::AgentIdentity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

pub struct MailRouter {
    town_root: PathBuf,
}

impl MailRouter {
    pub fn new(town_root: &Path) -> MailRouter {
        MailRouter { town_root: town_root.to_path_buf() }
    }

    fn inbox_path(&self, addr: &AgentIdentity) -> PathBuf {
        dirs::mail_dir(&self.town_root).join(addr.path()).join("inbox.jsonl")
    }

    fn archive_path(&self, addr: &AgentIdentity) -> PathBuf {
        dirs::mail_dir(&self.town_root).join(addr.path()).join("archive.jsonl")
    }

    /// Append a message to an agent's inbox.
    pub fn send(
        &self,
        addr: &AgentIdentity,
        from: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, GtError> {
        let message = Message {
            id: format!("msg-{}", nanoid::nanoid!(10)),
            from: from.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            sent_at: Utc::now(),
            read: false,
        };
        let path = self.inbox_path(addr);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        append_jsonl(&path, &message)?;
        tracing::debug!(to = %addr, id = message.id, "mail sent");
        Ok(message.id)
    }

    fn read_inbox(&self, addr: &AgentIdentity) -> Result<Vec<Message>, GtError> {
        read_jsonl(&self.inbox_path(addr))
    }

    pub fn list_unread(&self, addr: &AgentIdentity) -> Result<Vec<Message>, GtError> {
        Ok(self.read_inbox(addr)?.into_iter().filter(|m| !m.read).collect())
    }

    pub fn count(&self, addr: &AgentIdentity) -> Result<usize, GtError> {
        Ok(self.list_unread(addr)?.len())
    }

    /// Mark a message read in place.
    pub fn mark_read(&self, addr: &AgentIdentity, msg_id: &str) -> Result<(), GtError> {
        let mut messages = self.read_inbox(addr)?;
        let mut found = false;
        for message in &mut messages {
            if message.id == msg_id {
                message.read = true;
                found = true;
            }
        }
        if !found {
            return Err(GtError::Usage(format!("no such message: {msg_id}")));
        }
        write_jsonl(&self.inbox_path(addr), &messages)
    }

    /// Move one message out of the inbox into the archive.
    pub fn archive(&self, addr: &AgentIdentity, msg_id: &str) -> Result<(), GtError> {
        let messages = self.read_inbox(addr)?;
        let (archived, kept): (Vec<Message>, Vec<Message>) =
            messages.into_iter().partition(|m| m.id == msg_id);
        if archived.is_empty() {
            return Err(GtError::Usage(format!("no such message: {msg_id}")));
        }
        for message in &archived {
            append_jsonl(&self.archive_path(addr), message)?;
        }
        write_jsonl(&self.inbox_path(addr), &kept)
    }

    /// Archive every already-read message. Returns the count moved.
    pub fn archive_read(&self, addr: &AgentIdentity) -> Result<usize, GtError> {
        let messages = self.read_inbox(addr)?;
        let (archived, kept): (Vec<Message>, Vec<Message>) =
            messages.into_iter().partition(|m| m.read);
        for message in &archived {
            append_jsonl(&self.archive_path(addr), message)?;
        }
        if !archived.is_empty() {
            write_jsonl(&self.inbox_path(addr), &kept)?;
        }
        Ok(archived.len())
    }

    /// Every agent identity with a mailbox on disk.
    pub fn addresses(&self) -> Result<Vec<AgentIdentity>, GtError> {
        let root = dirs::mail_dir(&self.town_root);
        let mut found = Vec::new();
        collect_inboxes(&root, &root, &mut found)?;
        found.sort_by_key(|a: &AgentIdentity| a.path());
        Ok(found)
    }

    /// SessionStart integration: when the agent has unread mail, queue a
    /// reminder fragment on its injection queue and return the count.
    pub fn check_inject(
        &self,
        addr: &AgentIdentity,
        session_id: &str,
    ) -> Result<usize, GtError> {
        let unread = self.count(addr)?;
        if unread > 0 {
            let queue = InjectQueue::new(&self.town_root);
            queue.enqueue(
                session_id,
                &format!(
                    "You have {unread} unread mail message(s). Run `gt mail inbox` to read them."
                ),
            )?;
        }
        Ok(unread)
    }
}

fn collect_inboxes(
    root: &Path,
    dir: &Path,
    found: &mut Vec<AgentIdentity>,
) -> Result<(), GtError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_inboxes(root, &path, found)?;
        } else if entry.file_name() == "inbox.jsonl" {
            let rel = dir.strip_prefix(root).unwrap_or(dir);
            if let Some(identity) = crate::identity::parse_path(&rel.to_string_lossy()) {
                found.push(identity);
            }
        }
    }
    Ok(())
}

/// The per-session prompt-injection queue. Enqueue appends; drain reads
/// then truncates. Single-process — no cross-process coordination.
pub struct InjectQueue {
    dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueEntry {
    fragment: String,
    queued_at: DateTime<Utc>,
}

impl InjectQueue {
    pub fn new(town_root: &Path) -> InjectQueue {
        InjectQueue { dir: dirs::inject_queue_dir(town_root) }
    }

    fn queue_path(&self, session_id: &str) -> PathBuf {
        // Session IDs are externally supplied; keep them path-safe.
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.jsonl"))
    }

    pub fn enqueue(&self, session_id: &str, fragment: &str) -> Result<(), GtError> {
        std::fs::create_dir_all(&self.dir)?;
        append_jsonl(
            &self.queue_path(session_id),
            &QueueEntry { fragment: fragment.to_string(), queued_at: Utc::now() },
        )
    }

    /// Destructive read: returns queued fragments in order and truncates
    /// the queue.
    pub fn drain(&self, session_id: &str) -> Result<Vec<String>, GtError> {
        let path = self.queue_path(session_id);
        let entries: Vec<QueueEntry> = read_jsonl(&path)?;
        if !entries.is_empty() {
            std::fs::write(&path, "")?;
        }
        Ok(entries.into_iter().map(|e| e.fragment).collect())
    }

    /// Non-destructive peek at the queue depth.
    pub fn status(&self, session_id: &str) -> Result<usize, GtError> {
        Ok(read_jsonl::<QueueEntry>(&self.queue_path(session_id))?.len())
    }

    pub fn clear(&self, session_id: &str) -> Result<(), GtError> {
        let path = self.queue_path(session_id);
        if path.exists() {
            std::fs::write(path, "")?;
        }
        Ok(())
    }
}

fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<(), GtError> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(value)?)?;
    Ok(())
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, GtError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    let mut out = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(line)?);
    }
    Ok(out)
}

fn write_jsonl<T: Serialize>(path: &Path, values: &[T]) -> Result<(), GtError> {
    let mut out = String::new();
    for value in values {
        out.push_str(&serde_json::to_string(value)?);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}
