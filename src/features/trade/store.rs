use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::features::trade::message::{ChatMessage, ChatNotification};

/// Append-only local persistence for chat messages and notifications, keyed
/// by room and idempotent by message id.
///
/// Each room's log is journaled as a JSONL file under `journal_dir`. Journal
/// IO failures degrade the store to memory-only for the affected room; they
/// are logged and never surfaced to callers.
pub struct MessageStore {
    journal_dir: Option<PathBuf>,
    inner: Mutex<HashMap<String, RoomLog>>,
}

#[derive(Default)]
struct RoomLog {
    loaded: bool,
    seen: HashSet<String>,
    messages: Vec<ChatMessage>,
    notifications: Vec<ChatNotification>,
}

impl RoomLog {
    fn insert(&mut self, msg: ChatMessage) -> bool {
        if !self.seen.insert(msg.id.clone()) {
            return false;
        }
        let key = (msg.timestamp, msg.id.clone());
        let pos = self
            .messages
            .partition_point(|m| (m.timestamp, m.id.as_str()) <= (key.0, key.1.as_str()));
        self.messages.insert(pos, msg);
        true
    }
}

impl MessageStore {
    pub fn new(journal_dir: Option<PathBuf>) -> Self {
        Self {
            journal_dir,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Persists a message for its room. Duplicate ids are ignored. Returns
    /// whether the message was newly recorded.
    pub fn append(&self, msg: ChatMessage) -> bool {
        let path = self.journal_path(&msg.room_id);
        let mut inner = self.inner.lock().expect("message store lock");
        let log = inner.entry(msg.room_id.clone()).or_default();
        ensure_loaded(log, path.as_deref());

        let fresh = log.insert(msg.clone());
        if fresh {
            if let Some(path) = path.as_deref() {
                journal_append(path, &msg);
            }
        }
        fresh
    }

    /// Ordered message sequence for a room, `(timestamp, id)` ascending.
    pub fn history(&self, room_id: &str) -> Vec<ChatMessage> {
        let path = self.journal_path(room_id);
        let mut inner = self.inner.lock().expect("message store lock");
        let log = inner.entry(room_id.to_string()).or_default();
        ensure_loaded(log, path.as_deref());
        log.messages.clone()
    }

    /// Swaps a room's log for a reconciled timeline and rewrites its journal.
    pub fn replace_history(&self, room_id: &str, timeline: Vec<ChatMessage>) {
        let path = self.journal_path(room_id);
        let mut inner = self.inner.lock().expect("message store lock");
        let log = inner.entry(room_id.to_string()).or_default();
        log.loaded = true;
        log.seen = timeline.iter().map(|m| m.id.clone()).collect();
        log.messages = timeline;
        if let Some(path) = path.as_deref() {
            journal_rewrite(path, &log.messages);
        }
    }

    pub fn push_notification(&self, notification: ChatNotification) {
        let mut inner = self.inner.lock().expect("message store lock");
        let log = inner.entry(notification.room_id.clone()).or_default();
        log.notifications.push(notification);
    }

    pub fn notifications(&self, room_id: &str) -> Vec<ChatNotification> {
        let inner = self.inner.lock().expect("message store lock");
        inner
            .get(room_id)
            .map(|log| log.notifications.clone())
            .unwrap_or_default()
    }

    /// Removes a room's pending notification records. Messages are untouched.
    pub fn clear_notifications(&self, room_id: &str) {
        let mut inner = self.inner.lock().expect("message store lock");
        if let Some(log) = inner.get_mut(room_id) {
            log.notifications.clear();
        }
    }

    fn journal_path(&self, room_id: &str) -> Option<PathBuf> {
        let dir = self.journal_dir.as_ref()?;
        let safe: String = room_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        Some(dir.join(format!("{safe}.jsonl")))
    }
}

fn ensure_loaded(log: &mut RoomLog, path: Option<&Path>) {
    if log.loaded {
        return;
    }
    log.loaded = true;

    let Some(path) = path else { return };
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
        Err(err) => {
            warn!("message journal {} unreadable: {err}", path.display());
            return;
        }
    };

    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ChatMessage>(&line) {
            Ok(msg) => {
                log.insert(msg);
            }
            Err(err) => warn!("skipping corrupt journal line in {}: {err}", path.display()),
        }
    }
}

fn journal_append(path: &Path, msg: &ChatMessage) {
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(msg).map_err(std::io::Error::other)?;
        writeln!(file, "{line}")
    })();
    if let Err(err) = result {
        warn!(
            "message journal append failed for {}, keeping in-memory copy: {err}",
            path.display()
        );
    }
}

fn journal_rewrite(path: &Path, messages: &[ChatMessage]) {
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut buf = String::new();
        for msg in messages {
            buf.push_str(&serde_json::to_string(msg).map_err(std::io::Error::other)?);
            buf.push('\n');
        }
        fs::write(path, buf)
    })();
    if let Err(err) = result {
        warn!(
            "message journal rewrite failed for {}, keeping in-memory copy: {err}",
            path.display()
        );
    }
}
