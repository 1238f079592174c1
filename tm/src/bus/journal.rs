//! Bus Journal - persists published messages to a JSONL file
//!
//! The journal taps the bus and appends one line per message, with the topic
//! it was published on, for post-mortem debugging and replay. It is
//! diagnostics only: nothing reads it back on start-up.
//!
//! File writes run on a blocking thread fed by the tap's channel, so a slow
//! disk never stalls the runtime.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eyre::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::domain::Message;

use super::core::{EventBus, SubscriptionId, Tapped};

/// One journal line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// When the journal recorded the message
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// Topic the message was published on
    pub topic: String,
    pub message: Message,
}

impl JournalEntry {
    pub fn new(topic: impl Into<String>, message: Message) -> Self {
        Self {
            timestamp: Utc::now(),
            topic: topic.into(),
            message,
        }
    }
}

/// Append-only JSONL writer
pub struct BusJournal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl BusJournal {
    /// Open (or create) the journal file, creating parent directories
    pub fn open(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "BusJournal::open: called");
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("Failed to create journal directory")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(format!("Failed to open journal {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a message published on `topic` as one JSON line
    pub fn write_message(&mut self, topic: &str, message: &Message) -> eyre::Result<()> {
        let entry = JournalEntry::new(topic, message.clone());
        let json = serde_json::to_string(&entry)?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Tap `bus` and journal everything published from now on
    ///
    /// The writer stops once the returned subscription is removed.
    pub fn attach(self, bus: &EventBus) -> eyre::Result<SubscriptionId> {
        debug!(path = ?self.path, "BusJournal::attach: called");
        let runtime = tokio::runtime::Handle::try_current().context("Bus journal needs a tokio runtime")?;
        let (id, rx) = bus.tap();
        runtime.spawn_blocking(move || self.run(rx));
        Ok(id)
    }

    /// Write tapped messages until the tap is removed
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<Tapped>) {
        debug!(path = ?self.path, "BusJournal::run: started");
        while let Some(tapped) = rx.blocking_recv() {
            if let Err(e) = self.write_message(&tapped.topic, &tapped.message) {
                error!(message_id = %tapped.message.id, error = %e, "BusJournal: failed to write message");
            }
        }
        let _ = self.writer.flush();
        debug!(path = ?self.path, "BusJournal::run: tap closed");
    }
}

/// Read every entry from a journal file; malformed lines are skipped
pub fn read_journal(path: impl AsRef<Path>) -> eyre::Result<Vec<JournalEntry>> {
    let path = path.as_ref();
    debug!(?path, "read_journal: reading journal");

    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_journal: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_journal: loaded entries");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use crate::domain::Payload;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read_journal() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("bus.jsonl");
        let mut journal = BusJournal::open(&path).unwrap();

        journal
            .write_message("task_queued", &Message::from_json("task_queued", json!({"taskId": "task-1"})))
            .unwrap();
        journal
            .write_message("task_completed", &Message::new("task_completed", Payload::new()))
            .unwrap();

        let entries = read_journal(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].topic, "task_queued");
        assert_eq!(entries[0].message.r#type, "task_queued");
        assert_eq!(entries[0].message.str_field("taskId"), Some("task-1"));
        assert_eq!(entries[1].message.r#type, "task_completed");
    }

    #[test]
    fn test_read_missing_journal() {
        let temp = tempdir().unwrap();
        let entries = read_journal(temp.path().join("absent.jsonl")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bus.jsonl");
        let mut journal = BusJournal::open(&path).unwrap();
        journal.write_message("ok", &Message::new("ok", Payload::new())).unwrap();
        drop(journal);

        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("{not json}\n\n");
        fs::write(&path, content).unwrap();

        assert_eq!(read_journal(&path).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_attached_journal_records_published_messages() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bus.jsonl");
        let bus = EventBus::new(&BusConfig::default());
        BusJournal::open(&path).unwrap().attach(&bus).unwrap();

        bus.emit(Message::new("one", Payload::new())).unwrap();
        bus.emit(Message::new("two", Payload::new())).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let types: Vec<_> = read_journal(&path)
            .unwrap()
            .into_iter()
            .map(|e| e.message.r#type)
            .collect();
        assert_eq!(types, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_journal_records_publish_topic() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bus.jsonl");
        let bus = EventBus::new(&BusConfig::default());
        let id = BusJournal::open(&path).unwrap().attach(&bus).unwrap();

        bus.publish("task_dispatch", Message::new("assignment", Payload::new()).with_target("w1"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bus.unsubscribe(id));

        let entries = read_journal(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].topic, "task_dispatch");
        assert_eq!(entries[0].message.r#type, "assignment");
    }
}
