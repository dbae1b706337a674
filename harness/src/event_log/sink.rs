//! Per-client event sinks

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use metrics::{counter, histogram};
use tracing::warn;

use super::event::{EventCounts, EventKind, LogEvent};

/// Shared in-memory store of event streams, keyed by username
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStore(Arc<DashMap<String, Vec<LogEvent>>>);

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of one client's stream
    pub fn events(&self, username: &str) -> Vec<LogEvent> {
        self.0
            .get(username)
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Usernames with at least one recorded event, sorted
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Every recorded event across all clients
    pub fn all_events(&self) -> Vec<(String, LogEvent)> {
        let mut events = Vec::new();
        for entry in self.0.iter() {
            events.extend(entry.value().iter().map(|e| (entry.key().clone(), *e)));
        }
        events
    }

    pub fn clear(&self) {
        self.0.clear();
    }

    fn push(&self, username: &str, event: LogEvent) {
        self.0.entry(username.to_string()).or_default().push(event);
    }
}

/// Where the event streams of one iteration go
#[derive(Debug, Clone)]
pub enum LogTarget {
    /// One `<username>.log` file per client in this directory
    Directory(PathBuf),
    /// Kept in memory
    Memory(MemoryLogStore),
    /// Counted but not stored
    Discard,
}

impl LogTarget {
    /// Target for iteration `iteration` of `total`. Multi-iteration traces
    /// write each iteration into its own `iteration-<z>` subdirectory.
    pub fn for_iteration(&self, iteration: usize, total: usize) -> LogTarget {
        match self {
            LogTarget::Directory(dir) if total > 1 => {
                LogTarget::Directory(dir.join(format!("iteration-{iteration}")))
            }
            other => other.clone(),
        }
    }

    /// Create the destination if needed
    pub fn prepare(&self) -> io::Result<()> {
        if let LogTarget::Directory(dir) = self {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Open the event stream of one client. An existing file from an earlier
    /// run is truncated.
    pub fn open(&self, username: &str) -> io::Result<EventLog> {
        let sink = match self {
            LogTarget::Directory(dir) => {
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(dir.join(format!("{username}.log")))?;
                Sink::File(BufWriter::new(file))
            }
            LogTarget::Memory(store) => Sink::Memory(store.clone()),
            LogTarget::Discard => Sink::Discard,
        };

        Ok(EventLog {
            username: username.to_string(),
            sink,
            counts: EventCounts::default(),
        })
    }
}

enum Sink {
    File(BufWriter<File>),
    Memory(MemoryLogStore),
    Discard,
}

/// Append-only event stream owned by exactly one client
pub struct EventLog {
    username: String,
    sink: Sink,
    counts: EventCounts,
}

impl EventLog {
    /// Stream that only counts events
    pub fn discard(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            sink: Sink::Discard,
            counts: EventCounts::default(),
        }
    }

    /// Append one event. Write failures are reported and never interrupt the client.
    pub fn record(&mut self, kind: EventKind, start_ms: u64, end_ms: u64) {
        let event = LogEvent::new(kind, start_ms, end_ms);
        self.counts.record(kind);
        counter!("queuetrace_events_total", "kind" => kind.as_str()).increment(1);
        histogram!("queuetrace_operation_duration_ms", "kind" => kind.as_str())
            .record(event.elapsed_ms() as f64);

        match &mut self.sink {
            Sink::File(writer) => {
                if let Err(e) = writeln!(writer, "{event}") {
                    warn!("Failed to write event for {}: {}", self.username, e);
                }
            }
            Sink::Memory(store) => store.push(&self.username, event),
            Sink::Discard => {}
        }
    }

    pub fn counts(&self) -> &EventCounts {
        &self.counts
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn flush(&mut self) {
        if let Sink::File(writer) = &mut self.sink
            && let Err(e) = writer.flush()
        {
            warn!("Failed to flush event log for {}: {}", self.username, e);
        }
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Read an event stream written by a `Directory` target
pub fn read_event_log(path: &Path) -> io::Result<Vec<LogEvent>> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = line.parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}:{}: {}", path.display(), number + 1, e),
            )
        })?;
        events.push(event);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let target = LogTarget::Directory(dir.path().to_path_buf());
        target.prepare().unwrap();

        {
            let mut log = target.open("Bob0").unwrap();
            log.record(EventKind::Connect, 1, 2);
            log.record(EventKind::Miss, 3, 3);
            log.record(EventKind::Disconnect, 4, 6);
            assert_eq!(log.counts().total(), 3);
        }

        let events = read_event_log(&dir.path().join("Bob0.log")).unwrap();
        assert_eq!(
            events,
            vec![
                LogEvent::new(EventKind::Connect, 1, 2),
                LogEvent::new(EventKind::Miss, 3, 3),
                LogEvent::new(EventKind::Disconnect, 4, 6),
            ]
        );
    }

    #[test]
    fn test_reopening_replaces_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let target = LogTarget::Directory(dir.path().to_path_buf());
        target.prepare().unwrap();

        {
            let mut log = target.open("Larry0").unwrap();
            log.record(EventKind::Connect, 1, 2);
            log.record(EventKind::Read, 3, 4);
            log.record(EventKind::Disconnect, 5, 6);
        }
        {
            let mut log = target.open("Larry0").unwrap();
            log.record(EventKind::Connect, 10, 11);
            log.record(EventKind::Disconnect, 12, 13);
        }

        let events = read_event_log(&dir.path().join("Larry0.log")).unwrap();
        assert_eq!(
            events,
            vec![
                LogEvent::new(EventKind::Connect, 10, 11),
                LogEvent::new(EventKind::Disconnect, 12, 13),
            ]
        );
    }

    #[test]
    fn test_iteration_subdirectories() {
        let target = LogTarget::Directory(PathBuf::from("/tmp/traces"));
        match target.for_iteration(2, 3) {
            LogTarget::Directory(dir) => assert_eq!(dir, PathBuf::from("/tmp/traces/iteration-2")),
            other => panic!("unexpected target {other:?}"),
        }
        match target.for_iteration(0, 1) {
            LogTarget::Directory(dir) => assert_eq!(dir, PathBuf::from("/tmp/traces")),
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn test_memory_store_keeps_streams_apart() {
        let store = MemoryLogStore::new();
        let target = LogTarget::Memory(store.clone());
        let mut alice = target.open("Alice0").unwrap();
        let mut bob = target.open("Bob0").unwrap();

        alice.record(EventKind::Send, 1, 2);
        bob.record(EventKind::Read, 1, 2);
        bob.record(EventKind::Miss, 3, 4);

        assert_eq!(store.usernames(), vec!["Alice0", "Bob0"]);
        assert_eq!(store.events("Bob0").len(), 2);
        assert_eq!(store.all_events().len(), 3);
    }

    #[test]
    fn test_open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = LogTarget::Directory(dir.path().join("not-created"));
        assert!(target.open("Carl0").is_err());
    }

    #[test]
    fn test_read_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Rick0.log");
        fs::write(&path, "READ 1 2\nbogus\n").unwrap();

        let err = read_event_log(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains(":2:"));
    }
}
