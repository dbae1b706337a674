//! Event kinds and the per-line log format

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

/// Kind of operation recorded in a client's event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Connect,
    Disconnect,
    Send,
    ErrorSend,
    Read,
    Miss,
    QueueFound,
    NoQueue,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::Send,
        EventKind::ErrorSend,
        EventKind::Read,
        EventKind::Miss,
        EventKind::QueueFound,
        EventKind::NoQueue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connect => "CONNECT",
            EventKind::Disconnect => "DISCONNECT",
            EventKind::Send => "SEND",
            EventKind::ErrorSend => "ERROR_SEND",
            EventKind::Read => "READ",
            EventKind::Miss => "MISS",
            EventKind::QueueFound => "QUEUE_FOUND",
            EventKind::NoQueue => "NO_QUEUE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors when reading an event line back
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventParseError {
    #[error("Unknown event kind: {0}")]
    UnknownKind(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Unexpected trailing input: {0}")]
    TrailingInput(String),
}

impl FromStr for EventKind {
    type Err = EventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EventParseError::UnknownKind(s.to_string()))
    }
}

/// One timed operation: `"<KIND> <startEpochMillis> <endEpochMillis>"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    pub kind: EventKind,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl LogEvent {
    pub fn new(kind: EventKind, start_ms: u64, end_ms: u64) -> Self {
        Self {
            kind,
            start_ms,
            end_ms,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind, self.start_ms, self.end_ms)
    }
}

impl FromStr for LogEvent {
    type Err = EventParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line.split_whitespace();
        let kind = fields
            .next()
            .ok_or(EventParseError::MissingField("kind"))?
            .parse()?;
        let start_ms = parse_millis(fields.next().ok_or(EventParseError::MissingField("start"))?)?;
        let end_ms = parse_millis(fields.next().ok_or(EventParseError::MissingField("end"))?)?;
        if let Some(rest) = fields.next() {
            return Err(EventParseError::TrailingInput(rest.to_string()));
        }
        Ok(Self::new(kind, start_ms, end_ms))
    }
}

fn parse_millis(field: &str) -> Result<u64, EventParseError> {
    field
        .parse()
        .map_err(|_| EventParseError::InvalidTimestamp(field.to_string()))
}

/// Number of events per kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EventCounts(BTreeMap<EventKind, u64>);

impl EventCounts {
    pub fn record(&mut self, kind: EventKind) {
        *self.0.entry(kind).or_default() += 1;
    }

    pub fn get(&self, kind: EventKind) -> u64 {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn merge(&mut self, other: &EventCounts) {
        for (kind, count) in &other.0 {
            *self.0.entry(*kind).or_default() += count;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventKind, u64)> + '_ {
        self.0.iter().map(|(kind, count)| (*kind, *count))
    }
}

/// Get current time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
