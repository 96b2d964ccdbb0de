//! Stream log lines and the event bus that carries them to SSE clients.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late-joining clients can catch up.
//! [`LogBuffer`] is the session's own ring of the most recent log lines.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::RunId;

/// Maximum number of events retained in the replay ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// LogLine
// ---------------------------------------------------------------------------

/// Which stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
    /// Lines written by the worker itself (command echo, exit status).
    Supervisor,
}

/// One line of encoder output, as shown in the panel.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LogLine {
    /// Monotonic sequence number assigned by the [`LogBuffer`].
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[schema(value_type = Option<String>)]
    pub run_id: Option<RunId>,
    pub source: LogSource,
    pub text: String,
}

// ---------------------------------------------------------------------------
// LogBuffer
// ---------------------------------------------------------------------------

/// Bounded ring of the most recent log lines (oldest evicted first).
#[derive(Debug)]
pub struct LogBuffer {
    capacity: usize,
    next_seq: u64,
    lines: VecDeque<LogLine>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_seq: 0,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a line, stamping it with the next sequence number, and return
    /// the stored copy.
    pub fn push(&mut self, run_id: Option<RunId>, source: LogSource, text: impl Into<String>) -> LogLine {
        let line = LogLine {
            seq: self.next_seq,
            timestamp: Utc::now(),
            run_id,
            source,
            text: text.into(),
        };
        self.next_seq += 1;

        if self.capacity == 0 {
            return line;
        }
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.clone());
        line
    }

    /// The last `n` retained lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    StreamStarting {
        run_id: RunId,
        media: Vec<String>,
        shorts: bool,
    },
    StreamRunning {
        run_id: RunId,
        pid: Option<u32>,
    },
    StreamLog {
        line: LogLine,
    },
    /// The encoder exited on its own.
    StreamExited {
        run_id: RunId,
        code: Option<i32>,
        success: bool,
    },
    /// The encoder was terminated by a stop request.
    StreamStopped {
        run_id: RunId,
    },
    /// The encoder could not be launched.
    StreamFailed {
        run_id: RunId,
        error: String,
    },
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer.
    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload);

        // Store in ring buffer regardless of subscriber count.
        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // Ignore send errors (no subscribers).
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
