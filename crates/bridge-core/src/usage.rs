//! Usage accounting.
//!
//! [`UsageTracker`] holds process-wide token totals. It is constructed once at
//! startup and shared by reference; counters are plain atomics so concurrent
//! responses never lose an update.
//!
//! [`UsageObserver`] sits beside a response body and feeds every usage record
//! it sees into the tracker without holding back any bytes:
//! - `text/event-stream` bodies are scanned line by line, carrying partial
//!   lines across chunk boundaries
//! - JSON bodies are captured (up to a cap) and parsed once complete, which
//!   is the chunk that reaches the declared `Content-Length` when there is one
//! - anything else is ignored

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Largest non-streaming body captured for usage extraction.
const MAX_JSON_CAPTURE: usize = 16 * 1024 * 1024;
/// Largest single SSE line kept while waiting for its terminator.
const MAX_EVENT_LINE: usize = 4 * 1024 * 1024;
const DONE_SENTINEL: &[u8] = b"[DONE]";
const NO_TIMESTAMP: i64 = i64::MIN;

/// Token counts reported by one response or stream event.
///
/// Accepts both the Anthropic field names and the OpenAI
/// `prompt_tokens` / `completion_tokens` dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    #[serde(default, alias = "prompt_tokens", deserialize_with = "null_as_zero")]
    pub input_tokens: u64,
    /// Generated tokens
    #[serde(default, alias = "completion_tokens", deserialize_with = "null_as_zero")]
    pub output_tokens: u64,
    /// Tokens written to the prompt cache
    #[serde(default, deserialize_with = "null_as_zero")]
    pub cache_creation_input_tokens: u64,
    /// Tokens served from the prompt cache
    #[serde(default, deserialize_with = "null_as_zero")]
    pub cache_read_input_tokens: u64,
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}

#[derive(Deserialize)]
struct UsageEnvelope {
    #[serde(default)]
    usage: Option<Usage>,
}

/// Point-in-time view of the accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Cumulative prompt tokens
    pub input_tokens: u64,
    /// Cumulative generated tokens
    pub output_tokens: u64,
    /// Cumulative cache-write tokens
    pub cache_creation_input_tokens: u64,
    /// Cumulative cache-read tokens
    pub cache_read_input_tokens: u64,
    /// Usage records observed
    pub total_requests: u64,
    /// Start of the current session
    pub session_start: DateTime<Utc>,
    /// Time of the most recent usage record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_request: Option<DateTime<Utc>>,
    /// Human-readable session age
    pub session_duration: String,
}

/// Process-wide usage accumulator.
#[derive(Debug)]
pub struct UsageTracker {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    cache_creation_input_tokens: AtomicU64,
    cache_read_input_tokens: AtomicU64,
    total_requests: AtomicU64,
    /// Milliseconds since the epoch, `NO_TIMESTAMP` until the first record
    last_request_ms: AtomicI64,
    /// Only the session start sits behind a lock; counters never do
    session_start: RwLock<DateTime<Utc>>,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageTracker {
    /// Start a new session
    #[must_use]
    pub fn new() -> Self {
        Self {
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            cache_creation_input_tokens: AtomicU64::new(0),
            cache_read_input_tokens: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            last_request_ms: AtomicI64::new(NO_TIMESTAMP),
            session_start: RwLock::new(Utc::now()),
        }
    }

    /// Add one usage record
    pub fn record(&self, usage: &Usage) {
        self.input_tokens
            .fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(usage.output_tokens, Ordering::Relaxed);
        self.cache_creation_input_tokens
            .fetch_add(usage.cache_creation_input_tokens, Ordering::Relaxed);
        self.cache_read_input_tokens
            .fetch_add(usage.cache_read_input_tokens, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.last_request_ms
            .fetch_max(Utc::now().timestamp_millis(), Ordering::Relaxed);

        debug!(
            input = usage.input_tokens,
            output = usage.output_tokens,
            cache_creation = usage.cache_creation_input_tokens,
            cache_read = usage.cache_read_input_tokens,
            "Usage recorded"
        );
    }

    /// Current totals
    #[must_use]
    pub fn snapshot(&self) -> UsageSnapshot {
        let session_start = self.session_start.read();
        let started = *session_start;
        let last_request = match self.last_request_ms.load(Ordering::Relaxed) {
            NO_TIMESTAMP => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        };
        let age = (Utc::now() - started).to_std().unwrap_or_default();

        UsageSnapshot {
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            cache_creation_input_tokens: self.cache_creation_input_tokens.load(Ordering::Relaxed),
            cache_read_input_tokens: self.cache_read_input_tokens.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            session_start: started,
            last_request,
            session_duration: humantime::format_duration(Duration::from_secs(age.as_secs()))
                .to_string(),
        }
    }

    /// Zero every counter and start a new session.
    ///
    /// Concurrent snapshots see either the old or the new session start. A
    /// record racing the reset may land partly before and partly after it.
    pub fn reset(&self) {
        let mut session_start = self.session_start.write();
        for counter in [
            &self.input_tokens,
            &self.output_tokens,
            &self.cache_creation_input_tokens,
            &self.cache_read_input_tokens,
            &self.total_requests,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.last_request_ms.store(NO_TIMESTAMP, Ordering::Relaxed);
        *session_start = Utc::now();
        debug!("Usage statistics reset");
    }
}

/// How a response body should be scanned for usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Server-sent events
    EventStream,
    /// A single JSON document
    Json,
    /// Not inspected
    Opaque,
}

impl ResponseKind {
    /// Classify from a `Content-Type` header value
    #[must_use]
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return Self::Json;
        };
        match content_type.parse::<mime::Mime>() {
            Ok(mime) if mime.essence_str() == mime::TEXT_EVENT_STREAM.essence_str() => {
                Self::EventStream
            }
            Ok(mime) if mime.subtype() == mime::JSON || mime.suffix() == Some(mime::JSON) => {
                Self::Json
            }
            _ => Self::Opaque,
        }
    }
}

/// Side-observer for one response body.
#[derive(Debug)]
pub struct UsageObserver {
    kind: ResponseKind,
    buffer: Vec<u8>,
    /// Declared body length, if upstream sent one
    expected_len: Option<usize>,
    /// Current SSE line or JSON body exceeded its cap
    overflowed: bool,
    finished: bool,
}

impl UsageObserver {
    /// Create an observer for a response of the given kind
    #[must_use]
    pub fn new(kind: ResponseKind) -> Self {
        Self {
            kind,
            buffer: Vec::new(),
            expected_len: None,
            overflowed: false,
            finished: false,
        }
    }

    /// Parse a JSON body as soon as this many bytes have been seen
    #[must_use]
    pub fn with_expected_len(mut self, len: Option<u64>) -> Self {
        self.expected_len = len.and_then(|len| usize::try_from(len).ok());
        self
    }

    /// Create an observer from the response `Content-Type`
    #[must_use]
    pub fn for_content_type(content_type: Option<&str>) -> Self {
        Self::new(ResponseKind::from_content_type(content_type))
    }

    /// Kind of body being observed
    #[must_use]
    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// Whether [`finish`](Self::finish) has already run
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Inspect a chunk that is being delivered to the client
    pub fn observe(&mut self, chunk: &[u8], tracker: &UsageTracker) {
        if self.finished {
            return;
        }
        match self.kind {
            ResponseKind::EventStream => self.observe_event_stream(chunk, tracker),
            ResponseKind::Json => {
                self.capture(chunk, MAX_JSON_CAPTURE);
                // Servers stop polling a sized body at its last byte.
                if !self.overflowed && self.expected_len == Some(self.buffer.len()) {
                    self.finish(tracker);
                }
            }
            ResponseKind::Opaque => {}
        }
    }

    /// Flush whatever is left once the body has ended or been dropped.
    ///
    /// Runs at most once.
    pub fn finish(&mut self, tracker: &UsageTracker) {
        if std::mem::replace(&mut self.finished, true) {
            return;
        }
        let remainder = std::mem::take(&mut self.buffer);
        if self.overflowed {
            trace!(kind = ?self.kind, "Skipping usage extraction for oversized body");
            self.overflowed = false;
            return;
        }
        match self.kind {
            ResponseKind::EventStream => observe_event_line(&remainder, tracker),
            ResponseKind::Json => {
                if let Some(usage) = parse_usage(&remainder) {
                    tracker.record(&usage);
                }
            }
            ResponseKind::Opaque => {}
        }
    }

    fn observe_event_stream(&mut self, chunk: &[u8], tracker: &UsageTracker) {
        let mut rest = chunk;
        while let Some(newline) = rest.iter().position(|byte| *byte == b'\n') {
            let (head, tail) = rest.split_at(newline);
            rest = &tail[1..];

            if self.overflowed {
                self.overflowed = false;
                self.buffer.clear();
            } else if self.buffer.is_empty() {
                observe_event_line(head, tracker);
            } else {
                self.buffer.extend_from_slice(head);
                let line = std::mem::take(&mut self.buffer);
                observe_event_line(&line, tracker);
            }
        }
        self.capture(rest, MAX_EVENT_LINE);
    }

    fn capture(&mut self, bytes: &[u8], cap: usize) {
        if self.overflowed || bytes.is_empty() {
            return;
        }
        if self.buffer.len() + bytes.len() > cap {
            self.overflowed = true;
            self.buffer = Vec::new();
            return;
        }
        self.buffer.extend_from_slice(bytes);
    }
}

fn observe_event_line(line: &[u8], tracker: &UsageTracker) {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let Some(payload) = line.strip_prefix(b"data:") else {
        return;
    };
    let payload = payload.strip_prefix(b" ").unwrap_or(payload);
    if payload == DONE_SENTINEL {
        return;
    }
    if let Some(usage) = parse_usage(payload) {
        tracker.record(&usage);
    }
}

fn parse_usage(body: &[u8]) -> Option<Usage> {
    serde_json::from_slice::<UsageEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.usage)
}
