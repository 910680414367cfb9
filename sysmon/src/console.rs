//! Bounded, filtered buffer of captured console output.
//!
//! Every producer of console lines (the stdout/stderr pumps and the tracing
//! capture layer) is handed a [`LineSink`]. [`ConsoleSink`] is the in-memory
//! implementation the dashboard reads from.

use crate::lock_utils::lock_quiet as lock;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

pub const DEFAULT_CONSOLE_LINES: usize = 100;

/// Where a captured line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleSource {
    Stdout,
    Stderr,
    Log,
}

impl fmt::Display for ConsoleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConsoleSource::Stdout => "stdout",
            ConsoleSource::Stderr => "stderr",
            ConsoleSource::Log => "log",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleLine {
    pub text: String,
    /// Local wall-clock time, `HH:MM:SS`.
    pub timestamp: String,
    #[serde(rename = "type")]
    pub source: ConsoleSource,
}

/// Destination for console lines.
pub trait LineSink: Send + Sync {
    fn write(&self, text: &str, source: ConsoleSource);

    /// Decode `bytes` lossily and write the result.
    fn write_bytes(&self, bytes: &[u8], source: ConsoleSource) {
        self.write(&String::from_utf8_lossy(bytes), source);
    }
}

/// Thread-safe ring of [`ConsoleLine`]s with write-time substring filtering.
pub struct ConsoleSink {
    lines: Mutex<VecDeque<ConsoleLine>>,
    capacity: usize,
    filters: Vec<String>,
}

impl ConsoleSink {
    /// A capacity of zero is bumped to one. Empty filter strings are ignored,
    /// since they would match every line.
    pub fn new(capacity: usize, filters: Vec<String>) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            filters: filters.into_iter().filter(|f| !f.is_empty()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        lock(&self.lines).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `text` contains one of the configured filters and will not be stored.
    pub fn is_filtered(&self, text: &str) -> bool {
        matches_any(text, &self.filters)
    }

    /// Copy of the retained lines, oldest first. Does not remove anything.
    pub fn lines(&self) -> Vec<ConsoleLine> {
        lock(&self.lines).iter().cloned().collect()
    }

    /// Remove and return every retained line.
    pub fn read_and_clear(&self) -> Vec<ConsoleLine> {
        lock(&self.lines).drain(..).collect()
    }

    /// Remove every retained line, returning those that contain none of `filters`.
    pub fn drain_filtered<S: AsRef<str>>(&self, filters: &[S]) -> Vec<ConsoleLine> {
        let drained: Vec<ConsoleLine> = lock(&self.lines).drain(..).collect();
        drained
            .into_iter()
            .filter(|line| !matches_any(&line.text, filters))
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.lines).clear();
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new(DEFAULT_CONSOLE_LINES, Vec::new())
    }
}

impl LineSink for ConsoleSink {
    fn write(&self, text: &str, source: ConsoleSource) {
        let text = text.trim_end_matches(['\r', '\n']);
        if text.trim().is_empty() || self.is_filtered(text) {
            return;
        }
        let line = ConsoleLine {
            text: text.to_string(),
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
            source,
        };

        let mut lines = lock(&self.lines);
        lines.push_back(line);
        if lines.len() > self.capacity {
            lines.pop_front();
        }
    }
}

fn matches_any<S: AsRef<str>>(text: &str, filters: &[S]) -> bool {
    filters.iter().any(|f| {
        let f = f.as_ref();
        !f.is_empty() && text.contains(f)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn sink(capacity: usize, filters: &[&str]) -> ConsoleSink {
        ConsoleSink::new(capacity, filters.iter().map(|s| s.to_string()).collect())
    }

    fn texts(lines: &[ConsoleLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn blank_writes_are_ignored() {
        let s = sink(10, &[]);
        s.write("", ConsoleSource::Stdout);
        s.write("   ", ConsoleSource::Stdout);
        s.write("\n", ConsoleSource::Stderr);
        s.write("\t\r\n", ConsoleSource::Log);
        assert!(s.is_empty());
    }

    #[test]
    fn records_text_source_and_timestamp() {
        let s = sink(10, &[]);
        s.write("hello\n", ConsoleSource::Stderr);
        let lines = s.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "hello");
        assert_eq!(lines[0].source, ConsoleSource::Stderr);
        assert!(chrono::NaiveTime::parse_from_str(&lines[0].timestamp, "%H:%M:%S").is_ok());
    }

    #[test]
    fn filtered_lines_are_never_stored() {
        let s = sink(10, &["GET /update_data", "secret"]);
        s.write("127.0.0.1 - - \"GET /update_data HTTP/1.1\" 200", ConsoleSource::Log);
        s.write("keep me", ConsoleSource::Stdout);
        s.write("a SECRET is case-sensitive", ConsoleSource::Stdout);
        s.write("the secret word", ConsoleSource::Stdout);

        assert_eq!(texts(&s.lines()), vec!["keep me", "a SECRET is case-sensitive"]);
        assert_eq!(texts(&s.read_and_clear()), vec!["keep me", "a SECRET is case-sensitive"]);
        assert!(s.lines().is_empty());
    }

    #[test]
    fn filters_are_literal_not_patterns() {
        let s = sink(10, &["a.c"]);
        s.write("abc", ConsoleSource::Stdout);
        s.write("xa.cx", ConsoleSource::Stdout);
        assert_eq!(texts(&s.lines()), vec!["abc"]);
    }

    #[test]
    fn empty_filter_does_not_drop_everything() {
        let s = sink(10, &[""]);
        s.write("line", ConsoleSource::Stdout);
        assert_eq!(s.len(), 1);
        assert!(s.filters().is_empty());
    }

    #[test]
    fn overflow_evicts_oldest_and_counts_unfiltered() {
        let s = sink(5, &["noise"]);
        let mut kept = Vec::new();
        for i in 0..23 {
            let text = if i % 3 == 0 {
                format!("noise {i}")
            } else {
                let t = format!("line {i}");
                kept.push(t.clone());
                t
            };
            s.write(&text, ConsoleSource::Stdout);
            assert!(s.len() <= 5);
        }
        let drained = s.read_and_clear();
        let expected: Vec<&str> = kept[kept.len() - 5..].iter().map(String::as_str).collect();
        assert_eq!(texts(&drained), expected);
    }

    #[test]
    fn peek_does_not_remove() {
        let s = sink(10, &[]);
        s.write("one", ConsoleSource::Stdout);
        assert_eq!(s.lines().len(), 1);
        assert_eq!(s.lines().len(), 1);
        s.clear();
        assert!(s.lines().is_empty());
    }

    #[test]
    fn drain_filtered_excludes_extra_filters_and_empties() {
        let s = sink(10, &[]);
        s.write("GET /", ConsoleSource::Log);
        s.write("Leberwurst", ConsoleSource::Stdout);
        s.write("plain", ConsoleSource::Stdout);
        let out = s.drain_filtered(&["GET", "Leberwurst"]);
        assert_eq!(texts(&out), vec!["plain"]);
        assert!(s.is_empty());
    }

    #[test]
    fn malformed_bytes_are_replaced() {
        let s = sink(10, &[]);
        s.write_bytes(b"caf\xff\xfe ok", ConsoleSource::Stderr);
        assert_eq!(s.lines()[0].text, "caf\u{FFFD}\u{FFFD} ok");
    }

    #[test]
    fn source_serializes_as_type() {
        let line = ConsoleLine {
            text: "x".into(),
            timestamp: "12:00:00".into(),
            source: ConsoleSource::Log,
        };
        let value = serde_json::to_value(&line).unwrap();
        assert_eq!(value, serde_json::json!({"text": "x", "timestamp": "12:00:00", "type": "log"}));
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let s = Arc::new(sink(10_000, &["drop"]));
        let writers = 8;
        let per_writer = 200;
        let handles: Vec<_> = (0..writers)
            .map(|w| {
                let s = Arc::clone(&s);
                thread::spawn(move || {
                    for i in 0..per_writer {
                        s.write(&format!("w{w} line {i}"), ConsoleSource::Stdout);
                        s.write(&format!("w{w} drop {i}"), ConsoleSource::Stderr);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let lines = s.read_and_clear();
        assert_eq!(lines.len(), writers * per_writer);
        for w in 0..writers {
            let prefix = format!("w{w} line ");
            let seq: Vec<usize> = lines
                .iter()
                .filter_map(|l| l.text.strip_prefix(&prefix))
                .map(|n| n.parse().unwrap())
                .collect();
            assert_eq!(seq, (0..per_writer).collect::<Vec<_>>());
        }
    }

    #[test]
    fn poisoned_buffer_recovers_under_capture_layer() {
        use crate::logging::ConsoleLayer;
        use std::sync::mpsc;
        use std::time::Duration;
        use tracing_subscriber::layer::SubscriberExt;

        let s = Arc::new(sink(10, &[]));
        s.write("before panic", ConsoleSource::Stdout);
        let poisoner = Arc::clone(&s);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lines.lock().unwrap();
            panic!("intentional panic to poison the console buffer");
        })
        .join();
        assert!(s.lines.is_poisoned());

        let (tx, rx) = mpsc::channel();
        let reader = Arc::clone(&s);
        thread::spawn(move || {
            let layer_sink: Arc<dyn LineSink> = reader.clone();
            let subscriber = tracing_subscriber::registry().with(ConsoleLayer::new(layer_sink));
            tracing::subscriber::with_default(subscriber, || {
                let lines = reader.lines();
                reader.write("after panic", ConsoleSource::Stderr);
                let _ = tx.send((lines, reader.lines()));
            });
        });

        let (before, after) = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("console reads must not block after a poisoned write");
        assert_eq!(texts(&before), vec!["before panic"]);
        assert_eq!(texts(&after), vec!["before panic", "after panic"]);
    }

    #[test]
    fn concurrent_writers_respect_capacity() {
        let s = Arc::new(sink(16, &[]));
        let handles: Vec<_> = (0..4)
            .map(|w| {
                let s = Arc::clone(&s);
                thread::spawn(move || {
                    for i in 0..500 {
                        s.write(&format!("{w}:{i}"), ConsoleSource::Log);
                        assert!(s.len() <= 16);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(s.len(), 16);
    }
}
