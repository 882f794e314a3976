//! Batched delivery of captured records to the collector.
//!
//! Records are queued in memory and flushed as NDJSON once per interval.
//! Batches that cannot be delivered are appended to a per-stream retry buffer
//! on disk. The buffer is replayed ahead of fresh records, in chunks bounded
//! by [`ShipperConfig::max_batch_bytes`], and shrinks as chunks land.

use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, warn};
use vibelog_logs::Record;
use vibelog_logs::paths::APP_DIR;
use vibelog_logs::sanitize_name;

use crate::error::ShipError;

/// File extension of retry buffers.
pub const BUFFER_EXTENSION: &str = "buffer";

/// Default upper bound for one request body, well under the collector's limit.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 1024 * 1024;

/// Status the collector answers with when a body exceeds its limit.
const PAYLOAD_TOO_LARGE: u16 = 413;

/// Destination of shipped batches.
pub trait IngestSink: Send + Sync {
    /// Delivers one NDJSON body to stream `name`.
    fn ingest<'a>(
        &'a self,
        name: &'a str,
        body: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), ShipError>> + Send + 'a>>;
}

/// Called after a failed delivery, before backing off.
pub trait FailureHook: Send + Sync {
    /// Reacts to a delivery failure.
    fn on_delivery_failure(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Resolves the retry buffer directory from the process environment.
#[must_use]
pub fn retry_buffer_directory() -> PathBuf {
    let home = std::env::var_os("HOME").or_else(|| dirs::home_dir().map(PathBuf::into_os_string));
    retry_buffer_directory_from(
        std::env::var_os("XDG_CACHE_HOME").as_deref(),
        home.as_deref(),
    )
}

/// `$XDG_CACHE_HOME/vibelog` when set and non-empty, otherwise
/// `$HOME/.cache/vibelog`.
#[must_use]
pub fn retry_buffer_directory_from(xdg_cache_home: Option<&OsStr>, home: Option<&OsStr>) -> PathBuf {
    match xdg_cache_home.filter(|v| !v.is_empty()) {
        Some(cache) => PathBuf::from(cache).join(APP_DIR),
        None => PathBuf::from(home.filter(|v| !v.is_empty()).unwrap_or(OsStr::new("/tmp")))
            .join(".cache")
            .join(APP_DIR),
    }
}

/// Shipper configuration.
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Time between flush cycles.
    pub flush_interval: Duration,
    /// Pause before the next delivery attempt after a failure.
    pub retry_backoff: Duration,
    /// Directory holding retry buffers.
    pub buffer_dir: PathBuf,
    /// Largest body sent in one request. Single longer lines go alone.
    pub max_batch_bytes: usize,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self::new(retry_buffer_directory())
    }
}

impl ShipperConfig {
    /// Default timings with buffers under `buffer_dir`.
    #[must_use]
    pub fn new(buffer_dir: impl Into<PathBuf>) -> Self {
        Self {
            flush_interval: Duration::from_millis(100),
            retry_backoff: Duration::from_secs(1),
            buffer_dir: buffer_dir.into(),
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }

    /// Set the flush interval.
    #[must_use]
    pub const fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the retry backoff.
    #[must_use]
    pub const fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the request body bound.
    #[must_use]
    pub const fn with_max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes;
        self
    }
}

/// Undelivered NDJSON for one stream.
#[derive(Debug, Clone)]
pub struct RetryBuffer {
    path: PathBuf,
}

impl RetryBuffer {
    /// The buffer for stream `name` under `dir`.
    #[must_use]
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!("{name}.{BUFFER_EXTENSION}")),
        }
    }

    /// The buffer file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the buffer file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Appends an NDJSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn append(&self, body: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(body.as_bytes())
    }

    /// Reads the buffered content, `None` when there is nothing buffered.
    ///
    /// Invalid UTF-8 (a write torn by a crash) is replaced rather than failing
    /// the whole read.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn read(&self) -> io::Result<Option<String>> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replaces the buffer with `rest`, deleting it when `rest` is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement cannot be written.
    pub fn rewrite(&self, rest: &str) -> io::Result<()> {
        if rest.is_empty() {
            return self.clear();
        }
        let tmp = self.path.with_extension(format!("{BUFFER_EXTENSION}.tmp"));
        fs::write(&tmp, rest)?;
        fs::rename(&tmp, &self.path)
    }

    /// Deletes the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be removed.
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Serializes records as NDJSON, one line each.
fn to_ndjson(records: &[Record]) -> String {
    let mut body = String::new();
    for record in records {
        match record.to_line() {
            Ok(line) => {
                body.push_str(&line);
                body.push('\n');
            }
            Err(e) => warn!(error = %e, "Dropping unserializable record"),
        }
    }
    body
}

/// Splits `text` into line-aligned ranges of at most `max` bytes.
///
/// A line longer than `max` becomes a range of its own.
fn chunk_ranges(text: &str, max: usize) -> Vec<Range<usize>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for line in text.split_inclusive('\n') {
        if end > start && end - start + line.len() > max {
            chunks.push(start..end);
            start = end;
        }
        end += line.len();
    }
    if end > start {
        chunks.push(start..end);
    }
    chunks
}

/// Splits a multi-line range at its middle line boundary.
fn split_range(text: &str, range: &Range<usize>) -> Option<(Range<usize>, Range<usize>)> {
    let starts: Vec<usize> = text[range.clone()]
        .match_indices('\n')
        .map(|(i, _)| range.start + i + 1)
        .filter(|&at| at < range.end)
        .collect();
    let mid = *starts.get(starts.len() / 2)?;
    Some((range.start..mid, mid..range.end))
}

/// Result of delivering a body chunk by chunk.
#[derive(Debug)]
struct Delivery {
    /// Leading bytes that are done with, delivered or dropped.
    settled: usize,
    /// The failure that stopped delivery, if any.
    failure: Option<ShipError>,
}

/// Queues records for one stream and delivers them in batches.
pub struct BatchShipper {
    name: String,
    config: ShipperConfig,
    sink: Arc<dyn IngestSink>,
    hook: Option<Arc<dyn FailureHook>>,
    buffer: RetryBuffer,
    pending: Mutex<Vec<Record>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for BatchShipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchShipper")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("buffer", &self.buffer)
            .field("pending", &self.pending.lock().len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl BatchShipper {
    /// Create a shipper for stream `name`. The name is sanitized.
    #[must_use]
    pub fn new(name: &str, config: ShipperConfig, sink: Arc<dyn IngestSink>) -> Self {
        let name = sanitize_name(name);
        let buffer = RetryBuffer::new(&config.buffer_dir, &name);
        Self {
            name,
            config,
            sink,
            hook: None,
            buffer,
            pending: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Set the delivery failure hook.
    #[must_use]
    pub fn with_failure_hook(mut self, hook: Arc<dyn FailureHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// The sanitized stream name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The retry buffer of this stream.
    #[must_use]
    pub const fn buffer(&self) -> &RetryBuffer {
        &self.buffer
    }

    /// Queues a record for the next flush.
    pub fn enqueue(&self, record: Record) {
        self.pending.lock().push(record);
    }

    /// Number of queued records.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Stops the flush loop once the queue has drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Returns true once [`Self::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Spawns the flush loop.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Flush loop. Returns after [`Self::close`] once the queue is empty.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.config.flush_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut backoff_until: Option<Instant> = None;
        // Buffer left over from an earlier session is replayed on the first cycle.
        let mut buffer_dirty = self.buffer.exists();

        loop {
            ticker.tick().await;
            let closing = self.is_closed();
            let batch = std::mem::take(&mut *self.pending.lock());
            let body = to_ndjson(&batch);

            let backing_off = backoff_until.is_some_and(|until| Instant::now() < until);
            if backing_off && !closing {
                if !body.is_empty() {
                    self.stash(&body);
                    buffer_dirty = true;
                }
                continue;
            }
            backoff_until = None;

            if buffer_dirty {
                match self.replay_buffer().await {
                    Ok(true) => buffer_dirty = false,
                    Ok(false) => {
                        // Older records are still waiting, keep order behind them.
                        self.stash(&body);
                        backoff_until = Some(self.after_failure().await);
                        if closing && self.pending.lock().is_empty() {
                            break;
                        }
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, buffer = %self.buffer.path().display(), "Failed to read retry buffer");
                    }
                }
            }

            if !body.is_empty() {
                let delivery = self.deliver(&body).await;
                if let Some(e) = delivery.failure {
                    let rest = &body[delivery.settled..];
                    warn!(stream = %self.name, error = %e, lines = rest.lines().count(), "Delivery failed, buffering");
                    self.stash(rest);
                    buffer_dirty = true;
                    backoff_until = Some(self.after_failure().await);
                }
            }

            if closing && self.pending.lock().is_empty() {
                break;
            }
        }
    }

    /// Replays the retry buffer. Returns true once it is fully delivered.
    async fn replay_buffer(&self) -> io::Result<bool> {
        let Some(buffered) = self.buffer.read()? else {
            return Ok(true);
        };
        let delivery = self.deliver(&buffered).await;
        let rest = &buffered[delivery.settled..];
        if let Err(e) = self.buffer.rewrite(rest) {
            warn!(stream = %self.name, error = %e, "Failed to update retry buffer");
        }
        match delivery.failure {
            None => {
                debug!(stream = %self.name, bytes = buffered.len(), "Replayed retry buffer");
                Ok(true)
            }
            Some(e) => {
                warn!(stream = %self.name, error = %e, bytes = rest.len(), "Buffer replay failed");
                Ok(false)
            }
        }
    }

    /// Sends `ndjson` in bounded chunks, in order, stopping at the first
    /// failure. Rejected oversized chunks are split and retried.
    async fn deliver(&self, ndjson: &str) -> Delivery {
        let mut queue: VecDeque<Range<usize>> =
            chunk_ranges(ndjson, self.config.max_batch_bytes.max(1)).into();
        let mut settled = 0;

        while let Some(range) = queue.pop_front() {
            let chunk = &ndjson[range.clone()];
            match self.sink.ingest(&self.name, chunk.to_string()).await {
                Ok(()) => {
                    debug!(stream = %self.name, lines = chunk.lines().count(), "Shipped batch");
                    settled = range.end;
                }
                Err(ShipError::Status(PAYLOAD_TOO_LARGE)) => match split_range(ndjson, &range) {
                    Some((head, tail)) => {
                        queue.push_front(tail);
                        queue.push_front(head);
                    }
                    None => {
                        warn!(stream = %self.name, bytes = chunk.len(), "Dropping record larger than the collector accepts");
                        settled = range.end;
                    }
                },
                Err(e) => {
                    return Delivery {
                        settled,
                        failure: Some(e),
                    };
                }
            }
        }
        Delivery {
            settled,
            failure: None,
        }
    }

    /// Runs the failure hook and returns the end of the backoff.
    async fn after_failure(&self) -> Instant {
        if let Some(hook) = &self.hook {
            hook.on_delivery_failure().await;
        }
        Instant::now() + self.config.retry_backoff
    }

    fn stash(&self, body: &str) {
        if body.is_empty() {
            return;
        }
        if let Err(e) = self.buffer.append(body) {
            warn!(stream = %self.name, error = %e, "Failed to write retry buffer, dropping batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CollectorClient;
    use crate::test_support::start_collector;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use vibelog_logs::MessageLevel;
    use vibelog_server::DEFAULT_BODY_LIMIT;

    #[derive(Default)]
    struct MockSink {
        fail_first: AtomicUsize,
        reject_over: Option<usize>,
        attempts: AtomicUsize,
        delivered: Mutex<Vec<(String, String)>>,
    }

    impl MockSink {
        fn failing(times: usize) -> Self {
            Self {
                fail_first: AtomicUsize::new(times),
                ..Self::default()
            }
        }

        fn limited(max_body: usize) -> Self {
            Self {
                reject_over: Some(max_body),
                ..Self::default()
            }
        }

        fn delivered_messages(&self) -> Vec<Vec<String>> {
            self.delivered
                .lock()
                .iter()
                .map(|(_, body)| body.lines().map(message_of).collect())
                .collect()
        }
    }

    impl IngestSink for MockSink {
        fn ingest<'a>(
            &'a self,
            name: &'a str,
            body: String,
        ) -> Pin<Box<dyn Future<Output = Result<(), ShipError>> + Send + 'a>> {
            Box::pin(async move {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                let remaining = self.fail_first.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.fail_first.store(remaining - 1, Ordering::SeqCst);
                    return Err(ShipError::Status(503));
                }
                if self.reject_over.is_some_and(|max| body.len() > max) {
                    return Err(ShipError::Status(413));
                }
                self.delivered.lock().push((name.to_string(), body));
                Ok(())
            })
        }
    }

    #[derive(Default)]
    struct CountingHook(AtomicUsize);

    impl FailureHook for CountingHook {
        fn on_delivery_failure(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            Box::pin(async move {
                self.0.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    fn message(i: i64) -> Record {
        Record::message(i, MessageLevel::Info, format!("m{i}"), None)
    }

    fn message_of(line: &str) -> String {
        match Record::from_line(line).map(|r| r.payload) {
            Some(vibelog_logs::Payload::Message { message, .. }) => message,
            other => format!("unexpected: {other:?}"),
        }
    }

    fn config(dir: &TempDir) -> ShipperConfig {
        ShipperConfig::new(dir.path())
            .with_flush_interval(Duration::from_millis(10))
            .with_retry_backoff(Duration::from_millis(50))
    }

    #[test]
    fn buffer_directory_resolution() {
        assert_eq!(
            retry_buffer_directory_from(Some(OsStr::new("/cache")), Some(OsStr::new("/home/u"))),
            PathBuf::from("/cache/vibelog")
        );
        assert_eq!(
            retry_buffer_directory_from(Some(OsStr::new("")), Some(OsStr::new("/home/u"))),
            PathBuf::from("/home/u/.cache/vibelog")
        );
        assert_eq!(
            retry_buffer_directory_from(None, None),
            PathBuf::from("/tmp/.cache/vibelog")
        );
    }

    #[test]
    fn chunks_follow_line_boundaries() {
        let text = "aa\nbb\ncc\n";
        assert_eq!(chunk_ranges(text, 6), vec![0..6, 6..9]);
        assert_eq!(chunk_ranges(text, 100), vec![0..9]);
        assert_eq!(chunk_ranges(text, 1), vec![0..3, 3..6, 6..9]);
        assert_eq!(chunk_ranges("", 10), Vec::<Range<usize>>::new());
        assert_eq!(chunk_ranges("aa\nbb", 4), vec![0..3, 3..5]);
    }

    #[test]
    fn ranges_split_at_middle_line() {
        let text = "a\nb\nc\nd\n";
        assert_eq!(split_range(text, &(0..8)), Some((0..4, 4..8)));
        assert_eq!(split_range(text, &(2..6)), Some((2..4, 4..6)));
        assert_eq!(split_range(text, &(0..2)), None);
    }

    #[test]
    fn retry_buffer_rewrite_keeps_tail() {
        let dir = TempDir::new().unwrap();
        let buffer = RetryBuffer::new(dir.path(), "demo");
        buffer.append("a\nb\n").unwrap();

        buffer.rewrite("b\n").unwrap();
        assert_eq!(buffer.read().unwrap().as_deref(), Some("b\n"));
        buffer.rewrite("").unwrap();
        assert!(!buffer.exists());
    }

    #[test]
    fn retry_buffer_read_replaces_torn_bytes() {
        let dir = TempDir::new().unwrap();
        let buffer = RetryBuffer::new(dir.path(), "demo");
        std::fs::write(buffer.path(), b"ok\n\xE2\x82").unwrap();

        let content = buffer.read().unwrap().unwrap();
        assert!(content.starts_with("ok\n"));
        assert!(content.contains('\u{FFFD}'));
    }

    #[test]
    fn retry_buffer_append_read_clear() {
        let dir = TempDir::new().unwrap();
        let buffer = RetryBuffer::new(&dir.path().join("nested"), "demo");

        assert_eq!(buffer.read().unwrap(), None);
        buffer.append("a\n").unwrap();
        buffer.append("b\n").unwrap();
        assert_eq!(buffer.read().unwrap().as_deref(), Some("a\nb\n"));
        assert!(buffer.path().ends_with("nested/demo.buffer"));

        buffer.clear().unwrap();
        assert!(!buffer.exists());
        buffer.clear().unwrap();
    }

    #[tokio::test]
    async fn one_interval_yields_one_ordered_call() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MockSink::default());
        let shipper = Arc::new(BatchShipper::new("My App", config(&dir), sink.clone()));
        assert_eq!(shipper.name(), "my_app");

        for i in 0..5 {
            shipper.enqueue(message(i));
        }
        shipper.close();
        shipper.clone().run().await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
        let delivered = sink.delivered.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "my_app");
        assert_eq!(sink.delivered_messages(), vec![vec!["m0", "m1", "m2", "m3", "m4"]]);
        assert_eq!(shipper.pending_len(), 0);
    }

    #[tokio::test]
    async fn failed_batch_is_buffered_and_replayed_first() {
        let dir = TempDir::new().unwrap();
        let hook = Arc::new(CountingHook::default());

        let failing = Arc::new(MockSink::failing(usize::MAX));
        let first = Arc::new(
            BatchShipper::new("demo", config(&dir), failing.clone())
                .with_failure_hook(hook.clone()),
        );
        first.enqueue(message(1));
        first.enqueue(message(2));
        first.close();
        first.clone().run().await;

        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
        assert!(failing.delivered.lock().is_empty());
        assert!(first.buffer().exists());

        let sink = Arc::new(MockSink::default());
        let second = Arc::new(BatchShipper::new("demo", config(&dir), sink.clone()));
        second.enqueue(message(3));
        second.close();
        second.clone().run().await;

        assert_eq!(sink.delivered_messages(), vec![vec!["m1", "m2"], vec!["m3"]]);
        assert!(!second.buffer().exists());
    }

    #[tokio::test]
    async fn leftover_buffer_replays_without_new_records() {
        let dir = TempDir::new().unwrap();
        let buffer = RetryBuffer::new(dir.path(), "demo");
        buffer.append(&to_ndjson(&[message(7)])).unwrap();

        let sink = Arc::new(MockSink::default());
        let shipper = Arc::new(BatchShipper::new("demo", config(&dir), sink.clone()));
        shipper.close();
        shipper.clone().run().await;

        assert_eq!(sink.delivered_messages(), vec![vec!["m7"]]);
        assert!(!buffer.exists());
    }

    #[tokio::test]
    async fn backoff_buffers_then_delivers_in_order() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MockSink::failing(1));
        let shipper = Arc::new(BatchShipper::new("demo", config(&dir), sink.clone()));

        shipper.enqueue(message(1));
        let handle = shipper.spawn();
        for _ in 0..100 {
            if sink.attempts.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        shipper.enqueue(message(2));

        // Let the backoff elapse so the retry happens before close.
        tokio::time::sleep(Duration::from_millis(120)).await;
        shipper.enqueue(message(3));
        shipper.close();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        let all: Vec<String> = sink.delivered_messages().into_iter().flatten().collect();
        assert_eq!(all, vec!["m1", "m2", "m3"]);
        assert!(!shipper.buffer().exists());
    }

    #[tokio::test]
    async fn replay_and_fresh_batches_stay_bounded() {
        let dir = TempDir::new().unwrap();
        let buffer = RetryBuffer::new(dir.path(), "demo");
        buffer.append(&to_ndjson(&(0..40).map(message).collect::<Vec<_>>())).unwrap();

        let sink = Arc::new(MockSink::default());
        let config = config(&dir).with_max_batch_bytes(256);
        let shipper = Arc::new(BatchShipper::new("demo", config, sink.clone()));
        shipper.enqueue(message(40));
        shipper.close();
        shipper.clone().run().await;

        let bodies = sink.delivered.lock().clone();
        assert!(bodies.len() > 2);
        assert!(bodies.iter().all(|(_, body)| body.len() <= 256));
        let all: Vec<String> = sink.delivered_messages().into_iter().flatten().collect();
        let expected: Vec<String> = (0..=40).map(|i| format!("m{i}")).collect();
        assert_eq!(all, expected);
        assert!(!buffer.exists());
    }

    #[tokio::test]
    async fn rejected_large_batch_is_split() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MockSink::limited(200));
        let shipper = Arc::new(BatchShipper::new("demo", config(&dir), sink.clone()));
        for i in 0..20 {
            shipper.enqueue(message(i));
        }
        shipper.close();
        shipper.clone().run().await;

        let all: Vec<String> = sink.delivered_messages().into_iter().flatten().collect();
        let expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
        assert_eq!(all, expected);
        assert!(!shipper.buffer().exists());
    }

    #[tokio::test]
    async fn record_over_collector_limit_is_dropped() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MockSink::limited(200));
        let shipper = Arc::new(BatchShipper::new("demo", config(&dir), sink.clone()));
        shipper.enqueue(message(1));
        shipper.enqueue(Record::message(2, MessageLevel::Info, "x".repeat(500), None));
        shipper.enqueue(message(3));
        shipper.close();
        shipper.clone().run().await;

        let all: Vec<String> = sink.delivered_messages().into_iter().flatten().collect();
        assert_eq!(all, vec!["m1", "m3"]);
        assert!(!shipper.buffer().exists());
    }

    #[tokio::test]
    async fn partial_replay_keeps_undelivered_tail() {
        let dir = TempDir::new().unwrap();
        let buffer = RetryBuffer::new(dir.path(), "demo");
        buffer.append(&to_ndjson(&(0..10).map(message).collect::<Vec<_>>())).unwrap();

        let sink = Arc::new(MockSink::default());
        // Each record is its own chunk; the third request fails.
        let flaky = Arc::new(FlakySink {
            inner: sink.clone(),
            fail_at: 2,
            calls: AtomicUsize::new(0),
        });
        let config = config(&dir).with_max_batch_bytes(1);
        let shipper = Arc::new(BatchShipper::new("demo", config, flaky));
        shipper.close();
        shipper.clone().run().await;

        assert_eq!(sink.delivered_messages(), vec![vec!["m0"], vec!["m1"]]);
        let rest = buffer.read().unwrap().unwrap();
        let left: Vec<String> = rest.lines().map(message_of).collect();
        let expected: Vec<String> = (2..10).map(|i| format!("m{i}")).collect();
        assert_eq!(left, expected);
    }

    struct FlakySink {
        inner: Arc<MockSink>,
        fail_at: usize,
        calls: AtomicUsize,
    }

    impl IngestSink for FlakySink {
        fn ingest<'a>(
            &'a self,
            name: &'a str,
            body: String,
        ) -> Pin<Box<dyn Future<Output = Result<(), ShipError>> + Send + 'a>> {
            Box::pin(async move {
                if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_at {
                    return Err(ShipError::Status(503));
                }
                self.inner.ingest(name, body).await
            })
        }
    }

    #[tokio::test]
    async fn torn_buffer_still_delivers_valid_records() {
        let dir = TempDir::new().unwrap();
        let buffer = RetryBuffer::new(dir.path(), "demo");
        let mut bytes = to_ndjson(&[message(1)]).into_bytes();
        bytes.extend_from_slice(&[0xE2, 0x82]);
        std::fs::write(buffer.path(), bytes).unwrap();

        let sink = Arc::new(MockSink::default());
        let shipper = Arc::new(BatchShipper::new("demo", config(&dir), sink.clone()));
        shipper.enqueue(Record::message(2, MessageLevel::Info, "fresh", None));
        shipper.close();
        shipper.clone().run().await;

        let all: Vec<String> = sink.delivered_messages().into_iter().flatten().collect();
        assert_eq!(all.first().map(String::as_str), Some("m1"));
        assert_eq!(all.last().map(String::as_str), Some("fresh"));
        assert!(!buffer.exists());
    }

    #[tokio::test]
    async fn unreadable_buffer_is_not_cleared() {
        let dir = TempDir::new().unwrap();
        let buffer = RetryBuffer::new(dir.path(), "demo");
        // A directory in place of the file makes reads fail.
        std::fs::create_dir_all(buffer.path().join("held")).unwrap();

        let sink = Arc::new(MockSink::default());
        let shipper = Arc::new(BatchShipper::new("demo", config(&dir), sink.clone()));
        shipper.enqueue(message(1));
        shipper.close();
        shipper.clone().run().await;

        assert_eq!(sink.delivered_messages(), vec![vec!["m1"]]);
        assert!(buffer.path().join("held").exists());
    }

    #[tokio::test]
    async fn oversized_buffer_drains_into_collector() {
        let collector = start_collector().await;
        let client = Arc::new(CollectorClient::new(&collector.url).unwrap());
        let dir = TempDir::new().unwrap();
        let buffer = RetryBuffer::new(dir.path(), "demo");

        let filler = "x".repeat(1024);
        let records: Vec<Record> = (0..11 * 1024)
            .map(|i| Record::message(i, MessageLevel::Info, filler.clone(), None))
            .collect();
        let buffered = to_ndjson(&records);
        assert!(buffered.len() > DEFAULT_BODY_LIMIT);
        buffer.append(&buffered).unwrap();

        let config = ShipperConfig::new(dir.path()).with_flush_interval(Duration::from_millis(10));
        let shipper = Arc::new(BatchShipper::new("demo", config, client));
        shipper.enqueue(Record::message(1, MessageLevel::Info, "fresh", None));
        shipper.close();
        tokio::time::timeout(Duration::from_secs(30), shipper.clone().run())
            .await
            .unwrap();

        assert!(!buffer.exists());
        let state = collector.server.state();
        let info = state.store().get("demo").unwrap();
        assert_eq!(info.line_count, records.len() as u64 + 1);
        let stored = std::fs::read_to_string(state.store().path_for("demo")).unwrap();
        assert_eq!(stored.lines().last().map(message_of).as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn close_with_empty_queue_returns() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MockSink::default());
        let shipper = Arc::new(BatchShipper::new("idle", config(&dir), sink.clone()));
        shipper.close();

        tokio::time::timeout(Duration::from_secs(1), shipper.clone().run())
            .await
            .unwrap();
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 0);
    }
}
