//! Consumers of session progress and output.
//!
//! The orchestrator never writes output itself. After each attempt it
//! hands an [`AttemptProgress`] to a [`ProgressSink`]; every admitted record
//! goes to a [`RecordSink`] in admission order, followed by the final
//! [`SessionResult`] exactly once.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use shopscout_collect_models::{AttemptProgress, SessionResult};
use shopscout_product_models::ProductRecord;
use shopscout_source::progress::ProgressCallback;

/// Errors raised while writing records or results.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Receives one notification per attempt.
pub trait ProgressSink: Send + Sync {
    /// Called after every attempt has been evaluated.
    fn on_attempt(&self, progress: &AttemptProgress);

    /// Called once when the session ends.
    fn on_finish(&self, _result: &SessionResult) {}
}

/// Ignores all progress.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_attempt(&self, _progress: &AttemptProgress) {}
}

/// Drives a [`ProgressCallback`] (e.g. an `indicatif` bar) from attempt
/// notifications.
pub struct CallbackProgressSink {
    callback: Arc<dyn ProgressCallback>,
    sized: AtomicBool,
}

impl CallbackProgressSink {
    #[must_use]
    pub const fn new(callback: Arc<dyn ProgressCallback>) -> Self {
        Self {
            callback,
            sized: AtomicBool::new(false),
        }
    }
}

impl ProgressSink for CallbackProgressSink {
    fn on_attempt(&self, progress: &AttemptProgress) {
        if !self.sized.swap(true, Ordering::Relaxed) {
            self.callback.set_total(progress.global_target);
        }
        self.callback.set_position(progress.total_so_far);
        self.callback.set_message(format!(
            "attempt {}/{}",
            progress.attempt_number, progress.max_attempts
        ));
    }

    fn on_finish(&self, result: &SessionResult) {
        self.callback.finish(format!(
            "{}: {} records in {} attempt(s)",
            result.outcome,
            result.total(),
            result.attempts_used
        ));
    }
}

/// Receives admitted records as they arrive and the final result.
pub trait RecordSink: Send {
    /// Called once per admitted record, in admission order.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the record could not be written.
    fn accept(&mut self, record: &ProductRecord) -> Result<(), SinkError>;

    /// Called once with the final result.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the result could not be written.
    fn finish(&mut self, result: &SessionResult) -> Result<(), SinkError>;
}

/// Discards everything.
pub struct NullRecordSink;

impl RecordSink for NullRecordSink {
    fn accept(&mut self, _record: &ProductRecord) -> Result<(), SinkError> {
        Ok(())
    }

    fn finish(&mut self, _result: &SessionResult) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub records: Vec<ProductRecord>,
    pub result: Option<SessionResult>,
}

impl RecordSink for CollectingSink {
    fn accept(&mut self, record: &ProductRecord) -> Result<(), SinkError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn finish(&mut self, result: &SessionResult) -> Result<(), SinkError> {
        self.result = Some(result.clone());
        Ok(())
    }
}

/// Streams each admitted record as one JSON line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    written: u64,
}

impl JsonLinesSink<BufWriter<File>> {
    /// Creates (or truncates) `path` and streams records into it.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the file cannot be created.
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    #[must_use]
    pub const fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Number of records written so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    fn accept(&mut self, record: &ProductRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self, _result: &SessionResult) -> Result<(), SinkError> {
        self.writer.flush()?;
        log::info!("Streamed {} record(s)", self.written);
        Ok(())
    }
}

/// Writes `result` as pretty JSON to `path`, or to stdout when `path` is
/// `None`.
///
/// # Errors
///
/// Returns [`SinkError`] if serialization or writing fails.
pub fn write_result(path: Option<&Path>, result: &SessionResult) -> Result<(), SinkError> {
    let json = serde_json::to_string_pretty(result)?;
    match path {
        Some(path) => {
            std::fs::write(path, json)?;
            log::info!("Wrote session result to {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(json.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::Utc;
    use shopscout_collect_models::{Outcome, TerminationReason};

    use super::*;

    fn record(n: u32) -> ProductRecord {
        ProductRecord {
            source: "ebay".to_string(),
            search_term: "lamp".to_string(),
            title: format!("Lamp {n}"),
            price: Some(19.99),
            currency: Some("USD".to_string()),
            url: format!("https://www.ebay.com/itm/{n}"),
            image_url: None,
            rating: None,
            review_count: None,
            availability: None,
            seller: None,
            sku: None,
            collected_at: Utc::now(),
        }
    }

    fn result() -> SessionResult {
        SessionResult {
            records: vec![record(1)],
            per_source_counts: BTreeMap::from([("ebay".to_string(), 1)]),
            attempts_used: 1,
            outcome: Outcome::Partial,
            reason: TerminationReason::AttemptsExhausted,
            elapsed: Duration::from_secs(3),
            attempts: Vec::new(),
            sources: Vec::new(),
        }
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_record() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.accept(&record(1)).unwrap();
        sink.accept(&record(2)).unwrap();
        sink.finish(&result()).unwrap();
        assert_eq!(sink.written(), 2);

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: ProductRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.title, "Lamp 2");
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl ProgressCallback for Recorder {
        fn set_total(&self, total: u64) {
            self.calls.lock().unwrap().push(format!("total {total}"));
        }
        fn set_position(&self, pos: u64) {
            self.calls.lock().unwrap().push(format!("pos {pos}"));
        }
        fn set_message(&self, msg: String) {
            self.calls.lock().unwrap().push(msg);
        }
        fn finish(&self, msg: String) {
            self.calls.lock().unwrap().push(msg);
        }
    }

    #[test]
    fn callback_sink_sizes_bar_once() {
        let recorder = Arc::new(Recorder::default());
        let sink = CallbackProgressSink::new(recorder.clone());
        for attempt in 1..=2 {
            sink.on_attempt(&AttemptProgress {
                attempt_number: attempt,
                max_attempts: 20,
                per_source_delta: BTreeMap::new(),
                total_so_far: u64::from(attempt) * 10,
                global_target: 50,
                elapsed: Duration::from_secs(1),
            });
        }
        sink.on_finish(&result());

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "total 50",
                "pos 10",
                "attempt 1/20",
                "pos 20",
                "attempt 2/20",
                "PARTIAL: 1 records in 1 attempt(s)",
            ]
        );
    }
}
