//! Progress reporting for import runs
//!
//! Every event is handed to the sink and flushed as soon as it is emitted, so
//! a caller watching a long import sees it advance instead of waiting for the
//! final result. Events are mirrored to `tracing` as well.

use super::types::ImportStats;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// Severity of a log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Stage of an import run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStage {
    Unpacking,
    Importing,
    PostProcessing,
    Done,
}

/// Events emitted while an import runs.
///
/// Serialized as internally-tagged JSON (`"type": "variant_name"`) and sent
/// with the matching event name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImportEvent {
    /// The run has started reading its document.
    Started { run_id: Option<Uuid>, source: String },

    /// A log line for the caller.
    Log { level: EventLevel, message: String },

    /// Aggregate progress snapshot.
    Progress {
        stage: ImportStage,
        records_processed: usize,
        posts_created: usize,
        posts_existing: usize,
        records_failed: usize,
        elapsed_ms: u64,
    },

    /// Terminal event.
    Complete {
        success: bool,
        error: Option<String>,
        stats: Option<ImportStats>,
    },
}

impl ImportEvent {
    /// Returns the event name this event is sent under.
    pub fn event_name(&self) -> &'static str {
        match self {
            ImportEvent::Started { .. } => "started",
            ImportEvent::Log { .. } => "log",
            ImportEvent::Progress { .. } => "progress",
            ImportEvent::Complete { .. } => "complete",
        }
    }
}

/// Destination for import events
pub trait EventSink: Send {
    /// Deliver one event. Must not buffer it past this call.
    fn send(&mut self, event: &ImportEvent) -> std::io::Result<()>;
}

/// Writes events in server-sent-events framing and flushes after each one
pub struct SseWriterSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> SseWriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> EventSink for SseWriterSink<W> {
    fn send(&mut self, event: &ImportEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;
        write!(self.writer, "event: {}\ndata: {}\n\n", event.event_name(), json)?;
        self.writer.flush()
    }
}

/// Forwards events to an async consumer
pub struct ChannelSink {
    tx: UnboundedSender<ImportEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<ImportEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn send(&mut self, event: &ImportEvent) -> std::io::Result<()> {
        self.tx.send(event.clone()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "event receiver closed")
        })
    }
}

/// Collects events in memory
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<ImportEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far
    pub fn events(&self) -> Vec<ImportEvent> {
        self.events.lock().clone()
    }

    /// Messages of log events at `level`
    pub fn messages(&self, level: EventLevel) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ImportEvent::Log { level: l, message } if *l == level => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for MemorySink {
    fn send(&mut self, event: &ImportEvent) -> std::io::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Discards events (tracing still sees them)
pub struct NullSink;

impl EventSink for NullSink {
    fn send(&mut self, _event: &ImportEvent) -> std::io::Result<()> {
        Ok(())
    }
}

/// Progress reporter for an import run
pub struct ProgressReporter {
    sink: Mutex<Box<dyn EventSink>>,
    /// Forward debug-level events
    verbose: bool,
    /// Progress bar (None unless requested)
    progress_bar: Option<ProgressBar>,
    start_time: Instant,
    /// Set once the sink reports its consumer is gone
    disconnected: AtomicBool,
}

impl ProgressReporter {
    /// Create a reporter writing to `sink`
    pub fn new(sink: Box<dyn EventSink>, verbose: bool) -> Self {
        Self {
            sink: Mutex::new(sink),
            verbose,
            progress_bar: None,
            start_time: Instant::now(),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Reporter that only logs through `tracing`
    pub fn silent() -> Self {
        Self::new(Box::new(NullSink), false)
    }

    /// Show a terminal spinner with running counts
    pub fn with_progress_bar(mut self) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} records {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        self.progress_bar = Some(pb);
        self
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Emit a log event. Debug events are dropped unless the reporter is verbose.
    pub fn emit(&self, level: EventLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            EventLevel::Debug => tracing::debug!("{}", message),
            EventLevel::Info => tracing::info!("{}", message),
            EventLevel::Warning => tracing::warn!("{}", message),
            EventLevel::Error => tracing::error!("{}", message),
        }
        if level == EventLevel::Debug && !self.verbose {
            return;
        }
        if let Some(ref pb) = self.progress_bar {
            if level >= EventLevel::Warning {
                pb.println(format!("{:?}: {}", level, message));
            }
        }
        self.send(ImportEvent::Log { level, message });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(EventLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(EventLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(EventLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(EventLevel::Error, message);
    }

    /// Announce the start of a run
    pub fn started(&self, run_id: Option<Uuid>, source: &str) {
        self.send(ImportEvent::Started {
            run_id,
            source: source.to_string(),
        });
    }

    /// Emit a progress snapshot
    pub fn progress(&self, stage: ImportStage, stats: &ImportStats) {
        if let Some(ref pb) = self.progress_bar {
            pb.set_position(stats.records_processed as u64);
            pb.set_message(format!(
                "| {} created, {} existing, {} failed",
                stats.posts_created, stats.posts_existing, stats.records_failed
            ));
        }
        self.send(ImportEvent::Progress {
            stage,
            records_processed: stats.records_processed,
            posts_created: stats.posts_created,
            posts_existing: stats.posts_existing,
            records_failed: stats.records_failed,
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
        });
    }

    /// Emit the terminal event
    pub fn complete(&self, result: Result<&ImportStats, &str>) {
        if let Some(ref pb) = self.progress_bar {
            match result {
                Ok(stats) => pb.finish_with_message(format!(
                    "Done! {} created, {} existing, {} failed",
                    stats.posts_created, stats.posts_existing, stats.records_failed
                )),
                Err(e) => pb.abandon_with_message(format!("Failed: {}", e)),
            }
        }
        let event = match result {
            Ok(stats) => ImportEvent::Complete {
                success: true,
                error: None,
                stats: Some(stats.clone()),
            },
            Err(e) => ImportEvent::Complete {
                success: false,
                error: Some(e.to_string()),
                stats: None,
            },
        };
        self.send(event);
    }

    /// Seconds since the reporter was created
    pub fn elapsed_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    fn send(&self, event: ImportEvent) {
        if self.disconnected.load(Ordering::Relaxed) {
            return;
        }
        if let Err(e) = self.sink.lock().send(&event) {
            // The caller went away; the run keeps going without an audience
            tracing::debug!("Event consumer disconnected: {}", e);
            self.disconnected.store(true, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_events_gated_by_verbosity() {
        let sink = MemorySink::new();
        let reporter = ProgressReporter::new(Box::new(sink.clone()), false);
        reporter.debug("hidden");
        reporter.info("shown");
        reporter.warn("also shown");

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(sink.messages(EventLevel::Debug).is_empty());

        let verbose_sink = MemorySink::new();
        let verbose = ProgressReporter::new(Box::new(verbose_sink.clone()), true);
        verbose.debug("visible now");
        assert_eq!(verbose_sink.messages(EventLevel::Debug), vec!["visible now"]);
    }

    #[test]
    fn test_sse_framing_is_flushed_per_event() {
        let mut buf = Vec::new();
        {
            let mut sink = SseWriterSink::new(&mut buf);
            sink.send(&ImportEvent::Log {
                level: EventLevel::Warning,
                message: "parent 7 missing".to_string(),
            })
            .unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("event: log\ndata: {"));
        assert!(text.contains(r#""type":"log""#));
        assert!(text.contains(r#""level":"warning""#));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_complete_event_carries_outcome() {
        let sink = MemorySink::new();
        let reporter = ProgressReporter::new(Box::new(sink.clone()), false);
        reporter.complete(Err("corrupt archive"));

        match sink.events().last() {
            Some(ImportEvent::Complete { success, error, .. }) => {
                assert!(!success);
                assert_eq!(error.as_deref(), Some("corrupt archive"));
            }
            other => panic!("expected complete event, got {:?}", other),
        }
    }

    #[test]
    fn test_closed_channel_does_not_stop_reporting() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let reporter = ProgressReporter::new(Box::new(ChannelSink::new(tx)), false);
        reporter.info("nobody listening");
        reporter.complete(Ok(&ImportStats::default()));
    }
}
