//! Deduplicated protocol-violation reporting.
//!
//! Recoverable violations are not errors: the tracker absorbs them, restores
//! a consistent stack and files a [`Report`]. Each report class keeps a small
//! "already reported" set so a repeating bug does not flood the sink.
//!
//! # Report flow
//!
//! ```text
//! PhaseTracker ──► Diagnostics (verbosity + dedup) ──► DiagnosticSink
//!                                                        ├─ TracingSink
//!                                                        └─ MemorySink
//! ```

use crate::config::TrackerConfig;
use crate::state::PhaseId;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const WIDTH: usize = 80;

/// Class of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReportKind {
    AsyncAccess,
    Runaway,
    RunawayCompletion,
    IncorrectCompletion,
    IncompatibleTransition,
    UnprocessedCaptures,
    EmptyStackCompletion,
    MaxProcessingDepth,
    CaptureFailure,
    UnwindFailure,
    BodyPanic,
    UntrackedChange,
}

impl ReportKind {
    pub fn name(&self) -> &'static str {
        match self {
            ReportKind::AsyncAccess => "async_access",
            ReportKind::Runaway => "runaway",
            ReportKind::RunawayCompletion => "runaway_completion",
            ReportKind::IncorrectCompletion => "incorrect_completion",
            ReportKind::IncompatibleTransition => "incompatible_transition",
            ReportKind::UnprocessedCaptures => "unprocessed_captures",
            ReportKind::EmptyStackCompletion => "empty_stack_completion",
            ReportKind::MaxProcessingDepth => "max_processing_depth",
            ReportKind::CaptureFailure => "capture_failure",
            ReportKind::UnwindFailure => "unwind_failure",
            ReportKind::BodyPanic => "body_panic",
            ReportKind::UntrackedChange => "untracked_change",
        }
    }

    /// Errors indicate lost or misattributed mutations; the rest are warnings.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ReportKind::AsyncAccess
                | ReportKind::IncorrectCompletion
                | ReportKind::UnprocessedCaptures
                | ReportKind::CaptureFailure
                | ReportKind::UnwindFailure
                | ReportKind::BodyPanic
        )
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A structured multi-line report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub kind: ReportKind,
    pub title: String,
    pub lines: Vec<String>,
}

impl Report {
    /// True if any line contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.title.contains(needle) || self.lines.iter().any(|l| l.contains(needle))
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "/{}\\", "*".repeat(WIDTH - 2))?;
        writeln!(f, " {}", self.title)?;
        writeln!(f, " {}", "-".repeat(self.title.len().min(WIDTH - 2)))?;
        for line in &self.lines {
            writeln!(f, " {}", line)?;
        }
        write!(f, "\\{}/", "*".repeat(WIDTH - 2))
    }
}

/// Incremental report construction.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    kind: ReportKind,
    title: String,
    lines: Vec<String>,
}

impl ReportBuilder {
    pub fn new(kind: ReportKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            lines: Vec::new(),
        }
    }

    /// A builder used only to collect lines (stack dumps).
    pub(crate) fn detached() -> Self {
        Self::new(ReportKind::Runaway, "")
    }

    pub fn add(&mut self, line: impl Into<String>) -> &mut Self {
        self.lines.push(line.into());
        self
    }

    /// Adds an aligned `key: value` line.
    pub fn add_kv(&mut self, key: &str, value: impl fmt::Display) -> &mut Self {
        self.lines.push(format!("{:<20}: {}", key, value));
        self
    }

    /// Adds a horizontal rule.
    pub fn hr(&mut self) -> &mut Self {
        self.lines.push("-".repeat(WIDTH - 2));
        self
    }

    /// Adds `text` wrapped at the report width.
    pub fn wrapped(&mut self, text: &str) -> &mut Self {
        let mut line = String::new();
        for word in text.split_whitespace() {
            if !line.is_empty() && line.len() + word.len() + 1 > WIDTH - 2 {
                self.lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        if !line.is_empty() {
            self.lines.push(line);
        }
        self
    }

    /// Appends several lines at once.
    pub fn extend<I: IntoIterator<Item = String>>(&mut self, lines: I) -> &mut Self {
        self.lines.extend(lines);
        self
    }

    pub fn build(&mut self) -> Report {
        Report {
            kind: self.kind,
            title: std::mem::take(&mut self.title),
            lines: std::mem::take(&mut self.lines),
        }
    }

    pub(crate) fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Destination for reports.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, report: &Report);
}

/// Forwards reports to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, report: &Report) {
        if report.kind.is_error() {
            tracing::error!(kind = %report.kind, "\n{}", report);
        } else {
            tracing::warn!(kind = %report.kind, "\n{}", report);
        }
    }
}

/// Collects reports in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    reports: Arc<Mutex<Vec<Report>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Report>> {
        match self.reports.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Snapshot of every report so far.
    pub fn reports(&self) -> Vec<Report> {
        self.lock().clone()
    }

    /// Number of reports of `kind`.
    pub fn count(&self, kind: ReportKind) -> usize {
        self.lock().iter().filter(|r| r.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes and returns every collected report.
    pub fn take(&self) -> Vec<Report> {
        std::mem::take(&mut *self.lock())
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, report: &Report) {
        self.lock().push(report.clone());
    }
}

/// What a report is deduplicated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedupKey {
    EmptyStack,
    Completion { expected: PhaseId, actual: PhaseId },
    Transition { from: PhaseId, to: PhaseId },
    RunawayCompletion(PhaseId),
    Unprocessed(PhaseId),
    Depth(PhaseId),
    CaptureFailure(PhaseId),
    UnwindFailure(PhaseId),
    BodyPanic(PhaseId),
    Untracked,
}

/// Verbosity, deduplication and runaway rate limiting in front of a sink.
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticSink>,
    verbose: bool,
    verbose_errors: bool,
    max_runaway_count: usize,
    runaway_count: usize,
    reported: HashSet<DedupKey>,
    async_reported: Arc<AtomicBool>,
    emitted: u64,
}

impl Diagnostics {
    pub fn new(config: &TrackerConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            sink,
            verbose: config.verbose,
            verbose_errors: config.verbose_errors,
            max_runaway_count: config.max_runaway_count,
            runaway_count: 0,
            reported: HashSet::new(),
            async_reported: Arc::new(AtomicBool::new(false)),
            emitted: 0,
        }
    }

    pub fn sink(&self) -> Arc<dyn DiagnosticSink> {
        self.sink.clone()
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Number of reports handed to the sink.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Emits the report built by `build` unless `key` was already reported.
    ///
    /// Returns true if a report was emitted.
    pub fn report_once<F>(&mut self, key: DedupKey, build: F) -> bool
    where
        F: FnOnce() -> Report,
    {
        if !self.verbose {
            return false;
        }
        if !self.reported.insert(key) && !self.verbose_errors {
            return false;
        }
        self.emit(build());
        true
    }

    /// Emits a runaway report until `max_runaway_count` have been emitted.
    pub fn report_runaway<F>(&mut self, build: F) -> bool
    where
        F: FnOnce() -> Report,
    {
        if !self.verbose {
            return false;
        }
        if self.runaway_count >= self.max_runaway_count && !self.verbose_errors {
            return false;
        }
        self.runaway_count += 1;
        self.emit(build());
        true
    }

    /// The reporter used by cross-thread handles.
    pub(crate) fn async_reporter(&self) -> AsyncReporter {
        AsyncReporter {
            sink: self.sink.clone(),
            reported: self.async_reported.clone(),
            verbose: self.verbose,
            verbose_errors: self.verbose_errors,
        }
    }

    fn emit(&mut self, report: Report) {
        self.emitted += 1;
        self.sink.emit(&report);
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("verbose", &self.verbose)
            .field("verbose_errors", &self.verbose_errors)
            .field("runaway_count", &self.runaway_count)
            .field("reported", &self.reported.len())
            .field("emitted", &self.emitted)
            .finish()
    }
}

/// Thread-safe reporter for cross-thread access, reported at most once.
#[derive(Clone)]
pub(crate) struct AsyncReporter {
    sink: Arc<dyn DiagnosticSink>,
    reported: Arc<AtomicBool>,
    verbose: bool,
    verbose_errors: bool,
}

impl AsyncReporter {
    pub(crate) fn report<F>(&self, build: F) -> bool
    where
        F: FnOnce() -> Report,
    {
        if !self.verbose {
            return false;
        }
        if self.reported.swap(true, Ordering::SeqCst) && !self.verbose_errors {
            return false;
        }
        self.sink.emit(&build());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnostics(config: TrackerConfig) -> (Diagnostics, MemorySink) {
        let sink = MemorySink::new();
        (Diagnostics::new(&config, Arc::new(sink.clone())), sink)
    }

    fn report(kind: ReportKind) -> Report {
        ReportBuilder::new(kind, "test").build()
    }

    #[test]
    fn test_report_once_dedupes_by_key() {
        let (mut diag, sink) = diagnostics(TrackerConfig::default());
        let key = DedupKey::Completion {
            expected: PhaseId("a"),
            actual: PhaseId("b"),
        };
        assert!(diag.report_once(key, || report(ReportKind::IncorrectCompletion)));
        assert!(!diag.report_once(key, || report(ReportKind::IncorrectCompletion)));

        let other = DedupKey::Completion {
            expected: PhaseId("a"),
            actual: PhaseId("c"),
        };
        assert!(diag.report_once(other, || report(ReportKind::IncorrectCompletion)));
        assert_eq!(sink.count(ReportKind::IncorrectCompletion), 2);
    }

    #[test]
    fn test_verbose_errors_disables_dedup() {
        let config = TrackerConfig {
            verbose_errors: true,
            ..TrackerConfig::default()
        };
        let (mut diag, sink) = diagnostics(config);
        for _ in 0..3 {
            diag.report_once(DedupKey::EmptyStack, || report(ReportKind::EmptyStackCompletion));
        }
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_quiet_config_emits_nothing() {
        let (mut diag, sink) = diagnostics(TrackerConfig::quiet());
        assert!(!diag.report_once(DedupKey::EmptyStack, || report(ReportKind::EmptyStackCompletion)));
        assert!(!diag.report_runaway(|| report(ReportKind::Runaway)));
        assert!(sink.is_empty());
        assert_eq!(diag.emitted(), 0);
    }

    #[test]
    fn test_runaway_rate_limit() {
        let (mut diag, sink) = diagnostics(TrackerConfig::default());
        for _ in 0..10 {
            diag.report_runaway(|| report(ReportKind::Runaway));
        }
        assert_eq!(sink.count(ReportKind::Runaway), 3);
    }

    #[test]
    fn test_async_reporter_is_shared_once() {
        let (diag, sink) = diagnostics(TrackerConfig::default());
        let a = diag.async_reporter();
        let b = a.clone();
        assert!(a.report(|| report(ReportKind::AsyncAccess)));
        assert!(!b.report(|| report(ReportKind::AsyncAccess)));
        assert_eq!(sink.count(ReportKind::AsyncAccess), 1);
    }

    #[test]
    fn test_wrapped_respects_width() {
        let mut builder = ReportBuilder::new(ReportKind::Runaway, "wrap");
        builder.wrapped(&"word ".repeat(60));
        let report = builder.build();
        assert!(report.lines.len() > 1);
        assert!(report.lines.iter().all(|l| l.len() <= WIDTH - 2));
        assert!(report.to_string().contains("wrap"));
    }
}
