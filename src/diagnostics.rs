//! Diagnostics collected while parsing
//!
//! When [ParseOptions](crate::options::ParseOptions) lets parsing continue past
//! an error, the error is not lost: it becomes a [DiagnosticRecord] in the
//! document's [Diagnostics]. Every record is also forwarded to the `log`
//! facade at the matching level.

use std::{
    fmt::{self, Write},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};

use crate::{book::EpubBook, error::{EpubError, ErrorCode}};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            DiagnosticLevel::Debug => "DEBUG",
            DiagnosticLevel::Info => "INFO",
            DiagnosticLevel::Warning => "WARNING",
            DiagnosticLevel::Error => "ERROR",
            DiagnosticLevel::Fatal => "FATAL",
        };
        f.write_str(level)
    }
}

/// A single problem noticed during parsing
#[derive(Debug, Clone)]
pub struct DiagnosticRecord {
    pub timestamp: DateTime<Local>,
    pub level: DiagnosticLevel,
    pub message: String,

    /// Entry of the container the problem was found in
    pub path: Option<String>,

    /// Parsing step, e.g. "parse_metadata"
    pub operation: Option<String>,

    pub code: Option<ErrorCode>,

    /// Parsing went on after this record
    pub recovered: bool,
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level,
            self.message
        )?;
        if let Some(code) = self.code {
            write!(f, " ({})", code.value())?;
        }
        if let Some(operation) = &self.operation {
            write!(f, " during {}", operation)?;
        }
        if let Some(path) = &self.path {
            write!(f, " at {}", path)?;
        }
        if self.recovered {
            f.write_str(" [recovered]")?;
        }
        Ok(())
    }
}

/// Number of records per level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticStatistics {
    pub debug: usize,
    pub info: usize,
    pub warnings: usize,
    pub errors: usize,
    pub fatal: usize,
    pub recovered: usize,
}

impl DiagnosticStatistics {
    pub fn total(&self) -> usize {
        self.debug + self.info + self.warnings + self.errors + self.fatal
    }
}

/// Bounded collection of [DiagnosticRecord]s
#[derive(Debug, Clone)]
pub struct Diagnostics {
    records: Vec<DiagnosticRecord>,
    max_records: usize,
    dropped: usize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(100)
    }
}

impl Diagnostics {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Vec::new(),
            max_records,
            dropped: 0,
        }
    }

    /// Adds a record, evicting the oldest non-fatal record when full
    ///
    /// When every kept record is fatal the new record is dropped instead,
    /// unless it is fatal itself.
    pub fn push(&mut self, record: DiagnosticRecord) {
        match record.level {
            DiagnosticLevel::Debug => debug!("{}", record),
            DiagnosticLevel::Info => info!("{}", record),
            DiagnosticLevel::Warning => warn!("{}", record),
            DiagnosticLevel::Error | DiagnosticLevel::Fatal => error!("{}", record),
        }

        if self.max_records == 0 {
            self.dropped += 1;
            return;
        }

        if self.records.len() >= self.max_records {
            match self
                .records
                .iter()
                .position(|kept| kept.level != DiagnosticLevel::Fatal)
            {
                Some(index) => {
                    self.records.remove(index);
                }
                None if record.level == DiagnosticLevel::Fatal => {
                    self.records.remove(0);
                }
                None => {
                    self.dropped += 1;
                    return;
                }
            }
            self.dropped += 1;
        }

        self.records.push(record);
    }

    pub fn record(
        &mut self,
        level: DiagnosticLevel,
        message: impl Into<String>,
        path: Option<&str>,
        operation: Option<&str>,
    ) {
        self.push(DiagnosticRecord {
            timestamp: Local::now(),
            level,
            message: message.into(),
            path: path.map(str::to_string),
            operation: operation.map(str::to_string),
            code: None,
            recovered: false,
        });
    }

    /// Records an error that parsing recovered from
    pub fn record_recovered(&mut self, error: &EpubError, path: Option<&str>, operation: &str) {
        self.push(DiagnosticRecord {
            timestamp: Local::now(),
            level: DiagnosticLevel::Error,
            message: error.to_string(),
            path: path.map(str::to_string),
            operation: Some(operation.to_string()),
            code: Some(error.code()),
            recovered: true,
        });
    }

    pub fn warning(&mut self, message: impl Into<String>, path: Option<&str>, operation: &str) {
        self.record(DiagnosticLevel::Warning, message, path, Some(operation));
    }

    pub fn records(&self) -> &[DiagnosticRecord] {
        &self.records
    }

    pub fn level(&self, level: DiagnosticLevel) -> impl Iterator<Item = &DiagnosticRecord> {
        self.records.iter().filter(move |record| record.level == level)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticRecord> {
        self.level(DiagnosticLevel::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &DiagnosticRecord> {
        self.level(DiagnosticLevel::Error)
    }

    pub fn fatal(&self) -> impl Iterator<Item = &DiagnosticRecord> {
        self.level(DiagnosticLevel::Fatal)
    }

    pub fn recovered(&self) -> impl Iterator<Item = &DiagnosticRecord> {
        self.records.iter().filter(|record| record.recovered)
    }

    pub fn has_errors(&self) -> bool {
        self.records
            .iter()
            .any(|record| record.level >= DiagnosticLevel::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Records that did not fit
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn statistics(&self) -> DiagnosticStatistics {
        let mut statistics = DiagnosticStatistics::default();
        for record in &self.records {
            match record.level {
                DiagnosticLevel::Debug => statistics.debug += 1,
                DiagnosticLevel::Info => statistics.info += 1,
                DiagnosticLevel::Warning => statistics.warnings += 1,
                DiagnosticLevel::Error => statistics.errors += 1,
                DiagnosticLevel::Fatal => statistics.fatal += 1,
            }
            if record.recovered {
                statistics.recovered += 1;
            }
        }
        statistics
    }

    pub fn summary(&self) -> String {
        let statistics = self.statistics();
        let mut summary = format!(
            "{} diagnostics: {} fatal, {} errors ({} recovered), {} warnings",
            statistics.total(),
            statistics.fatal,
            statistics.errors,
            statistics.recovered,
            statistics.warnings
        );
        if self.dropped > 0 {
            let _ = write!(summary, ", {} dropped", self.dropped);
        }
        summary
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.dropped = 0;
    }
}

/// Outcome of a parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// Parsed without any diagnostic of warning level or above
    Success,

    /// Parsed, but warnings were recorded
    PartialSuccess,

    /// Parsed after recovering from errors
    Recovered,

    /// Nothing usable was produced
    Failure,
}

/// A parsed book together with everything noticed on the way
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub book: Option<Arc<EpubBook>>,
    pub diagnostics: Diagnostics,
    pub status: ParseStatus,
    pub elapsed: Duration,

    /// The error that made parsing fail
    pub error: Option<Arc<EpubError>>,
}

impl ParseResult {
    pub fn success(book: Arc<EpubBook>, diagnostics: Diagnostics, elapsed: Duration) -> Self {
        let status = if diagnostics.has_errors() {
            ParseStatus::Recovered
        } else if diagnostics.warnings().next().is_some() {
            ParseStatus::PartialSuccess
        } else {
            ParseStatus::Success
        };

        Self {
            book: Some(book),
            diagnostics,
            status,
            elapsed,
            error: None,
        }
    }

    pub fn failure(error: EpubError, mut diagnostics: Diagnostics, elapsed: Duration) -> Self {
        diagnostics.push(DiagnosticRecord {
            timestamp: Local::now(),
            level: DiagnosticLevel::Fatal,
            message: error.to_string(),
            path: None,
            operation: Some("parse".to_string()),
            code: Some(error.code()),
            recovered: false,
        });

        Self {
            book: None,
            diagnostics,
            status: ParseStatus::Failure,
            elapsed,
            error: Some(Arc::new(error)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status != ParseStatus::Failure
    }
}
