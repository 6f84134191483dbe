//! The job-log seam.
//!
//! Process diagnostics go through `tracing` as usual; the *job log* — the
//! stream a running job's children and log pipes feed — goes through the
//! [`Logger`] trait so the runner can be driven against an in-memory sink
//! in tests and against `tracing` in the CLI.

use std::cell::Cell;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use thiserror::Error;

/// Severity of a job-log line, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Diagnostic chatter (child stdout/stderr defaults here).
    Debug,
    /// Informational lines.
    Info,
    /// Warnings.
    Warning,
    /// Errors.
    Error,
    /// Fatal conditions.
    Critical,
}

impl LogLevel {
    /// Returns the canonical upper-case token for this level.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a level token is not in the closed set.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown log level token: {0:?}")]
pub struct ParseLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(ParseLevelError(other.to_owned())),
        }
    }
}

/// Line-oriented sink for the job log.
///
/// Implementations filter by their current [`level`][Logger::level]; the
/// level is mutable because the in-process tool dispatcher temporarily
/// lowers verbosity while a tool runs.
pub trait Logger {
    /// Emits one line at the given level (dropped if below the current level).
    fn log(&self, level: LogLevel, line: &str);

    /// Creates a derived logger whose lines carry the given header.
    fn sub_logger(&self, header: &str) -> Box<dyn Logger + '_>;

    /// Returns the current threshold level.
    fn level(&self) -> LogLevel;

    /// Changes the threshold level.
    fn set_level(&self, level: LogLevel);

    /// Emits a DEBUG line.
    fn debug(&self, line: &str) {
        self.log(LogLevel::Debug, line);
    }

    /// Emits an INFO line.
    fn info(&self, line: &str) {
        self.log(LogLevel::Info, line);
    }

    /// Emits a WARNING line.
    fn warning(&self, line: &str) {
        self.log(LogLevel::Warning, line);
    }

    /// Emits an ERROR line.
    fn error(&self, line: &str) {
        self.log(LogLevel::Error, line);
    }
}

/// Job logger that forwards lines onto `tracing` events.
#[derive(Debug)]
pub struct TracingLogger {
    header: String,
    level: Cell<LogLevel>,
}

impl TracingLogger {
    /// Creates a root logger that passes everything through.
    #[must_use]
    pub fn new() -> Self {
        Self::with_level(LogLevel::Debug)
    }

    /// Creates a root logger with the given threshold.
    #[must_use]
    pub fn with_level(level: LogLevel) -> Self {
        Self {
            header: String::new(),
            level: Cell::new(level),
        }
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, line: &str) {
        if level < self.level.get() {
            return;
        }
        match level {
            LogLevel::Debug => tracing::debug!(header = %self.header, "{line}"),
            LogLevel::Info => tracing::info!(header = %self.header, "{line}"),
            LogLevel::Warning => tracing::warn!(header = %self.header, "{line}"),
            LogLevel::Error | LogLevel::Critical => {
                tracing::error!(header = %self.header, "{line}");
            }
        }
    }

    fn sub_logger(&self, header: &str) -> Box<dyn Logger + '_> {
        Box::new(Self {
            header: header.to_owned(),
            level: Cell::new(self.level.get()),
        })
    }

    fn level(&self) -> LogLevel {
        self.level.get()
    }

    fn set_level(&self, level: LogLevel) {
        self.level.set(level);
    }
}

/// One captured job-log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Header of the sub-logger that emitted the line (empty for the root).
    pub header: String,
    /// Level the line was emitted at.
    pub level: LogLevel,
    /// The line itself, without a trailing newline.
    pub line: String,
}

/// Job logger that collects records in memory.
///
/// Sub-loggers share the record buffer with their parent, so a single
/// `MemoryLogger` observes the whole run.
#[derive(Debug)]
pub struct MemoryLogger {
    header: String,
    level: Cell<LogLevel>,
    records: Rc<RefCell<Vec<LogRecord>>>,
}

impl MemoryLogger {
    /// Creates an empty logger capturing everything from DEBUG up.
    #[must_use]
    pub fn new() -> Self {
        Self {
            header: String::new(),
            level: Cell::new(LogLevel::Debug),
            records: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Returns a snapshot of all captured records.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.borrow().clone()
    }

    /// Returns the captured lines at the given level, in order.
    #[must_use]
    pub fn lines_at(&self, level: LogLevel) -> Vec<String> {
        self.records
            .borrow()
            .iter()
            .filter(|r| r.level == level)
            .map(|r| r.line.clone())
            .collect()
    }
}

impl Default for MemoryLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: LogLevel, line: &str) {
        if level < self.level.get() {
            return;
        }
        self.records.borrow_mut().push(LogRecord {
            header: self.header.clone(),
            level,
            line: line.to_owned(),
        });
    }

    fn sub_logger(&self, header: &str) -> Box<dyn Logger + '_> {
        Box::new(Self {
            header: header.to_owned(),
            level: Cell::new(self.level.get()),
            records: Rc::clone(&self.records),
        })
    }

    fn level(&self) -> LogLevel {
        self.level.get()
    }

    fn set_level(&self, level: LogLevel) {
        self.level.set(level);
    }
}
