//! Test logging infrastructure.
//!
//! Typed, timestamped event capture for tests that exercise the channel and
//! socket machinery. Tests log what the harness observed — sends, receives,
//! pause/resume flips, reactor read/write traffic — and print the full
//! report on failure, so a broken interleaving is diagnosable from the test
//! output alone.
//!
//! # Example
//!
//! ```ignore
//! let logger = TestLogger::from_env();
//! logger.log(TestEvent::ChannelSend { bytes: 512 });
//! test_log!(logger, "setup", "attached socket with backlog {}", 6);
//! assert_log!(logger, received == expected, "echo mismatch");
//! ```

use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Logging verbosity level for tests.
///
/// Levels are ordered from least to most verbose:
/// `Error < Warn < Info < Debug < Trace`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TestLogLevel {
    /// Only errors and failures.
    Error,
    /// Warnings and above.
    Warn,
    /// General test progress.
    #[default]
    Info,
    /// Channel and socket operations.
    Debug,
    /// All events including watermark flips.
    Trace,
}

impl TestLogLevel {
    /// Returns a human-readable name for the level.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    /// Returns the level from the `TEST_LOG_LEVEL` environment variable.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var("TEST_LOG_LEVEL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for TestLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for TestLogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

/// A typed event captured by the test logger.
#[derive(Debug, Clone)]
pub enum TestEvent {
    /// A block entered a channel.
    ChannelSend {
        /// Payload size.
        bytes: usize,
    },
    /// A receive settled with a value.
    ChannelReceive {
        /// Payload size.
        bytes: usize,
    },
    /// A channel closed.
    ChannelClose {
        /// Whether a cause was attached.
        with_cause: bool,
    },
    /// A channel crossed its high watermark.
    Paused,
    /// A channel crossed back below its low watermark.
    Resumed,
    /// OS reads were started or restarted.
    ReadStart,
    /// OS reads were halted.
    ReadStop {
        /// Whether a resume notification was installed.
        rescheduled: bool,
    },
    /// A write was submitted to the OS.
    WriteSubmit {
        /// Payload size.
        bytes: usize,
        /// Outstanding bytes after the submit.
        outstanding: usize,
    },
    /// A write completion fired.
    WriteComplete {
        /// Whether the write succeeded.
        ok: bool,
        /// Outstanding bytes after the completion.
        outstanding: usize,
    },
    /// The socket entered its close sequence.
    SocketClose,
    /// Custom event for test-specific logging.
    Custom {
        /// Category for filtering.
        category: &'static str,
        /// Human-readable message.
        message: String,
    },
    /// Error event.
    Error {
        /// Error category.
        category: &'static str,
        /// Error message.
        message: String,
    },
    /// Warning event.
    Warn {
        /// Warning category.
        category: &'static str,
        /// Warning message.
        message: String,
    },
}

impl TestEvent {
    /// Returns the minimum log level required to display this event.
    #[must_use]
    pub fn level(&self) -> TestLogLevel {
        match self {
            Self::Error { .. } => TestLogLevel::Error,
            Self::Warn { .. } => TestLogLevel::Warn,
            Self::ChannelClose { .. } | Self::SocketClose => TestLogLevel::Info,
            Self::ChannelSend { .. }
            | Self::ChannelReceive { .. }
            | Self::ReadStart
            | Self::ReadStop { .. }
            | Self::WriteSubmit { .. }
            | Self::WriteComplete { .. }
            | Self::Custom { .. } => TestLogLevel::Debug,
            Self::Paused | Self::Resumed => TestLogLevel::Trace,
        }
    }

    /// Returns a short category name for the event.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::ChannelSend { .. }
            | Self::ChannelReceive { .. }
            | Self::ChannelClose { .. }
            | Self::Paused
            | Self::Resumed => "channel",
            Self::ReadStart | Self::ReadStop { .. } => "read",
            Self::WriteSubmit { .. } | Self::WriteComplete { .. } => "write",
            Self::SocketClose => "socket",
            Self::Custom { category, .. }
            | Self::Error { category, .. }
            | Self::Warn { category, .. } => category,
        }
    }
}

impl std::fmt::Display for TestEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelSend { bytes } => write!(f, "channel send: bytes={bytes}"),
            Self::ChannelReceive { bytes } => write!(f, "channel receive: bytes={bytes}"),
            Self::ChannelClose { with_cause } => {
                write!(f, "channel close: with_cause={with_cause}")
            }
            Self::Paused => f.write_str("paused"),
            Self::Resumed => f.write_str("resumed"),
            Self::ReadStart => f.write_str("read start"),
            Self::ReadStop { rescheduled } => write!(f, "read stop: rescheduled={rescheduled}"),
            Self::WriteSubmit { bytes, outstanding } => {
                write!(f, "write submit: bytes={bytes} outstanding={outstanding}")
            }
            Self::WriteComplete { ok, outstanding } => {
                write!(f, "write complete: ok={ok} outstanding={outstanding}")
            }
            Self::SocketClose => f.write_str("socket close"),
            Self::Custom { category, message } => write!(f, "[{category}] {message}"),
            Self::Error { category, message } => write!(f, "ERROR [{category}] {message}"),
            Self::Warn { category, message } => write!(f, "WARN [{category}] {message}"),
        }
    }
}

/// A timestamped event record.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Time since logger creation.
    pub elapsed: Duration,
    /// The event that occurred.
    pub event: TestEvent,
}

/// Test logger that captures typed events with timestamps.
#[derive(Debug)]
pub struct TestLogger {
    level: TestLogLevel,
    events: Mutex<Vec<LogRecord>>,
    start_time: Instant,
    verbose: bool,
}

impl TestLogger {
    /// Creates a new logger with the specified level.
    #[must_use]
    pub fn new(level: TestLogLevel) -> Self {
        Self {
            level,
            events: Mutex::new(Vec::new()),
            start_time: Instant::now(),
            verbose: level >= TestLogLevel::Trace,
        }
    }

    /// Creates a logger using the `TEST_LOG_LEVEL` environment variable.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(TestLogLevel::from_env())
    }

    /// Returns the configured log level.
    #[must_use]
    pub fn level(&self) -> TestLogLevel {
        self.level
    }

    /// Returns whether the logger captures events at the given level.
    #[must_use]
    pub fn should_log(&self, level: TestLogLevel) -> bool {
        level <= self.level
    }

    /// Logs an event if it meets the configured level.
    pub fn log(&self, event: TestEvent) {
        let event_level = event.level();
        if !self.should_log(event_level) {
            return;
        }

        let elapsed = self.start_time.elapsed();

        if self.verbose {
            eprintln!(
                "[{:>10.3}ms] [{:>5}] {}",
                elapsed.as_secs_f64() * 1000.0,
                event_level.name(),
                &event
            );
        }

        let record = LogRecord { elapsed, event };
        self.events.lock().expect("lock poisoned").push(record);
    }

    /// Logs a custom event.
    pub fn custom(&self, category: &'static str, message: impl Into<String>) {
        self.log(TestEvent::Custom {
            category,
            message: message.into(),
        });
    }

    /// Returns the number of captured events.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.lock().expect("lock poisoned").len()
    }

    /// Returns a snapshot of all captured events.
    #[must_use]
    pub fn events(&self) -> Vec<LogRecord> {
        self.events.lock().expect("lock poisoned").clone()
    }

    /// Generates a detailed report of all captured events.
    #[must_use]
    #[allow(clippy::significant_drop_tightening)]
    pub fn report(&self) -> String {
        let events = self.events.lock().expect("lock poisoned");
        let mut report = String::new();

        let _ = writeln!(report, "=== Test Event Log ({} events) ===", events.len());
        let _ = writeln!(report);

        for record in events.iter() {
            let _ = writeln!(
                report,
                "[{:>10.3}ms] [{:>5}] {:>7} | {}",
                record.elapsed.as_secs_f64() * 1000.0,
                record.event.level().name(),
                record.event.category(),
                record.event
            );
        }

        let _ = writeln!(report);
        let _ = writeln!(report, "=== Statistics ===");

        let sends = events
            .iter()
            .filter(|r| matches!(r.event, TestEvent::ChannelSend { .. }))
            .count();
        let receives = events
            .iter()
            .filter(|r| matches!(r.event, TestEvent::ChannelReceive { .. }))
            .count();
        let submits = events
            .iter()
            .filter(|r| matches!(r.event, TestEvent::WriteSubmit { .. }))
            .count();
        let pauses = events
            .iter()
            .filter(|r| matches!(r.event, TestEvent::Paused))
            .count();
        let resumes = events
            .iter()
            .filter(|r| matches!(r.event, TestEvent::Resumed))
            .count();
        let errors = events
            .iter()
            .filter(|r| matches!(r.event, TestEvent::Error { .. }))
            .count();

        let _ = writeln!(report, "Channel sends: {sends}");
        let _ = writeln!(report, "Channel receives: {receives}");
        let _ = writeln!(report, "Write submits: {submits}");
        let _ = writeln!(report, "Pauses: {pauses}");
        let _ = writeln!(report, "Resumes: {resumes}");
        let _ = writeln!(report, "Errors: {errors}");

        if let Some(last) = events.last() {
            let _ = writeln!(report, "Total duration: {:?}", last.elapsed);
        }

        report
    }

    /// Asserts that no errors were logged.
    ///
    /// # Panics
    ///
    /// Panics if any error events were logged.
    pub fn assert_no_errors(&self) {
        let error_messages: Vec<String> = {
            let events = self.events.lock().expect("lock poisoned");
            events
                .iter()
                .filter(|r| matches!(r.event, TestEvent::Error { .. }))
                .map(|r| format!("  - {}", r.event))
                .collect()
        };

        assert!(
            error_messages.is_empty(),
            "Test logged {} errors:\n{}\n\nFull log:\n{}",
            error_messages.len(),
            error_messages.join("\n"),
            self.report()
        );
    }

    /// Clears all captured events.
    pub fn clear(&self) {
        self.events.lock().expect("lock poisoned").clear();
    }
}

impl Default for TestLogger {
    fn default() -> Self {
        Self::new(TestLogLevel::Info)
    }
}

/// Log a custom event to a test logger.
///
/// # Example
///
/// ```ignore
/// test_log!(logger, "setup", "sending {} blocks", count);
/// ```
#[macro_export]
macro_rules! test_log {
    ($logger:expr, $cat:literal, $($arg:tt)*) => {
        $logger.log($crate::test_logging::TestEvent::Custom {
            category: $cat,
            message: format!($($arg)*),
        });
    };
}

/// Log an error event to a test logger.
#[macro_export]
macro_rules! test_error {
    ($logger:expr, $cat:literal, $($arg:tt)*) => {
        $logger.log($crate::test_logging::TestEvent::Error {
            category: $cat,
            message: format!($($arg)*),
        });
    };
}

/// Assert a condition, printing the full log on failure.
#[macro_export]
macro_rules! assert_log {
    ($logger:expr, $cond:expr) => {
        if !$cond {
            eprintln!("{}", $logger.report());
            panic!("assertion failed: {}", stringify!($cond));
        }
    };
    ($logger:expr, $cond:expr, $($arg:tt)*) => {
        if !$cond {
            eprintln!("{}", $logger.report());
            panic!($($arg)*);
        }
    };
}

/// Assert equality, printing the full log on failure.
#[macro_export]
macro_rules! assert_eq_log {
    ($logger:expr, $left:expr, $right:expr) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if left_val != right_val {
                    eprintln!("{}", $logger.report());
                    panic!(
                        "assertion failed: `(left == right)`\n  left: {:?}\n right: {:?}",
                        left_val, right_val
                    );
                }
            }
        }
    };
    ($logger:expr, $left:expr, $right:expr, $($arg:tt)*) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if left_val != right_val {
                    eprintln!("{}", $logger.report());
                    panic!(
                        "assertion failed: `(left == right)`\n  left: {:?}\n right: {:?}\n{}",
                        left_val, right_val, format!($($arg)*)
                    );
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(TestLogLevel::Error < TestLogLevel::Warn);
        assert!(TestLogLevel::Warn < TestLogLevel::Info);
        assert!(TestLogLevel::Info < TestLogLevel::Debug);
        assert!(TestLogLevel::Debug < TestLogLevel::Trace);
    }

    #[test]
    fn level_from_str() {
        assert_eq!("error".parse(), Ok(TestLogLevel::Error));
        assert_eq!("WARNING".parse(), Ok(TestLogLevel::Warn));
        assert_eq!("trace".parse(), Ok(TestLogLevel::Trace));
        assert_eq!("bogus".parse::<TestLogLevel>(), Err(()));
    }

    #[test]
    fn logger_filters_by_level() {
        let logger = TestLogger::new(TestLogLevel::Info);

        logger.log(TestEvent::SocketClose);
        logger.log(TestEvent::Paused); // Trace level, filtered out.

        assert_eq!(logger.event_count(), 1);
    }

    #[test]
    fn report_includes_statistics() {
        let logger = TestLogger::new(TestLogLevel::Trace);

        logger.log(TestEvent::ChannelSend { bytes: 10 });
        logger.log(TestEvent::ChannelSend { bytes: 20 });
        logger.log(TestEvent::ChannelReceive { bytes: 10 });

        let report = logger.report();
        assert!(report.contains("Channel sends: 2"));
        assert!(report.contains("3 events"));
    }

    #[test]
    #[should_panic(expected = "Test logged 1 errors")]
    fn assert_no_errors_reports_failures() {
        let logger = TestLogger::new(TestLogLevel::Debug);
        test_error!(logger, "io", "injected failure");
        logger.assert_no_errors();
    }

    #[test]
    fn macros_capture_events() {
        let logger = TestLogger::new(TestLogLevel::Debug);
        test_log!(logger, "test", "message with arg: {}", 42);
        assert_eq!(logger.event_count(), 1);
    }
}
