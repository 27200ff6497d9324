//! Structured failure values.
//!
//! A `Failure` is interpreted code's recoverable error: a category hashtag,
//! an exit code, optional usage/debug text and an ordered trace of every
//! frame crossing it has made. Failures propagate up the frame tree until
//! an enclosing frame captures them or they escape the process root.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Which way a trace entry crossed a frame boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The injection point where the failure was created.
    Origin,
    /// Appended while unwinding into an ancestor frame.
    Unwind,
    /// Appended when a captured failure was re-raised downward.
    Rethrow,
}

/// One frame-crossing event in a failure's trace.
#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub direction: Direction,
    pub module: Arc<str>,
    pub function: Arc<str>,
    pub pc: usize,
    /// Host source location, recorded at injection points only.
    pub source: Option<(&'static str, u32)>,
}

impl fmt::Display for FailureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Report markers: "<>" origin, "< " unwind, " >" rethrow
        let marker = match self.direction {
            Direction::Origin => "<>",
            Direction::Unwind => "< ",
            Direction::Rethrow => " >",
        };
        write!(f, "{} {}/{}:{}", marker, self.module, self.function, self.pc)?;
        if let Some((file, line)) = self.source {
            write!(f, " {}:{}", file, line)?;
        }
        Ok(())
    }
}

/// A recoverable runtime failure.
#[derive(Debug, Clone)]
pub struct Failure {
    /// Category tag (hashtag identifier, without the leading `#`).
    pub tag: Arc<str>,
    /// Numeric exit code; -1 unless set by the failing code.
    pub exit_code: i64,
    /// Human-readable usage text shown to the user, if any.
    pub usage: String,
    /// Debug detail appended to the report, if any.
    pub debug: String,
    /// Frame-crossing trace. Unwind entries accumulate at the front,
    /// rethrow entries at the back, so the report reads outermost first.
    pub trace: VecDeque<FailureEvent>,
}

impl Failure {
    /// Create a failure at an interpreted injection point.
    pub fn new(tag: &str, module: &Arc<str>, function: &Arc<str>, pc: usize) -> Self {
        let mut trace = VecDeque::new();
        trace.push_back(FailureEvent {
            direction: Direction::Origin,
            module: Arc::clone(module),
            function: Arc::clone(function),
            pc,
            source: None,
        });
        Self {
            tag: Arc::from(tag),
            exit_code: -1,
            usage: String::new(),
            debug: String::new(),
            trace,
        }
    }

    /// Create a failure from host code, recording the host source location.
    #[track_caller]
    pub fn from_host(tag: &str, module: &str, function: &str) -> Self {
        let loc = std::panic::Location::caller();
        let mut trace = VecDeque::new();
        trace.push_back(FailureEvent {
            direction: Direction::Origin,
            module: Arc::from(module),
            function: Arc::from(function),
            pc: 0,
            source: Some((loc.file(), loc.line())),
        });
        Self {
            tag: Arc::from(tag),
            exit_code: -1,
            usage: String::new(),
            debug: String::new(),
            trace,
        }
    }

    pub fn with_usage(mut self, usage: &str) -> Self {
        self.usage = usage.to_string();
        self
    }

    pub fn with_debug(mut self, debug: &str) -> Self {
        self.debug = debug.to_string();
        self
    }

    /// Record an unwind crossing into the named ancestor frame.
    /// Appends exactly one entry.
    pub fn trace_up(&mut self, module: &Arc<str>, function: &Arc<str>, pc: usize) {
        self.trace.push_front(FailureEvent {
            direction: Direction::Unwind,
            module: Arc::clone(module),
            function: Arc::clone(function),
            pc,
            source: None,
        });
    }

    /// Record a downward rethrow crossing. Appends exactly one entry.
    pub fn trace_down(&mut self, module: &Arc<str>, function: &Arc<str>, pc: usize) {
        self.trace.push_back(FailureEvent {
            direction: Direction::Rethrow,
            module: Arc::clone(module),
            function: Arc::clone(function),
            pc,
            source: None,
        });
    }
}

impl fmt::Display for Failure {
    /// The user-facing report: tag, usage text and the full trace.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Failure: #{}", self.tag)?;
        if !self.usage.is_empty() {
            writeln!(f, "{}", self.usage)?;
        }
        for event in &self.trace {
            writeln!(f, "{}", event)?;
        }
        if !self.debug.is_empty() {
            writeln!(f, "{}", self.debug)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn test_new_failure_has_origin_entry() {
        let fail = Failure::new("bad_input", &name("m"), &name("f"), 12);
        assert_eq!(fail.trace.len(), 1);
        assert_eq!(fail.trace[0].direction, Direction::Origin);
        assert_eq!(fail.exit_code, -1);
    }

    #[test]
    fn test_each_crossing_appends_one_entry() {
        let mut fail = Failure::new("oops", &name("m"), &name("leaf"), 3);
        let before = fail.trace.len();
        fail.trace_up(&name("m"), &name("mid"), 8);
        fail.trace_up(&name("m"), &name("root"), 1);
        assert_eq!(fail.trace.len(), before + 2);
        // unwind entries accumulate at the front, outermost first
        assert_eq!(fail.trace[0].function.as_ref(), "root");
        assert_eq!(fail.trace[1].function.as_ref(), "mid");
    }

    #[test]
    fn test_report_format() {
        let mut fail = Failure::new("missing_arg", &name("app"), &name("main"), 0)
            .with_usage("usage: app <file>");
        fail.trace_up(&name("app"), &name("start"), 4);
        let report = fail.to_string();
        assert!(report.starts_with("Failure: #missing_arg\n"));
        assert!(report.contains("usage: app <file>"));
        assert!(report.contains("<  app/start:4"));
        assert!(report.contains("<> app/main:0"));
    }
}
