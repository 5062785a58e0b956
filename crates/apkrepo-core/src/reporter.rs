//! Reporter trait for dependency injection
//!
//! Engine operations receive their logger explicitly instead of reaching for
//! a process-wide one, so several repositories can be maintained from one
//! process and tests can observe exactly what a single call reported.

use std::sync::{Arc, Mutex};

pub trait Reporter: Send + Sync {
    /// A new phase of an operation has started (e.g. "build index").
    fn section(&self, title: &str);

    /// Log a debug-level detail (subprocess command lines, tool output).
    fn debug(&self, msg: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn debug(&self, msg: &str) {
        (**self).debug(msg);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
}

/// Forwards to `tracing`, tagging every event with the reporter's scope.
#[derive(Debug, Clone)]
pub struct TracingReporter {
    scope: String,
}

impl TracingReporter {
    /// Create a reporter whose events carry `scope` (e.g. `"x86_64"` or a
    /// request id).
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }
}

impl Reporter for TracingReporter {
    fn section(&self, title: &str) {
        tracing::info!(scope = %self.scope, "== {title}");
    }
    fn debug(&self, msg: &str) {
        tracing::debug!(scope = %self.scope, "{msg}");
    }
    fn info(&self, msg: &str) {
        tracing::info!(scope = %self.scope, "{msg}");
    }
    fn warning(&self, msg: &str) {
        tracing::warn!(scope = %self.scope, "{msg}");
    }
    fn error(&self, msg: &str) {
        tracing::error!(scope = %self.scope, "{msg}");
    }
}

/// Discards every message.
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn debug(&self, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
}

/// Keeps every message in memory, prefixed with its level.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    lines: Mutex<Vec<String>>,
}

impl MemoryReporter {
    /// Snapshot of everything reported so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    fn push(&self, level: &str, msg: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(format!("{level}: {msg}"));
        }
    }
}

impl Reporter for MemoryReporter {
    fn section(&self, title: &str) {
        self.push("section", title);
    }
    fn debug(&self, msg: &str) {
        self.push("debug", msg);
    }
    fn info(&self, msg: &str) {
        self.push("info", msg);
    }
    fn warning(&self, msg: &str) {
        self.push("warning", msg);
    }
    fn error(&self, msg: &str) {
        self.push("error", msg);
    }
}
