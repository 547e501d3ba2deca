//! Seams to the collaborators the store depends on but does not own.
//!
//! - [`HistoryLoader`] - reads the agent's persisted conversation
//! - [`TraceSink`] - receives informational hydration traces
//! - [`ErrorReporter`] - receives errors that are recovered, not propagated
//!
//! The defaults log through `tracing`; embedders swap in their own.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{HistoryRecord, HydrationKey, SessionId};
use thiserror::Error;
use tracing::{debug, error};

// ============================================================================
// History Loader
// ============================================================================

/// Errors surfaced while loading persisted history.
///
/// `Clone` because one load result fans out to every coalesced waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HistoryError {
    /// The history source could not be read.
    #[error("failed to read history at {path}: {message}")]
    Io { path: String, message: String },

    /// The history source was read but is corrupt.
    #[error("failed to parse history at {path}: {reason}")]
    Parse { path: String, reason: String },

    /// The external session id cannot name a history source.
    #[error("invalid external session id: {0:?}")]
    InvalidSessionId(String),

    /// The history backend refused or failed the request.
    #[error("history backend error: {0}")]
    Backend(String),
}

impl HistoryError {
    pub fn io(path: impl fmt::Display, err: impl fmt::Display) -> Self {
        Self::Io {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Source of persisted conversation history.
///
/// Implementations may block on I/O; the store always calls them from a
/// spawned task, never from its command loop.
#[async_trait]
pub trait HistoryLoader: Send + Sync {
    /// Loads every record for one external session.
    ///
    /// A source that does not exist yet is an empty history, not an error.
    async fn load_history(
        &self,
        external_session_id: Option<&str>,
        project_path: Option<&str>,
    ) -> Result<Vec<HistoryRecord>, HistoryError>;
}

// ============================================================================
// Trace Sink
// ============================================================================

/// Informational record of one hydration load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrationTrace {
    pub key: HydrationKey,
    pub generation: u64,
    /// Records loaded, or `None` if the load failed.
    pub record_count: Option<usize>,
    pub elapsed: Duration,
}

/// Receives hydration traces. Never affects control flow.
pub trait TraceSink: Send + Sync {
    fn record(&self, session_id: &SessionId, trace: HydrationTrace);
}

/// Logs traces at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTraceSink;

impl TraceSink for TracingTraceSink {
    fn record(&self, session_id: &SessionId, trace: HydrationTrace) {
        debug!(
            session_id = %session_id,
            key = %trace.key,
            generation = trace.generation,
            records = ?trace.record_count,
            elapsed_ms = trace.elapsed.as_millis() as u64,
            "History load finished"
        );
    }
}

// ============================================================================
// Error Reporter
// ============================================================================

/// Receives errors the store recovers from instead of returning.
pub trait ErrorReporter: Send + Sync {
    fn report(
        &self,
        session_id: &SessionId,
        context: &'static str,
        error: &(dyn std::error::Error + Send + Sync),
    );
}

/// Logs reported errors at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(
        &self,
        session_id: &SessionId,
        context: &'static str,
        error: &(dyn std::error::Error + Send + Sync),
    ) {
        error!(
            session_id = %session_id,
            context = context,
            error = %error,
            "Session error recovered"
        );
    }
}

// ============================================================================
// Collaborator Bundle
// ============================================================================

/// Everything the store calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub loader: Arc<dyn HistoryLoader>,
    pub trace_sink: Arc<dyn TraceSink>,
    pub error_reporter: Arc<dyn ErrorReporter>,
}

impl Collaborators {
    /// Uses `loader` with the tracing-backed sink and reporter.
    pub fn new(loader: Arc<dyn HistoryLoader>) -> Self {
        Self {
            loader,
            trace_sink: Arc::new(TracingTraceSink),
            error_reporter: Arc::new(TracingErrorReporter),
        }
    }

    #[must_use]
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = sink;
        self
    }

    #[must_use]
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
