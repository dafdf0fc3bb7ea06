//! Reporting client interface.
//!
//! The client owns transport, batching and retries. This crate only
//! initializes it, registers the payload filter, and hands it failures.

#[cfg(feature = "memory")]
mod memory;
mod payload;

#[cfg(feature = "memory")]
pub use memory::MemoryClient;
pub use payload::build_payload;

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::config::ResolvedOptions;
use crate::context::{ExtraData, RequestSnapshot};
use crate::error::ReporterError;

/// Hook run by the client on every candidate payload; `false` drops the report.
pub type PayloadHook = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// How the failure left the wrapped handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The handler returned an error.
    Error,
    /// The handler panicked.
    Panic,
}

/// Exception information for a single failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcInfo {
    /// Fully-qualified exception type name.
    pub class: String,
    pub message: String,
    pub kind: FailureKind,
}

pub trait ReportingClient: Send + Sync {
    fn initialize(&self, access_token: &str, options: &ResolvedOptions)
        -> Result<(), ReporterError>;

    fn register_payload_hook(&self, hook: PayloadHook);

    /// Submits a report. Must not wait for backend acknowledgement.
    fn submit(
        &self,
        exc_info: &ExcInfo,
        request: &RequestSnapshot,
        extra_data: &ExtraData,
    ) -> Result<(), ReporterError>;
}

/// Whether a reporting client could be constructed at process start.
#[derive(Clone)]
pub enum ReportingBackend {
    Available(Arc<dyn ReportingClient>),
    Unavailable(String),
}

impl ReportingBackend {
    pub fn available(client: impl ReportingClient + 'static) -> Self {
        Self::Available(Arc::new(client))
    }

    /// Marks reporting as unavailable. Logged here, once, and never again.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::error!(reason = %reason, "Reporting client unavailable, error reporting disabled");
        Self::Unavailable(reason)
    }

    /// Resolves availability from a fallible client constructor.
    pub fn load<C, E, F>(constructor: F) -> Self
    where
        C: ReportingClient + 'static,
        E: fmt::Display,
        F: FnOnce() -> Result<C, E>,
    {
        match constructor() {
            Ok(client) => Self::available(client),
            Err(e) => Self::unavailable(e.to_string()),
        }
    }

    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn into_error(self) -> Option<ReporterError> {
        match self {
            Self::Available(_) => None,
            Self::Unavailable(reason) => Some(ReporterError::DependencyUnavailable(reason)),
        }
    }
}

impl fmt::Debug for ReportingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available(_) => f.write_str("Available"),
            Self::Unavailable(reason) => f.debug_tuple("Unavailable").field(reason).finish(),
        }
    }
}
