//! Rollbar error-reporting middleware for tower HTTP services.
//!
//! The middleware wraps a host's request handler once at startup. Failures
//! escaping the handler are enriched with request context, filtered against a
//! denylist of expected user-facing errors, and handed to a reporting client,
//! then propagated unchanged.
//!
//! ```rust,ignore
//! let backend = ReportingBackend::available(MemoryClient::new());
//! let mut registry = MiddlewareRegistry::new(backend);
//! let app = registry.install(&ConfigView::load_from("rollbar.toml")?, router)?;
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod installer;
pub mod middleware;

#[cfg(feature = "memory")]
pub use client::MemoryClient;
pub use client::{ExcInfo, FailureKind, PayloadHook, ReportingBackend, ReportingClient};
pub use config::{split_multiple, ConfigValue, ConfigView, ReporterSettings, ResolvedOptions};
pub use context::{extract, qualified_type_name, ReportContext, ReportableError, RequestSnapshot};
pub use error::ReporterError;
pub use filter::{should_forward, ExpectedError, FilterDecision};
pub use installer::{InstallState, InstalledHandler, MiddlewareRegistry};
pub use middleware::{ReportingLayer, ReportingService};
