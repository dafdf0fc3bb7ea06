//! Reporter error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReporterError {
    #[error("Configuration error for '{key}': {reason}")]
    Configuration { key: String, reason: String },

    #[error("Missing Rollbar access token")]
    MissingCredential,

    #[error("Reporting backend unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Report submission failed: {0}")]
    ReportSubmission(String),

    #[error("Reporting middleware already installed")]
    AlreadyInstalled,
}

impl ReporterError {
    pub(crate) fn configuration(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::MissingCredential => "missing_credential",
            Self::DependencyUnavailable(_) => "dependency_unavailable",
            Self::ReportSubmission(_) => "report_submission_failure",
            Self::AlreadyInstalled => "already_installed",
        }
    }
}
