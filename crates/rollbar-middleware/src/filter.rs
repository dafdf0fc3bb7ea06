//! Payload filter that suppresses expected, user-facing errors.
//!
//! Suppression is keyed only on the fully-qualified exception type name found
//! at `data.custom.exception` in the report payload, compared by exact string
//! equality against [`DENYLIST`]. A payload without that field is forwarded.

use serde_json::Value;
use std::fmt;

use crate::context::ReportableError;

/// Module that defines the expected error taxonomy.
pub const EXPECTED_ERROR_MODULE: &str = "odoo.exceptions";

/// JSON pointer to the exception type name inside a report payload.
pub const EXCEPTION_POINTER: &str = "/data/custom/exception";

/// Fully-qualified names of errors that are never reported.
pub const DENYLIST: [&str; 9] = [
    ExpectedError::AccessDenied.type_name(),
    ExpectedError::AccessError.type_name(),
    ExpectedError::DeferredException.type_name(),
    ExpectedError::MissingError.type_name(),
    ExpectedError::RedirectWarning.type_name(),
    ExpectedError::UserError.type_name(),
    ExpectedError::ValidationError.type_name(),
    ExpectedError::Warning.type_name(),
    ExpectedError::ExceptOrm.type_name(),
];

/// Expected errors: raised deliberately to tell a user something, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectedError {
    AccessDenied,
    AccessError,
    DeferredException,
    MissingError,
    RedirectWarning,
    UserError,
    ValidationError,
    Warning,
    /// Legacy generic ORM exception.
    ExceptOrm,
}

impl ExpectedError {
    pub const ALL: [Self; 9] = [
        Self::AccessDenied,
        Self::AccessError,
        Self::DeferredException,
        Self::MissingError,
        Self::RedirectWarning,
        Self::UserError,
        Self::ValidationError,
        Self::Warning,
        Self::ExceptOrm,
    ];

    pub const fn class_name(self) -> &'static str {
        match self {
            Self::AccessDenied => "AccessDenied",
            Self::AccessError => "AccessError",
            Self::DeferredException => "DeferredException",
            Self::MissingError => "MissingError",
            Self::RedirectWarning => "RedirectWarning",
            Self::UserError => "UserError",
            Self::ValidationError => "ValidationError",
            Self::Warning => "Warning",
            Self::ExceptOrm => "except_orm",
        }
    }

    pub const fn type_name(self) -> &'static str {
        match self {
            Self::AccessDenied => "odoo.exceptions.AccessDenied",
            Self::AccessError => "odoo.exceptions.AccessError",
            Self::DeferredException => "odoo.exceptions.DeferredException",
            Self::MissingError => "odoo.exceptions.MissingError",
            Self::RedirectWarning => "odoo.exceptions.RedirectWarning",
            Self::UserError => "odoo.exceptions.UserError",
            Self::ValidationError => "odoo.exceptions.ValidationError",
            Self::Warning => "odoo.exceptions.Warning",
            Self::ExceptOrm => "odoo.exceptions.except_orm",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.type_name() == name)
    }
}

impl fmt::Display for ExpectedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

impl ReportableError for ExpectedError {
    fn exception_module(&self) -> Option<&str> {
        Some(EXPECTED_ERROR_MODULE)
    }

    fn exception_class(&self) -> &str {
        self.class_name()
    }
}

/// Outcome of the filter for a single report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Suppress,
    Forward,
}

/// Exact, non-hierarchical denylist lookup.
pub fn is_denylisted(type_name: &str) -> bool {
    DENYLIST.iter().any(|entry| *entry == type_name)
}

/// Decides whether a report with the given exception type name is forwarded.
pub fn decide_type_name(type_name: &str) -> FilterDecision {
    if is_denylisted(type_name) {
        tracing::debug!(
            exception = %type_name,
            "Skipping report for denylisted exception"
        );
        FilterDecision::Suppress
    } else {
        FilterDecision::Forward
    }
}

pub fn decide(payload: &Value) -> FilterDecision {
    match payload.pointer(EXCEPTION_POINTER).and_then(Value::as_str) {
        Some(type_name) => decide_type_name(type_name),
        None => FilterDecision::Forward,
    }
}

/// Payload hook registered with the reporting client.
pub fn should_forward(payload: &Value) -> bool {
    decide(payload) == FilterDecision::Forward
}
