//! Request context attached to error reports.

use http::header::{AUTHORIZATION, COOKIE, USER_AGENT};
use http::{HeaderValue, Method, Request, Uri};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Extra data submitted alongside a report.
pub type ExtraData = BTreeMap<String, String>;

/// Maps a host error onto a stable, message-independent type name.
///
/// Implementations describe where an error variant lives in the host's error
/// taxonomy. The qualified name `<module>.<class>` is what the payload filter
/// compares against, so both sides must agree on the format.
pub trait ReportableError: fmt::Display {
    /// Module defining the error, if it has one.
    fn exception_module(&self) -> Option<&str> {
        None
    }

    /// Class name of the error variant.
    fn exception_class(&self) -> &str;
}

impl ReportableError for std::convert::Infallible {
    fn exception_class(&self) -> &str {
        match *self {}
    }
}

/// Returns `<module>.<class>`, or just `<class>` when the module is unknown.
///
/// An empty class falls back to the Rust type name of `E`, so some class name
/// is always produced.
pub fn qualified_type_name<E: ReportableError + ?Sized>(error: &E) -> String {
    let class = match error.exception_class() {
        "" => fallback_class_name::<E>(),
        class => class,
    };

    match error.exception_module() {
        Some(module) if !module.is_empty() => format!("{module}.{class}"),
        _ => class.to_owned(),
    }
}

fn fallback_class_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(full)
}

/// The parts of a request needed to build a report, captured before the
/// request is handed to the inner service.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    method: Method,
    uri: Uri,
    user_agent: Option<HeaderValue>,
    cookie: Option<HeaderValue>,
    authorization: Option<HeaderValue>,
}

impl RequestSnapshot {
    pub fn capture<B>(req: &Request<B>) -> Self {
        let headers = req.headers();
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            user_agent: headers.get(USER_AGENT).cloned(),
            cookie: headers.get(COOKIE).cloned(),
            authorization: headers.get(AUTHORIZATION).cloned(),
        }
    }

    pub const fn method(&self) -> &Method {
        &self.method
    }

    pub const fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> &str {
        self.uri.query().unwrap_or_default()
    }

    pub fn user_agent(&self) -> String {
        header_string(self.user_agent.as_ref())
    }

    pub fn cookie(&self) -> String {
        header_string(self.cookie.as_ref())
    }

    pub fn authorization(&self) -> String {
        header_string(self.authorization.as_ref())
    }
}

fn header_string(value: Option<&HeaderValue>) -> String {
    value
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}

/// Per-request context built when a failure escapes the wrapped handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportContext {
    pub path_info: String,
    pub http_request_method: String,
    pub query_string: String,
    pub http_user_agent: String,
    pub http_cookie: String,
    pub http_authorization: String,
    /// Fully-qualified exception type name.
    pub exception: String,
}

/// Builds the report context for `error` raised while serving `request`.
pub fn extract<E: ReportableError + ?Sized>(request: &RequestSnapshot, error: &E) -> ReportContext {
    ReportContext {
        path_info: request.path().to_owned(),
        http_request_method: request.method().as_str().to_owned(),
        query_string: request.query().to_owned(),
        http_user_agent: request.user_agent(),
        http_cookie: request.cookie(),
        http_authorization: request.authorization(),
        exception: qualified_type_name(error),
    }
}

impl From<ReportContext> for ExtraData {
    fn from(context: ReportContext) -> Self {
        [
            ("path_info", context.path_info),
            ("http_request_method", context.http_request_method),
            ("query_string", context.query_string),
            ("http_user_agent", context.http_user_agent),
            ("http_cookie", context.http_cookie),
            ("http_authorization", context.http_authorization),
            ("exception", context.exception),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect()
    }
}
