//! Rollbar item payload construction.

use serde_json::{json, Value};

use super::{ExcInfo, FailureKind};
use crate::config::ResolvedOptions;
use crate::context::{ExtraData, RequestSnapshot};

const DEFAULT_ENVIRONMENT: &str = "production";

/// Builds a Rollbar-shaped item payload for one failure.
///
/// The extra data lands under `data.custom`, which is where the payload
/// filter looks for the exception type name.
pub fn build_payload(
    access_token: &str,
    options: &ResolvedOptions,
    exc_info: &ExcInfo,
    request: &RequestSnapshot,
    extra_data: &ExtraData,
) -> Value {
    let level = match exc_info.kind {
        FailureKind::Error => "error",
        FailureKind::Panic => "critical",
    };

    json!({
        "access_token": access_token,
        "data": {
            "environment": options.get_str("environment").unwrap_or(DEFAULT_ENVIRONMENT),
            "level": level,
            "language": "rust",
            "framework": "tower",
            "code_version": options.get_str("code_version"),
            "server": {
                "branch": options.get_str("branch"),
            },
            "body": {
                "trace": {
                    "frames": [],
                    "exception": {
                        "class": exc_info.class,
                        "message": exc_info.message,
                    },
                },
            },
            "request": {
                "url": request.uri().to_string(),
                "method": request.method().as_str(),
                "query_string": request.query(),
            },
            "custom": extra_data,
        },
    })
}
