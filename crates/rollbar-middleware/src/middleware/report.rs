//! Tower layer that reports failures escaping the wrapped service.
//!
//! Errors and panics are reported and then propagated exactly as the inner
//! service produced them. Reporting is best-effort: a failing or panicking
//! client is logged and otherwise ignored.

use futures::FutureExt;
use http::{Request, Response};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::client::{ExcInfo, FailureKind, ReportingClient};
use crate::context::{extract, ExtraData, ReportableError, RequestSnapshot};
use crate::filter::{self, FilterDecision};

/// Tower layer that reports failures to a [`ReportingClient`].
#[derive(Clone)]
pub struct ReportingLayer {
    client: Arc<dyn ReportingClient>,
}

impl ReportingLayer {
    pub fn new(client: Arc<dyn ReportingClient>) -> Self {
        Self { client }
    }
}

impl fmt::Debug for ReportingLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportingLayer").finish_non_exhaustive()
    }
}

impl<S> Layer<S> for ReportingLayer {
    type Service = ReportingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ReportingService {
            inner,
            client: self.client.clone(),
        }
    }
}

/// The service wrapper that reports failures.
#[derive(Clone)]
pub struct ReportingService<S> {
    inner: S,
    client: Arc<dyn ReportingClient>,
}

impl<S> ReportingService<S> {
    pub const fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: fmt::Debug> fmt::Debug for ReportingService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportingService")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ReportingService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: ReportableError + Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let snapshot = RequestSnapshot::capture(&req);
        let client = self.client.clone();

        // Keep the service that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let guarded = AssertUnwindSafe(async move { inner.call(req).await });

            match guarded.catch_unwind().await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(error)) => {
                    report_failure(client.as_ref(), &snapshot, &error, FailureKind::Error);
                    Err(error)
                }
                Err(panic) => {
                    let error = PanicError::from_payload(panic.as_ref());
                    report_failure(client.as_ref(), &snapshot, &error, FailureKind::Panic);
                    std::panic::resume_unwind(panic)
                }
            }
        })
    }
}

/// A panic escaping the inner service, described for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicError {
    message: String,
}

impl PanicError {
    fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self { message }
    }
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl ReportableError for PanicError {
    fn exception_class(&self) -> &str {
        "Panic"
    }
}

/// Skips denylisted errors before `submit`; the client's payload hook repeats
/// the check for payloads reaching it from any other path, so keep both.
fn report_failure<E: ReportableError + ?Sized>(
    client: &dyn ReportingClient,
    snapshot: &RequestSnapshot,
    error: &E,
    kind: FailureKind,
) {
    let context = extract(snapshot, error);

    if filter::decide_type_name(&context.exception) == FilterDecision::Suppress {
        return;
    }

    let exc_info = ExcInfo {
        class: context.exception.clone(),
        message: error.to_string(),
        kind,
    };
    let extra_data = ExtraData::from(context);

    let submitted = std::panic::catch_unwind(AssertUnwindSafe(|| {
        client.submit(&exc_info, snapshot, &extra_data)
    }));

    match submitted {
        Ok(Ok(())) => {
            tracing::debug!(exception = %exc_info.class, "Error report submitted");
        }
        Ok(Err(e)) => {
            tracing::warn!(
                error = %e,
                exception = %exc_info.class,
                "Failed to submit error report"
            );
        }
        Err(_) => {
            tracing::warn!(
                exception = %exc_info.class,
                "Reporting client panicked while submitting error report"
            );
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::client::{MemoryClient, PayloadHook};
    use crate::config::ResolvedOptions;
    use crate::error::ReporterError;
    use crate::filter::ExpectedError;
    use axum::body::Body;
    use http::StatusCode;
    use tower::ServiceExt;

    #[derive(Debug, PartialEq, Eq)]
    struct DatabaseError;

    impl fmt::Display for DatabaseError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("connection reset")
        }
    }

    impl ReportableError for DatabaseError {
        fn exception_module(&self) -> Option<&str> {
            Some("app.db")
        }

        fn exception_class(&self) -> &str {
            "DatabaseError"
        }
    }

    struct FailingClient;

    impl ReportingClient for FailingClient {
        fn initialize(&self, _: &str, _: &ResolvedOptions) -> Result<(), ReporterError> {
            Ok(())
        }

        fn register_payload_hook(&self, _: PayloadHook) {}

        fn submit(
            &self,
            _: &ExcInfo,
            _: &RequestSnapshot,
            _: &ExtraData,
        ) -> Result<(), ReporterError> {
            Err(ReporterError::ReportSubmission("network unreachable".into()))
        }
    }

    struct PanickingClient;

    impl ReportingClient for PanickingClient {
        fn initialize(&self, _: &str, _: &ResolvedOptions) -> Result<(), ReporterError> {
            Ok(())
        }

        fn register_payload_hook(&self, _: PayloadHook) {}

        fn submit(
            &self,
            _: &ExcInfo,
            _: &RequestSnapshot,
            _: &ExtraData,
        ) -> Result<(), ReporterError> {
            panic!("client bug")
        }
    }

    fn initialized_client() -> MemoryClient {
        let client = MemoryClient::new();
        client
            .initialize("token", &ResolvedOptions::default())
            .unwrap();
        client
    }

    fn request() -> Request<Body> {
        Request::builder()
            .uri("/orders?page=2")
            .header("user-agent", "test-agent")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn passes_success_through() {
        let client = initialized_client();
        let service = ReportingLayer::new(Arc::new(client.clone())).layer(tower::service_fn(
            |_req: Request<Body>| async {
                Ok::<_, DatabaseError>(
                    Response::builder()
                        .status(StatusCode::CREATED)
                        .body(Body::empty())
                        .unwrap(),
                )
            },
        ));

        let response = service.oneshot(request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(client.submissions(), 0);
    }

    #[tokio::test]
    async fn reports_and_propagates_error() {
        let client = initialized_client();
        let service = ReportingLayer::new(Arc::new(client.clone())).layer(tower::service_fn(
            |_req: Request<Body>| async { Err::<Response<Body>, _>(DatabaseError) },
        ));

        let err = service.oneshot(request()).await.unwrap_err();

        assert_eq!(err, DatabaseError);
        assert_eq!(client.submissions(), 1);
        let reports = client.reports();
        assert_eq!(reports[0]["data"]["custom"]["exception"], "app.db.DatabaseError");
        assert_eq!(reports[0]["data"]["custom"]["http_user_agent"], "test-agent");
        assert_eq!(reports[0]["data"]["custom"]["query_string"], "page=2");
        assert_eq!(
            reports[0]["data"]["body"]["trace"]["exception"]["message"],
            "connection reset"
        );
    }

    #[tokio::test]
    async fn denylisted_error_is_not_submitted() {
        let client = initialized_client();
        let service = ReportingLayer::new(Arc::new(client.clone())).layer(tower::service_fn(
            |_req: Request<Body>| async {
                Err::<Response<Body>, _>(ExpectedError::AccessDenied)
            },
        ));

        let err = service.oneshot(request()).await.unwrap_err();

        assert_eq!(err, ExpectedError::AccessDenied);
        assert_eq!(client.submissions(), 0);
    }

    #[tokio::test]
    async fn submission_failure_does_not_mask_error() {
        let service = ReportingLayer::new(Arc::new(FailingClient)).layer(tower::service_fn(
            |_req: Request<Body>| async { Err::<Response<Body>, _>(DatabaseError) },
        ));

        let err = service.oneshot(request()).await.unwrap_err();
        assert_eq!(err, DatabaseError);
    }

    #[tokio::test]
    async fn client_panic_does_not_mask_error() {
        let service = ReportingLayer::new(Arc::new(PanickingClient)).layer(tower::service_fn(
            |_req: Request<Body>| async { Err::<Response<Body>, _>(DatabaseError) },
        ));

        let err = service.oneshot(request()).await.unwrap_err();
        assert_eq!(err, DatabaseError);
    }

    #[tokio::test]
    async fn uninitialized_client_does_not_mask_error() {
        let client = MemoryClient::new();
        let service = ReportingLayer::new(Arc::new(client.clone())).layer(tower::service_fn(
            |_req: Request<Body>| async { Err::<Response<Body>, _>(DatabaseError) },
        ));

        let err = service.oneshot(request()).await.unwrap_err();
        assert_eq!(err, DatabaseError);
        assert_eq!(client.submissions(), 1);
        assert!(client.reports().is_empty());
    }

    #[tokio::test]
    async fn reports_and_resumes_panic() {
        let client = initialized_client();
        let service = ReportingLayer::new(Arc::new(client.clone())).layer(tower::service_fn(
            |_req: Request<Body>| async {
                if true {
                    panic!("handler exploded");
                }
                Ok::<Response<Body>, DatabaseError>(Response::new(Body::empty()))
            },
        ));

        let outcome = AssertUnwindSafe(service.oneshot(request()))
            .catch_unwind()
            .await;

        let panic = outcome.expect_err("panic should propagate");
        assert_eq!(panic.downcast_ref::<&str>(), Some(&"handler exploded"));

        let reports = client.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["data"]["custom"]["exception"], "Panic");
        assert_eq!(reports[0]["data"]["level"], "critical");
        assert_eq!(
            reports[0]["data"]["body"]["trace"]["exception"]["message"],
            "handler exploded"
        );
    }

    #[test]
    fn panic_payload_messages() {
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(PanicError::from_payload(boxed.as_ref()).to_string(), "owned");

        let boxed: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(
            PanicError::from_payload(boxed.as_ref()).to_string(),
            "non-string panic payload"
        );
    }
}
