//! One-shot installation of the reporting middleware around a host service.
//!
//! The registry moves through three states:
//!
//! - **Uninitialized**: nothing installed yet
//! - **Disabled**: reporting is off; the host service was returned untouched
//! - **Active**: the client was initialized and the host service wrapped
//!
//! Whether installation ends Disabled or Active depends only on the reporting
//! backend's availability and the resolved options.

use http::{Request, Response};
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::client::{ReportingBackend, ReportingClient};
use crate::config::{resolve_options, ConfigView, ReporterSettings, ResolvedOptions, ROLLBAR_OPTIONS};
use crate::context::ReportableError;
use crate::error::ReporterError;
use crate::filter;
use crate::middleware::{ReportingLayer, ReportingService};

/// Why installation left the host service untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisabledReason {
    /// The reporting client could not be loaded.
    BackendUnavailable,
    /// `rollbar_enabled` resolved falsy.
    NotEnabled,
    /// The access token resolved empty.
    MissingCredential,
    /// A declared option could not be converted.
    Configuration(ReporterError),
    /// The client rejected initialization.
    Initialization(ReporterError),
}

/// Installation state of a [`MiddlewareRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    Uninitialized,
    Disabled(DisabledReason),
    Active(ReporterSettings),
}

/// Everything needed to go Active, produced by a successful check.
struct Activation {
    client: Arc<dyn ReportingClient>,
    access_token: String,
    options: ResolvedOptions,
    settings: ReporterSettings,
}

/// Decides between Disabled and Active without side effects on the client.
fn check(backend: &ReportingBackend, view: &ConfigView) -> Result<Activation, DisabledReason> {
    let client = match backend {
        ReportingBackend::Available(client) => client.clone(),
        // Already logged when availability was resolved.
        ReportingBackend::Unavailable(_) => return Err(DisabledReason::BackendUnavailable),
    };

    let mut options = resolve_options(view, ROLLBAR_OPTIONS).map_err(|e| {
        tracing::error!(error = %e, "Invalid Rollbar configuration, error reporting disabled");
        DisabledReason::Configuration(e)
    })?;

    if !options.is_enabled() {
        tracing::debug!("Rollbar error reporting not enabled");
        return Err(DisabledReason::NotEnabled);
    }

    let Some(access_token) = options.take_str("access_token") else {
        tracing::error!(
            error = %ReporterError::MissingCredential,
            "You must specify a Rollbar access token (rollbar_access_token) to enable error reporting"
        );
        return Err(DisabledReason::MissingCredential);
    };

    let settings = ReporterSettings::resolve(view);

    Ok(Activation {
        client,
        access_token,
        options,
        settings,
    })
}

/// Owns the single interception point around the host's request handler.
#[derive(Debug)]
pub struct MiddlewareRegistry {
    backend: ReportingBackend,
    state: InstallState,
}

impl MiddlewareRegistry {
    pub const fn new(backend: ReportingBackend) -> Self {
        Self {
            backend,
            state: InstallState::Uninitialized,
        }
    }

    pub const fn state(&self) -> &InstallState {
        &self.state
    }

    pub const fn is_active(&self) -> bool {
        matches!(self.state, InstallState::Active(_))
    }

    /// Installs the middleware around `handler`.
    ///
    /// Returns the handler to serve requests with: wrapped when reporting is
    /// active, untouched otherwise. Only the first call is honoured; later calls
    /// fail with [`ReporterError::AlreadyInstalled`] and drop `handler`.
    pub fn install<S>(
        &mut self,
        view: &ConfigView,
        handler: S,
    ) -> Result<InstalledHandler<S>, ReporterError> {
        if self.state != InstallState::Uninitialized {
            tracing::warn!(state = ?self.state, "Reporting middleware install called twice");
            return Err(ReporterError::AlreadyInstalled);
        }

        let activation = match check(&self.backend, view) {
            Ok(activation) => activation,
            Err(reason) => {
                self.state = InstallState::Disabled(reason);
                return Ok(InstalledHandler::Passthrough(handler));
            }
        };

        let Activation {
            client,
            access_token,
            options,
            settings,
        } = activation;

        if let Err(e) = client.initialize(&access_token, &options) {
            tracing::error!(error = %e, "Rollbar client initialization failed, error reporting disabled");
            self.state = InstallState::Disabled(DisabledReason::Initialization(e));
            return Ok(InstalledHandler::Passthrough(handler));
        }

        client.register_payload_hook(Arc::new(filter::should_forward));

        tracing::info!(
            environment = options.get_str("environment").unwrap_or_default(),
            branch = options.get_str("branch").unwrap_or_default(),
            code_version = options.get_str("code_version").unwrap_or_default(),
            logging_level = %settings.logging_level,
            exclude_loggers = ?settings.exclude_loggers,
            "Rollbar error reporting enabled"
        );

        self.state = InstallState::Active(settings);
        Ok(InstalledHandler::Reporting(
            ReportingLayer::new(client).layer(handler),
        ))
    }
}

/// The host handler after installation.
#[derive(Clone)]
pub enum InstalledHandler<S> {
    Reporting(ReportingService<S>),
    Passthrough(S),
}

impl<S> InstalledHandler<S> {
    pub const fn is_reporting(&self) -> bool {
        matches!(self, Self::Reporting(_))
    }

    /// The host handler, unwrapped.
    pub fn into_inner(self) -> S {
        match self {
            Self::Reporting(service) => service.into_inner(),
            Self::Passthrough(handler) => handler,
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for InstalledHandler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reporting(service) => f.debug_tuple("Reporting").field(service).finish(),
            Self::Passthrough(handler) => f.debug_tuple("Passthrough").field(handler).finish(),
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for InstalledHandler<S>
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
        match self {
            Self::Reporting(service) => service.poll_ready(cx),
            Self::Passthrough(handler) => handler.poll_ready(cx),
        }
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        match self {
            Self::Reporting(service) => service.call(req),
            Self::Passthrough(handler) => Box::pin(handler.call(req)),
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::client::{ExcInfo, FailureKind, MemoryClient};
    use crate::config::OptionValue;
    use crate::context::{ExtraData, RequestSnapshot};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Handler(&'static str);

    fn active_view() -> ConfigView {
        ConfigView::new()
            .with("rollbar_enabled", true)
            .with("rollbar_access_token", " secret ")
            .with("rollbar_environment", "production")
    }

    #[test]
    fn disabled_when_not_enabled() {
        let client = MemoryClient::new();
        let mut registry = MiddlewareRegistry::new(ReportingBackend::available(client.clone()));

        let view = ConfigView::new().with("rollbar_access_token", "secret");
        let installed = registry.install(&view, Handler("host")).unwrap();

        assert!(!installed.is_reporting());
        assert_eq!(installed.into_inner(), Handler("host"));
        assert_eq!(
            registry.state(),
            &InstallState::Disabled(DisabledReason::NotEnabled)
        );
        assert!(client.initialization().is_none());
    }

    #[test]
    fn disabled_when_token_blank() {
        let client = MemoryClient::new();
        let mut registry = MiddlewareRegistry::new(ReportingBackend::available(client.clone()));

        let view = ConfigView::new()
            .with("rollbar_enabled", "true")
            .with("rollbar_access_token", "   ");
        let installed = registry.install(&view, Handler("host")).unwrap();

        assert!(!installed.is_reporting());
        assert_eq!(
            registry.state(),
            &InstallState::Disabled(DisabledReason::MissingCredential)
        );
        assert!(client.initialization().is_none());
        assert_eq!(client.hook_count(), 0);
    }

    #[test]
    fn disabled_when_backend_unavailable() {
        let mut registry =
            MiddlewareRegistry::new(ReportingBackend::unavailable("rollbar client missing"));

        let installed = registry.install(&active_view(), Handler("host")).unwrap();

        assert_eq!(installed.into_inner(), Handler("host"));
        assert_eq!(
            registry.state(),
            &InstallState::Disabled(DisabledReason::BackendUnavailable)
        );
    }

    #[test]
    fn disabled_on_configuration_error() {
        let client = MemoryClient::new();
        let mut registry = MiddlewareRegistry::new(ReportingBackend::available(client.clone()));

        let view = active_view().with("rollbar_enabled", "sometimes");
        let installed = registry.install(&view, Handler("host")).unwrap();

        assert!(!installed.is_reporting());
        assert!(matches!(
            registry.state(),
            InstallState::Disabled(DisabledReason::Configuration(ReporterError::Configuration { key, .. }))
                if key == "rollbar_enabled"
        ));
        assert!(client.initialization().is_none());
    }

    #[test]
    fn active_initializes_client() {
        let client = MemoryClient::new();
        let mut registry = MiddlewareRegistry::new(ReportingBackend::available(client.clone()));

        let installed = registry.install(&active_view(), Handler("host")).unwrap();

        assert!(installed.is_reporting());
        assert!(registry.is_active());
        assert_eq!(
            registry.state(),
            &InstallState::Active(ReporterSettings::default())
        );

        let (token, options) = client.initialization().expect("client initialized");
        assert_eq!(token, "secret");
        assert!(!options.contains("access_token"));
        assert_eq!(options.get("enabled"), Some(&OptionValue::Bool(true)));
        assert_eq!(options.get_str("environment"), Some("production"));
        assert_eq!(client.hook_count(), 1);
    }

    #[test]
    fn blank_token_reported_before_settings() {
        for level in ["warn", "loud", ""] {
            let mut registry =
                MiddlewareRegistry::new(ReportingBackend::available(MemoryClient::new()));
            let view = ConfigView::new()
                .with("rollbar_enabled", true)
                .with("rollbar_access_token", "")
                .with("rollbar_logging_level", level);

            registry.install(&view, Handler("host")).unwrap();
            assert_eq!(
                registry.state(),
                &InstallState::Disabled(DisabledReason::MissingCredential),
                "{level:?}"
            );
        }
    }

    #[test]
    fn unusual_logging_level_still_activates() {
        for level in ["warning", "30", ""] {
            let client = MemoryClient::new();
            let mut registry = MiddlewareRegistry::new(ReportingBackend::available(client.clone()));
            let view = ConfigView::new()
                .with("rollbar_enabled", true)
                .with("rollbar_access_token", "tok")
                .with("rollbar_logging_level", level);

            let installed = registry.install(&view, Handler("host")).unwrap();

            assert!(installed.is_reporting(), "{level:?}");
            assert!(registry.is_active());
            assert!(client.initialization().is_some());
        }
    }

    #[test]
    fn registered_hook_filters_direct_submissions() {
        let client = MemoryClient::new();
        let mut registry = MiddlewareRegistry::new(ReportingBackend::available(client.clone()));
        registry.install(&active_view(), Handler("host")).unwrap();

        let req = http::Request::builder().uri("/").body(()).unwrap();
        let snapshot = RequestSnapshot::capture(&req);
        let class = filter::ExpectedError::UserError.type_name();
        let exc_info = ExcInfo {
            class: class.to_owned(),
            message: "Insufficient stock".into(),
            kind: FailureKind::Error,
        };
        let extra = ExtraData::from([("exception".to_owned(), class.to_owned())]);

        client.submit(&exc_info, &snapshot, &extra).unwrap();

        assert_eq!(client.suppressed(), 1);
        assert!(client.reports().is_empty());
    }

    #[test]
    fn second_install_is_rejected() {
        let client = MemoryClient::new();
        let mut registry = MiddlewareRegistry::new(ReportingBackend::available(client.clone()));

        registry.install(&active_view(), Handler("first")).unwrap();
        let err = registry
            .install(&active_view(), Handler("second"))
            .unwrap_err();

        assert_eq!(err, ReporterError::AlreadyInstalled);
        assert_eq!(client.hook_count(), 1);
    }

    #[test]
    fn second_install_rejected_after_disabled() {
        let mut registry = MiddlewareRegistry::new(ReportingBackend::unavailable("missing"));

        registry.install(&ConfigView::new(), Handler("first")).unwrap();
        assert_eq!(
            registry.install(&ConfigView::new(), Handler("second")).unwrap_err(),
            ReporterError::AlreadyInstalled
        );
    }
}
