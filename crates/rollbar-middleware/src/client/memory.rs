use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::{build_payload, ExcInfo, PayloadHook, ReportingClient};
use crate::config::ResolvedOptions;
use crate::context::{ExtraData, RequestSnapshot};
use crate::error::ReporterError;

#[derive(Default)]
struct MemoryState {
    initialized: Option<(String, ResolvedOptions)>,
    hooks: Vec<PayloadHook>,
    submissions: usize,
    suppressed: usize,
    reports: Vec<Value>,
}

impl fmt::Debug for MemoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryState")
            .field("initialized", &self.initialized.is_some())
            .field("hooks", &self.hooks.len())
            .field("submissions", &self.submissions)
            .field("suppressed", &self.suppressed)
            .field("reports", &self.reports.len())
            .finish()
    }
}

/// Reporting client that keeps accepted payloads in memory.
///
/// Clones share state, so a handle kept by the host observes everything the
/// installed middleware submits.
#[derive(Debug, Clone, Default)]
pub struct MemoryClient {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Access token and options passed to `initialize`, if it was called.
    pub fn initialization(&self) -> Option<(String, ResolvedOptions)> {
        self.state.lock().initialized.clone()
    }

    pub fn hook_count(&self) -> usize {
        self.state.lock().hooks.len()
    }

    /// Number of `submit` calls, accepted or not.
    pub fn submissions(&self) -> usize {
        self.state.lock().submissions
    }

    /// Number of payloads dropped by a hook.
    pub fn suppressed(&self) -> usize {
        self.state.lock().suppressed
    }

    /// Payloads that passed every hook.
    pub fn reports(&self) -> Vec<Value> {
        self.state.lock().reports.clone()
    }
}

impl ReportingClient for MemoryClient {
    fn initialize(
        &self,
        access_token: &str,
        options: &ResolvedOptions,
    ) -> Result<(), ReporterError> {
        self.state.lock().initialized = Some((access_token.to_owned(), options.clone()));
        Ok(())
    }

    fn register_payload_hook(&self, hook: PayloadHook) {
        self.state.lock().hooks.push(hook);
    }

    fn submit(
        &self,
        exc_info: &ExcInfo,
        request: &RequestSnapshot,
        extra_data: &ExtraData,
    ) -> Result<(), ReporterError> {
        let (payload, hooks) = {
            let mut state = self.state.lock();
            state.submissions += 1;

            let (token, options) = state
                .initialized
                .as_ref()
                .ok_or_else(|| ReporterError::ReportSubmission("client not initialized".into()))?;

            let payload = build_payload(token, options, exc_info, request, extra_data);
            (payload, state.hooks.clone())
        };

        // Hooks run without the lock held.
        let accepted = hooks.iter().all(|hook| hook(&payload));

        let mut state = self.state.lock();
        if accepted {
            state.reports.push(payload);
        } else {
            state.suppressed += 1;
        }
        Ok(())
    }
}
