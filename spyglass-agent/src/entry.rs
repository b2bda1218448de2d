//! Foreign-call contract the diagnostic core module must expose to the
//! bootstrap: a get-or-create singleton factory plus a bind-status query.
//! The bootstrap resolves the entry by symbol through the isolated loader
//! and only ever talks to it through these traits.

use std::collections::BTreeMap;
use std::sync::Arc;

/// Handle to the instrumented target process, passed through to the
/// bootstrap factory. What the diagnostic core does with it is its own
/// business.
#[derive(Debug, Clone)]
pub struct InstrumentationHandle {
    pub pid: u32,
}

impl InstrumentationHandle {
    /// Handle for the current (target) process.
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
        }
    }
}

impl Default for InstrumentationHandle {
    fn default() -> Self {
        Self::current()
    }
}

/// A running in-process diagnostic server instance.
pub trait DiagnosticServer: Send + Sync {
    /// Whether the server successfully bound its endpoints.
    fn is_bound(&self) -> bool;
}

impl std::fmt::Debug for dyn BootstrapEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BootstrapEntry")
    }
}

/// Bootstrap entry point of the diagnostic core module.
pub trait BootstrapEntry: Send + Sync {
    /// Get-or-create the process-wide diagnostic server singleton.
    /// Concurrent callers must converge on one instance (one bind).
    fn get_or_create(
        &self,
        instrumentation: InstrumentationHandle,
        config: &BTreeMap<String, String>,
    ) -> Arc<dyn DiagnosticServer>;
}
