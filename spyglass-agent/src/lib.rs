//! In-target half of the spyglass attach protocol: idempotent bootstrap of
//! the diagnostic server, isolated entry-point resolution, workspace
//! materialization, and the attach listener the controller connects to.

mod bootstrap;
mod entry;
mod error;
mod loader;
mod marker;
mod workspace;

#[cfg(unix)]
mod listener;

pub use bootstrap::{SpyglassAgent, BOOTSTRAP_ENTRY, CORE_MODULE};
pub use entry::{BootstrapEntry, DiagnosticServer, InstrumentationHandle};
pub use error::{AgentError, Result};
pub use loader::{core_scope, platform_scope, IsolatedLoader, Scope};
pub use marker::{InitMarker, MarkerState};
pub use workspace::TempWorkspace;

#[cfg(unix)]
pub use listener::AttachListener;
