//! Controller-side core for the spyglass attach protocol: locate a running
//! target process, attach, hand off configuration, and drive the in-target
//! bootstrap exactly once.

mod codec;
mod configure;
mod error;
mod locator;
mod session;
mod transport;

pub use codec::{decode_config, encode_config, join_load_arg, split_load_arg, ARG_SEPARATOR};
pub use configure::{keys, Configure};
pub use error::{AttachError, Result};
pub use locator::TargetLocator;
pub use session::AttachSession;
pub use transport::{AttachTransport, ProcessDescriptor, TargetVm, PROP_VERSION};
#[cfg(unix)]
pub use transport::{attach_socket_path, SocketTransport};
