//! Client management system
//!
//! Per-connection session state, the handles used to reach a live connection,
//! the registry that tracks them, and the control-connection loop.

pub mod connection;
pub mod handler;
pub mod registry;
pub mod state;

pub use connection::{CloseSignal, ConnectionHandle, ConnectionSpy, ReplySender};
pub use handler::{ClientContext, handle_client};
pub use registry::{ClientEntry, ClientRegistry};
pub use state::{Session, SessionId, SessionInfo, SessionPolicy, SharedSession};
