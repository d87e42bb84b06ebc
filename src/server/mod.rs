//! Server core functionality
//!
//! The listener that accepts control connections, the connection service
//! that owns every session, and the statistics, events and idle sweep that
//! support it.

pub mod events;
pub mod listener;
pub mod service;
pub mod statistics;
pub mod sweeper;

pub use events::{ConnectionEvent, ConnectionObserver};
pub use listener::{Listener, ListenerState};
pub use service::ConnectionService;
pub use statistics::StatisticsSnapshot;
