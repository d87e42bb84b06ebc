//! Connection lifecycle events
//!
//! Producers (accept, login, close, sweep) push typed events onto a queue; a
//! single delivery task logs each one and hands it to the installed observer.
//! A slow or panicking observer never blocks the producers.

use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};

use crate::client::state::SessionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    NewConnection {
        session_id: SessionId,
        peer_addr: SocketAddr,
    },
    ConnectionClosed {
        session_id: SessionId,
        username: Option<String>,
    },
    UserLogin {
        session_id: SessionId,
        username: String,
        anonymous: bool,
    },
    AnonymousLogin {
        session_id: SessionId,
    },
    AuthFailed {
        session_id: SessionId,
        username: String,
    },
    CreatingUser {
        username: String,
    },
    CreatingHome {
        username: String,
        path: PathBuf,
    },
    CannotCreateHome {
        username: String,
        path: PathBuf,
        reason: String,
    },
    CannotFindHome {
        username: String,
        path: PathBuf,
    },
    HomeNotADirectory {
        username: String,
        path: PathBuf,
    },
    RemovingIdleSession {
        session_id: SessionId,
        username: Option<String>,
        idle_for: Duration,
    },
    TimerError {
        message: String,
    },
}

/// External sink for lifecycle events (an admin console, metrics, tests)
pub trait ConnectionObserver: Send + Sync {
    fn on_event(&self, event: &ConnectionEvent);
}

type ObserverSlot = Arc<RwLock<Option<Arc<dyn ConnectionObserver>>>>;

/// Producer side of the event queue
#[derive(Clone)]
pub struct EventDispatcher {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
    observer: ObserverSlot,
}

impl EventDispatcher {
    /// Creates the queue and spawns its delivery task. The task ends once
    /// every dispatcher clone has been dropped.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer: ObserverSlot = Arc::new(RwLock::new(None));
        tokio::spawn(deliver(rx, Arc::clone(&observer)));
        Self { tx, observer }
    }

    /// Queues an event without waiting for delivery
    pub fn emit(&self, event: ConnectionEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event delivery task has stopped; event dropped");
        }
    }

    /// Installs or removes the observer
    pub async fn set_observer(&self, observer: Option<Arc<dyn ConnectionObserver>>) {
        *self.observer.write().await = observer;
    }
}

async fn deliver(mut rx: mpsc::UnboundedReceiver<ConnectionEvent>, observer: ObserverSlot) {
    while let Some(event) = rx.recv().await {
        log_event(&event);

        let current = observer.read().await.clone();
        if let Some(observer) = current {
            if catch_unwind(AssertUnwindSafe(|| observer.on_event(&event))).is_err() {
                error!("Connection observer panicked while handling {:?}", event);
            }
        }
    }
    debug!("Event delivery task finished");
}

fn log_event(event: &ConnectionEvent) {
    use ConnectionEvent::*;

    match event {
        NewConnection { session_id, peer_addr } => {
            info!("Session {} opened from {}", session_id, peer_addr)
        }
        ConnectionClosed { session_id, username } => info!(
            "Session {} closed ({})",
            session_id,
            username.as_deref().unwrap_or("not logged in")
        ),
        UserLogin { session_id, username, anonymous } => info!(
            "Session {} logged in as {}{}",
            session_id,
            username,
            if *anonymous { " (anonymous)" } else { "" }
        ),
        AnonymousLogin { session_id } => info!("Session {} admitted as anonymous", session_id),
        AuthFailed { session_id, username } => {
            warn!("Session {}: authentication failed for {}", session_id, username)
        }
        CreatingUser { username } => info!("Creating default user {}", username),
        CreatingHome { username, path } => {
            info!("Creating home directory {} for {}", path.display(), username)
        }
        CannotCreateHome { username, path, reason } => warn!(
            "Cannot create home directory {} for {}: {}",
            path.display(),
            username,
            reason
        ),
        CannotFindHome { username, path } => {
            warn!("Home directory {} for {} not found", path.display(), username)
        }
        HomeNotADirectory { username, path } => {
            warn!("Home path {} for {} is not a directory", path.display(), username)
        }
        RemovingIdleSession { session_id, username, idle_for } => info!(
            "Removing idle session {} ({}) after {}s",
            session_id,
            username.as_deref().unwrap_or("not logged in"),
            idle_for.as_secs()
        ),
        TimerError { message } => warn!("Idle sweep error: {}", message),
    }
}
