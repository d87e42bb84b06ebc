//! Control-connection listener
//!
//! Binds the control endpoint and runs the accept loop on its own task.
//! Accepted connections are handed to the `ConnectionService` unless the
//! listener is suspended, in which case they are dropped without a reply.

use log::{debug, error, info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::client::connection::ConnectionHandle;
use crate::client::handler::{ClientContext, handle_client};
use crate::config::ServerConfig;
use crate::error::ListenerError;
use crate::protocol::CommandRegistry;
use crate::server::service::ConnectionService;

/// Upper bound on how long `stop` waits for the accept loop
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Running,
    Suspended,
    Stopped,
}

impl ListenerState {
    fn name(self) -> &'static str {
        match self {
            ListenerState::Created => "created",
            ListenerState::Running => "running",
            ListenerState::Suspended => "suspended",
            ListenerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Started,
    Stopped,
}

struct ListenerInner {
    phase: Phase,
    local_addr: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
    /// Set once the accept task has been joined
    joined: bool,
}

pub struct Listener {
    context: ClientContext,
    suspended: Arc<AtomicBool>,
    inner: Mutex<ListenerInner>,
}

impl Listener {
    pub fn new(config: Arc<ServerConfig>, service: Arc<ConnectionService>) -> Self {
        Self {
            context: ClientContext {
                service,
                commands: Arc::new(CommandRegistry::with_defaults()),
                config,
            },
            suspended: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(ListenerInner {
                phase: Phase::Created,
                local_addr: None,
                shutdown: None,
                accept_task: None,
                joined: false,
            }),
        }
    }

    /// Binds the control endpoint and spawns the accept loop. Returns the
    /// bound address once the endpoint is listening.
    pub async fn start(&self) -> Result<SocketAddr, ListenerError> {
        let mut inner = self.inner.lock().await;
        if inner.phase != Phase::Created {
            return Err(ListenerError::InvalidState(self.state_of(&inner).name()));
        }

        let address = self.context.config.listener.control_socket();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ListenerError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            address: address.clone(),
            source,
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(
            listener,
            self.context.clone(),
            Arc::clone(&self.suspended),
            shutdown_rx,
        ));

        inner.phase = Phase::Started;
        inner.local_addr = Some(local_addr);
        inner.shutdown = Some(shutdown_tx);
        inner.accept_task = Some(task);

        info!("Listening for control connections on {}", local_addr);
        Ok(local_addr)
    }

    /// New connections are closed on arrival until `resume`. Registered
    /// sessions are unaffected.
    pub fn suspend(&self) {
        if !self.suspended.swap(true, Ordering::SeqCst) {
            info!("Listener suspended");
        }
    }

    pub fn resume(&self) {
        if self.suspended.swap(false, Ordering::SeqCst) {
            info!("Listener resumed");
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Closes the endpoint and waits, for a bounded time, for the accept
    /// loop to exit. A second call returns immediately.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        match inner.phase {
            Phase::Stopped => return,
            Phase::Created => {
                inner.phase = Phase::Stopped;
                inner.joined = true;
                return;
            }
            Phase::Started => inner.phase = Phase::Stopped,
        }

        if let Some(shutdown) = inner.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(mut task) = inner.accept_task.take() {
            match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
                Ok(Ok(())) => debug!("Accept loop joined"),
                Ok(Err(e)) => warn!("Accept loop ended abnormally: {}", e),
                Err(_) => {
                    warn!("Accept loop did not stop within {:?}; aborting", STOP_TIMEOUT);
                    task.abort();
                }
            }
        }
        inner.joined = true;
        info!("Listener stopped");
    }

    /// True once the accept loop has exited and been joined
    pub async fn is_stopped(&self) -> bool {
        self.inner.lock().await.joined
    }

    pub async fn state(&self) -> ListenerState {
        let inner = self.inner.lock().await;
        self.state_of(&inner)
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().await.local_addr
    }

    fn state_of(&self, inner: &ListenerInner) -> ListenerState {
        match inner.phase {
            Phase::Created => ListenerState::Created,
            Phase::Started if self.is_suspended() => ListenerState::Suspended,
            Phase::Started => ListenerState::Running,
            Phase::Stopped => ListenerState::Stopped,
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: ClientContext,
    suspended: Arc<AtomicBool>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = &mut shutdown => {
                debug!("Accept loop received shutdown");
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Control endpoint failed, accept loop exiting: {}", e);
                break;
            }
        };

        if suspended.load(Ordering::SeqCst) {
            debug!("Suspended: dropping connection from {}", peer_addr);
            drop(stream);
            continue;
        }

        let (connection, close_signal) = ConnectionHandle::new(peer_addr);
        let session = context.service.new_connection(connection.clone()).await;
        let context = context.clone();
        tokio::spawn(handle_client(stream, context, session, connection, close_signal));
    }
    // Dropping the listener closes the endpoint.
}
