//! Connection handles
//!
//! A `ConnectionHandle` is the registry's grip on one control connection: it
//! can close the connection from any task and carries the optional spy.
//! `ReplySender` is the reply sink command handlers and transfers write to.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, watch};

use crate::client::state::SessionId;
use crate::error::CommandError;
use crate::protocol::responses::Reply;

/// Diagnostic hook that sees every line exchanged on one control connection
pub trait ConnectionSpy: Send + Sync {
    fn request(&self, session_id: &SessionId, line: &str);
    fn reply(&self, session_id: &SessionId, line: &str);
}

struct HandleInner {
    peer_addr: SocketAddr,
    closed: watch::Sender<bool>,
    spy: RwLock<Option<Arc<dyn ConnectionSpy>>>,
}

/// Cloneable handle to a live control connection
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

/// Resolves once the connection has been closed through its handle
pub struct CloseSignal {
    closed: watch::Receiver<bool>,
}

impl ConnectionHandle {
    pub fn new(peer_addr: SocketAddr) -> (Self, CloseSignal) {
        let (closed_tx, closed_rx) = watch::channel(false);
        let handle = Self {
            inner: Arc::new(HandleInner {
                peer_addr,
                closed: closed_tx,
                spy: RwLock::new(None),
            }),
        };
        (handle, CloseSignal { closed: closed_rx })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Asks the connection's command loop to shut down. Returns false if the
    /// connection was already closed.
    pub fn close(&self) -> bool {
        !self.inner.closed.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    pub async fn set_spy(&self, spy: Option<Arc<dyn ConnectionSpy>>) {
        *self.inner.spy.write().await = spy;
    }

    pub async fn spy(&self) -> Option<Arc<dyn ConnectionSpy>> {
        self.inner.spy.read().await.clone()
    }
}

impl CloseSignal {
    pub async fn closed(&mut self) {
        // A dropped sender means every handle is gone, which also ends the connection.
        let _ = self.closed.wait_for(|closed| *closed).await;
    }
}

/// Queues replies for the connection's writer task
#[derive(Clone)]
pub struct ReplySender {
    tx: mpsc::UnboundedSender<Reply>,
}

impl ReplySender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Reply>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, reply: Reply) -> Result<(), CommandError> {
        self.tx
            .send(reply)
            .map_err(|_| CommandError::ReplyChannelClosed)
    }
}
