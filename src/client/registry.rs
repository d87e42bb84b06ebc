//! Client registry
//!
//! Maps session ids to their session and connection handle. The registry is
//! a plain map; `ConnectionService` owns the lock around it.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::client::connection::ConnectionHandle;
use crate::client::state::{SessionId, SharedSession};

/// A registered session together with the handle that closes its connection
#[derive(Clone)]
pub struct ClientEntry {
    pub session: SharedSession,
    pub connection: ConnectionHandle,
}

/// Registry for tracking active sessions
#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<SessionId, ClientEntry>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entry. Returns false, leaving the registry untouched,
    /// if the id is already present.
    pub fn insert(&mut self, id: SessionId, entry: ClientEntry) -> bool {
        match self.clients.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<ClientEntry> {
        self.clients.remove(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<&ClientEntry> {
        self.clients.get(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.clients.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&SessionId, &ClientEntry)> {
        self.clients.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::state::{Session, SessionPolicy};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn entry(id: &SessionId) -> ClientEntry {
        let peer = "127.0.0.1:4000".parse().unwrap();
        let (connection, _signal) = ConnectionHandle::new(peer);
        let session = Session::new(
            id.clone(),
            peer,
            SessionPolicy::pre_login(PathBuf::from("/"), 0),
        );
        ClientEntry {
            session: Arc::new(Mutex::new(session)),
            connection,
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = ClientRegistry::new();
        let id = SessionId::new();

        assert!(registry.insert(id.clone(), entry(&id)));
        assert!(!registry.insert(id.clone(), entry(&id)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_yields_entry_once() {
        let mut registry = ClientRegistry::new();
        let id = SessionId::new();
        registry.insert(id.clone(), entry(&id));

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.is_empty());
    }
}
