//! Connection service
//!
//! Authoritative registry of live sessions. Admits new connections, logs
//! sessions in against the user directory, enforces the login ceilings,
//! evicts idle sessions and reports every lifecycle change to the observer.
//!
//! Locking: the registry mutex only ever guards in-memory map operations. It
//! is released before a session lock is awaited, before a connection is
//! closed, and before any event is emitted.

use chrono::Utc;
use log::{debug, info, warn};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::auth::{ANONYMOUS, Credentials, UserDirectory, UserRecord};
use crate::client::connection::{ConnectionHandle, ConnectionSpy};
use crate::client::registry::{ClientEntry, ClientRegistry};
use crate::client::state::{
    Principal, Session, SessionId, SessionInfo, SessionPolicy, SharedSession,
};
use crate::config::ConnectionConfig;
use crate::error::{DirectoryError, LoginError};
use crate::server::events::{ConnectionEvent, ConnectionObserver, EventDispatcher};
use crate::server::statistics::{AdmissionLimits, Statistics, StatisticsSnapshot};
use crate::server::sweeper::IdleSweeper;

/// Upload/download ceiling given to the provisioned anonymous account
const ANONYMOUS_RATE_LIMIT: u32 = 4800;

pub struct ConnectionService {
    config: ConnectionConfig,
    directory: Arc<dyn UserDirectory>,
    registry: Mutex<ClientRegistry>,
    statistics: Mutex<Statistics>,
    events: EventDispatcher,
    sweeper: Mutex<Option<IdleSweeper>>,
    disposed: AtomicBool,
}

impl ConnectionService {
    /// Builds the service, provisions default accounts if configured, and
    /// starts the recurring idle sweep.
    pub async fn start(
        config: ConnectionConfig,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Arc<Self>, DirectoryError> {
        let service = Arc::new(Self {
            config,
            directory,
            registry: Mutex::new(ClientRegistry::new()),
            statistics: Mutex::new(Statistics::new()),
            events: EventDispatcher::spawn(),
            sweeper: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        if service.config.create_default_users {
            service.create_default_users().await?;
        }

        if let Some(period) = service.config.scheduler_interval() {
            let sweeper = IdleSweeper::spawn(Arc::downgrade(&service), period);
            *service.sweeper.lock().await = Some(sweeper);
        }

        info!(
            "Connection service started (max {} logins, {} anonymous)",
            service.config.max_logins, service.config.max_anonymous_logins
        );
        Ok(service)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<dyn UserDirectory> {
        &self.directory
    }

    pub async fn set_observer(&self, observer: Option<Arc<dyn ConnectionObserver>>) {
        self.events.set_observer(observer).await;
    }

    /// Ensures the administrator account, and the anonymous account when
    /// anonymous logins are enabled, exist. Existing accounts are untouched.
    async fn create_default_users(&self) -> Result<(), DirectoryError> {
        let admin_name = self.config.admin_name.clone();
        if !self.directory.does_exist(&admin_name).await? {
            self.events.emit(ConnectionEvent::CreatingUser {
                username: admin_name.clone(),
            });
            warn!("Default administrator '{}' uses its name as password; change it", admin_name);

            let mut admin = UserRecord::new(
                admin_name.clone(),
                admin_name,
                self.config.default_root_path(),
            );
            admin.write_permission = true;
            admin.max_idle_secs = self.config.default_idle_secs;
            self.directory.save(admin).await?;
        }

        if self.config.anonymous_login_enabled && !self.directory.does_exist(ANONYMOUS).await? {
            self.events.emit(ConnectionEvent::CreatingUser {
                username: ANONYMOUS.to_string(),
            });

            let mut anonymous = UserRecord::new(ANONYMOUS, "", self.config.default_root_path());
            anonymous.max_upload_rate = ANONYMOUS_RATE_LIMIT;
            anonymous.max_download_rate = ANONYMOUS_RATE_LIMIT;
            anonymous.max_idle_secs = self.config.default_idle_secs;
            self.directory.save(anonymous).await?;
        }

        Ok(())
    }

    fn pre_login_policy(&self) -> SessionPolicy {
        SessionPolicy::pre_login(self.config.default_root_path(), self.config.default_idle_secs)
    }

    /// Registers a freshly accepted connection with pre-login defaults.
    ///
    /// After `dispose` the connection is closed straight away and not
    /// registered. The disposed flag is read under the registry lock, so a
    /// connection is either seen by `dispose` or refused here.
    pub async fn new_connection(&self, connection: ConnectionHandle) -> SharedSession {
        let peer_addr = connection.peer_addr();

        let registered = {
            let mut registry = self.registry.lock().await;
            if self.disposed.load(Ordering::SeqCst) {
                None
            } else {
                loop {
                    let session_id = SessionId::new();
                    let session = Arc::new(Mutex::new(Session::new(
                        session_id.clone(),
                        peer_addr,
                        self.pre_login_policy(),
                    )));
                    let entry = ClientEntry {
                        session: Arc::clone(&session),
                        connection: connection.clone(),
                    };
                    if registry.insert(session_id.clone(), entry) {
                        break Some((session_id, session));
                    }
                }
            }
        };

        let Some((session_id, session)) = registered else {
            warn!("Connection from {} refused: service disposed", peer_addr);
            connection.close();
            let session = Session::new(SessionId::new(), peer_addr, self.pre_login_policy());
            return Arc::new(Mutex::new(session));
        };

        self.statistics.lock().await.open_connection();
        self.events.emit(ConnectionEvent::NewConnection {
            session_id,
            peer_addr,
        });
        session
    }

    /// Logs `session` in.
    ///
    /// Nothing on the session changes unless every check passes; the
    /// principal and the policy snapshot are then committed together. The
    /// password inside `credentials` is dropped as soon as the directory has
    /// checked it. A refused login leaves the session connected.
    pub async fn login(&self, session: &mut Session, credentials: Credentials) -> Result<(), LoginError> {
        if session.is_logged_in() {
            return Ok(());
        }
        if session.is_closed() {
            return Err(LoginError::SessionClosed);
        }

        let Credentials {
            username,
            password,
            anonymous,
        } = credentials;
        let (Some(username), Some(password)) = (username, password) else {
            return Err(LoginError::MissingCredentials);
        };
        let account = if anonymous { ANONYMOUS.to_string() } else { username };
        let session_id = session.id().clone();

        if !(anonymous && self.config.anonymous_login_enabled) {
            let authenticated = self.directory.authenticate(&account, &password).await?;
            if !authenticated {
                self.events.emit(ConnectionEvent::AuthFailed {
                    session_id,
                    username: account.clone(),
                });
                return Err(LoginError::InvalidCredentials(account));
            }
        }
        drop(password);

        let record = self
            .directory
            .get_user_by_name(&account)
            .await?
            .ok_or_else(|| LoginError::UnknownAccount(account.clone()))?;

        if !record.enabled {
            return Err(LoginError::AccountDisabled(account));
        }

        let policy = SessionPolicy::from(&record);
        let limits = AdmissionLimits {
            max_logins: self.config.max_logins,
            max_anonymous_logins: self.config.max_anonymous_logins,
            anonymous_enabled: self.config.anonymous_login_enabled,
        };
        self.statistics.lock().await.reserve_login(anonymous, limits)?;
        if anonymous {
            self.events.emit(ConnectionEvent::AnonymousLogin {
                session_id: session_id.clone(),
            });
        }

        if let Err(e) = self.ensure_home(&account, &policy.root_directory).await {
            self.statistics.lock().await.release_login(anonymous);
            return Err(e);
        }

        session.log_in(
            Principal {
                username: account.clone(),
                anonymous,
                logged_in_at: Utc::now(),
            },
            policy,
        );
        self.statistics.lock().await.commit_login(anonymous);
        self.events.emit(ConnectionEvent::UserLogin {
            session_id,
            username: account,
            anonymous,
        });
        Ok(())
    }

    /// Returns a logged-in session to the pre-login state (REIN), releasing
    /// its login slot. Returns false if it was not logged in.
    pub async fn logout(&self, session: &mut Session) -> bool {
        match session.log_out(self.pre_login_policy()) {
            Some(principal) => {
                self.statistics.lock().await.logout(principal.anonymous);
                info!("Session {}: {} logged out", session.id(), principal.username);
                true
            }
            None => false,
        }
    }

    async fn ensure_home(&self, username: &str, home: &Path) -> Result<(), LoginError> {
        match tokio::fs::metadata(home).await {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => {
                self.events.emit(ConnectionEvent::HomeNotADirectory {
                    username: username.to_string(),
                    path: home.to_path_buf(),
                });
                Err(LoginError::HomeNotADirectory(home.to_path_buf()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound && self.config.create_home => {
                self.events.emit(ConnectionEvent::CreatingHome {
                    username: username.to_string(),
                    path: home.to_path_buf(),
                });
                tokio::fs::create_dir_all(home).await.map_err(|source| {
                    self.events.emit(ConnectionEvent::CannotCreateHome {
                        username: username.to_string(),
                        path: home.to_path_buf(),
                        reason: source.to_string(),
                    });
                    LoginError::HomeCreationFailed {
                        path: home.to_path_buf(),
                        source,
                    }
                })
            }
            Err(e) => {
                debug!("Home directory lookup failed: {}", e);
                self.events.emit(ConnectionEvent::CannotFindHome {
                    username: username.to_string(),
                    path: home.to_path_buf(),
                });
                Err(LoginError::HomeNotFound(home.to_path_buf()))
            }
        }
    }

    /// Removes a session and closes its connection. Only the first of any
    /// number of concurrent calls for the same id does the work and returns
    /// true; the rest find nothing to remove.
    pub async fn close_connection(&self, session_id: &SessionId) -> bool {
        let removed = self.registry.lock().await.remove(session_id);
        let Some(entry) = removed else {
            debug!("Session {} already closed", session_id);
            return false;
        };

        let (principal, username) = {
            let mut session = entry.session.lock().await;
            session.mark_closed();
            session.data_channel_mut().close();
            (
                session.principal().cloned(),
                session.username().map(str::to_owned),
            )
        };

        entry.connection.close();

        {
            let mut statistics = self.statistics.lock().await;
            if let Some(principal) = &principal {
                statistics.logout(principal.anonymous);
            }
            statistics.close_connection();
        }

        self.events.emit(ConnectionEvent::ConnectionClosed {
            session_id: session_id.clone(),
            username,
        });
        true
    }

    /// Closes every registered session. Sessions that close themselves in
    /// the meantime are skipped.
    pub async fn close_all_connections(&self) {
        let ids = self.registry.lock().await.ids();
        for session_id in ids {
            self.close_connection(&session_id).await;
        }
    }

    /// Snapshot of every registered session
    pub async fn get_all_users(&self) -> Vec<SessionInfo> {
        let sessions: Vec<SharedSession> = {
            let registry = self.registry.lock().await;
            registry
                .entries()
                .map(|(_, entry)| Arc::clone(&entry.session))
                .collect()
        };

        let now = Instant::now();
        let mut users = Vec::with_capacity(sessions.len());
        for session in sessions {
            users.push(session.lock().await.info(now));
        }
        users
    }

    pub async fn get_connection(&self, session_id: &SessionId) -> Option<ClientEntry> {
        self.registry.lock().await.get(session_id).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Installs or clears the spy on one session. Returns false for an
    /// unknown id.
    pub async fn set_spy(&self, session_id: &SessionId, spy: Option<Arc<dyn ConnectionSpy>>) -> bool {
        let Some(entry) = self.get_connection(session_id).await else {
            return false;
        };
        entry.connection.set_spy(spy).await;
        true
    }

    pub async fn reset_all_spies(&self) {
        let connections: Vec<ConnectionHandle> = {
            let registry = self.registry.lock().await;
            registry
                .entries()
                .map(|(_, entry)| entry.connection.clone())
                .collect()
        };
        for connection in connections {
            connection.set_spy(None).await;
        }
    }

    pub async fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.lock().await.snapshot()
    }

    /// One idle sweep cycle: closes every session past its idle limit, then
    /// reloads the user directory. A reload failure is reported and the
    /// cycle still completes. Returns the number of sessions closed.
    ///
    /// A session whose lock is held is executing a command and therefore
    /// counts as active.
    pub async fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let idle: Vec<(SessionId, Option<String>, std::time::Duration)> = {
            let registry = self.registry.lock().await;
            registry
                .entries()
                .filter_map(|(id, entry)| {
                    let session = entry.session.try_lock().ok()?;
                    (!session.is_active(now)).then(|| {
                        (
                            id.clone(),
                            session.username().map(str::to_owned),
                            session.idle_for(now),
                        )
                    })
                })
                .collect()
        };

        let mut removed = 0;
        for (session_id, username, idle_for) in idle {
            self.events.emit(ConnectionEvent::RemovingIdleSession {
                session_id: session_id.clone(),
                username,
                idle_for,
            });
            if self.close_connection(&session_id).await {
                removed += 1;
            }
        }

        if let Err(e) = self.directory.reload().await {
            self.events.emit(ConnectionEvent::TimerError {
                message: e.to_string(),
            });
        }

        removed
    }

    /// Closes every connection, then stops the idle sweep. Later calls do
    /// nothing.
    pub async fn dispose(&self) {
        {
            let _registry = self.registry.lock().await;
            if self.disposed.swap(true, Ordering::SeqCst) {
                return;
            }
        }

        self.close_all_connections().await;

        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.stop().await;
        }
        info!("Connection service disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}
