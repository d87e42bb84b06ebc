//! Module `state`
//!
//! Defines the `Session` struct holding everything the server knows about one
//! control connection: identity, login state, the policy snapshot taken at
//! login, liveness, and the data channel.

use chrono::{DateTime, Utc};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::auth::UserRecord;
use crate::transfer::DataChannel;

/// Session shared between the registry and the connection's command loop
pub type SharedSession = Arc<Mutex<Session>>;

/// Unique session identifier, assigned when the connection is accepted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Authenticated identity. Immutable once the session has logged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub anonymous: bool,
    pub logged_in_at: DateTime<Utc>,
}

/// Limits copied from the user record at login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPolicy {
    pub root_directory: PathBuf,
    pub write_permission: bool,
    /// 0 disables the idle timeout
    pub max_idle_secs: u64,
    pub max_upload_rate: u32,
    pub max_download_rate: u32,
}

impl SessionPolicy {
    /// Policy for a connection that has not logged in yet
    pub fn pre_login(root_directory: PathBuf, max_idle_secs: u64) -> Self {
        Self {
            root_directory,
            write_permission: false,
            max_idle_secs,
            max_upload_rate: 0,
            max_download_rate: 0,
        }
    }
}

impl From<&UserRecord> for SessionPolicy {
    fn from(record: &UserRecord) -> Self {
        Self {
            root_directory: record.root_directory.clone(),
            write_permission: record.write_permission,
            max_idle_secs: record.max_idle_secs,
            max_upload_rate: record.max_upload_rate,
            max_download_rate: record.max_download_rate,
        }
    }
}

/// Where the session is in the USER/PASS exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    Connected,
    UserPending { username: String, anonymous: bool },
    LoggedIn(Principal),
}

/// Representation type selected with TYPE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Ascii,
    Binary,
}

/// Read-only view of a session for the administrative surface
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub peer_addr: SocketAddr,
    pub username: Option<String>,
    pub anonymous: bool,
    pub logged_in: bool,
    pub connected_at: DateTime<Utc>,
    pub logged_in_at: Option<DateTime<Utc>>,
    pub idle_for: Duration,
    pub root_directory: PathBuf,
}

/// State of one control connection
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer_addr: SocketAddr,
    connected_at: DateTime<Utc>,
    login: LoginState,
    policy: SessionPolicy,
    last_activity: Instant,
    closed: bool,
    current_dir: String,
    transfer_type: TransferType,
    restart_offset: u64,
    data_channel: DataChannel,
}

impl Session {
    pub fn new(id: SessionId, peer_addr: SocketAddr, policy: SessionPolicy) -> Self {
        Self {
            id,
            peer_addr,
            connected_at: Utc::now(),
            login: LoginState::Connected,
            policy,
            last_activity: Instant::now(),
            closed: false,
            current_dir: "/".to_string(),
            transfer_type: TransferType::Ascii,
            restart_offset: 0,
            data_channel: DataChannel::new(),
        }
    }

    // --------------------
    // Identity and login
    // --------------------

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn login_state(&self) -> &LoginState {
        &self.login
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(self.login, LoginState::LoggedIn(_))
    }

    pub fn principal(&self) -> Option<&Principal> {
        match &self.login {
            LoginState::LoggedIn(principal) => Some(principal),
            _ => None,
        }
    }

    /// Logged-in name, or the name given with USER while waiting for PASS
    pub fn username(&self) -> Option<&str> {
        match &self.login {
            LoginState::Connected => None,
            LoginState::UserPending { username, .. } => Some(username),
            LoginState::LoggedIn(principal) => Some(&principal.username),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        match &self.login {
            LoginState::Connected => false,
            LoginState::UserPending { anonymous, .. } => *anonymous,
            LoginState::LoggedIn(principal) => principal.anonymous,
        }
    }

    /// Records the name given with USER. Ignored once logged in.
    pub fn set_pending_user(&mut self, username: String, anonymous: bool) {
        if !self.is_logged_in() {
            self.login = LoginState::UserPending { username, anonymous };
        }
    }

    /// Forgets a pending USER after a failed PASS
    pub fn clear_pending_user(&mut self) {
        if !self.is_logged_in() {
            self.login = LoginState::Connected;
        }
    }

    /// Commits a successful login: principal and policy change together.
    pub(crate) fn log_in(&mut self, principal: Principal, policy: SessionPolicy) {
        self.login = LoginState::LoggedIn(principal);
        self.policy = policy;
        self.current_dir = "/".to_string();
    }

    /// Returns the session to its pre-login state, keeping the connection.
    pub(crate) fn log_out(&mut self, pre_login: SessionPolicy) -> Option<Principal> {
        let previous = std::mem::replace(&mut self.login, LoginState::Connected);
        self.policy = pre_login;
        self.current_dir = "/".to_string();
        self.transfer_type = TransferType::Ascii;
        self.reset_state();
        self.data_channel.close();

        match previous {
            LoginState::LoggedIn(principal) => Some(principal),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    // --------------------
    // Liveness
    // --------------------

    /// Records client activity
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// A session is active while it has been idle for less than its limit.
    /// A limit of 0 never expires.
    pub fn is_active(&self, now: Instant) -> bool {
        self.policy.max_idle_secs == 0
            || self.idle_for(now) < Duration::from_secs(self.policy.max_idle_secs)
    }

    // --------------------
    // Per-command state
    // --------------------

    pub fn current_dir(&self) -> &str {
        &self.current_dir
    }

    pub fn set_current_dir(&mut self, path: String) {
        self.current_dir = path;
    }

    pub fn root_directory(&self) -> &Path {
        &self.policy.root_directory
    }

    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    pub fn set_transfer_type(&mut self, transfer_type: TransferType) {
        self.transfer_type = transfer_type;
    }

    pub fn set_restart_offset(&mut self, offset: u64) {
        self.restart_offset = offset;
    }

    /// Returns and clears the REST offset; it applies to one transfer only.
    pub fn take_restart_offset(&mut self) -> u64 {
        std::mem::take(&mut self.restart_offset)
    }

    /// Clears transient state left by a partially completed command sequence.
    pub fn reset_state(&mut self) {
        self.restart_offset = 0;
    }

    pub fn data_channel(&self) -> &DataChannel {
        &self.data_channel
    }

    pub fn data_channel_mut(&mut self) -> &mut DataChannel {
        &mut self.data_channel
    }

    pub fn info(&self, now: Instant) -> SessionInfo {
        let principal = self.principal();
        SessionInfo {
            session_id: self.id.clone(),
            peer_addr: self.peer_addr,
            username: self.username().map(str::to_owned),
            anonymous: self.is_anonymous(),
            logged_in: principal.is_some(),
            connected_at: self.connected_at,
            logged_in_at: principal.map(|p| p.logged_in_at),
            idle_for: self.idle_for(now),
            root_directory: self.policy.root_directory.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(max_idle_secs: u64) -> Session {
        Session::new(
            SessionId::new(),
            "127.0.0.1:4000".parse().unwrap(),
            SessionPolicy::pre_login(PathBuf::from("/srv/ftp"), max_idle_secs),
        )
    }

    fn principal(name: &str) -> Principal {
        Principal {
            username: name.to_string(),
            anonymous: false,
            logged_in_at: Utc::now(),
        }
    }

    #[test]
    fn session_ids_round_trip_through_strings() {
        let id = SessionId::new();
        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_idle_limit_never_expires() {
        let session = session(0);
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(session.is_active(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_limit_expires_and_touch_renews() {
        let mut session = session(5);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!session.is_active(Instant::now()));

        session.touch();
        assert!(session.is_active(Instant::now()));
    }

    #[test]
    fn pending_user_cannot_replace_principal() {
        let mut session = session(0);
        session.set_pending_user("alice".into(), false);
        assert_eq!(session.username(), Some("alice"));

        let policy = SessionPolicy::pre_login(PathBuf::from("/home/alice"), 60);
        session.log_in(principal("alice"), policy.clone());
        session.set_pending_user("mallory".into(), false);
        session.clear_pending_user();

        assert_eq!(session.username(), Some("alice"));
        assert_eq!(session.policy(), &policy);
    }

    #[test]
    fn log_out_restores_pre_login_policy() {
        let mut session = session(0);
        session.log_in(
            principal("bob"),
            SessionPolicy::pre_login(PathBuf::from("/home/bob"), 60),
        );
        session.set_current_dir("/docs".into());

        let pre_login = SessionPolicy::pre_login(PathBuf::from("/srv/ftp"), 300);
        let previous = session.log_out(pre_login.clone());

        assert_eq!(previous.map(|p| p.username), Some("bob".to_string()));
        assert!(!session.is_logged_in());
        assert_eq!(session.policy(), &pre_login);
        assert_eq!(session.current_dir(), "/");
    }

    #[test]
    fn restart_offset_applies_once() {
        let mut session = session(0);
        session.set_restart_offset(42);
        assert_eq!(session.take_restart_offset(), 42);
        assert_eq!(session.take_restart_offset(), 0);

        session.set_restart_offset(7);
        session.reset_state();
        assert_eq!(session.take_restart_offset(), 0);
    }
}
