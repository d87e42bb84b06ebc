//! Connection and login statistics
//!
//! Current counts drive admission; totals are kept for reporting.

use chrono::{DateTime, Utc};

use crate::error::LoginError;

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub start_time: DateTime<Utc>,
    pub current_connections: usize,
    pub total_connections: u64,
    pub current_logins: usize,
    pub total_logins: u64,
    pub current_anonymous_logins: usize,
    pub total_anonymous_logins: u64,
}

#[derive(Debug)]
pub struct Statistics {
    start_time: DateTime<Utc>,
    current_connections: usize,
    total_connections: u64,
    current_logins: usize,
    total_logins: u64,
    current_anonymous_logins: usize,
    total_anonymous_logins: u64,
}

/// Ceilings checked when a login asks for a slot
#[derive(Debug, Clone, Copy)]
pub struct AdmissionLimits {
    pub max_logins: usize,
    pub max_anonymous_logins: usize,
    pub anonymous_enabled: bool,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            current_connections: 0,
            total_connections: 0,
            current_logins: 0,
            total_logins: 0,
            current_anonymous_logins: 0,
            total_anonymous_logins: 0,
        }
    }

    pub fn open_connection(&mut self) {
        self.current_connections += 1;
        self.total_connections += 1;
    }

    pub fn close_connection(&mut self) {
        self.current_connections = self.current_connections.saturating_sub(1);
    }

    /// Checks the ceilings and, if they hold, takes a login slot. The check
    /// and the reservation happen in one step so concurrent logins cannot
    /// both pass a ceiling with one slot left. On failure nothing changes.
    pub fn reserve_login(&mut self, anonymous: bool, limits: AdmissionLimits) -> Result<(), LoginError> {
        if anonymous {
            if !limits.anonymous_enabled {
                return Err(LoginError::AnonymousDisallowed);
            }
            if self.current_anonymous_logins >= limits.max_anonymous_logins {
                return Err(LoginError::TooManyAnonymousLogins {
                    current: self.current_anonymous_logins,
                    limit: limits.max_anonymous_logins,
                });
            }
        }

        if self.current_logins >= limits.max_logins {
            return Err(LoginError::TooManyLogins {
                current: self.current_logins,
                limit: limits.max_logins,
            });
        }

        self.current_logins += 1;
        if anonymous {
            self.current_anonymous_logins += 1;
        }
        Ok(())
    }

    /// Gives back a slot whose login failed after `reserve_login`
    pub fn release_login(&mut self, anonymous: bool) {
        self.current_logins = self.current_logins.saturating_sub(1);
        if anonymous {
            self.current_anonymous_logins = self.current_anonymous_logins.saturating_sub(1);
        }
    }

    /// Counts a completed login in the totals
    pub fn commit_login(&mut self, anonymous: bool) {
        self.total_logins += 1;
        if anonymous {
            self.total_anonymous_logins += 1;
        }
    }

    pub fn logout(&mut self, anonymous: bool) {
        self.release_login(anonymous);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            start_time: self.start_time,
            current_connections: self.current_connections,
            total_connections: self.total_connections,
            current_logins: self.current_logins,
            total_logins: self.total_logins,
            current_anonymous_logins: self.current_anonymous_logins,
            total_anonymous_logins: self.total_anonymous_logins,
        }
    }
}
