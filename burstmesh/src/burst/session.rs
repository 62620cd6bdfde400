//! Burst sessions: time-limited permission to call `/run`.
//!
//! A session is created when a usage credential ("coin") is redeemed. The
//! coin content doubles as the session's api key.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Permission for the bearer of `api_key` to run bursts until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstSession {
    /// Api key presented on `/run`.
    pub api_key: String,
    /// Human-readable description returned by `GET /run.coin`.
    pub descriptor: String,
    /// Instant after which the session is ignored.
    pub expires_at: Instant,
}

impl BurstSession {
    /// Whether the session is still valid at `now`.
    pub fn is_active(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Describe a session the way `GET /run.coin` reports it.
pub fn describe_session(coin: &str, site_url: &str, valid_for: Duration) -> String {
    format!(
        "Burst chain api created from {coin} is {}/run.coin?apikey={coin}. \
         Chain is valid for {} seconds.",
        site_url.trim_end_matches('/'),
        valid_for.as_secs()
    )
}

/// Sessions keyed by api key.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, BurstSession>,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `session`, replacing an earlier session with the same key.
    pub fn insert(&mut self, session: BurstSession) {
        self.sessions.insert(session.api_key.clone(), session);
    }

    /// The session for `api_key` if it is still active at `now`.
    pub fn active(&self, api_key: &str, now: Instant) -> Option<&BurstSession> {
        self.sessions
            .get(api_key)
            .filter(|session| session.is_active(now))
    }

    /// Drop sessions that expired before `now`. Returns how many were dropped.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.is_active(now));
        before - self.sessions.len()
    }

    /// Number of stored sessions, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(key: &str, now: Instant, ttl: Duration) -> BurstSession {
        BurstSession {
            api_key: key.to_string(),
            descriptor: describe_session(key, "http://h:1/", ttl),
            expires_at: now + ttl,
        }
    }

    #[test]
    fn test_descriptor_mentions_key() {
        let text = describe_session("C1", "http://h:1/", Duration::from_secs(60));
        assert_eq!(
            text,
            "Burst chain api created from C1 is http://h:1/run.coin?apikey=C1. \
             Chain is valid for 60 seconds."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expires() {
        let now = Instant::now();
        let mut table = SessionTable::new();
        table.insert(session("C1", now, Duration::from_secs(10)));

        assert!(table.active("C1", now).is_some());
        assert!(table.active("C2", now).is_none());

        let later = now + Duration::from_secs(11);
        assert!(table.active("C1", later).is_none());
        assert_eq!(table.len(), 1);
        assert_eq!(table.sweep(later), 1);
        assert!(table.is_empty());
    }
}
