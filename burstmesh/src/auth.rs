//! Administrative and billing checks.
//!
//! The mesh only asks yes/no questions of these collaborators. Real
//! deployments plug in their own implementations; the defaults here are the
//! simplest ones that keep a node usable on its own.

use std::fmt::Debug;

/// Decides whether a request may use the administrative endpoints.
pub trait AdminAuthorizer: Send + Sync + Debug {
    /// `presented` is the `apikey` query parameter of the request, if any.
    fn is_admin(&self, presented: Option<&str>) -> bool;
}

/// Accepts exactly one configured administrator key.
#[derive(Debug, Clone)]
pub struct StaticAdminKey {
    key: String,
}

impl StaticAdminKey {
    /// Authorize requests presenting `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl AdminAuthorizer for StaticAdminKey {
    fn is_admin(&self, presented: Option<&str>) -> bool {
        matches!(presented, Some(presented) if !self.key.is_empty() && presented == self.key)
    }
}

/// Redeems usage credentials ("coins").
pub trait CoinValidator: Send + Sync + Debug {
    /// Validate `presented`, returning the coin content to open a session
    /// with, or `None` if the coin is not acceptable.
    fn validated_coin(&self, presented: &str) -> Option<String>;
}

/// Accepts any non-blank coin.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonEmptyCoin;

impl CoinValidator for NonEmptyCoin {
    fn validated_coin(&self, presented: &str) -> Option<String> {
        let coin = presented.trim();
        if coin.is_empty() || coin.chars().any(char::is_whitespace) {
            return None;
        }
        Some(coin.to_string())
    }
}
