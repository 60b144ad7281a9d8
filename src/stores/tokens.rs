//! Token identity service.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{SchedulerError, SchedulerResult};

/// Identity attached to a submission token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub role: String,
    pub name: String,
    /// `None` means the token never expires.
    pub expires_at: Option<DateTime<FixedOffset>>,
}

impl TokenInfo {
    /// Check whether the token is expired at the given instant.
    pub fn is_expired(&self, at: DateTime<FixedOffset>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at < at)
    }
}

/// Token lookup service.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Resolve a token, `None` when the token is unknown. Service errors
    /// (unreachable database, unexpected status) surface as `Err`.
    async fn get_token_info(&self, token: &str) -> SchedulerResult<Option<TokenInfo>>;
}

/// In-memory token service for the dev server and tests.
#[derive(Default)]
pub struct MemoryTokenService {
    tokens: RwLock<HashMap<String, TokenInfo>>,
    fail_lookups: AtomicBool,
}

impl MemoryTokenService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token.
    pub fn insert(&self, token: &str, info: TokenInfo) {
        self.tokens.write().insert(token.to_string(), info);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenService for MemoryTokenService {
    async fn get_token_info(&self, token: &str) -> SchedulerResult<Option<TokenInfo>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(SchedulerError::TokenService(
                "injected lookup failure".to_string(),
            ));
        }
        Ok(self.tokens.read().get(token).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::jst;
    use chrono::TimeZone;

    #[test]
    fn test_expiry() {
        let noon = jst().with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap();
        let expiring = TokenInfo {
            role: "guest".to_string(),
            name: "alice".to_string(),
            expires_at: Some(noon),
        };
        assert!(!expiring.is_expired(noon));
        assert!(expiring.is_expired(noon + chrono::Duration::seconds(1)));

        let eternal = TokenInfo {
            role: "admin".to_string(),
            name: "root".to_string(),
            expires_at: None,
        };
        assert!(!eternal.is_expired(noon + chrono::Duration::days(10_000)));
    }

    #[tokio::test]
    async fn test_lookup() {
        let service = MemoryTokenService::new();
        assert_eq!(service.get_token_info("missing").await.unwrap(), None);

        service.insert(
            "tok",
            TokenInfo {
                role: "developer".to_string(),
                name: "bob".to_string(),
                expires_at: None,
            },
        );
        let info = service.get_token_info("tok").await.unwrap().unwrap();
        assert_eq!(info.role, "developer");
    }
}
