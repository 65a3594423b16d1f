//! Authentication mode for the engine gRPC channel (§3, §5).

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

/// OAuth2 client-credentials parameters plus the mutable cached token.
///
/// The cache sits behind an `Arc` so cloning an `OAuth2State` (and so an
/// `EngineAuth`, e.g. to hand the same auth config to both the job runtime
/// and the webhook server's engine client) shares one cache rather than
/// forking it — there is still exactly one source of truth for the token.
#[derive(Debug, Clone)]
pub struct OAuth2State {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub audience: String,
    cached: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Margin below which a cached token is treated as expired and refreshed
/// ahead of actual expiry, per §5 ("refreshed when remaining lifetime < 60s").
const REFRESH_MARGIN_SECS: i64 = 60;

impl OAuth2State {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: token_url.into(),
            audience: audience.into(),
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Returns the cached access token if it still has more than the refresh
    /// margin of lifetime left, `None` otherwise so the caller knows to mint
    /// a fresh one.
    pub fn cached_token(&self) -> Option<String> {
        let guard = self.cached.read().expect("oauth2 token lock poisoned");
        guard.as_ref().and_then(|t| {
            let remaining = (t.expires_at - Utc::now()).num_seconds();
            (remaining > REFRESH_MARGIN_SECS).then(|| t.access_token.clone())
        })
    }

    pub fn store_token(&self, access_token: String, expires_at: DateTime<Utc>) {
        let mut guard = self.cached.write().expect("oauth2 token lock poisoned");
        *guard = Some(CachedToken {
            access_token,
            expires_at,
        });
    }
}

/// How the runtime authenticates its gRPC channel to the engine (§3).
#[derive(Debug, Clone)]
pub enum EngineAuth {
    Insecure,
    StaticToken(String),
    OAuth2ClientCredentials(OAuth2State),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn cached_token_expires_before_margin() {
        let state = OAuth2State::new("id", "secret", "https://auth/token", "aud");
        state.store_token("tok".into(), Utc::now() + Duration::seconds(30));
        assert!(state.cached_token().is_none());
    }

    #[test]
    fn cached_token_valid_well_before_expiry() {
        let state = OAuth2State::new("id", "secret", "https://auth/token", "aud");
        state.store_token("tok".into(), Utc::now() + Duration::seconds(600));
        assert_eq!(state.cached_token().as_deref(), Some("tok"));
    }
}
