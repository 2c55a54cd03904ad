//! Bearer-token authentication.
//!
//! The token is compared through SHA-256 digests folded with XOR so the
//! comparison time does not depend on where the first mismatch is. Failed
//! attempts draw from a separate limiter, never from the main budget.

use axum::extract::Request;
use axum::http::{Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use lmbridge_core::GatewayError;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

/// Characters of a token that may appear in logs.
const LOGGED_PREFIX: usize = 8;

/// Paths reachable without a token.
const PUBLIC_PATHS: &[&str] = &["/health"];

/// The gateway's bearer token.
pub struct BearerToken {
    token: String,
    digest: [u8; 32],
}

impl BearerToken {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            digest: Sha256::digest(token.as_bytes()).into(),
        }
    }

    /// Random token for this process.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(&format!(
            "lmb-{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        ))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Loggable prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        prefix(&self.token)
    }

    /// Constant-time comparison against a presented token.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        let presented: [u8; 32] = Sha256::digest(candidate.as_bytes()).into();
        presented
            .iter()
            .zip(self.digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerToken")
            .field("prefix", &self.prefix())
            .finish_non_exhaustive()
    }
}

fn prefix(token: &str) -> &str {
    token
        .char_indices()
        .nth(LOGGED_PREFIX)
        .map_or(token, |(end, _)| &token[..end])
}

fn bearer(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_credentials)
}

/// Credentials of a `Bearer` authorization value. The scheme name is
/// case-insensitive.
fn bearer_credentials(value: &str) -> Option<&str> {
    let (scheme, credentials) = value.trim_start().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| credentials.trim())
}

/// Authentication middleware.
///
/// `/health` and preflight requests pass through. A failed attempt answers
/// 401, or 429 once the unauthenticated budget is spent.
pub async fn require_bearer(state: AppState, req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS || PUBLIC_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let presented = bearer(&req).map(str::to_string);
    if presented.as_deref().is_some_and(|token| state.token.matches(token)) {
        return next.run(req).await;
    }

    state.stats.record_unauthenticated();
    warn!(
        path = %req.uri().path(),
        token_prefix = presented.as_deref().map_or("<none>", prefix),
        "Unauthorized request - missing or invalid token"
    );

    let decision = state.unauthenticated.check();
    if !decision.allowed {
        state.stats.record_rate_limited();
        return ApiError(GatewayError::RateLimited {
            scope: "unauthenticated".to_string(),
            retry_after_ms: decision.retry_after_ms,
        })
        .into_response();
    }
    ApiError(GatewayError::Unauthenticated).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_only_exact_token() {
        let token = BearerToken::new("secret-token-0123456789");
        assert!(token.matches("secret-token-0123456789"));
        assert!(!token.matches("secret-token-012345678"));
        assert!(!token.matches(""));
    }

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_credentials("Bearer abc"), Some("abc"));
        assert_eq!(bearer_credentials("bearer abc"), Some("abc"));
        assert_eq!(bearer_credentials("BEARER  abc "), Some("abc"));
        assert_eq!(bearer_credentials("Basic abc"), None);
        assert_eq!(bearer_credentials("Bearerabc"), None);
    }

    #[test]
    fn test_generated_tokens_differ() {
        let a = BearerToken::generate();
        let b = BearerToken::generate();
        assert_ne!(a.as_str(), b.as_str());
        assert!(a.as_str().starts_with("lmb-"));
        assert!(a.matches(a.as_str()));
    }

    #[test]
    fn test_prefix_is_bounded() {
        let token = BearerToken::new("abcdefghijklmnop");
        assert_eq!(token.prefix(), "abcdefgh");
        assert_eq!(prefix("abc"), "abc");
        assert!(!format!("{token:?}").contains("ijklmnop"));
    }
}
