//! Bearer-token auth layer (`spec.md` §6).
//!
//! Optional: if `API_TOKENS_FILE` isn't configured the daemon serves plain
//! HTTP with no bearer check (logged once at startup), keeping local/dev
//! runs simple while production deploys opt in. Tokens are compared by
//! SHA-256 hash, never logged or compared in plaintext.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};

/// Loaded, hashed bearer tokens. `None` means auth is disabled.
#[derive(Clone)]
pub struct AuthState {
    token_hashes: Option<Arc<HashSet<String>>>,
}

impl AuthState {
    pub fn disabled() -> Self {
        Self { token_hashes: None }
    }

    /// Load one token per line from `path`, hashing each with SHA-256.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let hashes: HashSet<String> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(hash_token)
            .collect();
        Ok(Self { token_hashes: Some(Arc::new(hashes)) })
    }

    fn accepts(&self, presented: &str) -> bool {
        match &self.token_hashes {
            None => true,
            Some(hashes) => hashes.contains(&hash_token(presented)),
        }
    }
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub async fn require_bearer_token(
    State(auth): State<AuthState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if auth.token_hashes.is_none() {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if auth.accepts(token) => next.run(request).await,
        _ => (StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_auth_accepts_anything() {
        let auth = AuthState::disabled();
        assert!(auth.accepts("whatever"));
    }

    #[test]
    fn loaded_tokens_are_compared_by_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens");
        fs::write(&path, "secret-one\nsecret-two\n").unwrap();
        let auth = AuthState::from_file(&path).unwrap();
        assert!(auth.accepts("secret-one"));
        assert!(auth.accepts("secret-two"));
        assert!(!auth.accepts("secret-three"));
    }
}
