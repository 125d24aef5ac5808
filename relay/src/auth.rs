//! Token Verifier.
//!
//! Resolves a bearer token via a single HTTP POST to an external auth
//! oracle, with a short TTL cache in front of it and FIFO eviction once the
//! cache hits capacity, the same shape as any other bounded ring buffer.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::error::AuthError;
use crate::ids::UserId;

#[derive(Deserialize)]
struct VerifyBody {
    /// Primary field name in this relay's own API.
    user_id: Option<String>,
    /// Compatibility: the reference worker implementation names this
    /// `firebase_uid`.
    firebase_uid: Option<String>,
}

struct CacheEntry {
    user: UserId,
    inserted_at: Instant,
}

/// Adapter to an external auth oracle that resolves an opaque bearer token
/// to a stable user identity, with a short TTL cache to keep the common
/// case off the network.
pub struct TokenVerifier {
    client: reqwest::Client,
    auth_url: String,
    ttl: Duration,
    capacity: usize,
    cache: DashMap<String, CacheEntry>,
    /// Insertion order, for FIFO eviction once `capacity` is exceeded.
    order: Mutex<VecDeque<String>>,
}

impl TokenVerifier {
    pub fn new(auth_url: String, ttl: Duration, capacity: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth_url,
            ttl,
            capacity: capacity.max(1),
            cache: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
        }
    }

    /// Resolve a bearer token to a `UserId`, consulting the cache first.
    pub async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        if let Some(entry) = self.cache.get(token) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Ok(entry.user.clone());
            }
        }

        let res = self
            .client
            .post(&self.auth_url)
            .json(&json!({ "token": token }))
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            if status.is_client_error() {
                // No negative caching — just drop any stale entry so a
                // revoked token can't ride out its TTL.
                self.invalidate(token);
            }
            warn!(%status, "token verification rejected");
            return Err(AuthError::Invalid);
        }

        let body: VerifyBody = res
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        let user = body
            .user_id
            .or(body.firebase_uid)
            .map(UserId)
            .ok_or(AuthError::Invalid)?;

        self.insert(token.to_string(), user.clone());
        Ok(user)
    }

    fn insert(&self, token: String, user: UserId) {
        self.cache.insert(
            token.clone(),
            CacheEntry {
                user,
                inserted_at: Instant::now(),
            },
        );
        let mut order = self.order.lock().unwrap();
        order.push_back(token);
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.cache.remove(&oldest);
            }
        }
    }

    fn invalidate(&self, token: &str) {
        self.cache.remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_entry_expires_after_ttl() {
        let verifier = TokenVerifier::new("http://unused.invalid".into(), Duration::from_millis(10), 4);
        verifier.insert("tok".into(), UserId("u1".into()));
        assert!(verifier.cache.get("tok").unwrap().inserted_at.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let verifier = TokenVerifier::new("http://unused.invalid".into(), Duration::from_secs(60), 2);
        verifier.insert("a".into(), UserId("u-a".into()));
        verifier.insert("b".into(), UserId("u-b".into()));
        verifier.insert("c".into(), UserId("u-c".into()));
        assert!(verifier.cache.get("a").is_none());
        assert!(verifier.cache.get("b").is_some());
        assert!(verifier.cache.get("c").is_some());
    }

    #[test]
    fn invalidate_removes_entry() {
        let verifier = TokenVerifier::new("http://unused.invalid".into(), Duration::from_secs(60), 4);
        verifier.insert("tok".into(), UserId("u1".into()));
        verifier.invalidate("tok");
        assert!(verifier.cache.get("tok").is_none());
    }
}
