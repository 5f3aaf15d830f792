//! Token Service (spec.md §4.8): issues and verifies HS256 JWT page tokens
//! with nonce-based replay protection.
//!
//! Grounded on the teacher's config-struct-with-builder convention
//! (`shipwright-liveview-hotreload::HotReloadConfig`) for `TokenServiceConfig`,
//! and on its lock-guarded-map shape (`build_cache.rs`'s
//! `Arc<Mutex<HashMap<...>>>`) for the nonce store, swapped from a build
//! cache keyed by path to a TTL cache of seen nonces, and from
//! `std::sync::Mutex` to `parking_lot::RwLock` since lookups here read far
//! more often than they insert.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Claims carried by a Page Token (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "page_id")]
    pub page_id: String,
    #[serde(rename = "app_id")]
    pub app_id: String,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "exp")]
    pub expires_at: i64,
    pub nonce: String,
}

/// Builder-style config, following `HotReloadConfig`'s `with_*` convention.
#[derive(Debug, Clone)]
pub struct TokenServiceConfig {
    /// How long an issued token remains valid.
    pub token_ttl: Duration,
    /// Replay window: a nonce seen within this window a second time is
    /// rejected (spec.md §4.8 default: 5 minutes).
    pub nonce_window: Duration,
}

impl Default for TokenServiceConfig {
    fn default() -> Self {
        TokenServiceConfig {
            token_ttl: Duration::from_secs(24 * 3600),
            nonce_window: Duration::from_secs(5 * 60),
        }
    }
}

impl TokenServiceConfig {
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_nonce_window(mut self, window: Duration) -> Self {
        self.nonce_window = window;
        self
    }
}

/// Issues and verifies page tokens for one `Application` (spec.md §4.8).
/// Each `Application` owns exactly one of these; there is no process-wide
/// singleton (spec.md §9, "Global singletons").
pub struct TokenService {
    config: TokenServiceConfig,
    signing_key: RwLock<Vec<u8>>,
    seen_nonces: RwLock<HashMap<String, Instant>>,
}

impl TokenService {
    pub fn new(config: TokenServiceConfig) -> Self {
        TokenService {
            config,
            signing_key: RwLock::new(random_key()),
            seen_nonces: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a fresh HS256 token for `(app_id, page_id)`, with a new 128-bit
    /// nonce.
    #[tracing::instrument(skip(self))]
    pub fn generate_token(&self, app_id: &str, page_id: &str) -> Result<String> {
        let now = unix_now();
        let claims = Claims {
            page_id: page_id.to_string(),
            app_id: app_id.to_string(),
            issued_at: now,
            expires_at: now + self.config.token_ttl.as_secs() as i64,
            nonce: random_nonce(),
        };
        let key = self.signing_key.read();
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&key),
        )
        .map_err(|_| Error::TokenInvalid)
    }

    /// Verify a token: checks signing algorithm, signature, expiry, and
    /// nonce replay, in that order. On success the nonce is recorded so a
    /// second presentation within the window is rejected.
    ///
    /// Every rejection reason maps to a typed [`Error`] variant for callers
    /// that want it, but spec.md §4.8/§7 require the transport boundary to
    /// collapse all of them to one `unauthorized` surface — see
    /// [`Error::is_token_error`] and [`Error::unauthorized`].
    #[tracing::instrument(skip(self, token))]
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        let key = self.signing_key.read();
        let data = decode::<Claims>(token, &DecodingKey::from_secret(&key), &validation)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::TokenExpired,
                _ => Error::TokenInvalid,
            })?;
        drop(key);

        let claims = data.claims;
        let mut nonces = self.seen_nonces.write();
        if let Some(seen_at) = nonces.get(&claims.nonce) {
            if seen_at.elapsed() < self.config.nonce_window {
                return Err(Error::TokenReplay);
            }
        }
        nonces.insert(claims.nonce.clone(), Instant::now());
        Ok(claims)
    }

    /// Atomically replace the signing key. Every token issued under the
    /// previous key becomes unverifiable — intentional (spec.md §4.8).
    pub fn rotate_signing_key(&self) {
        *self.signing_key.write() = random_key();
        tracing::info!("token signing key rotated");
    }

    /// Drop nonces older than 2x the configured replay window (spec.md
    /// §4.8). Callers schedule this periodically; the core starts no
    /// background tasks of its own (spec.md §5).
    pub fn cleanup_expired_nonces(&self) {
        let cutoff = self.config.nonce_window * 2;
        let now = Instant::now();
        self.seen_nonces
            .write()
            .retain(|_, seen_at| now.duration_since(*seen_at) < cutoff);
    }
}

fn random_key() -> Vec<u8> {
    let mut key = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
