//! # Ephemeral Store
//!
//! TTL-indexed key/value store with atomic single-use consumption.
//!
//! ## Why a Dedicated Store?
//!
//! Every short-lived credential in the system lives here:
//!
//! | Use Case | Description |
//! |----------|-------------|
//! | **Single-use codes** | Login codes, verification and reset tokens |
//! | **Token Blacklist** | Revoked JWT jtis until their natural expiry |
//! | **Attempt Counters** | Lockouts for brute-force protection |
//! | **Authorization Cache** | L1 decision cache and L2 permission sets |
//! | **Rate Limiting** | Sliding-window request counters |
//!
//! The one operation everything hinges on is [`EphemeralStore::consume_if_equal`]:
//! an atomic compare-and-delete. A caller that loses the race against a
//! concurrent consumer must observe failure - this is what makes login
//! transitions, code redemption and refresh rotation linearizable.
//!
//! ## Backends
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       EphemeralStore                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌───────────────────┐          ┌───────────────────────────┐   │
//! │  │ Redis backend     │          │ In-process backend        │   │
//! │  │ ConnectionManager │          │ Mutex<HashMap> + deadline │   │
//! │  │ (auto-reconnect)  │          │ based lazy expiry         │   │
//! │  └───────────────────┘          └───────────────────────────┘   │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both backends expose the same API. The in-process map serves tests and
//! single-node development; Redis serves everything else. Atomicity of
//! `consume_if_equal` is a Lua script on Redis and a mutex critical section
//! in memory.
//!
//! ## Key Naming Convention
//!
//! | Pattern | Purpose | TTL |
//! |---------|---------|-----|
//! | `verify_token:{token}` / `verify_user:{user}` | Email verification (+ reverse key) | 24h |
//! | `reset_token:{token}` / `reset_user:{user}` | Password reset (+ reverse key) | 1h |
//! | `login_code:{user}` | Emailed six-digit code | 5m |
//! | `attempts:{user}:{purpose}` | Failure counters | 5m |
//! | `pre_auth:{token}` / `login_session:{id}` | Multi-step login carriers | 5m / 15m |
//! | `blacklist_jti:{jti}` | Revoked token markers | remaining token life |
//! | `auth:check:{u}:{o}:{perm}` | L1 decision cache | 60s |
//! | `auth:perms:{u}:{o}` | L2 permission set | 5m |
//! | `oauth_code:{code}` | Authorization code binding | 60s |
//!
//! The canonical builders live in [`keys`]; no call site formats these by
//! hand.

use crate::config::RedisConfig;
use crate::errors::ApiError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

// =============================================================================
// Key Builders
// =============================================================================

/// Canonical key builders for the ephemeral key layout.
///
/// Keeping these in one place means invalidation scans (`auth:check:{u}:`)
/// and the records they target can never drift apart.
pub mod keys {
    use uuid::Uuid;

    /// `verify_token:{token}` → `"{code}:{user}"`
    pub fn verify_token(token: &str) -> String {
        format!("verify_token:{token}")
    }

    /// `verify_user:{user}` → token (one active verification per user)
    pub fn verify_user(user_id: Uuid) -> String {
        format!("verify_user:{user_id}")
    }

    /// `reset_token:{token}` → `"{code}:{user}"`
    pub fn reset_token(token: &str) -> String {
        format!("reset_token:{token}")
    }

    /// `reset_user:{user}` → token (one active reset per user)
    pub fn reset_user(user_id: Uuid) -> String {
        format!("reset_user:{user_id}")
    }

    /// `login_code:{user}` → six-digit code
    pub fn login_code(user_id: Uuid) -> String {
        format!("login_code:{user_id}")
    }

    /// `attempts:{user}:{purpose}` → failure count
    pub fn attempts(user_id: Uuid, purpose: &str) -> String {
        format!("attempts:{user_id}:{purpose}")
    }

    /// `pre_auth:{id}` → user id (2FA-step carrier, keyed by token jti)
    pub fn pre_auth(jti: Uuid) -> String {
        format!("pre_auth:{jti}")
    }

    /// `login_session:{id}` → user id (org-selection carrier)
    pub fn login_session(session_id: Uuid) -> String {
        format!("login_session:{session_id}")
    }

    /// `blacklist_jti:{jti}` → `"1"`
    pub fn blacklist_jti(jti: Uuid) -> String {
        format!("blacklist_jti:{jti}")
    }

    /// `auth:check:{user}:{org}:{permission}` → `"0"` | `"1"` (L1)
    pub fn authz_check(user_id: Uuid, org_id: Uuid, permission: &str) -> String {
        format!("auth:check:{user_id}:{org_id}:{permission}")
    }

    /// Prefix of every L1 entry for a (user, org) pair, for invalidation scans.
    pub fn authz_check_prefix(user_id: Uuid, org_id: Uuid) -> String {
        format!("auth:check:{user_id}:{org_id}:")
    }

    /// Prefix of every L1 entry for a user across all orgs.
    pub fn authz_check_user_prefix(user_id: Uuid) -> String {
        format!("auth:check:{user_id}:")
    }

    /// `auth:perms:{user}:{org}` → serialized permission grants (L2)
    pub fn authz_perms(user_id: Uuid, org_id: Uuid) -> String {
        format!("auth:perms:{user_id}:{org_id}")
    }

    /// Prefix of every L2 entry for a user across all orgs.
    pub fn authz_perms_user_prefix(user_id: Uuid) -> String {
        format!("auth:perms:{user_id}:")
    }

    /// `oauth_code:{code}` → serialized authorization-code binding
    pub fn oauth_code(code: &str) -> String {
        format!("oauth_code:{code}")
    }

    /// `rate:{endpoint}:{identifier}:{bucket}` → request count
    pub fn rate_bucket(endpoint: &str, identifier: &str, bucket: u64) -> String {
        format!("rate:{endpoint}:{identifier}:{bucket}")
    }
}

// =============================================================================
// Store
// =============================================================================

/// Atomic compare-and-delete, expressed once for the Redis backend.
///
/// Runs server-side so no interleaving between the GET and the DEL is
/// possible. Returns 1 when the value matched and was deleted.
const CONSUME_IF_EQUAL_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// In-process entry: value plus absolute deadline.
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// Backend selector. Cloning either variant is cheap (Arc underneath).
#[derive(Clone)]
enum Backend {
    Redis(ConnectionManager),
    Memory(Arc<Mutex<HashMap<String, MemoryEntry>>>),
}

/// TTL-indexed key/value store with atomic single-use consumption.
///
/// ## Thread Safety
///
/// `Clone + Send + Sync`. The Redis variant shares a `ConnectionManager`
/// (auto-reconnect); the in-process variant shares a mutex-guarded map.
/// Operations are single-key; no multi-key atomicity is assumed anywhere.
#[derive(Clone)]
pub struct EphemeralStore {
    backend: Backend,
    /// Per-operation deadline for the Redis backend
    timeout: Duration,
}

impl EphemeralStore {
    /// Connects to Redis, or falls back to the in-process backend when the
    /// configured URL is empty.
    ///
    /// ## Errors
    ///
    /// Returns `ApiError::StoreError` if the URL is invalid or the server
    /// is unreachable.
    pub async fn connect(config: &RedisConfig) -> Result<Self, ApiError> {
        if config.url.is_empty() {
            info!("Ephemeral store: using in-process backend");
            return Ok(Self::in_memory());
        }

        info!(url = %config.url, "Connecting to Redis");

        let client = redis::Client::open(config.url.as_str()).map_err(ApiError::StoreError)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(ApiError::StoreError)?;

        info!("Redis connection established");

        Ok(Self {
            backend: Backend::Redis(conn),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    /// Creates a store backed by an in-process map.
    ///
    /// Used by the test suite and by single-node development setups.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(HashMap::new()))),
            timeout: Duration::from_millis(1000),
        }
    }

    // =========================================================================
    // Core Operations
    // =========================================================================

    /// Stores a value under `key` for `ttl`.
    ///
    /// Overwrites any existing value and resets the TTL.
    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ApiError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                self.bounded(conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()))
                    .await?;
                Ok(())
            }
            Backend::Memory(map) => {
                let mut map = map.lock().expect("ephemeral map poisoned");
                map.insert(
                    key.to_string(),
                    MemoryEntry { value: value.to_string(), expires_at: Instant::now() + ttl },
                );
                Ok(())
            }
        }
    }

    /// Retrieves the value under `key`, or `None` if absent or expired.
    pub async fn get(&self, key: &str) -> Result<Option<String>, ApiError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                self.bounded(conn.get(key)).await
            }
            Backend::Memory(map) => {
                let mut map = map.lock().expect("ephemeral map poisoned");
                Ok(read_live(&mut map, key).map(|e| e.value))
            }
        }
    }

    /// Deletes `key`. Returns `true` if a live value was removed.
    pub async fn delete(&self, key: &str) -> Result<bool, ApiError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let deleted: i64 = self.bounded(conn.del(key)).await?;
                Ok(deleted > 0)
            }
            Backend::Memory(map) => {
                let mut map = map.lock().expect("ephemeral map poisoned");
                let live = read_live(&mut map, key).is_some();
                map.remove(key);
                Ok(live)
            }
        }
    }

    /// Checks whether `key` holds a live value.
    pub async fn exists(&self, key: &str) -> Result<bool, ApiError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                self.bounded(conn.exists(key)).await
            }
            Backend::Memory(map) => {
                let mut map = map.lock().expect("ephemeral map poisoned");
                Ok(read_live(&mut map, key).is_some())
            }
        }
    }

    /// Atomic compare-and-delete.
    ///
    /// Deletes `key` and returns `true` iff its current value equals
    /// `expected`. At most one of any number of concurrent callers with the
    /// same arguments can observe `true`; everyone else observes `false`.
    ///
    /// This is the primitive behind every single-use credential: login
    /// codes, verification and reset tokens, authorization codes, and the
    /// org-selection session.
    pub async fn consume_if_equal(&self, key: &str, expected: &str) -> Result<bool, ApiError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let script = redis::Script::new(CONSUME_IF_EQUAL_SCRIPT);
                let deleted: i64 = self
                    .bounded(script.key(key).arg(expected).invoke_async(&mut conn))
                    .await?;
                Ok(deleted > 0)
            }
            Backend::Memory(map) => {
                // The mutex is the atomicity boundary: read, compare and
                // remove happen under one lock.
                let mut map = map.lock().expect("ephemeral map poisoned");
                match read_live(&mut map, key) {
                    Some(entry) if entry.value == expected => {
                        map.remove(key);
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
        }
    }

    /// Increments a counter, arming `ttl` when the counter is created.
    ///
    /// Returns the post-increment value. Subsequent increments do not extend
    /// the window, so a burst of failures expires together.
    pub async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, ApiError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let count: i64 = self.bounded(conn.incr(key, 1)).await?;
                if count == 1 {
                    self.bounded(conn.expire::<_, bool>(key, ttl.as_secs() as i64))
                        .await?;
                }
                Ok(count)
            }
            Backend::Memory(map) => {
                let mut map = map.lock().expect("ephemeral map poisoned");
                let (count, expires_at) = match read_live(&mut map, key) {
                    Some(entry) => {
                        (entry.value.parse::<i64>().unwrap_or(0) + 1, entry.expires_at)
                    }
                    None => (1, Instant::now() + ttl),
                };
                map.insert(
                    key.to_string(),
                    MemoryEntry { value: count.to_string(), expires_at },
                );
                Ok(count)
            }
        }
    }

    /// Remaining lifetime of `key`, or `None` if absent.
    pub async fn ttl_of(&self, key: &str) -> Result<Option<Duration>, ApiError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let ttl: i64 = self.bounded(conn.ttl(key)).await?;
                // -2: no such key; -1: no expiry set
                Ok(if ttl >= 0 { Some(Duration::from_secs(ttl as u64)) } else { None })
            }
            Backend::Memory(map) => {
                let mut map = map.lock().expect("ephemeral map poisoned");
                Ok(read_live(&mut map, key)
                    .map(|e| e.expires_at.saturating_duration_since(Instant::now())))
            }
        }
    }

    /// Deletes every key starting with `prefix`. Returns the number removed.
    ///
    /// Used by authorization-cache invalidation, which targets
    /// `auth:check:{user}:{org}:` style prefixes. The Redis side uses SCAN,
    /// not KEYS, so invalidation never blocks the server.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<u64, ApiError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let pattern = format!("{prefix}*");
                let mut removed: u64 = 0;
                let mut cursor: u64 = 0;
                loop {
                    let (next, batch): (u64, Vec<String>) = self
                        .bounded(
                            redis::cmd("SCAN")
                                .arg(cursor)
                                .arg("MATCH")
                                .arg(&pattern)
                                .arg("COUNT")
                                .arg(100)
                                .query_async(&mut conn),
                        )
                        .await?;
                    if !batch.is_empty() {
                        let deleted: u64 = self.bounded(conn.del(batch)).await?;
                        removed += deleted;
                    }
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                Ok(removed)
            }
            Backend::Memory(map) => {
                let mut map = map.lock().expect("ephemeral map poisoned");
                let before = map.len();
                map.retain(|k, _| !k.starts_with(prefix));
                Ok((before - map.len()) as u64)
            }
        }
    }

    /// Health check - verifies the store is responding.
    pub async fn ping(&self) -> Result<(), ApiError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                self.bounded(redis::cmd("PING").query_async::<String>(&mut conn))
                    .await?;
                Ok(())
            }
            Backend::Memory(_) => Ok(()),
        }
    }

    // =========================================================================
    // Token Blacklist
    // =========================================================================

    /// Blacklists a token's jti for `ttl`.
    ///
    /// `ttl` should be the token's remaining lifetime - after natural expiry
    /// the signature check rejects it regardless of the blacklist. A
    /// non-positive remainder still writes a short-lived marker so the
    /// rotation invariant (blacklist before mint) holds unconditionally.
    pub async fn blacklist_jti(&self, jti: uuid::Uuid, ttl: Duration) -> Result<(), ApiError> {
        let effective = if ttl.as_secs() == 0 { Duration::from_secs(1) } else { ttl };
        self.set_with_ttl(&keys::blacklist_jti(jti), "1", effective).await
    }

    /// Checks whether a jti has been blacklisted.
    ///
    /// Consulted on every decode path before a token is accepted.
    pub async fn is_jti_blacklisted(&self, jti: uuid::Uuid) -> Result<bool, ApiError> {
        self.exists(&keys::blacklist_jti(jti)).await
    }

    // =========================================================================
    // Deadline Plumbing
    // =========================================================================

    /// Applies the configured per-operation deadline to a Redis future.
    ///
    /// The ephemeral store sits on the hot path of every request; a hung
    /// connection must surface as an error within the deadline rather than
    /// stall the handler.
    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, ApiError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(ApiError::StoreError),
            Err(_) => Err(ApiError::StoreError(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "ephemeral store operation timed out",
            )))),
        }
    }
}

/// Reads a live entry from the in-process map, removing it when expired.
fn read_live(map: &mut HashMap<String, MemoryEntry>, key: &str) -> Option<MemoryEntry> {
    match map.get(key) {
        Some(entry) if entry.expires_at > Instant::now() => Some(entry.clone()),
        Some(_) => {
            map.remove(key);
            None
        }
        None => None,
    }
}

impl std::fmt::Debug for EphemeralStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.backend {
            Backend::Redis(_) => "redis",
            Backend::Memory(_) => "memory",
        };
        f.debug_struct("EphemeralStore")
            .field("backend", &backend)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = EphemeralStore::in_memory();
        store
            .set_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = EphemeralStore::in_memory();
        assert_eq!(store.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_gone() {
        let store = EphemeralStore::in_memory();
        store
            .set_with_ttl("k", "v", Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_consume_if_equal_matches_once() {
        let store = EphemeralStore::in_memory();
        store
            .set_with_ttl("code", "123456", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.consume_if_equal("code", "123456").await.unwrap());
        // Second consumption of the same value must fail
        assert!(!store.consume_if_equal("code", "123456").await.unwrap());
        assert_eq!(store.get("code").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_consume_if_equal_wrong_value_keeps_key() {
        let store = EphemeralStore::in_memory();
        store
            .set_with_ttl("code", "123456", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(!store.consume_if_equal("code", "000000").await.unwrap());
        // Key must survive a failed comparison
        assert_eq!(store.get("code").await.unwrap(), Some("123456".to_string()));
    }

    #[tokio::test]
    async fn test_consume_single_use_under_contention() {
        // P1: at most one successful consumption across concurrent attempts.
        let store = EphemeralStore::in_memory();
        store
            .set_with_ttl("once", "token", Duration::from_secs(60))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.consume_if_equal("once", "token").await.unwrap()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_incr_with_ttl_counts_up() {
        let store = EphemeralStore::in_memory();
        assert_eq!(store.incr_with_ttl("n", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(store.incr_with_ttl("n", Duration::from_secs(60)).await.unwrap(), 2);
        assert_eq!(store.incr_with_ttl("n", Duration::from_secs(60)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_delete_prefix_only_touches_matches() {
        let store = EphemeralStore::in_memory();
        let ttl = Duration::from_secs(60);
        store.set_with_ttl("auth:check:a:b:x", "1", ttl).await.unwrap();
        store.set_with_ttl("auth:check:a:b:y", "0", ttl).await.unwrap();
        store.set_with_ttl("auth:check:a:c:x", "1", ttl).await.unwrap();

        let removed = store.delete_prefix("auth:check:a:b:").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.exists("auth:check:a:c:x").await.unwrap());
    }

    #[tokio::test]
    async fn test_blacklist_roundtrip() {
        let store = EphemeralStore::in_memory();
        let jti = Uuid::new_v4();

        assert!(!store.is_jti_blacklisted(jti).await.unwrap());
        store.blacklist_jti(jti, Duration::from_secs(60)).await.unwrap();
        assert!(store.is_jti_blacklisted(jti).await.unwrap());
    }

    #[tokio::test]
    async fn test_blacklist_zero_remaining_still_written() {
        let store = EphemeralStore::in_memory();
        let jti = Uuid::new_v4();

        store.blacklist_jti(jti, Duration::from_secs(0)).await.unwrap();
        assert!(store.is_jti_blacklisted(jti).await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_of_live_key() {
        let store = EphemeralStore::in_memory();
        store
            .set_with_ttl("k", "v", Duration::from_secs(300))
            .await
            .unwrap();
        let ttl = store.ttl_of("k").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(300));
        assert!(ttl > Duration::from_secs(290));
    }

    #[test]
    fn test_key_builders_match_layout() {
        let user = Uuid::nil();
        let org = Uuid::nil();
        assert_eq!(keys::login_code(user), format!("login_code:{user}"));
        assert_eq!(
            keys::authz_check(user, org, "image:write"),
            format!("auth:check:{user}:{org}:image:write")
        );
        assert!(keys::authz_check(user, org, "image:write")
            .starts_with(&keys::authz_check_prefix(user, org)));
        assert!(keys::authz_perms(user, org).starts_with(&keys::authz_perms_user_prefix(user)));
    }
}
