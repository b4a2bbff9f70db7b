//! Single-use storage for authorization codes.
//!
//! The authorization code provider keeps the protected ticket server-side
//! and hands the client only a random code. Entries are keyed by the SHA-256
//! hash of the code, so the store never holds a redeemable value.
//!
//! # Implementation Notes
//!
//! Implementations must make [`CodeStore::redeem`] atomic: two concurrent
//! redemptions of the same code must never both succeed. Redeemed entries
//! stay behind as tombstones until they expire so that replays can be told
//! apart from unknown codes in the security log.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;

/// Default maximum number of live entries in [`InMemoryCodeStore`].
const DEFAULT_MAX_SIZE: usize = 100_000;

/// Outcome of a redemption attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redemption {
    /// The code was valid; here is the protected ticket.
    Redeemed(String),
    /// The code was already redeemed.
    Replayed,
    /// The code expired before it was redeemed.
    Expired,
    /// The code is unknown.
    NotFound,
}

/// Storage for single-use authorization codes.
///
/// Distributed deployments implement this over a shared store with a
/// conditional delete; [`InMemoryCodeStore`] covers single-instance servers.
#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Stores a protected ticket under the hashed code.
    ///
    /// `now` is the issuing server's time; stores with a size limit use it
    /// to evict expired entries before refusing the insert.
    ///
    /// # Errors
    ///
    /// Returns an error if the key already exists or the store is
    /// unavailable.
    async fn insert(
        &self,
        key: &str,
        protected: String,
        now: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> AuthResult<()>;

    /// Atomically reads and invalidates a code.
    async fn redeem(&self, key: &str, now: OffsetDateTime) -> AuthResult<Redemption>;

    /// Removes entries that expired at or before `now`.
    ///
    /// Returns the number of entries removed.
    async fn purge_expired(&self, now: OffsetDateTime) -> AuthResult<u64>;
}

struct CodeEntry {
    /// `None` once redeemed.
    protected: Option<String>,
    expires_at: OffsetDateTime,
}

/// In-memory code store backed by a concurrent map.
///
/// Entries are evicted by [`CodeStore::purge_expired`]. When the store
/// reaches its size limit, expired entries and redeemed tombstones are
/// dropped to make room.
pub struct InMemoryCodeStore {
    entries: DashMap<String, CodeEntry>,
    max_size: usize,
}

impl InMemoryCodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_SIZE)
    }

    /// Creates a store that holds at most `max_size` entries.
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_size,
        }
    }

    /// Returns the number of entries, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove_expired(&self, now: OffsetDateTime) -> u64 {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len()) as u64;
        if removed > 0 {
            tracing::debug!(removed, "Purged expired authorization codes");
        }
        removed
    }
}

impl Default for InMemoryCodeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CodeStore for InMemoryCodeStore {
    async fn insert(
        &self,
        key: &str,
        protected: String,
        now: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> AuthResult<()> {
        if self.entries.len() >= self.max_size {
            self.remove_expired(now);
        }
        if self.entries.len() >= self.max_size {
            // Tombstones only serve replay logging.
            self.entries.retain(|_, entry| entry.protected.is_some());
            if self.entries.len() >= self.max_size {
                tracing::warn!(
                    max_size = self.max_size,
                    "Authorization code store at capacity"
                );
                return Err(AuthError::storage("authorization code store is full"));
            }
        }

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Err(AuthError::storage("duplicate authorization code")),
            Entry::Vacant(slot) => {
                slot.insert(CodeEntry {
                    protected: Some(protected),
                    expires_at,
                });
                Ok(())
            }
        }
    }

    async fn redeem(&self, key: &str, now: OffsetDateTime) -> AuthResult<Redemption> {
        // The shard lock held by `get_mut` makes check-and-take atomic.
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(Redemption::NotFound);
        };

        let Some(protected) = entry.protected.take() else {
            return Ok(Redemption::Replayed);
        };

        if entry.expires_at <= now {
            return Ok(Redemption::Expired);
        }

        Ok(Redemption::Redeemed(protected))
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> AuthResult<u64> {
        Ok(self.remove_expired(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-01-01 0:00 UTC);
    const LATER: OffsetDateTime = datetime!(2024-01-01 0:05 UTC);

    #[tokio::test]
    async fn test_redeem_once() {
        let store = InMemoryCodeStore::new();
        store.insert("k", "ticket".to_string(), NOW, LATER).await.unwrap();

        assert_eq!(
            store.redeem("k", NOW).await.unwrap(),
            Redemption::Redeemed("ticket".to_string())
        );
        assert_eq!(store.redeem("k", NOW).await.unwrap(), Redemption::Replayed);
    }

    #[tokio::test]
    async fn test_redeem_unknown() {
        let store = InMemoryCodeStore::new();
        assert_eq!(store.redeem("k", NOW).await.unwrap(), Redemption::NotFound);
    }

    #[tokio::test]
    async fn test_redeem_expired() {
        let store = InMemoryCodeStore::new();
        store.insert("k", "ticket".to_string(), NOW, LATER).await.unwrap();

        assert_eq!(store.redeem("k", LATER).await.unwrap(), Redemption::Expired);
        // Expired codes are invalidated too.
        assert_eq!(store.redeem("k", NOW).await.unwrap(), Redemption::Replayed);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = InMemoryCodeStore::new();
        store.insert("k", "a".to_string(), NOW, LATER).await.unwrap();
        let err = store.insert("k", "b".to_string(), NOW, LATER).await.unwrap_err();
        assert!(matches!(err, AuthError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = InMemoryCodeStore::new();
        store.insert("old", "a".to_string(), NOW, NOW).await.unwrap();
        store.insert("new", "b".to_string(), NOW, LATER).await.unwrap();

        assert_eq!(store.purge_expired(NOW).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.redeem("new", NOW).await.unwrap(),
            Redemption::Redeemed("b".to_string())
        );
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let store = InMemoryCodeStore::with_max_size(1);
        store.insert("a", "a".to_string(), NOW, LATER).await.unwrap();
        assert!(store.insert("b", "b".to_string(), NOW, LATER).await.is_err());

        // A redeemed code no longer counts against the limit.
        store.redeem("a", NOW).await.unwrap();
        store.insert("b", "b".to_string(), NOW, LATER).await.unwrap();
        assert_eq!(store.redeem("a", NOW).await.unwrap(), Redemption::NotFound);
    }

    #[tokio::test]
    async fn test_full_store_evicts_expired_codes() {
        let store = InMemoryCodeStore::with_max_size(1);
        store.insert("stale", "a".to_string(), NOW, NOW).await.unwrap();

        let next_day = datetime!(2024-01-02 0:00 UTC);
        store
            .insert("fresh", "b".to_string(), next_day, datetime!(2024-01-02 0:05 UTC))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.redeem("stale", next_day).await.unwrap(), Redemption::NotFound);
        assert_eq!(
            store.redeem("fresh", next_day).await.unwrap(),
            Redemption::Redeemed("b".to_string())
        );
    }

    #[tokio::test]
    async fn test_concurrent_redeem_single_winner() {
        let store = Arc::new(InMemoryCodeStore::new());
        store.insert("k", "ticket".to_string(), NOW, LATER).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.redeem("k", NOW).await.unwrap() })
            })
            .collect();

        let mut redeemed = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Redemption::Redeemed(_)) {
                redeemed += 1;
            }
        }
        assert_eq!(redeemed, 1);
    }
}
