//! Concurrent key-value and hash storage with TTL expiry.
//!
//! Two independent spaces live behind one outer lock: the flat string map
//! and the hash directory. Each hash carries its own inner lock over its
//! field map, so mutating fields of one hash needs only a read lock on the
//! directory plus a write lock on that hash. Creating or removing a hash
//! takes the directory write lock. Lock order is always directory before
//! hash.
//!
//! Deadlines are monotonic [`Instant`]s. Every read path checks the deadline
//! and reports an expired entry as absent without upgrading to a write lock;
//! physical removal is the sweeper's job (see [`crate::storage::expiry`]).

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// A stored value with an optional absolute deadline.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Bytes,
    pub expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    #[inline]
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    #[inline]
    fn is_live(&self) -> bool {
        !self.is_expired()
    }

    /// Time left before the deadline; `None` when the entry never expires.
    fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// Guard condition for a conditional SET.
///
/// The presence check and the insert run under one directory write lock, so
/// two racing NX sets cannot both succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    Always,
    /// Apply only when the key is absent (NX).
    IfAbsent,
    /// Apply only when the key is present (XX).
    IfPresent,
}

/// A named field map with per-field deadlines.
#[derive(Debug, Default)]
struct HashEntry {
    fields: RwLock<HashMap<Bytes, Entry>>,
}

#[derive(Debug, Default)]
struct Spaces {
    strings: HashMap<Bytes, Entry>,
    hashes: HashMap<Bytes, Arc<HashEntry>>,
}

/// Point-in-time copy of all live entries with their remaining TTLs.
///
/// Feeds the append-only-log rewrite: taken under read locks only, so
/// foreground writes keep flowing while the rewrite emits from it. Hashes
/// with no live fields are omitted — empty and absent hashes are
/// observationally identical.
#[derive(Debug)]
pub struct Snapshot {
    pub strings: Vec<(Bytes, Bytes, Option<Duration>)>,
    pub hashes: Vec<(Bytes, Vec<(Bytes, Bytes, Option<Duration>)>)>,
}

/// The in-memory store shared by every connection task and the sweeper.
///
/// All methods take `&self`; wrap the store in an [`Arc`] and clone handles
/// freely.
#[derive(Debug, Default)]
pub struct Store {
    spaces: RwLock<Spaces>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // String space
    // ------------------------------------------------------------------

    /// Sets `key` to `value`. A `ttl` of `None` clears any prior deadline;
    /// `Some(t)` replaces it with now + t.
    pub fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) {
        self.set_conditional(key, value, ttl, SetCondition::Always);
    }

    /// Conditional set; returns whether the write was applied.
    pub fn set_conditional(
        &self,
        key: Bytes,
        value: Bytes,
        ttl: Option<Duration>,
        cond: SetCondition,
    ) -> bool {
        let mut spaces = self.spaces.write().unwrap();
        let live = spaces
            .strings
            .get(&key[..])
            .map(Entry::is_live)
            .unwrap_or(false);

        let apply = match cond {
            SetCondition::Always => true,
            SetCondition::IfAbsent => !live,
            SetCondition::IfPresent => live,
        };
        if apply {
            spaces.strings.insert(key, Entry::new(value, ttl));
        }
        apply
    }

    /// Looks up `key`, treating entries past their deadline as absent.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let spaces = self.spaces.read().unwrap();
        spaces
            .strings
            .get(key)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone())
    }

    /// Deletes keys, returning how many were present (and unexpired) before
    /// the call. Expired leftovers are removed but not counted.
    pub fn del(&self, keys: &[Bytes]) -> u64 {
        let mut spaces = self.spaces.write().unwrap();
        let mut deleted = 0;
        for key in keys {
            if let Some(entry) = spaces.strings.remove(&key[..]) {
                if entry.is_live() {
                    deleted += 1;
                }
            }
        }
        deleted
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        let spaces = self.spaces.read().unwrap();
        spaces
            .strings
            .get(key)
            .map(Entry::is_live)
            .unwrap_or(false)
    }

    /// Remaining TTL in whole seconds: `Some(secs)` with a deadline,
    /// `Some(-1)` without one, `None` when the key is absent or expired.
    pub fn ttl(&self, key: &[u8]) -> Option<i64> {
        let spaces = self.spaces.read().unwrap();
        let entry = spaces.strings.get(key).filter(|e| e.is_live())?;
        Some(
            entry
                .remaining()
                .map(|left| left.as_secs() as i64)
                .unwrap_or(-1),
        )
    }

    /// Replaces the deadline of an existing key; `None` makes it permanent.
    /// Returns false when the key is absent or expired.
    pub fn set_ttl(&self, key: &[u8], ttl: Option<Duration>) -> bool {
        let mut spaces = self.spaces.write().unwrap();
        match spaces.strings.get_mut(key) {
            Some(entry) if entry.is_live() => {
                entry.expires_at = ttl.map(|t| Instant::now() + t);
                true
            }
            _ => false,
        }
    }

    /// Number of live string keys.
    pub fn len(&self) -> u64 {
        let spaces = self.spaces.read().unwrap();
        spaces.strings.values().filter(|e| e.is_live()).count() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Hash space
    // ------------------------------------------------------------------

    /// Writes field/value pairs into `hash`, creating it when absent, all
    /// under a single hash write lock so no reader observes a partial
    /// update. Returns the count of newly created fields (overwrites count
    /// zero). The `ttl` applies per field written.
    pub fn hset(&self, hash: Bytes, pairs: Vec<(Bytes, Bytes)>, ttl: Option<Duration>) -> u64 {
        let entry = self.hash_or_create(&hash);
        let mut fields = entry.fields.write().unwrap();
        let mut created = 0;
        for (field, value) in pairs {
            let was_live = fields
                .get(&field[..])
                .map(Entry::is_live)
                .unwrap_or(false);
            if !was_live {
                created += 1;
            }
            fields.insert(field, Entry::new(value, ttl));
        }
        created
    }

    /// Looks up one field. An absent hash yields `None` and is not created.
    pub fn hget(&self, hash: &[u8], field: &[u8]) -> Option<Bytes> {
        let entry = self.hash_handle(hash)?;
        let fields = entry.fields.read().unwrap();
        fields
            .get(field)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone())
    }

    /// Deletes fields from `hash`, returning how many were live beforehand.
    /// A hash left with zero fields stays in the directory.
    pub fn hdel(&self, hash: &[u8], fields_to_remove: &[Bytes]) -> u64 {
        let entry = match self.hash_handle(hash) {
            Some(entry) => entry,
            None => return 0,
        };
        let mut fields = entry.fields.write().unwrap();
        let mut deleted = 0;
        for field in fields_to_remove {
            if let Some(removed) = fields.remove(&field[..]) {
                if removed.is_live() {
                    deleted += 1;
                }
            }
        }
        deleted
    }

    /// Removes the whole hash from the directory.
    pub fn hdel_all(&self, hash: &[u8]) -> bool {
        let mut spaces = self.spaces.write().unwrap();
        spaces.hashes.remove(hash).is_some()
    }

    /// All live field/value pairs of `hash`; empty for an absent hash.
    /// Order is unspecified but consistent within one call.
    pub fn hgetall(&self, hash: &[u8]) -> Vec<(Bytes, Bytes)> {
        let entry = match self.hash_handle(hash) {
            Some(entry) => entry,
            None => return Vec::new(),
        };
        let fields = entry.fields.read().unwrap();
        fields
            .iter()
            .filter(|(_, e)| e.is_live())
            .map(|(f, e)| (f.clone(), e.value.clone()))
            .collect()
    }

    pub fn hexists(&self, hash: &[u8], field: &[u8]) -> bool {
        match self.hash_handle(hash) {
            Some(entry) => entry
                .fields
                .read()
                .unwrap()
                .get(field)
                .map(Entry::is_live)
                .unwrap_or(false),
            None => false,
        }
    }

    /// Count of live fields; zero for an absent hash.
    pub fn hlen(&self, hash: &[u8]) -> u64 {
        match self.hash_handle(hash) {
            Some(entry) => entry
                .fields
                .read()
                .unwrap()
                .values()
                .filter(|e| e.is_live())
                .count() as u64,
            None => 0,
        }
    }

    /// Atomically clears both spaces.
    pub fn flushdb(&self) {
        let mut spaces = self.spaces.write().unwrap();
        spaces.strings.clear();
        spaces.hashes.clear();
    }

    fn hash_handle(&self, hash: &[u8]) -> Option<Arc<HashEntry>> {
        let spaces = self.spaces.read().unwrap();
        spaces.hashes.get(hash).cloned()
    }

    fn hash_or_create(&self, hash: &Bytes) -> Arc<HashEntry> {
        if let Some(entry) = self.hash_handle(hash) {
            return entry;
        }
        let mut spaces = self.spaces.write().unwrap();
        spaces.hashes.entry(hash.clone()).or_default().clone()
    }

    // ------------------------------------------------------------------
    // Expiry support
    // ------------------------------------------------------------------

    /// String keys whose deadline has passed, collected under a read lock.
    pub fn expired_keys(&self) -> Vec<Bytes> {
        let spaces = self.spaces.read().unwrap();
        spaces
            .strings
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Per-hash lists of fields whose deadline has passed.
    pub fn expired_fields(&self) -> Vec<(Bytes, Vec<Bytes>)> {
        let spaces = self.spaces.read().unwrap();
        let mut out = Vec::new();
        for (name, entry) in spaces.hashes.iter() {
            let fields = entry.fields.read().unwrap();
            let expired: Vec<Bytes> = fields
                .iter()
                .filter(|(_, e)| e.is_expired())
                .map(|(f, _)| f.clone())
                .collect();
            if !expired.is_empty() {
                out.push((name.clone(), expired));
            }
        }
        out
    }

    /// Removes the given keys if they are still expired. Entries a writer
    /// resurrected since collection are left alone.
    pub fn purge_keys(&self, keys: &[Bytes]) -> u64 {
        let mut spaces = self.spaces.write().unwrap();
        let mut purged = 0;
        for key in keys {
            let still_expired = spaces
                .strings
                .get(&key[..])
                .map(Entry::is_expired)
                .unwrap_or(false);
            if still_expired {
                spaces.strings.remove(&key[..]);
                purged += 1;
            }
        }
        purged
    }

    /// Removes expired fields from one hash, re-checking the deadline under
    /// the hash write lock.
    pub fn purge_fields(&self, hash: &[u8], candidates: &[Bytes]) -> u64 {
        let entry = match self.hash_handle(hash) {
            Some(entry) => entry,
            None => return 0,
        };
        let mut fields = entry.fields.write().unwrap();
        let mut purged = 0;
        for field in candidates {
            let still_expired = fields
                .get(&field[..])
                .map(Entry::is_expired)
                .unwrap_or(false);
            if still_expired {
                fields.remove(&field[..]);
                purged += 1;
            }
        }
        purged
    }

    // ------------------------------------------------------------------
    // Snapshot for log compaction
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> Snapshot {
        let spaces = self.spaces.read().unwrap();
        let strings = spaces
            .strings
            .iter()
            .filter(|(_, e)| e.is_live())
            .map(|(k, e)| (k.clone(), e.value.clone(), e.remaining()))
            .collect();

        let mut hashes = Vec::new();
        for (name, entry) in spaces.hashes.iter() {
            let fields = entry.fields.read().unwrap();
            let live: Vec<_> = fields
                .iter()
                .filter(|(_, e)| e.is_live())
                .map(|(f, e)| (f.clone(), e.value.clone(), e.remaining()))
                .collect();
            if !live.is_empty() {
                hashes.push((name.clone(), live));
            }
        }
        Snapshot { strings, hashes }
    }
}
