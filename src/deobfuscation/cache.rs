//! Whole-result memoisation.
//!
//! The engine consults a [`ResultCache`] before running the pipeline and
//! writes every finished result back. Results are shared as
//! `Arc<DeobfuscationResult>`, so a hit hands out the very same allocation
//! that was stored.
//!
//! Writes are idempotent: the pipeline is deterministic, so two runs racing on
//! the same key produce equal results and the last writer wins.

use std::{fmt, sync::Arc};

use dashmap::DashMap;
use sha1::{Digest, Sha1};

use crate::deobfuscation::{
    config::{CollaboratorChoice, DeobfuscateOptions},
    result::DeobfuscationResult,
};

/// SHA-1 over the source text, the option flags and the collaborator choice.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 20]);

impl CacheKey {
    /// Computes the key for a request.
    #[must_use]
    pub fn new(options: &DeobfuscateOptions) -> Self {
        Self::from_parts(&options.code, options.flags().bits(), options.collaborator)
    }

    /// Computes the key from its parts.
    #[must_use]
    pub fn from_parts(code: &str, flags: u32, collaborator: CollaboratorChoice) -> Self {
        let mut hasher = Sha1::new();
        hasher.update((code.len() as u64).to_le_bytes());
        hasher.update(code.as_bytes());
        hasher.update(flags.to_le_bytes());
        hasher.update(collaborator.as_ref().as_bytes());
        Self(hasher.finalize().into())
    }

    /// The raw digest.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({self})")
    }
}

/// Storage for finished results.
///
/// Implementations must be safe to share between threads; the engine holds
/// one as `Arc<dyn ResultCache>`.
pub trait ResultCache: Send + Sync {
    /// Looks up a stored result.
    fn get(&self, key: &CacheKey) -> Option<Arc<DeobfuscationResult>>;

    /// Stores a result, replacing any previous entry for `key`.
    fn insert(&self, key: CacheKey, result: Arc<DeobfuscationResult>);

    /// Number of stored results.
    fn len(&self) -> usize;

    /// Returns `true` if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unbounded in-memory cache backed by [`DashMap`].
///
/// Entries are never evicted; callers that process unbounded streams of
/// distinct inputs should use [`NoopCache`] or their own implementation.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<CacheKey, Arc<DeobfuscationResult>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<DeobfuscationResult>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn insert(&self, key: CacheKey, result: Arc<DeobfuscationResult>) {
        self.entries.insert(key, result);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A cache that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl ResultCache for NoopCache {
    fn get(&self, _key: &CacheKey) -> Option<Arc<DeobfuscationResult>> {
        None
    }

    fn insert(&self, _key: CacheKey, _result: Arc<DeobfuscationResult>) {}

    fn len(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(code: &str) -> Arc<DeobfuscationResult> {
        Arc::new(DeobfuscationResult::pass_through(code.into(), "w".into()))
    }

    #[test]
    fn test_key_covers_every_part() {
        let base = DeobfuscateOptions::new("var a = 1;");
        let key = CacheKey::new(&base);

        assert_eq!(key, CacheKey::new(&base.clone()));
        assert_ne!(key, CacheKey::new(&DeobfuscateOptions::new("var a = 2;")));
        assert_ne!(key, CacheKey::new(&base.clone().aggressive(true)));
        assert_ne!(
            key,
            CacheKey::new(&base.clone().collaborator(CollaboratorChoice::Anthropic))
        );
        assert_eq!(key.to_string().len(), 40);
    }

    #[test]
    fn test_memory_cache_returns_same_arc() {
        let cache = MemoryCache::new();
        let key = CacheKey::new(&DeobfuscateOptions::new("x"));
        assert!(cache.get(&key).is_none());

        let stored = result("x");
        cache.insert(key, Arc::clone(&stored));

        let hit = cache.get(&key).unwrap();
        assert!(Arc::ptr_eq(&stored, &hit));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_noop_cache_stores_nothing() {
        let cache = NoopCache;
        let key = CacheKey::new(&DeobfuscateOptions::new("x"));
        cache.insert(key, result("x"));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }
}
