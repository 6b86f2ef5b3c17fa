//! [`MemoryPool`]: the per-scope allocation site for string/blob payloads.
//!
//! The reference runtime gives each scope a bump allocator so that tree
//! nodes created while annotating from that scope get stable backing memory
//! without per-allocation bookkeeping, and so that a thread's pool (and
//! therefore its nodes' payload bytes) can outlive the thread itself once a
//! snapshot has captured a reference into it.
//!
//! In this crate [`crate::variant::Variant`]'s `String`/`Blob` payloads are
//! already `Arc`-backed, so the memory-safety half of that design is handled
//! by reference counting rather than by a manual arena. `MemoryPool` is kept
//! as a distinct component anyway — it is the place every annotation's
//! string/blob data passes through on its way into the tree, it records
//! which scope an allocation is attributed to, and it is the thing a scope
//! keeps alive for the scope's own lifetime (mirroring "release_scope does
//! not free the memory pool" even though, in this design, freeing it early
//! would not by itself reclaim any bytes the tree still references).

use crate::variant::Variant;
use parking_lot::Mutex;
use std::sync::Arc;

/// A scope-local interning pool for string and blob payloads.
#[derive(Default)]
pub struct MemoryPool {
    strings: Mutex<Vec<Arc<str>>>,
    blobs: Mutex<Vec<Arc<[u8]>>>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning a reference-counted handle suitable for a
    /// [`Variant::String`].
    pub fn intern_str(&self, s: &str) -> Arc<str> {
        let arc: Arc<str> = Arc::from(s);
        self.strings.lock().push(Arc::clone(&arc));
        arc
    }

    /// Intern raw bytes, returning a reference-counted handle suitable for a
    /// [`Variant::Blob`].
    pub fn intern_blob(&self, bytes: &[u8]) -> Arc<[u8]> {
        let arc: Arc<[u8]> = Arc::from(bytes);
        self.blobs.lock().push(Arc::clone(&arc));
        arc
    }

    /// Record this pool as the allocation site for `value`'s payload (if
    /// any) and return it unchanged. Called by
    /// [`crate::tree::MetadataTree::get_path`] for every pair it interns, so
    /// that a scope's pool keeps its own annotation payloads alive for at
    /// least as long as the scope itself is kept alive, independent of the
    /// tree's own (indefinite) retention.
    pub fn own(&self, value: Variant) -> Variant {
        match &value {
            Variant::String(s) => self.strings.lock().push(Arc::clone(s)),
            Variant::Blob(b) => self.blobs.lock().push(Arc::clone(b)),
            _ => {}
        }
        value
    }

    /// Number of distinct string/blob payloads this pool has taken
    /// ownership of. Exposed for tests and diagnostics only.
    pub fn len(&self) -> usize {
        self.strings.lock().len() + self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_tracks_string_and_blob_payloads_only() {
        let pool = MemoryPool::new();
        assert!(pool.is_empty());
        pool.own(Variant::Int(1));
        assert!(pool.is_empty(), "scalar variants are not pool-backed");
        pool.own(Variant::from_str("hi"));
        assert_eq!(pool.len(), 1);
        pool.own(Variant::from_bytes([1, 2, 3]));
        assert_eq!(pool.len(), 2);
    }
}
