//! Cached connection handles for the network fetcher.
//!
//! Connection and TLS handshake setup dominate the cost of small fetches,
//! and the transport engine reuses its open connections only when it is
//! handed the same handle again. Keeping one idle handle per recently
//! used host, in a bounded ring, gets that reuse without letting file
//! descriptors pile up.

use crate::ring::{Arena, Links, Ring, Ringed};

struct CacheEntry<H> {
    host: String,
    handle: H,
    links: Links,
}

impl<H> Ringed for CacheEntry<H> {
    fn links(&self) -> &Links {
        &self.links
    }
    fn links_mut(&mut self) -> &mut Links {
        &mut self.links
    }
}

/// Bounded pool of reusable transport handles keyed by hostname.
///
/// At most one cached handle per host, at most `max` handles overall.
/// When the pool is full, the oldest entry has its payload overwritten in
/// place and the ring rotates by one; the topology itself is never
/// disturbed, so eviction allocates nothing.
pub(crate) struct HandleCache<H> {
    entries: Arena<CacheEntry<H>>,
    ring: Ring,
    max: usize,
}

impl<H> std::fmt::Debug for HandleCache<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleCache")
            .field("len", &self.len())
            .field("max", &self.max)
            .finish()
    }
}

impl<H> HandleCache<H> {
    /// An empty cache holding at most `max` handles.
    pub fn new(max: usize) -> Self {
        Self {
            entries: Arena::default(),
            ring: Ring::default(),
            max,
        }
    }

    /// Take the cached handle for `host`, if one exists. Ownership moves
    /// to the caller; the cache slot is released.
    pub fn acquire(&mut self, host: &str) -> Option<H> {
        let idx = self.ring.find(&self.entries, |e| e.host == host)?;
        self.ring.remove(&mut self.entries, idx);
        self.entries.remove(idx).map(|e| e.handle)
    }

    /// Offer a handle back for reuse after a transfer to `host`.
    ///
    /// If the host already has a cached handle the newcomer is surplus
    /// and simply dropped. A full cache evicts its oldest entry by
    /// overwriting it in place.
    pub fn release(&mut self, host: &str, handle: H) {
        if self.max == 0 {
            return;
        }
        if self.ring.find(&self.entries, |e| e.host == host).is_some() {
            // one cached handle per host; drop the newcomer
            return;
        }
        if self.ring.len(&self.entries) >= self.max {
            let Some(head) = self.ring.head() else { return };
            if let Some(entry) = self.entries.get_mut(head) {
                entry.handle = handle;
                entry.host = host.to_owned();
            }
            self.ring.rotate(&self.entries);
            return;
        }
        let idx = self.entries.insert(CacheEntry {
            host: host.to_owned(),
            handle,
            links: Links::default(),
        });
        self.ring.insert(&mut self.entries, idx);
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.ring.len(&self.entries)
    }

    /// Drop every cached handle. Used when the engine is finalised.
    pub fn clear(&mut self) {
        while let Some(head) = self.ring.head() {
            self.ring.remove(&mut self.entries, head);
            self.entries.remove(head);
        }
    }
}
