//! Intrusive ring queue over an index arena.
//!
//! Every scheme fetcher tracks its live fetch contexts in a circular
//! doubly-linked list, and the curl fetcher additionally keeps its cached
//! connection handles in one. The links live inside the entries
//! themselves, addressed by arena index rather than by pointer, so
//! splicing is O(1), never allocates, and never invalidates other
//! entries.
//!
//! The ring head is the oldest member: insertion splices new entries in
//! just behind it, which is what gives the handle cache its oldest-first
//! eviction order for free.

/// The intrusive links held inside every ring member.
///
/// A detached entry has both links `None`; a member of a non-empty ring
/// always has both set (a sole member points at itself).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Links {
    prev: Option<usize>,
    next: Option<usize>,
}

impl Links {
    /// True while the entry is not spliced into any ring.
    pub fn is_detached(&self) -> bool {
        self.prev.is_none() && self.next.is_none()
    }
}

/// Access to the intrusive links of a ring member.
pub trait Ringed {
    /// Shared view of this entry's ring links.
    fn links(&self) -> &Links;
    /// Mutable view of this entry's ring links.
    fn links_mut(&mut self) -> &mut Links;
}

/// Index-addressed storage for ring members.
///
/// Freed slots go on a free list for reuse, so long-running fetch churn
/// does not grow the backing vector without bound.
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> std::fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena").field("len", &self.len()).finish()
    }
}

impl<T> Arena<T> {
    /// Store `value`, returning its slot index.
    pub fn insert(&mut self, value: T) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(value);
                idx
            }
            None => {
                self.slots.push(Some(value));
                self.slots.len() - 1
            }
        }
    }

    /// Take the value out of slot `idx`, if it is occupied.
    pub fn remove(&mut self, idx: usize) -> Option<T> {
        let out = self.slots.get_mut(idx)?.take();
        if out.is_some() {
            self.free.push(idx);
        }
        out
    }

    /// Shared access to slot `idx`.
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx)?.as_ref()
    }

    /// Mutable access to slot `idx`.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots.get_mut(idx)?.as_mut()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True when no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A circular doubly-linked list of arena entries.
#[derive(Debug, Default)]
pub struct Ring {
    head: Option<usize>,
}

impl Ring {
    /// Index of the oldest member, or `None` for an empty ring.
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    /// True when the ring has no members.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Splice the occupied arena slot `idx` into the ring, just behind
    /// the head. O(1), allocation free. The slot must exist and must not
    /// already be a member of a ring.
    pub fn insert<T: Ringed>(&mut self, arena: &mut Arena<T>, idx: usize) {
        match self.head {
            None => {
                // sole member: a one-element cycle of itself
                let links = arena.get_mut(idx).unwrap().links_mut();
                links.prev = Some(idx);
                links.next = Some(idx);
                self.head = Some(idx);
            }
            Some(head) => {
                // a non-empty ring is fully connected, so these links exist
                let tail = arena.get(head).unwrap().links().prev.unwrap();
                *arena.get_mut(idx).unwrap().links_mut() = Links {
                    prev: Some(tail),
                    next: Some(head),
                };
                arena.get_mut(tail).unwrap().links_mut().next = Some(idx);
                arena.get_mut(head).unwrap().links_mut().prev = Some(idx);
            }
        }
    }

    /// Unsplice slot `idx` from the ring. O(1). The entry's own links are
    /// cleared to the detached state; removing the sole member yields an
    /// empty ring. Removing an entry that is not a member is a no-op.
    pub fn remove<T: Ringed>(&mut self, arena: &mut Arena<T>, idx: usize) {
        let Some(links) = arena.get(idx).map(|e| *e.links()) else {
            return;
        };
        let (Some(prev), Some(next)) = (links.prev, links.next) else {
            return;
        };
        if prev == idx {
            // sole member
            self.head = None;
        } else {
            arena.get_mut(prev).unwrap().links_mut().next = Some(next);
            arena.get_mut(next).unwrap().links_mut().prev = Some(prev);
            if self.head == Some(idx) {
                self.head = Some(next);
            }
        }
        *arena.get_mut(idx).unwrap().links_mut() = Links::default();
    }

    /// The member after `idx`, or `None` once `idx` is no longer a
    /// member. Poll loops capture this before delivering callbacks,
    /// because a callback may remove the current entry.
    pub fn next<T: Ringed>(
        &self,
        arena: &Arena<T>,
        idx: usize,
    ) -> Option<usize> {
        arena.get(idx)?.links().next
    }

    /// Advance the head by one, making the old head the newest member.
    /// This is the eviction primitive: the caller overwrites the old
    /// head's payload in place, leaving the ring topology untouched.
    pub fn rotate<T: Ringed>(&mut self, arena: &Arena<T>) {
        if let Some(head) = self.head {
            self.head = arena.get(head).and_then(|e| e.links().next);
        }
    }

    /// Linear scan for the first member matching `pred`.
    pub fn find<T: Ringed>(
        &self,
        arena: &Arena<T>,
        mut pred: impl FnMut(&T) -> bool,
    ) -> Option<usize> {
        let mut cur = self.head;
        while let Some(idx) = cur {
            let entry = arena.get(idx)?;
            if pred(entry) {
                return Some(idx);
            }
            cur = entry.links().next;
            if cur == self.head {
                break;
            }
        }
        None
    }

    /// Linear count of members.
    pub fn len<T: Ringed>(&self, arena: &Arena<T>) -> usize {
        let mut count = 0;
        let mut cur = self.head;
        while let Some(idx) = cur {
            count += 1;
            cur = arena.get(idx).and_then(|e| e.links().next);
            if cur == self.head {
                break;
            }
        }
        count
    }
}
