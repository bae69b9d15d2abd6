//! A fixed-capacity, bump-and-wrap byte arena backing receive datagrams.
//!
//! Regions are handed out in allocation order and released in any order;
//! the free pointer only advances over a *contiguous* run of released
//! regions starting at the oldest outstanding one. In the steady-state
//! receive→process loop this degenerates to simple FIFO reuse with no
//! fragmentation, at the cost of occasionally wasting the buffer's tail
//! when an allocation doesn't fit before wrapping.

use std::collections::{HashMap, HashSet, VecDeque};

/// Opaque reference to a live region. Carries no lifetime so it can be
/// held alongside the buffer it came from; using it against a different
/// `RingBuffer` or after release is a caller error, not a memory-safety one
/// (index lookups simply fail).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionHandle(u64);

#[derive(Debug, Fail, PartialEq, Eq)]
pub enum RingBufferError {
    /// `max_size` alone exceeds the buffer's total capacity; no amount of
    /// freeing would make this allocation fit.
    #[fail(display = "requested size {} exceeds ring buffer capacity", _0)]
    TooLarge(usize),

    /// The buffer currently has no room; the caller should retry later or
    /// fall back to a heap-owned buffer for this datagram.
    #[fail(display = "ring buffer has no free space for a {}-byte region", _0)]
    Full(usize),
}

struct RegionMeta {
    start: usize,
    len: usize,
}

/// A bump + wrap allocator over one contiguous byte arena.
pub struct RingBuffer {
    data: Vec<u8>,
    capacity: usize,
    head: usize,
    used: usize,
    order: VecDeque<u64>,
    meta: HashMap<u64, RegionMeta>,
    freed: HashSet<u64>,
    next_id: u64,
}

impl RingBuffer {
    /// Allocates a new arena of exactly `capacity` bytes, zero-initialized.
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            data: vec![0u8; capacity],
            capacity,
            head: 0,
            used: 0,
            order: VecDeque::new(),
            meta: HashMap::new(),
            freed: HashSet::new(),
            next_id: 0,
        }
    }

    /// Total arena size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently reserved by live regions, including any tail padding
    /// wasted by a wrap that hasn't been reclaimed yet.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Reserves a region of exactly `max_size` bytes. Never splits a region
    /// across the arena's wrap point: if the remaining tail can't hold
    /// `max_size`, the allocator wastes the tail and wraps to the front.
    pub fn alloc(&mut self, max_size: usize) -> Result<RegionHandle, RingBufferError> {
        if max_size > self.capacity {
            return Err(RingBufferError::TooLarge(max_size));
        }

        let tail_space = self.capacity - self.head;
        let (start, waste) = if tail_space >= max_size {
            (self.head, 0)
        } else {
            (0, tail_space)
        };

        let needed = waste + max_size;
        if self.used + needed > self.capacity {
            return Err(RingBufferError::Full(max_size));
        }

        if waste > 0 {
            let waste_id = self.next_id;
            self.next_id += 1;
            self.meta.insert(
                waste_id,
                RegionMeta {
                    start: self.head,
                    len: waste,
                },
            );
            self.order.push_back(waste_id);
            self.freed.insert(waste_id);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.meta.insert(
            id,
            RegionMeta {
                start,
                len: max_size,
            },
        );
        self.order.push_back(id);
        self.used += needed;

        self.head = start + max_size;
        if self.head == self.capacity {
            self.head = 0;
        }

        Ok(RegionHandle(id))
    }

    /// Returns the region's bytes for writing (e.g. `recv_into`).
    pub fn region_mut(&mut self, handle: RegionHandle) -> &mut [u8] {
        let m = self.meta.get(&handle.0).expect("unknown region handle");
        &mut self.data[m.start..m.start + m.len]
    }

    /// Returns the region's bytes for reading.
    pub fn region(&self, handle: RegionHandle) -> &[u8] {
        let m = self.meta.get(&handle.0).expect("unknown region handle");
        &self.data[m.start..m.start + m.len]
    }

    /// Shrinks a region to `new_len` bytes if it is still the
    /// most-recently-allocated one (so the freed tail can be handed right
    /// back to the allocator). Otherwise a no-op, per §9's note that shrink
    /// is optional: a region that isn't at the bump pointer can't give its
    /// tail back without either fragmenting or relocating live data.
    pub fn shrink(&mut self, handle: RegionHandle, new_len: usize) {
        let is_most_recent = self.order.back() == Some(&handle.0);
        let old_len = {
            let m = self.meta.get(&handle.0).expect("unknown region handle");
            assert!(new_len <= m.len, "shrink must not grow a region");
            m.len
        };
        if !is_most_recent || new_len == old_len {
            return;
        }

        let reclaimed = old_len - new_len;
        self.meta.get_mut(&handle.0).unwrap().len = new_len;
        self.used -= reclaimed;
        self.head -= reclaimed;
    }

    /// Releases a region. Its space is reclaimed once it becomes (or
    /// already is) the oldest outstanding allocation.
    pub fn release(&mut self, handle: RegionHandle) {
        self.freed.insert(handle.0);
        self.reclaim();
    }

    fn reclaim(&mut self) {
        while let Some(&front_id) = self.order.front() {
            if !self.freed.contains(&front_id) {
                break;
            }
            self.order.pop_front();
            self.freed.remove(&front_id);
            let m = self.meta.remove(&front_id).expect("region in order queue must have meta");
            self.used -= m.len;
        }
    }
}
