//! The bounded, per-sender fragment reassembly store.
//!
//! One slot tracks one in-flight message from one `(IP, port)` pair. The
//! store enforces two independent ceilings — total payload bytes and slot
//! count — by evicting the least-recently-touched slot, matching the
//! teacher's `FragmentBuffer` map in spirit (keyed the same way) but adding
//! the bounds and eviction the teacher's LAN-only provider never needed.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Instant;

use constants::{MAX_FRAG_BUF_TOTAL_SIZE, MAX_NUM_FRAG_BUFS};

/// Identifies a sender for reassembly purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderKey {
    pub addr: Ipv4Addr,
    pub port: u16,
}

/// One in-flight message's reassembly state.
pub struct FragSlot {
    pub channel: String,
    pub msg_seqno: u32,
    pub total_size: u32,
    pub fragments_remaining: u16,
    pub payload: Vec<u8>,
    last_touch: Instant,
}

impl FragSlot {
    fn new(channel: String, msg_seqno: u32, total_size: u32, fragments_in_msg: u16) -> Self {
        FragSlot {
            channel,
            msg_seqno,
            total_size,
            fragments_remaining: fragments_in_msg,
            payload: vec![0u8; total_size as usize],
            last_touch: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_touch = Instant::now();
    }

    /// `true` once every fragment has landed.
    pub fn is_complete(&self) -> bool {
        self.fragments_remaining == 0
    }
}

/// Outcome of inserting a new slot.
#[derive(Debug, Fail, PartialEq, Eq)]
pub enum InsertError {
    /// Even after evicting every other slot, this one alone exceeds the
    /// byte ceiling.
    #[fail(
        display = "message of {} bytes exceeds the fragment store's {}-byte ceiling",
        _0, _1
    )]
    TooLarge(u32, usize),
}

/// Bounded map of `SenderKey -> FragSlot`, with LRU eviction under
/// pressure.
pub struct FragmentStore {
    slots: HashMap<SenderKey, FragSlot>,
    total_bytes: usize,
    max_total_bytes: usize,
    max_slots: usize,
}

impl Default for FragmentStore {
    fn default() -> Self {
        FragmentStore::new(MAX_FRAG_BUF_TOTAL_SIZE, MAX_NUM_FRAG_BUFS)
    }
}

impl FragmentStore {
    pub fn new(max_total_bytes: usize, max_slots: usize) -> Self {
        FragmentStore {
            slots: HashMap::new(),
            total_bytes: 0,
            max_total_bytes,
            max_slots,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn get(&self, key: &SenderKey) -> Option<&FragSlot> {
        self.slots.get(key)
    }

    pub fn get_mut(&mut self, key: &SenderKey) -> Option<&mut FragSlot> {
        self.slots.get_mut(key)
    }

    /// Drops whatever slot is stored for `key`, if any. Used both for
    /// explicit removal on completion and for stale-message replacement.
    pub fn remove(&mut self, key: &SenderKey) {
        if let Some(slot) = self.slots.remove(key) {
            self.total_bytes -= slot.payload.len();
        }
    }

    /// Creates a new OPEN slot for `key`, evicting least-recently-touched
    /// slots until it fits. Fails with `TooLarge` if the new slot alone
    /// would exceed the byte ceiling even in an empty store.
    pub fn insert(
        &mut self,
        key: SenderKey,
        channel: String,
        msg_seqno: u32,
        total_size: u32,
        fragments_in_msg: u16,
    ) -> Result<(), InsertError> {
        let size = total_size as usize;
        if size > self.max_total_bytes {
            return Err(InsertError::TooLarge(total_size, self.max_total_bytes));
        }

        while self.total_bytes + size > self.max_total_bytes || self.slots.len() >= self.max_slots
        {
            if !self.evict_oldest() {
                break;
            }
        }

        let slot = FragSlot::new(channel, msg_seqno, total_size, fragments_in_msg);
        self.total_bytes += slot.payload.len();
        self.slots.insert(key, slot);
        Ok(())
    }

    /// Copies `data` into `slot.payload[offset..]`, touches its LRU clock,
    /// and decrements the remaining-fragment counter. Caller is expected to
    /// have already validated `offset + data.len() <= total_size`.
    pub fn apply_fragment(&mut self, key: &SenderKey, offset: u32, data: &[u8]) {
        if let Some(slot) = self.slots.get_mut(key) {
            let offset = offset as usize;
            slot.payload[offset..offset + data.len()].copy_from_slice(data);
            slot.fragments_remaining = slot.fragments_remaining.saturating_sub(1);
            slot.touch();
        }
    }

    /// Removes and returns the completed slot for `key`, if its fragment
    /// count has reached zero.
    pub fn take_if_complete(&mut self, key: &SenderKey) -> Option<FragSlot> {
        let complete = self.slots.get(key).map_or(false, FragSlot::is_complete);
        if !complete {
            return None;
        }
        let slot = self.slots.remove(key).expect("checked above");
        self.total_bytes -= slot.payload.len();
        Some(slot)
    }

    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .slots
            .iter()
            .min_by_key(|&(_, slot)| slot.last_touch)
            .map(|(key, _)| *key);
        match oldest {
            Some(key) => {
                self.remove(&key);
                true
            }
            None => false,
        }
    }
}
