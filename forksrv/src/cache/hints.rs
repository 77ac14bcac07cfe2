//! Direct-mapped hint slots.
//!
//! One slot per hash bucket of the program counter, each holding a pointer
//! to the most recently resolved unit for that bucket. Readers never lock:
//! they load the pointer and check the unit's key themselves. A slot may be
//! stale (pointing at a unit for another key that hashed to the same bucket)
//! but never dangling, because the table owns every unit for as long as the
//! store exists and never removes one.

use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

use super::types::{CachedCodeUnit, MAX_HINT_SLOTS};

/// Low bits of the pc folded into the bucket index.
const HINT_PAGE_SHIFT: u32 = 6;

pub struct AddressHints {
    slots: Box<[AtomicPtr<CachedCodeUnit>]>,
    mask: u64,
}

impl AddressHints {
    pub(crate) fn new(slot_count: usize) -> Self {
        let slot_count = slot_count.clamp(1, MAX_HINT_SLOTS).next_power_of_two();
        let slots = (0..slot_count)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            mask: (slot_count - 1) as u64,
        }
    }

    #[inline]
    pub fn slot_index(&self, pc: u64) -> usize {
        (((pc >> HINT_PAGE_SHIFT) ^ pc) & self.mask) as usize
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Store `unit` in the bucket for `pc`. Last writer wins.
    ///
    /// Callers must hold the table lock and `unit` must be owned by the table.
    pub(crate) fn publish(&self, pc: u64, unit: &Arc<CachedCodeUnit>) {
        let idx = self.slot_index(pc);
        self.slots[idx].store(Arc::as_ptr(unit).cast_mut(), Ordering::Release);
    }

    /// Whatever unit currently occupies the bucket for `pc`, if any.
    pub fn probe(&self, pc: u64) -> Option<&CachedCodeUnit> {
        let raw = self.slots[self.slot_index(pc)].load(Ordering::Acquire);
        // SAFETY: non-null slots only ever hold pointers published from
        // units owned by the table, which keeps them alive at least as long
        // as `self`.
        unsafe { raw.as_ref() }
    }

    /// Like [`probe`](Self::probe) but hands out a new strong reference.
    pub(crate) fn probe_shared(&self, pc: u64) -> Option<Arc<CachedCodeUnit>> {
        let raw = self.slots[self.slot_index(pc)].load(Ordering::Acquire);
        if raw.is_null() {
            return None;
        }
        // SAFETY: see `probe`; the table holds a strong count for `raw`, so
        // bumping it and rebuilding an `Arc` is sound.
        unsafe {
            Arc::increment_strong_count(raw);
            Some(Arc::from_raw(raw))
        }
    }
}
