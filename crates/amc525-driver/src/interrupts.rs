//! Interrupt event multiplexer
//!
//! The card raises interrupts carrying a bitmask of events. Any number of
//! consumers may want to see them, each at its own pace, so the pool keeps
//! one pending mask per claimed reader slot:
//!
//! - [`InterruptPool::deliver`] (interrupt context) ORs the new events into
//!   the mask of every claimed slot, then wakes all sleeping readers;
//! - each reader only ever looks at, and clears, its own slot's mask.
//!
//! A slow reader therefore never makes another miss or re-receive events.

use crate::error::ResourceError;
use crate::wait::EventSignal;
use amc525_chip::N_EVENT_READERS;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handle on one claimed reader slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
    /// Slot number, `0..N_EVENT_READERS`
    pub const fn index(self) -> usize {
        self.0
    }

    const fn bit(self) -> u32 {
        1 << self.0
    }
}

/// Fixed set of interrupt reader slots
///
/// Created at attach, closed at detach. Slot claim and release are single
/// atomic read-modify-write operations on the allocation bitmap, so no slot
/// is ever handed out twice.
#[derive(Debug)]
pub struct InterruptPool {
    /// Allocation bitmap, one bit per slot
    claimed: AtomicU32,
    /// Accumulated, not yet consumed events per slot
    pending: [AtomicU32; N_EVENT_READERS],
    /// Set at detach; blocked readers give up
    closed: AtomicBool,
    signal: EventSignal,
}

impl Default for InterruptPool {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptPool {
    /// Create a pool with every slot free
    pub fn new() -> Self {
        Self {
            claimed: AtomicU32::new(0),
            pending: std::array::from_fn(|_| AtomicU32::new(0)),
            closed: AtomicBool::new(false),
            signal: EventSignal::new(),
        }
    }

    /// Claim a free reader slot
    ///
    /// The slot starts with no pending events, except that a delivery racing
    /// with the previous owner's release may leave a spurious mask behind.
    /// Events delivered after the claim are never lost.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Exhausted` if every slot is claimed, or
    /// `ResourceError::Closed` after [`InterruptPool::close`].
    pub fn assign_slot(&self) -> Result<SlotId, ResourceError> {
        if self.is_closed() {
            return Err(ResourceError::Closed);
        }

        for index in 0..N_EVENT_READERS {
            let slot = SlotId(index);
            // No clearing after the claim: release already emptied the mask,
            // and deliveries may land as soon as the bit is set
            if self.claimed.fetch_or(slot.bit(), Ordering::AcqRel) & slot.bit() == 0 {
                debug!("Claimed interrupt reader slot {index}");
                return Ok(slot);
            }
        }

        warn!("All {N_EVENT_READERS} interrupt reader slots claimed");
        Err(ResourceError::Exhausted)
    }

    /// Return a slot to the pool
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::NotClaimed` if the slot was already free
    /// (double release); the pool is left unchanged.
    pub fn release_slot(&self, slot: SlotId) -> Result<(), ResourceError> {
        if !self.is_claimed(slot) {
            warn!("Interrupt reader slot {} released twice", slot.0);
            return Err(ResourceError::NotClaimed { slot: slot.0 });
        }

        // Clear while still claimed: once the bit drops, the next owner's
        // events land in this mask
        self.pending[slot.0].swap(0, Ordering::AcqRel);
        if self.claimed.fetch_and(!slot.bit(), Ordering::AcqRel) & slot.bit() == 0 {
            warn!("Interrupt reader slot {} released twice", slot.0);
            return Err(ResourceError::NotClaimed { slot: slot.0 });
        }

        // A reader still blocked on this slot re-checks and sees it is gone
        self.signal.notify_all();
        debug!("Released interrupt reader slot {}", slot.0);
        Ok(())
    }

    /// Consume the events pending on a slot
    ///
    /// With `blocking`, sleeps until the slot's mask is non-zero and returns
    /// it, clearing it in the same atomic step. Without, returns the current
    /// mask at once (0 if nothing is pending), clearing it only if non-zero.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::NotClaimed` if the slot is not claimed, or
    /// `ResourceError::Closed` if the pool is closed while nothing is
    /// pending.
    pub fn read_events(&self, slot: SlotId, blocking: bool) -> Result<u32, ResourceError> {
        loop {
            let seen = self.signal.epoch();

            if !self.is_claimed(slot) {
                return Err(ResourceError::NotClaimed { slot: slot.0 });
            }

            let events = self.pending[slot.0].swap(0, Ordering::AcqRel);
            if events != 0 || !blocking {
                return Ok(events);
            }

            if self.is_closed() {
                return Err(ResourceError::Closed);
            }

            self.signal.wait(seen);
        }
    }

    /// Whether a read on this slot would return events right now
    ///
    /// Never changes any state.
    pub fn events_ready(&self, slot: SlotId) -> bool {
        self.is_claimed(slot) && self.pending[slot.0].load(Ordering::Acquire) != 0
    }

    /// Accumulate a hardware event mask into every claimed slot
    ///
    /// This is the interrupt-context entry point: it performs a fixed number
    /// of atomic updates and at most one wake syscall. It never blocks,
    /// allocates or logs.
    pub fn deliver(&self, events: u32) {
        if events == 0 {
            return;
        }

        let claimed = self.claimed.load(Ordering::Acquire);
        for (index, pending) in self.pending.iter().enumerate() {
            if claimed & (1 << index) != 0 {
                pending.fetch_or(events, Ordering::Release);
            }
        }

        self.signal.notify_all();
    }

    /// Refuse new claims and wake every blocked reader
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.signal.notify_all();
            info!(
                "Interrupt pool closed with {} reader(s) attached",
                self.claimed_count()
            );
        }
    }

    /// Whether [`InterruptPool::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of slots currently claimed
    pub fn claimed_count(&self) -> usize {
        self.claimed.load(Ordering::Acquire).count_ones() as usize
    }

    fn is_claimed(&self, slot: SlotId) -> bool {
        self.claimed.load(Ordering::Acquire) & slot.bit() != 0
    }
}

/// One consumer's claim on the interrupt pool
///
/// Claims a slot on open and releases it on drop. Holding an `Arc` to the
/// pool keeps it alive for as long as any reader exists.
#[derive(Debug)]
pub struct EventReader {
    pool: Arc<InterruptPool>,
    slot: SlotId,
}

impl EventReader {
    /// Claim a slot on `pool`
    ///
    /// # Errors
    ///
    /// Same as [`InterruptPool::assign_slot`].
    pub fn open(pool: &Arc<InterruptPool>) -> Result<Self, ResourceError> {
        let slot = pool.assign_slot()?;
        Ok(Self {
            pool: Arc::clone(pool),
            slot,
        })
    }

    /// Slot held by this reader
    pub const fn slot(&self) -> SlotId {
        self.slot
    }

    /// Consume pending events, see [`InterruptPool::read_events`]
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Closed` once the device is detached.
    pub fn read(&self, blocking: bool) -> Result<u32, ResourceError> {
        self.pool.read_events(self.slot, blocking)
    }

    /// Whether events are pending, without consuming them
    pub fn ready(&self) -> bool {
        self.pool.events_ready(self.slot)
    }
}

impl Drop for EventReader {
    fn drop(&mut self) {
        let _ = self.pool.release_slot(self.slot);
    }
}
