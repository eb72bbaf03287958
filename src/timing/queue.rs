//! Per-track bounded event queue.
//!
//! Single producer (a control thread, serialized by the owning track) and a
//! single consumer (the render thread). Neither side blocks or allocates.
//!
//! The read index, the write index and a truncation epoch share one atomic
//! word. The producer can move the write index backwards (`clear_from`) while
//! the consumer is mid-pop; the epoch bump makes the consumer's compare-exchange
//! fail so it re-reads the slot instead of handing out a half-overwritten
//! event. Slot contents are themselves atomics, so a stale read is only ever
//! stale, never undefined.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};

use crossbeam::utils::CachePadded;

use crate::events::{Event, TriggerFrame};

/// Indices are 16 bits wide, so a full queue must stay distinguishable from
/// an empty one.
pub const MAX_CAPACITY: usize = 1 << 15;

struct Slot {
    trigger: AtomicU64,
    payload: AtomicU32,
}

impl Slot {
    fn empty() -> Self {
        Self {
            trigger: AtomicU64::new(0),
            payload: AtomicU32::new(0),
        }
    }

    fn store(&self, event: &Event) {
        self.trigger.store(event.trigger.to_raw(), Ordering::Relaxed);
        self.payload.store(event.pack_payload(), Ordering::Relaxed);
    }

    fn load(&self) -> Event {
        let trigger = self.trigger.load(Ordering::Relaxed);
        let payload = self.payload.load(Ordering::Relaxed);
        Event::from_packed(payload, trigger)
    }

    fn ordering_frame(&self) -> u64 {
        TriggerFrame::from_raw(self.trigger.load(Ordering::Relaxed)).ordering_frame()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    epoch: u32,
    read: u16,
    write: u16,
}

impl Cursor {
    fn unpack(raw: u64) -> Self {
        Self {
            epoch: (raw >> 32) as u32,
            read: (raw >> 16) as u16,
            write: raw as u16,
        }
    }

    fn pack(self) -> u64 {
        ((self.epoch as u64) << 32) | ((self.read as u64) << 16) | self.write as u64
    }

    fn len(self) -> usize {
        self.write.wrapping_sub(self.read) as usize
    }
}

pub struct EventQueue {
    slots: Box<[Slot]>,
    mask: u16,
    cursor: CachePadded<AtomicU64>,
}

impl EventQueue {
    /// Rounds `capacity` up to a power of two, clamped to `1..=MAX_CAPACITY`.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_CAPACITY).next_power_of_two();
        let slots = (0..capacity).map(|_| Slot::empty()).collect();
        Self {
            slots,
            mask: (capacity - 1) as u16,
            cursor: CachePadded::new(AtomicU64::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        Cursor::unpack(self.cursor.load(Ordering::Acquire)).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn available_count(&self) -> usize {
        self.capacity() - self.len()
    }

    fn slot(&self, index: u16) -> &Slot {
        &self.slots[(index & self.mask) as usize]
    }

    /// Producer side. Events are expected in non-decreasing trigger order,
    /// continuing from whatever is already queued.
    pub fn push(&self, events: &[Event]) -> usize {
        let current = Cursor::unpack(self.cursor.load(Ordering::Acquire));
        let accepted = events.len().min(self.capacity() - current.len());
        if accepted == 0 {
            return 0;
        }

        for (i, event) in events[..accepted].iter().enumerate() {
            self.slot(current.write.wrapping_add(i as u16)).store(event);
        }

        let write = current.write.wrapping_add(accepted as u16);
        let mut raw = self.cursor.load(Ordering::Relaxed);
        loop {
            let mut next = Cursor::unpack(raw);
            debug_assert_eq!(next.write, current.write, "concurrent producers on one queue");
            next.write = write;
            match self.cursor.compare_exchange_weak(
                raw,
                next.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return accepted,
                Err(actual) => raw = actual,
            }
        }
    }

    /// Discards every queued event whose trigger frame is `>= from_frame`.
    /// Returns how many were discarded.
    ///
    /// Producer side. Relies on queued events being sorted: everything from
    /// the first match onwards is dropped.
    pub fn clear_from(&self, from_frame: u64) -> usize {
        let mut raw = self.cursor.load(Ordering::Acquire);
        loop {
            let current = Cursor::unpack(raw);
            let cut = (0..current.len())
                .map(|i| current.read.wrapping_add(i as u16))
                .find(|&index| self.slot(index).ordering_frame() >= from_frame);

            let Some(cut) = cut else {
                return 0;
            };

            let next = Cursor {
                epoch: current.epoch.wrapping_add(1),
                read: current.read,
                write: cut,
            };
            match self.cursor.compare_exchange_weak(
                raw,
                next.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // slot writes after this point must not be observed
                    // without the epoch bump
                    fence(Ordering::Release);
                    return current.write.wrapping_sub(cut) as usize;
                }
                Err(actual) => raw = actual,
            }
        }
    }

    pub fn clear(&self) -> usize {
        self.clear_from(0)
    }

    /// Removes and yields, in queue order, every event due at or before
    /// `up_to_frame`. Stops at the first event that is not yet due.
    ///
    /// Consumer side: only the render thread may drain a queue.
    pub fn drain_due(&self, up_to_frame: u64) -> DrainDue<'_> {
        DrainDue {
            queue: self,
            up_to_frame,
        }
    }

    fn pop_due(&self, up_to_frame: u64) -> Option<Event> {
        let mut raw = self.cursor.load(Ordering::Acquire);
        loop {
            let current = Cursor::unpack(raw);
            if current.len() == 0 {
                return None;
            }

            let event = self.slot(current.read).load();

            if !event.trigger.is_due(up_to_frame) {
                fence(Ordering::Acquire);
                let again = self.cursor.load(Ordering::Relaxed);
                if again == raw {
                    return None;
                }
                raw = again;
                continue;
            }

            let next = Cursor {
                read: current.read.wrapping_add(1),
                ..current
            };
            match self.cursor.compare_exchange_weak(
                raw,
                next.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(event),
                Err(actual) => raw = actual,
            }
        }
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

pub struct DrainDue<'a> {
    queue: &'a EventQueue,
    up_to_frame: u64,
}

impl Iterator for DrainDue<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        self.queue.pop_due(self.up_to_frame)
    }
}
