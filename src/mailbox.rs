//! Single-slot "frame pending" mailbox shared with the receive interrupt.
//!
//! The radio's receive-complete interrupt calls [`RxMailbox::signal`]; the
//! main cycle calls [`RxMailbox::take`]. Both run inside a critical section,
//! so the read-and-clear in `take` can never interleave with a `signal`.
//!
//! The mailbox holds exactly one pending notification. A second interrupt
//! that fires before the cycle drains the first is coalesced into the same
//! slot: the corresponding hardware frame is skipped at the capture layer.
//! The number of coalesced signals is counted so the loss is observable.

use core::cell::Cell;

use critical_section::Mutex;

#[derive(Clone, Copy)]
struct Slot {
    pending: bool,
    coalesced: u32,
}

/// ISR-safe single-slot notification. Usable from a `static`.
pub struct RxMailbox {
    slot: Mutex<Cell<Slot>>,
}

impl RxMailbox {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Cell::new(Slot {
                pending: false,
                coalesced: 0,
            })),
        }
    }

    /// Mark a frame as pending. Called from interrupt context.
    #[inline]
    pub fn signal(&self) {
        critical_section::with(|cs| {
            let cell = self.slot.borrow(cs);
            let mut slot = cell.get();
            if slot.pending {
                slot.coalesced = slot.coalesced.wrapping_add(1);
            }
            slot.pending = true;
            cell.set(slot);
        });
    }

    /// Read and clear the pending flag in one critical section.
    #[inline]
    pub fn take(&self) -> bool {
        critical_section::with(|cs| {
            let cell = self.slot.borrow(cs);
            let mut slot = cell.get();
            let got = slot.pending;
            slot.pending = false;
            cell.set(slot);
            got
        })
    }

    /// Peek without clearing.
    pub fn is_pending(&self) -> bool {
        critical_section::with(|cs| self.slot.borrow(cs).get().pending)
    }

    /// Total signals that landed on an already-pending slot.
    pub fn coalesced(&self) -> u32 {
        critical_section::with(|cs| self.slot.borrow(cs).get().coalesced)
    }
}

impl Default for RxMailbox {
    fn default() -> Self {
        Self::new()
    }
}
