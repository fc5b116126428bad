//! CPU interrupt-priority (spl) control.
//!
//! TLB updates must be atomic with respect to interrupt handlers that may
//! themselves touch the TLB, so the fault and activation paths raise the
//! priority level for the duration of the update and restore it after.

use core::sync::atomic::{AtomicUsize, Ordering};

/// All interrupts enabled.
pub const IPL_NONE: usize = 0;
/// All interrupts deferred.
pub const IPL_HIGH: usize = 1;

static CURRENT_IPL: AtomicUsize = AtomicUsize::new(IPL_NONE);

/// The CPU's current interrupt priority level.
pub fn interrupt_level() -> usize {
    CURRENT_IPL.load(Ordering::Relaxed)
}

/// Raises the priority to [`IPL_HIGH`], returning a guard that restores
/// the previous level when dropped. Nesting is fine; each guard restores
/// what it saw.
pub fn hold_interrupts() -> HeldInterrupts {
    HeldInterrupts {
        previous: CURRENT_IPL.swap(IPL_HIGH, Ordering::Acquire),
    }
}

/// RAII guard for a raised interrupt priority level.
pub struct HeldInterrupts {
    previous: usize,
}

impl Drop for HeldInterrupts {
    fn drop(&mut self) {
        CURRENT_IPL.store(self.previous, Ordering::Release);
    }
}
