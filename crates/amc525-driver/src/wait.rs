//! Wake signal between the interrupt producer and blocked event readers
//!
//! The producer runs in interrupt context, so it can neither block nor
//! allocate. Waking is therefore split in two:
//!
//! - the producer bumps an epoch counter and, only if someone is asleep,
//!   issues one futex wake on it;
//! - a reader samples the epoch *before* checking its condition and sleeps
//!   with a futex wait on that sampled value, which the kernel refuses if the
//!   epoch has moved in between. No wake-up can be lost.
//!
//! ```text
//! [producer]                 [reader]
//! pending |= events;         seen = epoch;
//! epoch += 1;                if pending != 0 { return }
//! if waiters > 0 { wake }    waiters += 1; futex_wait(epoch, seen)
//! ```

use rustix::io::Errno;
use rustix::thread::futex;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::warn;

/// Futex wake count meaning "everyone" (the kernel takes an `int`).
// Sign loss impossible: i32::MAX is positive
#[allow(clippy::cast_sign_loss)]
const WAKE_ALL: u32 = i32::MAX as u32;

/// Broadcast wake signal backed by a futex word
#[derive(Debug, Default)]
pub(crate) struct EventSignal {
    /// Bumped on every notification; the futex word
    epoch: AtomicU32,
    /// Readers currently inside `wait`, for the lock-free fast path
    waiters: AtomicU32,
}

impl EventSignal {
    pub(crate) const fn new() -> Self {
        Self {
            epoch: AtomicU32::new(0),
            waiters: AtomicU32::new(0),
        }
    }

    /// Sample the epoch; must happen before the caller tests its condition.
    pub(crate) fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Sleep until the epoch moves past `seen`.
    ///
    /// May return spuriously; callers re-check their condition in a loop.
    pub(crate) fn wait(&self, seen: u32) {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        match futex::wait(&self.epoch, futex::Flags::PRIVATE, seen, None) {
            Ok(()) => {}
            Err(e) if e == Errno::AGAIN || e == Errno::INTR => {}
            Err(e) => {
                warn!("futex wait failed: {e}");
                std::thread::yield_now();
            }
        }
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }

    /// Wake every sleeping reader. Never blocks and never allocates.
    pub(crate) fn notify_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) == 0 {
            return;
        }
        // A failed wake leaves readers asleep only until the next epoch bump;
        // nothing useful can be done about it from interrupt context.
        let _ = futex::wake(&self.epoch, futex::Flags::PRIVATE, WAKE_ALL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_stale_epoch_returns_immediately() {
        let signal = EventSignal::new();
        let seen = signal.epoch();
        signal.notify_all();
        // Epoch already moved, so this must not sleep
        signal.wait(seen);
        assert_ne!(signal.epoch(), seen);
    }

    #[test]
    fn test_notify_wakes_sleeper() {
        let signal = Arc::new(EventSignal::new());
        let seen = signal.epoch();

        let sleeper = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || {
                while signal.epoch() == seen {
                    signal.wait(seen);
                }
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        signal.notify_all();
        sleeper.join().unwrap();
    }
}
