//! Per-page transaction locks. One [`PageLatch`] lives in each buffer
//! pool entry and enforces the lock-compatibility matrix — any number of
//! shared holders, or a single exclusive holder alone — with bounded
//! waiting as the deadlock breaker.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::{Condvar, Mutex};
use rand::Rng;

use crate::error::StorageError;
use crate::transaction::TransactionId;

/// The two lock modes of page-granularity two-phase locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// The access level an operator requests from the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

impl Permissions {
    pub fn as_mode(self) -> LockMode {
        match self {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// Bounds of the randomized wait drawn once per acquisition attempt. The
/// spread is what breaks deadlock cycles, so both ends are load-bearing.
const MIN_WAIT_MS: u64 = 1000;
const MAX_WAIT_MS: u64 = 4000;

/// The fraction of the drawn timeout after which an un-signaled waiter
/// gives up and aborts.
const WAIT_BUDGET: f64 = 0.9;

struct WaitSignal {
    woken: Mutex<bool>,
    cond: Condvar,
}

impl WaitSignal {
    fn new() -> Arc<Self> {
        Arc::new(WaitSignal {
            woken: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    fn wake(&self) {
        let mut woken = self.woken.lock();
        *woken = true;
        self.cond.notify_one();
    }
}

struct Waiter {
    mode: LockMode,
    signal: Arc<WaitSignal>,
}

#[derive(Default)]
struct LatchState {
    holders: Vec<(TransactionId, LockMode)>,
    waiters: VecDeque<Waiter>,
}

impl LatchState {
    /// Grants the lock when the compatibility matrix allows it. Re-entrant
    /// same-or-weaker requests return immediately; a shared holder asking
    /// for exclusive drops its shared record here and is re-decided as a
    /// fresh exclusive request, so no other writer can slip in between.
    fn try_acquire(&mut self, tid: TransactionId, mode: LockMode) -> bool {
        if let Some(pos) = self.holders.iter().position(|(holder, _)| *holder == tid) {
            match (self.holders[pos].1, mode) {
                (LockMode::Exclusive, _) | (LockMode::Shared, LockMode::Shared) => return true,
                (LockMode::Shared, LockMode::Exclusive) => {
                    self.holders.remove(pos);
                }
            }
        }

        let compatible = match mode {
            LockMode::Shared => self
                .holders
                .iter()
                .all(|(_, held)| *held == LockMode::Shared),
            LockMode::Exclusive => self.holders.is_empty(),
        };
        if compatible {
            self.holders.push((tid, mode));
        }
        compatible
    }
}

/// A multi-reader / single-writer lock keyed by transaction identity.
///
/// `acquire` is the only operation that can fail, and it fails exactly
/// with [`StorageError::TransactionAborted`] when the randomized wait
/// runs out. `release` is infallible; releasing a lock that is not held
/// is a no-op.
pub struct PageLatch {
    state: Mutex<LatchState>,
}

impl PageLatch {
    pub fn new() -> Self {
        PageLatch {
            state: Mutex::new(LatchState::default()),
        }
    }

    pub fn acquire(&self, tid: TransactionId, mode: LockMode) -> Result<(), StorageError> {
        let timeout =
            Duration::from_millis(rand::thread_rng().gen_range(MIN_WAIT_MS..MAX_WAIT_MS));
        let budget = timeout.mul_f64(WAIT_BUDGET);
        let start = Instant::now();

        loop {
            let signal = {
                let mut state = self.state.lock();
                if state.try_acquire(tid, mode) {
                    return Ok(());
                }
                let signal = WaitSignal::new();
                state.waiters.push_back(Waiter {
                    mode,
                    signal: Arc::clone(&signal),
                });
                signal
            };

            let mut woken = signal.woken.lock();
            while !*woken {
                let elapsed = start.elapsed();
                if elapsed >= budget {
                    break;
                }
                let _ = signal.cond.wait_for(&mut woken, budget - elapsed);
            }
            let signaled = *woken;
            drop(woken);

            if !signaled {
                let mut state = self.state.lock();
                state
                    .waiters
                    .retain(|waiter| !Arc::ptr_eq(&waiter.signal, &signal));
                // A wake-up that raced the timeout still counts as a signal.
                if !*signal.woken.lock() {
                    debug!(
                        "{tid} timed out after {:?} waiting for {mode:?}",
                        start.elapsed()
                    );
                    return Err(StorageError::TransactionAborted);
                }
            }
            // Signaled: retry from scratch. Spurious wake-ups just loop.
        }
    }

    /// Removes the first holder record matching `tid`, then wakes
    /// waiters: the earliest exclusive waiter alone if one exists,
    /// otherwise every shared waiter in arrival order.
    pub fn release(&self, tid: TransactionId) {
        let mut state = self.state.lock();
        if let Some(pos) = state.holders.iter().position(|(holder, _)| *holder == tid) {
            state.holders.remove(pos);
        }

        if let Some(pos) = state
            .waiters
            .iter()
            .position(|waiter| waiter.mode == LockMode::Exclusive)
        {
            if let Some(waiter) = state.waiters.remove(pos) {
                waiter.signal.wake();
            }
        } else {
            for waiter in state.waiters.drain(..) {
                waiter.signal.wake();
            }
        }
    }

    pub fn holds(&self, tid: TransactionId) -> bool {
        self.state
            .lock()
            .holders
            .iter()
            .any(|(holder, _)| *holder == tid)
    }

    /// Snapshot of the current holders, for assertions and diagnostics.
    pub fn holders(&self) -> Vec<(TransactionId, LockMode)> {
        self.state.lock().holders.clone()
    }
}

impl Default for PageLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn shared_holders_coexist() {
        let latch = PageLatch::new();
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        latch.acquire(t1, LockMode::Shared).unwrap();
        latch.acquire(t2, LockMode::Shared).unwrap();
        assert!(latch.holds(t1));
        assert!(latch.holds(t2));
        assert_eq!(latch.holders().len(), 2);
    }

    #[test]
    fn reacquiring_a_held_lock_returns_immediately() {
        let latch = PageLatch::new();
        let tid = TransactionId::new();

        latch.acquire(tid, LockMode::Exclusive).unwrap();
        // Same or weaker mode on a held page never blocks.
        latch.acquire(tid, LockMode::Exclusive).unwrap();
        latch.acquire(tid, LockMode::Shared).unwrap();
        assert_eq!(latch.holders().len(), 1);
    }

    #[test]
    fn upgrade_replaces_the_shared_record() {
        let latch = PageLatch::new();
        let tid = TransactionId::new();

        latch.acquire(tid, LockMode::Shared).unwrap();
        latch.acquire(tid, LockMode::Exclusive).unwrap();
        assert_eq!(latch.holders(), vec![(tid, LockMode::Exclusive)]);
    }

    #[test]
    fn conflicting_exclusive_request_aborts_within_the_timeout() {
        let latch = Arc::new(PageLatch::new());
        let holder = TransactionId::new();
        latch.acquire(holder, LockMode::Exclusive).unwrap();

        let contender = TransactionId::new();
        let latch2 = Arc::clone(&latch);
        let start = Instant::now();
        let result = thread::spawn(move || latch2.acquire(contender, LockMode::Exclusive))
            .join()
            .unwrap();

        assert!(matches!(result, Err(StorageError::TransactionAborted)));
        assert!(start.elapsed() < Duration::from_secs(4));
        assert_eq!(latch.holders(), vec![(holder, LockMode::Exclusive)]);
    }

    #[test]
    fn release_hands_the_page_to_a_blocked_writer() {
        let latch = Arc::new(PageLatch::new());
        let reader = TransactionId::new();
        latch.acquire(reader, LockMode::Shared).unwrap();

        let writer = TransactionId::new();
        let latch2 = Arc::clone(&latch);
        let handle = thread::spawn(move || latch2.acquire(writer, LockMode::Exclusive));

        thread::sleep(Duration::from_millis(100));
        latch.release(reader);

        handle.join().unwrap().unwrap();
        assert_eq!(latch.holders(), vec![(writer, LockMode::Exclusive)]);
    }

    #[test]
    fn release_of_an_unheld_lock_is_a_noop() {
        let latch = PageLatch::new();
        latch.release(TransactionId::new());
        assert!(latch.holders().is_empty());
    }

    #[test]
    fn writers_are_woken_before_waiting_readers() {
        let latch = Arc::new(PageLatch::new());
        let holder = TransactionId::new();
        latch.acquire(holder, LockMode::Exclusive).unwrap();

        let reader = TransactionId::new();
        let writer = TransactionId::new();

        let reader_latch = Arc::clone(&latch);
        let reader_handle =
            thread::spawn(move || reader_latch.acquire(reader, LockMode::Shared));
        thread::sleep(Duration::from_millis(50));
        let writer_latch = Arc::clone(&latch);
        let writer_handle =
            thread::spawn(move || writer_latch.acquire(writer, LockMode::Exclusive));
        thread::sleep(Duration::from_millis(50));

        latch.release(holder);
        // The writer enqueued after the reader, but the wake-up policy
        // prefers it; the reader then gets in once the writer releases.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(latch.holders(), vec![(writer, LockMode::Exclusive)]);

        latch.release(writer);
        writer_handle.join().unwrap().unwrap();
        reader_handle.join().unwrap().unwrap();
        assert_eq!(latch.holders(), vec![(reader, LockMode::Shared)]);
    }
}
