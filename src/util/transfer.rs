use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::SerialRun;

/// All demand is spent; the service never transfers again.
const FINISHED: u64 = u64::MAX;

/// Saturation point: once reached, demand is treated as infinite and never
/// decremented again.
const UNBOUNDED: u64 = u64::MAX - 1;

type Callback = Box<dyn FnOnce() + Send>;

/// Lock-free primitive that transfers items from a producer to a consumer
/// for as long as the producer yields items, the consumer is in demand, and
/// the service has not finished.
///
/// [`increase_demand`](Self::increase_demand) is the pull initiated by the
/// downstream consumer and [`try_transfer`](Self::try_transfer) the push
/// initiated by the upstream producer; a delivery happens only when both
/// sides agree. Deliveries are strictly serial: the producer and consumer
/// closures are invoked one transfer at a time, by whichever thread wins the
/// race into the transfer routine, and never concurrently with themselves or
/// each other.
///
/// The service does not run background work. The producer side must call
/// `try_transfer` whenever a previously exhausted source may yield items
/// again; failing to do so stalls progress until the consumer next raises
/// demand.
///
/// A demand is considered spent as soon as the producer yields an item, even
/// if the consumer then panics; panics propagate to the transferring caller
/// but do not invalidate the service.
///
/// Raising demand happens-before the transfer it permits, and transfer *n*
/// happens-before transfer *n + 1*. No ordering is promised between
/// `try_transfer` and the transfer it triggers.
pub struct TransferService<T> {
    from: Box<dyn Fn() -> Option<T> + Send + Sync>,
    to: Box<dyn Fn(T) + Send + Sync>,
    demand: AtomicU64,
    gate: SerialRun,
    before: Mutex<Option<Callback>>,
    after: Mutex<Option<Callback>>,
}

impl<T> TransferService<T> {
    pub fn new<F, C>(from: F, to: C) -> Self
    where
        F: Fn() -> Option<T> + Send + Sync + 'static,
        C: Fn(T) + Send + Sync + 'static,
    {
        Self {
            from: Box::new(from),
            to: Box::new(to),
            demand: AtomicU64::new(0),
            gate: SerialRun::new(),
            before: Mutex::new(None),
            after: Mutex::new(None),
        }
    }

    /// Like [`new`](Self::new), with a callback that runs exactly once,
    /// serially within the scope of the first delivery, just before the
    /// consumer receives the first item.
    pub fn with_before_first<F, C, B>(from: F, to: C, before_first: B) -> Self
    where
        F: Fn() -> Option<T> + Send + Sync + 'static,
        C: Fn(T) + Send + Sync + 'static,
        B: FnOnce() + Send + 'static,
    {
        let service = Self::new(from, to);
        *lock(&service.before) = Some(Box::new(before_first));
        service
    }

    /// Increases the demand by `n` items. Saturates at an unbounded
    /// sentinel, after which demand never decreases again. NOP once
    /// finished.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero.
    pub fn increase_demand(&self, n: u64) {
        assert!(n >= 1, "demand increase must be at least 1");

        let mut current = self.demand.load(Ordering::Acquire);
        loop {
            if current == FINISHED {
                return;
            }
            let next = current.saturating_add(n).min(UNBOUNDED);
            match self.demand.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.try_transfer();
    }

    /// Attempts to transfer items from producer to consumer.
    ///
    /// Must be called after any condition change that could make a
    /// previously `None`-producing producer yield items again. NOP once
    /// finished.
    pub fn try_transfer(&self) {
        self.gate.run(|| self.transfer_logic());
    }

    /// Stops future transfers. The callback runs exactly once: immediately
    /// when no transfer is active, otherwise serially after the in-progress
    /// delivery. Returns `false` (and never runs the callback) when the
    /// service had already finished.
    pub fn finish<F: FnOnce() + Send + 'static>(&self, after: F) -> bool {
        let mut current = self.demand.load(Ordering::Acquire);
        loop {
            if current == FINISHED {
                return false;
            }
            match self.demand.compare_exchange(current, FINISHED, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        // only the caller that flipped the flag installs the callback; the
        // transfer routine below guarantees it runs
        *lock(&self.after) = Some(Box::new(after));
        self.try_transfer();
        true
    }

    pub fn is_finished(&self) -> bool {
        self.demand.load(Ordering::Acquire) == FINISHED
    }

    /// Whether at least one more delivery is currently authorised.
    pub fn has_demand(&self) -> bool {
        let demand = self.demand.load(Ordering::Acquire);
        demand > 0 && demand != FINISHED
    }

    fn transfer_logic(&self) {
        let then = self.demand.load(Ordering::Acquire);

        if then == FINISHED {
            self.run_after_once();
            return;
        }
        if then == 0 {
            return;
        }

        let item = match (self.from)() {
            Some(item) => item,
            // producer is out, we are out
            None => return,
        };

        // the demand is spent from here on, consumer panic or not
        let spend = SpendDemand { demand: &self.demand, spent: false };

        self.run_before_once();
        (self.to)(item);

        let now = spend.spend();
        if now > 0 {
            // keep signalling a re-run while demand remains
            self.try_transfer();
        }
    }

    fn run_before_once(&self) {
        if let Some(callback) = lock(&self.before).take() {
            callback();
        }
    }

    fn run_after_once(&self) {
        if let Some(callback) = lock(&self.after).take() {
            callback();
        }
    }
}

/// Decrements demand exactly once, on the normal path or during unwind.
struct SpendDemand<'a> {
    demand: &'a AtomicU64,
    spent: bool,
}

impl<'a> SpendDemand<'a> {
    fn spend(mut self) -> u64 {
        self.spent = true;
        Self::decrement(self.demand)
    }

    fn decrement(demand: &AtomicU64) -> u64 {
        let mut current = demand.load(Ordering::Acquire);
        loop {
            // flags stay unmodified and zero is the smallest demand
            if current == FINISHED || current == UNBOUNDED || current == 0 {
                return current;
            }
            match demand.compare_exchange_weak(current, current - 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return current - 1,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for SpendDemand<'_> {
    fn drop(&mut self) {
        if !self.spent {
            Self::decrement(self.demand);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
