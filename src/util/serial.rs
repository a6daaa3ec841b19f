use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Action = Box<dyn FnOnce() + Send>;

/// Gate that runs a piece of logic serially, never overlapping and never
/// recursively.
///
/// A thread that calls [`run`](SerialRun::run) while another run is in
/// progress raises a flag and leaves; the running thread observes the flag
/// after finishing the current pass and runs the logic once more. Any number
/// of concurrent signals collapse into a single extra pass.
pub(crate) struct SerialRun {
    pending: AtomicU64,
}

impl SerialRun {
    pub(crate) const fn new() -> Self {
        Self { pending: AtomicU64::new(0) }
    }

    pub(crate) fn run<F: Fn()>(&self, logic: F) {
        if self.pending.fetch_add(1, Ordering::AcqRel) > 0 {
            // another thread is running; it will re-poll
            return;
        }

        let mut observed = 1;
        loop {
            {
                let reset = ResetOnPanic(&self.pending);
                logic();
                std::mem::forget(reset);
            }
            // collapse every signal that arrived during the pass into one
            // extra pass
            match self.pending.compare_exchange(observed, 0, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(more) => observed = more,
            }
        }
    }
}

/// Keeps the gate usable when the guarded logic panics; queued signals from
/// the panicked pass are dropped.
struct ResetOnPanic<'a>(&'a AtomicU64);

impl Drop for ResetOnPanic<'_> {
    fn drop(&mut self) {
        self.0.store(0, Ordering::Release);
    }
}

thread_local! {
    /// Executors currently draining on this thread, innermost last.
    static DRAINING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Executes actions serially in FIFO order without overlapping, unless
/// configured to allow same-thread recursion.
///
/// An action is either run by the calling thread (when the executor is idle,
/// or when recursion is permitted and the calling thread is already draining
/// this executor) or queued for the thread currently draining. In the safe
/// (non-recursive) mode every submission from a draining action is queued,
/// so the call stack can never grow through this executor.
///
/// Actions observe full memory synchronisation in between: anything done
/// before enqueuing an action happens-before that action executes.
#[derive(Clone)]
pub struct SerialExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    actions: Mutex<VecDeque<Action>>,
    gate: SerialRun,
    may_recurse: bool,
}

impl SerialExecutor {
    /// Creates an executor that never recurses: all submissions from within
    /// a running action are queued.
    pub fn new() -> Self {
        Self::with_recursion(false)
    }

    /// Creates an executor that runs actions submitted by the currently
    /// draining thread inline, ahead of the queue.
    pub fn recursive() -> Self {
        Self::with_recursion(true)
    }

    fn with_recursion(may_recurse: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                actions: Mutex::new(VecDeque::new()),
                gate: SerialRun::new(),
                may_recurse,
            }),
        }
    }

    /// Executes the action now, or schedules it to run after the actions
    /// already queued.
    pub fn execute<F: FnOnce() + Send + 'static>(&self, action: F) {
        let id = Arc::as_ptr(&self.inner) as usize;
        if self.inner.may_recurse && DRAINING.with(|d| d.borrow().contains(&id)) {
            action();
            return;
        }

        lock(&self.inner.actions).push_back(Box::new(action));
        self.inner.gate.run(|| Inner::drain(&self.inner));
    }
}

impl Default for SerialExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn drain(inner: &Arc<Inner>) {
        let id = Arc::as_ptr(inner) as usize;
        let _mark = if inner.may_recurse {
            DRAINING.with(|d| d.borrow_mut().push(id));
            Some(Unmark)
        } else {
            None
        };

        loop {
            let next = lock(&inner.actions).pop_front();
            match next {
                Some(action) => action(),
                None => break,
            }
        }
    }
}

/// Pops the draining mark even when an action panics.
struct Unmark;

impl Drop for Unmark {
    fn drop(&mut self) {
        DRAINING.with(|d| {
            d.borrow_mut().pop();
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
