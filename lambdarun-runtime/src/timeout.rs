//! Deadline enforcement for guarded calls
//!
//! Two interchangeable strategies sit behind [`TimeoutGuard`], chosen once per
//! process by [`TimeoutStrategy::detect`]:
//!
//! - [`TimeoutStrategy::Preemptive`] runs the call on a dedicated worker thread
//!   and waits for it against a deadline. When the deadline fires the guard
//!   returns [`GuardError::Timeout`] immediately, whether or not the call is
//!   still running. The worker is abandoned, not killed: it keeps running until
//!   its body returns and its partial effects are not rolled back. Only one
//!   preemptive deadline may be armed at a time in the process; see
//!   [`DeadlineLease`]. Only one worker may run at a time either: the next
//!   call waits for an abandoned worker to exit, and that wait is charged
//!   against its own deadline.
//! - [`TimeoutStrategy::Ticker`] runs the call on the calling thread while a
//!   helper thread counts down in slices of at most one second and raises an
//!   expiry flag. **It cannot interrupt a blocked call**: a timeout is only
//!   detected after the call returns on its own, so a handler that never
//!   returns hangs the run.

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Longest single sleep of the ticker helper thread
const TICK: Duration = Duration::from_secs(1);

static DETECTED: Lazy<TimeoutStrategy> = Lazy::new(TimeoutStrategy::probe);

/// How a guarded call is preempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStrategy {
    /// Abandon the call at the deadline (worker thread + deadline wait)
    Preemptive,
    /// Check an expiry flag after the call returns
    Ticker,
}

impl TimeoutStrategy {
    /// Host-appropriate strategy, probed once per process
    pub fn detect() -> Self {
        *DETECTED
    }

    fn probe() -> Self {
        // Abandoning a still-running worker needs a host that lets detached
        // threads outlive their join handle.
        if cfg!(any(unix, windows)) {
            Self::Preemptive
        } else {
            Self::Ticker
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preemptive => "preemptive",
            Self::Ticker => "ticker",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown timeout strategy '{0}' (expected auto, preemptive or ticker)")]
pub struct UnknownStrategy(String);

impl FromStr for TimeoutStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::detect()),
            "preemptive" | "interrupt" | "signal" => Ok(Self::Preemptive),
            "ticker" | "cooperative" | "thread" => Ok(Self::Ticker),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum GuardError<E> {
    #[error("Timer Expired after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(E),

    #[error("a guarded call is already running on this thread; deadlines cannot be nested")]
    DeadlineBusy,

    #[error("failed to spawn guard thread: {0}")]
    Spawn(std::io::Error),
}

impl<E> GuardError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

// Process-wide deadline slot for the preemptive strategy.
static DEADLINE_OWNED: Mutex<bool> = parking_lot::const_mutex(false);
static DEADLINE_RELEASED: Condvar = Condvar::new();

thread_local! {
    // Set on preemptive worker threads so a handler cannot arm a second deadline.
    static INSIDE_GUARDED_CALL: Cell<bool> = const { Cell::new(false) };
}

/// Exclusive hold on the process-wide preemptive deadline
///
/// Acquiring blocks while another thread holds the lease, so concurrent
/// callers are serialized. Acquiring from inside a guarded call is refused.
/// The lease is released when dropped, on every exit path.
#[derive(Debug)]
pub struct DeadlineLease {
    expires_at: Option<Instant>,
}

impl DeadlineLease {
    pub fn acquire(timeout: Duration) -> Result<Self, GuardError<std::convert::Infallible>> {
        if INSIDE_GUARDED_CALL.with(Cell::get) {
            return Err(GuardError::DeadlineBusy);
        }

        let mut owned = DEADLINE_OWNED.lock();
        while *owned {
            DEADLINE_RELEASED.wait(&mut owned);
        }
        *owned = true;

        Ok(Self {
            // `None` means the deadline is beyond what `Instant` can represent.
            expires_at: Instant::now().checked_add(timeout),
        })
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }
}

impl Drop for DeadlineLease {
    fn drop(&mut self) {
        *DEADLINE_OWNED.lock() = false;
        DEADLINE_RELEASED.notify_one();
    }
}

static WORKER_RUNNING: Mutex<bool> = parking_lot::const_mutex(false);
static WORKER_EXITED: Condvar = Condvar::new();

/// Held by a preemptive worker thread until its call returns, abandoned or not
struct WorkerSlot;

impl WorkerSlot {
    /// Wait for the previous worker to exit. `None` if `deadline` passes first.
    fn claim(deadline: Option<Instant>) -> Option<Self> {
        let mut running = WORKER_RUNNING.lock();
        while *running {
            match deadline {
                Some(deadline) => {
                    if WORKER_EXITED.wait_until(&mut running, deadline).timed_out() && *running {
                        return None;
                    }
                }
                None => WORKER_EXITED.wait(&mut running),
            }
        }
        *running = true;
        Some(Self)
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        *WORKER_RUNNING.lock() = false;
        WORKER_EXITED.notify_all();
    }
}

#[cfg(test)]
static SERIAL_TESTS: Mutex<()> = parking_lot::const_mutex(());

/// Serializes tests that time preemptive calls, once any abandoned worker has exited
#[cfg(test)]
pub(crate) fn serial_preemptive() -> parking_lot::MutexGuard<'static, ()> {
    let serial = SERIAL_TESTS.lock();
    drop(WorkerSlot::claim(None));
    serial
}

/// Wraps calls with an enforced deadline
#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    strategy: TimeoutStrategy,
    timeout: Duration,
}

impl TimeoutGuard {
    pub fn new(strategy: TimeoutStrategy, timeout_secs: u64) -> Self {
        Self {
            strategy,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn strategy(&self) -> TimeoutStrategy {
        self.strategy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Turn `f` into a callable with the same result type that fails with
    /// [`GuardError::Timeout`] once the deadline elapses
    pub fn wrap<F, T, E>(self, f: F) -> impl FnOnce() -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        move || self.call(f)
    }

    /// Run `f` under the deadline.
    ///
    /// A panic inside `f` is re-raised on the calling thread after the guard
    /// has cleaned up.
    pub fn call<F, T, E>(&self, f: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        match self.strategy {
            TimeoutStrategy::Preemptive => self.call_preemptive(f),
            TimeoutStrategy::Ticker => self.call_ticker(f),
        }
    }

    fn call_preemptive<F, T, E>(&self, f: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let lease = DeadlineLease::acquire(self.timeout).map_err(|_| GuardError::DeadlineBusy)?;
        if self.timeout.is_zero() {
            return Err(GuardError::Timeout(self.timeout));
        }

        let Some(slot) = WorkerSlot::claim(lease.expires_at()) else {
            warn!(timeout = ?self.timeout, "Previous abandoned call still running at the deadline");
            return Err(GuardError::Timeout(self.timeout));
        };

        // Capacity 1 so an abandoned worker never blocks on send.
        let (tx, rx) = mpsc::sync_channel::<thread::Result<Result<T, E>>>(1);
        thread::Builder::new()
            .name("lambdarun-invoke".to_string())
            .spawn(move || {
                let _slot = slot;
                INSIDE_GUARDED_CALL.with(|inside| inside.set(true));
                let outcome = panic::catch_unwind(AssertUnwindSafe(f));
                // The receiver is gone if the deadline already fired.
                let _ = tx.send(outcome);
            })
            .map_err(GuardError::Spawn)?;

        let received = match lease.expires_at() {
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        drop(lease);

        match received {
            Ok(Ok(result)) => result.map_err(GuardError::Failed),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?self.timeout, "Deadline expired, abandoning guarded call");
                Err(GuardError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Only reachable if the worker died without reporting.
                panic::resume_unwind(Box::new("guarded call exited without a result"))
            }
        }
    }

    fn call_ticker<F, T, E>(&self, f: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let ticker = Ticker::start(self.timeout).map_err(GuardError::Spawn)?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(f));
        let expired = ticker.stop();

        match outcome {
            Err(payload) => panic::resume_unwind(payload),
            Ok(Err(e)) => Err(GuardError::Failed(e)),
            Ok(Ok(_)) if expired => {
                warn!(timeout = ?self.timeout, "Guarded call returned after its deadline");
                Err(GuardError::Timeout(self.timeout))
            }
            Ok(Ok(value)) => Ok(value),
        }
    }
}

/// Countdown helper thread for the ticker strategy
struct Ticker {
    expired: Arc<AtomicBool>,
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn start(interval: Duration) -> std::io::Result<Self> {
        let expired = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let flag = Arc::clone(&expired);
        let handle = thread::Builder::new()
            .name("lambdarun-ticker".to_string())
            .spawn(move || {
                let mut remaining = interval;
                loop {
                    if remaining.is_zero() {
                        flag.store(true, Ordering::SeqCst);
                        break;
                    }
                    let slice = remaining.min(TICK);
                    match stop_rx.recv_timeout(slice) {
                        Err(RecvTimeoutError::Timeout) => remaining = remaining.saturating_sub(slice),
                        // Stop requested or the owner went away.
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        debug!(?interval, "Ticker started");
        Ok(Self {
            expired,
            stop_tx,
            handle,
        })
    }

    /// Stop and join the helper, then report whether it expired
    fn stop(self) -> bool {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            warn!("Ticker thread panicked");
        }
        self.expired.load(Ordering::SeqCst)
    }
}
