use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;

use crossbeam_utils::Backoff;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::error::ThrottlingError;
use crate::lifo_stack::LifoStack;

type Waiter = oneshot::Sender<()>;

/// Lock-free counting semaphore that serves waiters in LIFO order
///
/// The permit count is a single signed atomic:
/// - `count >= 0` is the number of free permits
/// - `count < 0` is the number of queued waiters (negated)
///
/// Under sustained overload the most recently queued waiter is woken first,
/// which keeps latency low for the requests that do get admitted. Stale
/// waiters at the bottom of the stack are expected to be shed by deadline
/// and queue-limit checks of the caller.
///
/// Cloning is cheap and yields a handle to the same semaphore.
#[derive(Clone)]
pub struct LifoSemaphore {
    inner: Arc<Inner>,
}

struct Inner {
    count: AtomicI64,
    waiters: LifoStack<Waiter>,
}

impl LifoSemaphore {
    /// Create a semaphore with `initial_count` free permits
    pub fn new(initial_count: i64) -> Result<Self> {
        if initial_count < 0 {
            return Err(ThrottlingError::NegativeCount(initial_count));
        }

        Ok(Self { inner: Arc::new(Inner { count: AtomicI64::new(initial_count), waiters: LifoStack::new() }) })
    }

    /// Create a semaphore without free permits
    pub fn empty() -> Self {
        Self { inner: Arc::new(Inner { count: AtomicI64::new(0), waiters: LifoStack::new() }) }
    }

    /// Number of free permits, zero when there is a queue
    #[inline]
    pub fn current_count(&self) -> i64 {
        self.inner.count.load(Ordering::Acquire).max(0)
    }

    /// Number of queued waiters, zero when there are free permits
    #[inline]
    pub fn current_queue(&self) -> i64 {
        (-self.inner.count.load(Ordering::Acquire)).max(0)
    }

    /// Take one permit
    ///
    /// The returned [`Acquire`] is already complete when a permit was free
    /// (see [`Acquire::is_ready`]); otherwise the caller has been queued and
    /// must await it.
    #[inline]
    pub fn acquire(&self) -> Acquire {
        let decremented = self.inner.count.fetch_sub(1, Ordering::AcqRel) - 1;
        if decremented >= 0 {
            return Acquire { state: AcquireState::Ready, semaphore: None };
        }

        let (sender, receiver) = oneshot::channel();
        self.inner.waiters.push(sender);

        Acquire { state: AcquireState::Waiting(receiver), semaphore: Some(self.clone()) }
    }

    /// Return one permit, waking the most recent waiter if there is a queue
    #[inline]
    pub fn release(&self) {
        let before = self.inner.count.fetch_add(1, Ordering::AcqRel);
        if before < 0 {
            self.signal_waiters(1);
        }
    }

    /// Return `count` permits at once
    pub fn release_many(&self, count: i64) -> Result<()> {
        if count < 0 {
            return Err(ThrottlingError::NegativeCount(count));
        }
        if count == 0 {
            return Ok(());
        }

        let before = self.inner.count.fetch_add(count, Ordering::AcqRel);
        if before < 0 {
            self.signal_waiters(count.min(-before));
        }

        Ok(())
    }

    fn signal_waiters(&self, count: i64) {
        let mut remaining = count;

        while remaining > 0 {
            let Some(waiter) = self.inner.waiters.pop() else {
                break;
            };
            remaining -= 1;

            if !self.inner.wake(waiter) {
                remaining += 1;
            }
        }

        if remaining > 0 {
            self.signal_deferred(remaining);
        }
    }

    // The matching waiters decremented the count but have not been pushed yet.
    // Spin for them off the releasing path.
    fn signal_deferred(&self, count: i64) {
        let inner = Arc::clone(&self.inner);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for _ in 0..count {
                        loop {
                            let waiter = inner.pop_yielding().await;
                            if inner.wake(waiter) {
                                break;
                            }
                        }
                    }
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    for _ in 0..count {
                        let waiter = inner.pop_spinning();
                        inner.wake_or_pass_on(waiter);
                    }
                });
            }
        }
    }
}

impl Inner {
    /// Hand a permit to a waiter
    ///
    /// Returns false when the waiter was abandoned and the permit still has to
    /// reach another queued waiter.
    #[inline]
    fn wake(&self, waiter: Waiter) -> bool {
        if waiter.send(()).is_ok() {
            return true;
        }

        // The waiter's future was dropped: its queue slot is returned to the count.
        // A still negative count means another waiter is queued and gets the permit.
        let before = self.count.fetch_add(1, Ordering::AcqRel);
        before >= 0
    }

    fn wake_or_pass_on(&self, waiter: Waiter) {
        let mut waiter = waiter;
        while !self.wake(waiter) {
            waiter = self.pop_spinning();
        }
    }

    async fn pop_yielding(&self) -> Waiter {
        loop {
            if let Some(waiter) = self.waiters.pop() {
                return waiter;
            }
            tokio::task::yield_now().await;
        }
    }

    fn pop_spinning(&self) -> Waiter {
        let backoff = Backoff::new();
        loop {
            if let Some(waiter) = self.waiters.pop() {
                return waiter;
            }
            backoff.snooze();
        }
    }
}

enum AcquireState {
    Ready,
    Waiting(oneshot::Receiver<()>),
    Done,
}

/// Pending permit acquisition returned by [`LifoSemaphore::acquire`]
///
/// Resolves once the permit is granted. Dropping an unresolved acquisition
/// gives its permit back, so abandoned waiters never leak capacity.
#[must_use = "an acquired permit must be released"]
pub struct Acquire {
    state: AcquireState,
    semaphore: Option<LifoSemaphore>,
}

impl Acquire {
    /// Whether the permit was granted synchronously
    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, AcquireState::Ready)
    }
}

impl Future for Acquire {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = &mut *self;

        // A closed channel means the semaphore itself is gone, which also ends the wait
        if let AcquireState::Waiting(receiver) = &mut this.state {
            if Pin::new(receiver).poll(cx).is_pending() {
                return Poll::Pending;
            }
        }

        this.state = AcquireState::Done;
        Poll::Ready(())
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        let AcquireState::Waiting(receiver) = &mut self.state else {
            return;
        };

        // Closing first makes any later send fail, so the releaser passes the permit on;
        // a signal that already landed is returned here instead.
        receiver.close();
        if receiver.try_recv().is_ok() {
            if let Some(semaphore) = &self.semaphore {
                semaphore.release();
            }
        }
    }
}
