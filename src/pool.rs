//! Core resource pool implementation

use crate::cancel::CancelToken;
use crate::config::PoolConfig;
use crate::errors::{PoolError, PoolResult};
use crate::metrics::{MetricsExporter, MetricsTracker, PoolMetrics};

use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::select;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

type CreateFn<T, E> = dyn Fn() -> Result<T, E> + Send + Sync;
type DestroyFn<T, E> = dyn Fn(T) -> Result<(), E> + Send + Sync;

/// A resource checked out of a [`Pool`].
///
/// Dereferences to the underlying resource. Give it back with
/// [`Pool::put`], or just drop it and the pool takes it back on its own.
pub struct Pooled<T> {
    value: Option<T>,
    id: usize,
    pool: Weak<dyn ReturnToPool<T>>,
}

impl<T> Pooled<T> {
    fn new(value: T, id: usize, pool: Weak<dyn ReturnToPool<T>>) -> Self {
        Self {
            value: Some(value),
            id,
            pool,
        }
    }

    /// Take the resource out of the pool permanently.
    ///
    /// The pool forgets the resource: its capacity slot is freed for a new
    /// creation and `destroy` will never be called on it.
    pub fn detach(mut self) -> T {
        let value = self.value.take().expect("value already taken");
        if let Some(pool) = self.pool.upgrade() {
            pool.detach_resource(self.id);
        }
        value
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.id)
            .field("value", &self.value)
            .finish()
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.value.as_ref().expect("value already taken")
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.as_mut().expect("value already taken")
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            if let Some(pool) = self.pool.upgrade() {
                pool.return_resource(value, self.id);
            }
        }
    }
}

/// The current pool status.
#[derive(Clone, Copy, Debug)]
pub struct Status {
    /// The capacity ceiling.
    pub max_size: usize,

    /// Resources currently allocated, idle and checked out together.
    pub size: usize,

    /// Resources idle in the pool.
    pub idle: usize,

    /// Resources currently checked out.
    pub active: usize,
}

/// Thread-safe resource pool with lazy creation, cooperative cancellation
/// and orderly shutdown.
///
/// Resources are produced by a caller-supplied `create` callback the first
/// time no idle resource can satisfy a [`get`](Pool::get), up to a
/// configurable ceiling. Callers beyond the ceiling block until a resource
/// is returned and are served in FIFO order. The pool never interprets the
/// resources it manages.
///
/// Cloning the pool is cheap and every clone drives the same shared state.
///
/// # Examples
///
/// ```
/// use respool::{CancelToken, Pool};
///
/// let pool = Pool::<u32, &str>::new(|| Ok(42), |_| Ok(()));
///
/// let res = pool.get(&CancelToken::never()).unwrap();
/// assert_eq!(*res, 42);
/// pool.put(res);
///
/// assert_eq!(pool.size(), 1);
/// ```
pub struct Pool<T: Send, E> {
    core: Arc<PoolCore<T, E>>,
}

impl<T: Send, E> Clone for Pool<T, E> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Send + 'static, E: 'static> Pool<T, E> {
    /// Create a pool with an unbounded ceiling.
    pub fn new<C, D>(create: C, destroy: D) -> Self
    where
        C: Fn() -> Result<T, E> + Send + Sync + 'static,
        D: Fn(T) -> Result<(), E> + Send + Sync + 'static,
    {
        Self::with_config(create, destroy, PoolConfig::default())
    }

    /// Create a pool from a [`PoolConfig`].
    pub fn with_config<C, D>(create: C, destroy: D, config: PoolConfig) -> Self
    where
        C: Fn() -> Result<T, E> + Send + Sync + 'static,
        D: Fn(T) -> Result<(), E> + Send + Sync + 'static,
    {
        Self {
            core: Arc::new(PoolCore {
                create: Box::new(create),
                destroy: Box::new(destroy),
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    total: 0,
                    max_size: config.max_size,
                    closed: false,
                    waiters: VecDeque::new(),
                    next_waiter_id: 0,
                }),
                outstanding: DashMap::new(),
                next_resource_id: AtomicUsize::new(0),
                metrics: MetricsTracker::new(),
            }),
        }
    }

    /// Acquire a resource, blocking until one is available or `cancel`
    /// fires.
    ///
    /// An idle resource is reused when one exists. Otherwise a new one is
    /// created, unless the pool is at its ceiling, in which case the call
    /// parks until a resource is returned. Parked callers are served
    /// oldest first.
    ///
    /// The token is consulted on entry, before a creation starts, and
    /// again once it finishes. A resource whose creation outlives its own
    /// caller's cancellation is kept by the pool, not discarded, so the
    /// capacity slot reserved for it is not lost.
    pub fn get(&self, cancel: &CancelToken) -> PoolResult<Pooled<T>, E> {
        let mut state = self.core.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        let mut reenter_front = false;
        loop {
            if let Some(entry) = state.idle.pop_back() {
                drop(state);
                return Ok(self.checkout(entry));
            }

            if state.total < state.max_size {
                // Reserve the slot before creating so concurrent callers
                // cannot over-allocate past the ceiling.
                state.total += 1;
                drop(state);
                return self.create_resource(cancel);
            }

            let (tx, rx) = bounded(1);
            let waiter_id = state.next_waiter_id;
            state.next_waiter_id += 1;
            let waiter = Waiter { id: waiter_id, tx };
            if reenter_front {
                // A retry wake popped us from the front of the queue; going
                // back to the back would lose our place.
                state.waiters.push_front(waiter);
            } else {
                state.waiters.push_back(waiter);
            }
            drop(state);

            select! {
                recv(rx) -> msg => {
                    match msg {
                        Ok(WaiterMsg::Ready(entry)) => return Ok(self.checkout(entry)),
                        Ok(WaiterMsg::Retry) => {}
                        Err(_) => return Err(PoolError::Closed),
                    }
                }
                recv(cancel.receiver()) -> _ => {
                    return self.cancel_wait(waiter_id, &rx);
                }
            }

            // Woken to retry: a capacity slot was freed or the ceiling was
            // raised. Re-run the admission decision from the top.
            state = self.core.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            if cancel.is_cancelled() {
                // The retry signal must not evaporate with us.
                self.core.wake_one(&mut state);
                return Err(PoolError::Cancelled);
            }
            reenter_front = true;
        }
    }

    /// Acquire an idle resource without blocking.
    ///
    /// Returns `None` when no resource is idle, even if the pool still has
    /// capacity to create one, and when the pool is closed.
    pub fn try_get(&self) -> Option<Pooled<T>> {
        let mut state = self.core.state.lock();
        if state.closed {
            return None;
        }
        let entry = state.idle.pop_back()?;
        drop(state);
        Some(self.checkout(entry))
    }

    /// Acquire a resource from async code.
    ///
    /// Runs the blocking [`get`](Pool::get) on the blocking thread pool so
    /// the async runtime is not stalled while waiting.
    pub async fn get_async(&self, cancel: CancelToken) -> PoolResult<Pooled<T>, E>
    where
        E: Send,
    {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.get(&cancel))
            .await
            .map_err(|_| PoolError::Cancelled)?
    }

    /// Give a checked-out resource back to the pool.
    ///
    /// If a caller is blocked waiting, the resource is handed straight to
    /// the longest-waiting one. Otherwise it parks in the idle queue. On a
    /// closed pool the resource is destroyed instead.
    ///
    /// # Panics
    ///
    /// Panics if `resource` was not checked out from this pool. Accepting
    /// a foreign handle would silently corrupt the pool's accounting, so
    /// it is treated as a programming error rather than a recoverable one.
    pub fn put(&self, mut resource: Pooled<T>) {
        let owned = resource
            .pool
            .upgrade()
            .is_some_and(|pool| std::ptr::addr_eq(Arc::as_ptr(&pool), Arc::as_ptr(&self.core)));
        if !owned {
            panic!("resource is not checked out from this pool");
        }
        let value = resource.value.take().expect("value already taken");
        self.core.return_resource(value, resource.id);
    }

    /// Pre-create up to `count` idle resources, respecting the ceiling.
    ///
    /// Stops at the first creation failure and propagates it; resources
    /// created before the failure stay in the pool.
    pub fn warmup(&self, count: usize) -> PoolResult<(), E> {
        for _ in 0..count {
            {
                let mut state = self.core.state.lock();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                if state.total >= state.max_size {
                    return Ok(());
                }
                state.total += 1;
            }
            match (self.core.create)() {
                Ok(value) => {
                    self.core.metrics.created.fetch_add(1, Ordering::Relaxed);
                    let id = self.core.next_resource_id.fetch_add(1, Ordering::Relaxed);
                    self.core.release(Entry { value, id });
                }
                Err(err) => {
                    let mut state = self.core.state.lock();
                    state.total -= 1;
                    self.core.wake_one(&mut state);
                    return Err(PoolError::Create(err));
                }
            }
        }
        Ok(())
    }

    /// Close the pool. Idempotent.
    ///
    /// Idle resources are destroyed immediately and every blocked `get`
    /// fails with [`PoolError::Closed`], as does every later one.
    /// Checked-out resources are left alone; each is destroyed when its
    /// holder gives it back.
    pub fn close(&self) {
        let (idle, waiters) = {
            let mut state = self.core.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.total -= state.idle.len();
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.waiters),
            )
        };

        // Dropping the senders disconnects every parked waiter, which
        // observes the closure as a failed recv.
        drop(waiters);

        for entry in idle {
            self.core.destroy_resource(entry.value);
        }
    }

    /// Whether [`close`](Pool::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.core.state.lock().closed
    }

    /// Change the capacity ceiling for future admission decisions.
    ///
    /// Raising the ceiling wakes blocked callers that can now create.
    /// Lowering it below the current size evicts nothing; the pool simply
    /// stops admitting new creations until attrition brings the size back
    /// under the ceiling.
    ///
    /// # Panics
    ///
    /// Panics if `max_size` is zero.
    pub fn set_max_size(&self, max_size: usize) {
        assert!(max_size > 0, "pool max size must be positive");
        let mut state = self.core.state.lock();
        let raised = max_size > state.max_size;
        state.max_size = max_size;
        if raised {
            let claimable = max_size
                .saturating_sub(state.total)
                .min(state.waiters.len());
            for _ in 0..claimable {
                self.core.wake_one(&mut state);
            }
        }
    }

    /// Number of resources currently allocated, idle and checked out
    /// together. Point-in-time snapshot, never blocks.
    pub fn size(&self) -> usize {
        self.core.state.lock().total
    }

    /// Number of resources idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.core.state.lock().idle.len()
    }

    /// Number of resources currently checked out.
    pub fn active_count(&self) -> usize {
        self.core.outstanding.len()
    }

    /// Retrieve the current [`Status`] of the pool.
    pub fn status(&self) -> Status {
        let state = self.core.state.lock();
        Status {
            max_size: state.max_size,
            size: state.total,
            idle: state.idle.len(),
            active: self.core.outstanding.len(),
        }
    }

    /// Get a metrics snapshot.
    pub fn metrics(&self) -> PoolMetrics {
        let idle = self.core.state.lock().idle.len();
        self.core.metrics.snapshot(self.core.outstanding.len(), idle)
    }

    /// Export metrics as a string map.
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.metrics().export()
    }

    /// Export metrics in Prometheus format.
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        MetricsExporter::export_prometheus(&self.metrics(), pool_name, tags)
    }

    fn checkout(&self, entry: Entry<T>) -> Pooled<T> {
        self.core.outstanding.insert(entry.id, ());
        self.core.metrics.acquired.fetch_add(1, Ordering::Relaxed);
        let core: Arc<dyn ReturnToPool<T>> = self.core.clone();
        let pool: Weak<dyn ReturnToPool<T>> = Arc::downgrade(&core);
        Pooled::new(entry.value, entry.id, pool)
    }

    /// Run the `create` callback for a slot already reserved in `total`.
    /// No pool lock is held, so a slow creation stalls nobody else.
    fn create_resource(&self, cancel: &CancelToken) -> PoolResult<Pooled<T>, E> {
        match (self.core.create)() {
            Ok(value) => {
                self.core.metrics.created.fetch_add(1, Ordering::Relaxed);
                let id = self.core.next_resource_id.fetch_add(1, Ordering::Relaxed);
                let entry = Entry { value, id };
                if cancel.is_cancelled() {
                    // Straggler: our caller is gone, but the slot was
                    // reserved and the resource exists. Donate it so the
                    // capacity is not lost.
                    self.core.release(entry);
                    return Err(PoolError::Cancelled);
                }
                Ok(self.checkout(entry))
            }
            Err(err) => {
                let mut state = self.core.state.lock();
                state.total -= 1;
                // The freed slot is claimable by a parked caller.
                self.core.wake_one(&mut state);
                Err(PoolError::Create(err))
            }
        }
    }

    /// Resolve a cancellation observed while parked.
    ///
    /// Deregistration races against hand-off and closure: if we are no
    /// longer queued, whatever was committed to our channel must not be
    /// lost. A resource is donated back, a retry signal is forwarded to
    /// the next waiter.
    fn cancel_wait(&self, waiter_id: u64, rx: &Receiver<WaiterMsg<T>>) -> PoolResult<Pooled<T>, E> {
        let mut stray = None;
        {
            let mut state = self.core.state.lock();
            if let Some(pos) = state.waiters.iter().position(|w| w.id == waiter_id) {
                state.waiters.remove(pos);
            } else {
                match rx.try_recv() {
                    Ok(WaiterMsg::Ready(entry)) => {
                        if state.closed {
                            state.total -= 1;
                            stray = Some(entry.value);
                        } else {
                            self.core.hand_off_or_park(&mut state, entry);
                        }
                    }
                    Ok(WaiterMsg::Retry) => self.core.wake_one(&mut state),
                    Err(_) => {}
                }
            }
        }
        if let Some(value) = stray {
            self.core.destroy_resource(value);
        }
        Err(PoolError::Cancelled)
    }
}

struct Entry<T> {
    value: T,
    id: usize,
}

enum WaiterMsg<T> {
    Ready(Entry<T>),
    Retry,
}

struct Waiter<T> {
    id: u64,
    tx: Sender<WaiterMsg<T>>,
}

struct PoolState<T> {
    idle: VecDeque<Entry<T>>,
    total: usize,
    max_size: usize,
    closed: bool,
    waiters: VecDeque<Waiter<T>>,
    next_waiter_id: u64,
}

struct PoolCore<T: Send, E> {
    create: Box<CreateFn<T, E>>,
    destroy: Box<DestroyFn<T, E>>,
    state: Mutex<PoolState<T>>,
    outstanding: DashMap<usize, ()>,
    next_resource_id: AtomicUsize,
    metrics: MetricsTracker,
}

impl<T: Send, E> PoolCore<T, E> {
    /// Give an unowned resource back to the pool: hand it to a waiter,
    /// park it idle, or destroy it if the pool closed in the meantime.
    fn release(&self, entry: Entry<T>) {
        let stray = {
            let mut state = self.state.lock();
            if state.closed {
                state.total -= 1;
                Some(entry)
            } else {
                self.hand_off_or_park(&mut state, entry);
                None
            }
        };
        if let Some(entry) = stray {
            self.destroy_resource(entry.value);
        }
    }

    /// Hand the resource to the longest-waiting parked caller, falling
    /// back to the idle queue when nobody is waiting. Must run under the
    /// state lock.
    fn hand_off_or_park(&self, state: &mut PoolState<T>, entry: Entry<T>) {
        let mut entry = entry;
        loop {
            match state.waiters.pop_front() {
                Some(waiter) => match waiter.tx.send(WaiterMsg::Ready(entry)) {
                    Ok(()) => {
                        self.metrics.handoffs.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    Err(err) => {
                        // The waiter vanished without deregistering; pass
                        // the resource to the next one.
                        entry = match err.into_inner() {
                            WaiterMsg::Ready(entry) => entry,
                            WaiterMsg::Retry => unreachable!("hand-off sent a retry"),
                        };
                    }
                },
                None => {
                    state.idle.push_back(entry);
                    return;
                }
            }
        }
    }

    /// Tell one parked caller that a capacity slot became claimable.
    fn wake_one(&self, state: &mut PoolState<T>) {
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.tx.send(WaiterMsg::Retry).is_ok() {
                return;
            }
        }
    }

    fn destroy_resource(&self, value: T) {
        self.metrics.destroyed.fetch_add(1, Ordering::Relaxed);
        // Nobody is positioned to act on a destroy error; it is counted
        // and otherwise swallowed.
        if (self.destroy)(value).is_err() {
            self.metrics.destroy_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Type-erased return path held by [`Pooled`] handles, so the handle does
/// not need to carry the pool's error type.
trait ReturnToPool<T>: Send + Sync {
    fn return_resource(&self, value: T, id: usize);
    fn detach_resource(&self, id: usize);
}

impl<T: Send + 'static, E: 'static> ReturnToPool<T> for PoolCore<T, E> {
    fn return_resource(&self, value: T, id: usize) {
        if self.outstanding.remove(&id).is_none() {
            panic!("resource is not checked out from this pool");
        }
        self.metrics.released.fetch_add(1, Ordering::Relaxed);
        self.release(Entry { value, id });
    }

    fn detach_resource(&self, id: usize) {
        if self.outstanding.remove(&id).is_none() {
            panic!("resource is not checked out from this pool");
        }
        let mut state = self.state.lock();
        state.total -= 1;
        if !state.closed {
            self.wake_one(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancellation;

    fn counting_pool() -> (Pool<usize, &'static str>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let pool = Pool::new(
            move || Ok(counter.fetch_add(1, Ordering::SeqCst) + 1),
            |_| Ok(()),
        );
        (pool, calls)
    }

    #[test]
    fn round_trip_reuses_resource() {
        let (pool, calls) = counting_pool();
        let token = CancelToken::never();

        let res = pool.get(&token).unwrap();
        assert_eq!(*res, 1);
        pool.put(res);

        let res = pool.get(&token).unwrap();
        assert_eq!(*res, 1);
        pool.put(res);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn try_get_is_idle_only() {
        let (pool, calls) = counting_pool();

        assert!(pool.try_get().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let res = pool.get(&CancelToken::never()).unwrap();
        pool.put(res);
        assert!(pool.try_get().is_some());
    }

    #[test]
    fn deref_mut_gives_mutable_access() {
        let pool = Pool::<Vec<u8>, &str>::new(|| Ok(Vec::new()), |_| Ok(()));
        let mut buf = pool.get(&CancelToken::never()).unwrap();
        buf.push(7);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    #[should_panic(expected = "max size must be positive")]
    fn zero_max_size_is_rejected() {
        let (pool, _) = counting_pool();
        pool.set_max_size(0);
    }

    #[test]
    fn status_reports_counts() {
        let (pool, _) = counting_pool();
        pool.set_max_size(4);

        let held = pool.get(&CancelToken::never()).unwrap();
        let parked = pool.get(&CancelToken::never()).unwrap();
        pool.put(parked);

        let status = pool.status();
        assert_eq!(status.max_size, 4);
        assert_eq!(status.size, 2);
        assert_eq!(status.idle, 1);
        assert_eq!(status.active, 1);

        pool.put(held);
    }

    #[test]
    fn cancelled_token_wins_over_wait() {
        let (pool, _) = counting_pool();
        let (canceller, token) = cancellation();
        canceller.cancel();

        assert_eq!(pool.get(&token).unwrap_err(), PoolError::Cancelled);
    }

    #[tokio::test]
    async fn get_async_round_trip() {
        let (pool, calls) = counting_pool();

        let res = pool.get_async(CancelToken::never()).await.unwrap();
        assert_eq!(*res, 1);
        pool.put(res);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
