//! A small explicit reactive graph.
//!
//! A [`Cell`] holds a value and notifies subscribers synchronously when it changes.
//! Derived cells ([`Cell::map`], [`Cell::combine`]) recompute from their inputs and
//! only notify when the derived value actually changes.
//!
//! Each cell owns a dispatch queue. A value staged while the cell is already
//! dispatching is delivered after the current pass completes, so subscribers always
//! observe values in the order they were set and never see passes interleave.
//! [`Cell::stage`] and [`Cell::flush`] are split so that an owner can update several
//! cells while holding its own lock and deliver notifications after releasing it.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

const UPDATE_CHANNEL_CAPACITY: usize = 64;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct Cell<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    value: RwLock<T>,
    subscribers: Mutex<Vec<(u64, Callback<T>)>>,
    next_id: AtomicU64,
    dispatch: Mutex<Dispatch<T>>,
    sender: broadcast::Sender<T>,
    /// Subscriptions to inputs, plus the inputs themselves, for derived cells.
    upstream: Mutex<Vec<Box<dyn Any + Send + Sync>>>,
}

struct Dispatch<T> {
    running: bool,
    pending: VecDeque<T>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(value: T) -> Self {
        let (sender, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                value: RwLock::new(value),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                dispatch: Mutex::new(Dispatch {
                    running: false,
                    pending: VecDeque::new(),
                }),
                sender,
                upstream: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.inner
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.inner.value.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn set(&self, value: T) {
        self.stage(value);
        self.flush();
    }

    /// Replace the value without notifying. Call [`Cell::flush`] to deliver.
    pub fn stage(&self, value: T) {
        *self
            .inner
            .value
            .write()
            .unwrap_or_else(PoisonError::into_inner) = value.clone();
        lock(&self.inner.dispatch).pending.push_back(value);
    }

    /// Deliver staged values to subscribers, in order.
    ///
    /// Returns immediately if this cell is already dispatching; the running pass
    /// picks up anything staged meanwhile.
    pub fn flush(&self) {
        {
            let mut dispatch = lock(&self.inner.dispatch);
            if dispatch.running {
                return;
            }
            dispatch.running = true;
        }

        loop {
            let next = {
                let mut dispatch = lock(&self.inner.dispatch);
                match dispatch.pending.pop_front() {
                    Some(value) => value,
                    None => {
                        dispatch.running = false;
                        return;
                    }
                }
            };

            let callbacks: Vec<Callback<T>> = lock(&self.inner.subscribers)
                .iter()
                .map(|(_, callback)| callback.clone())
                .collect();
            for callback in callbacks {
                callback(&next);
            }
            // No receivers is fine.
            let _ = self.inner.sender.send(next);
        }
    }

    /// Mutate in place and notify.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let value = {
            let mut guard = self
                .inner
                .value
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            f(&mut guard);
            guard.clone()
        };
        lock(&self.inner.dispatch).pending.push_back(value);
        self.flush();
    }

    /// Set and notify only if `value` differs from the current value.
    pub fn set_if_changed(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        if self.with(|current| *current == value) {
            return false;
        }
        self.set(value);
        true
    }

    /// Register `f` to run after every change. Dropping the returned guard unsubscribes.
    pub fn subscribe(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.subscribers).push((id, Arc::new(f)));

        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner.subscribers).retain(|(sub_id, _)| *sub_id != id);
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// A cell holding `f(self)`, recomputed whenever `self` changes.
    pub fn map<U, F>(&self, f: F) -> Cell<U>
    where
        U: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let target = Cell::new(self.with(&f));
        let weak = Arc::downgrade(&target.inner);
        let subscription = self.subscribe(move |value| {
            if let Some(inner) = weak.upgrade() {
                Cell { inner }.set_if_changed(f(value));
            }
        });
        target.attach((subscription, self.clone()));
        target
    }

    /// A cell holding `f(a, b)`, recomputed whenever either input changes.
    pub fn combine<U, V, F>(a: &Cell<T>, b: &Cell<U>, f: F) -> Cell<V>
    where
        U: Clone + Send + Sync + 'static,
        V: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T, &U) -> V + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let target = Cell::new(a.with(|x| b.with(|y| f(x, y))));

        let weak = Arc::downgrade(&target.inner);
        let other = b.clone();
        let compute = f.clone();
        let from_a = a.subscribe(move |x| {
            if let Some(inner) = weak.upgrade() {
                Cell { inner }.set_if_changed(other.with(|y| compute(x, y)));
            }
        });

        let weak = Arc::downgrade(&target.inner);
        let other = a.clone();
        let from_b = b.subscribe(move |y| {
            if let Some(inner) = weak.upgrade() {
                Cell { inner }.set_if_changed(other.with(|x| f(x, y)));
            }
        });

        target.attach((from_a, a.clone()));
        target.attach((from_b, b.clone()));
        target
    }

    /// Every value set from now on, as an async stream.
    ///
    /// Slow consumers that fall behind the channel capacity skip the values they missed.
    pub fn updates(&self) -> impl Stream<Item = T> + Send + 'static {
        BroadcastStream::new(self.inner.sender.subscribe()).filter_map(|result| result.ok())
    }

    /// Keep `resource` alive for as long as this cell is.
    pub fn attach(&self, resource: impl Any + Send + Sync) {
        lock(&self.inner.upstream).push(Box::new(resource));
    }

    pub fn ptr_eq(&self, other: &Cell<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Cell<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Cell::new(T::default())
    }
}

impl<T> fmt::Debug for Cell<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.value.read() {
            Ok(value) => f.debug_tuple("Cell").field(&*value).finish(),
            Err(_) => f.write_str("Cell(<poisoned>)"),
        }
    }
}

/// Guard for a registration on a [`Cell`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |v: &T| sink.lock().unwrap().push(v.clone()))
    }

    #[test]
    fn test_set_notifies_subscribers() {
        let cell = Cell::new(1);
        let (log, sink) = recorder();
        let _sub = cell.subscribe(sink);

        cell.set(2);
        cell.update(|v| *v += 1);

        assert_eq!(cell.get(), 3);
        assert_eq!(*log.lock().unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let cell = Cell::new(0);
        let (log, sink) = recorder();
        let sub = cell.subscribe(sink);
        assert_eq!(cell.subscriber_count(), 1);

        drop(sub);
        cell.set(5);

        assert_eq!(cell.subscriber_count(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_set_during_dispatch_is_queued() {
        let cell = Cell::new(0);
        let writer = cell.clone();
        let _first = cell.subscribe(move |v| {
            if *v == 1 {
                writer.set(2);
            }
        });
        let (log, sink) = recorder();
        let _second = cell.subscribe(sink);

        cell.set(1);

        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
        assert_eq!(cell.get(), 2);
    }

    #[test]
    fn test_stage_then_flush() {
        let cell = Cell::new("a".to_string());
        let (log, sink) = recorder();
        let _sub = cell.subscribe(sink);

        cell.stage("b".to_string());
        assert_eq!(cell.get(), "b");
        assert!(log.lock().unwrap().is_empty());

        cell.flush();
        assert_eq!(*log.lock().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_map_only_notifies_on_change() {
        let source = Cell::new(3);
        let parity = source.map(|v| v % 2 == 0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _sub = parity.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        source.set(5);
        assert!(!parity.get());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        source.set(6);
        assert!(parity.get());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_derived_cell_keeps_inputs_alive() {
        let source = Cell::new(1);
        let out = {
            let mid = source.map(|v| v + 1);
            mid.map(|v| v * 10)
        };

        source.set(4);
        assert_eq!(out.get(), 50);
    }

    #[test]
    fn test_dropping_derived_cell_unsubscribes_from_source() {
        let source = Cell::new(1);
        let derived = source.map(|v| v + 1);
        assert_eq!(source.subscriber_count(), 1);
        drop(derived);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn test_combine() {
        let a = Cell::new(2);
        let b = Cell::new("x".to_string());
        let both = Cell::combine(&a, &b, |n, s| s.repeat(*n as usize));
        assert_eq!(both.get(), "xx");

        a.set(3);
        assert_eq!(both.get(), "xxx");
        b.set("y".to_string());
        assert_eq!(both.get(), "yyy");
    }

    #[tokio::test]
    async fn test_updates_stream() {
        let cell = Cell::new(0);
        let mut updates = Box::pin(cell.updates());

        cell.set(1);
        cell.set(2);

        let first = tokio::time::timeout(Duration::from_secs(1), updates.next()).await;
        let second = tokio::time::timeout(Duration::from_secs(1), updates.next()).await;
        assert_eq!(first.unwrap(), Some(1));
        assert_eq!(second.unwrap(), Some(2));
    }
}
