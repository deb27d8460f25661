//! Bounded pool of expensive, stateful clients.
//!
//! Instances are built eagerly by a factory and parked in an idle list. A
//! counting semaphore tracks how many are idle, so [`ResourcePool::acquire`]
//! suspends (without a timeout) until one is returned. The caller gets a
//! [`Pooled`] guard; dropping it puts the instance back, which covers the
//! success path, early `?` returns, and unwinding alike.
//!
//! A broken instance is returned like any other. There is no health check
//! or eviction.
//!
//! The disposer set with [`ResourcePool::with_disposer`] runs on every
//! instance exactly once: from [`ResourcePool::close`], or, if the pool is
//! abandoned without closing (its owner's future was dropped), when the last
//! handle and guard go away.

use crate::error::PoolError;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

type Disposer<T> = Box<dyn FnMut(T) + Send>;

struct PoolInner<T> {
    idle: Mutex<Vec<T>>,
    available: Semaphore,
    size: usize,
    dispose: Mutex<Option<Disposer<T>>>,
}

impl<T> PoolInner<T> {
    fn dispose_idle(&self) -> usize {
        let drained: Vec<T> = std::mem::take(&mut *self.idle.lock());
        let count = drained.len();
        let mut dispose = self.dispose.lock();
        for item in drained {
            if let Some(ref mut d) = *dispose {
                d(item);
            }
        }
        count
    }
}

impl<T> Drop for PoolInner<T> {
    fn drop(&mut self) {
        let count = self.dispose_idle();
        if count > 0 {
            debug!("Resource pool dropped unclosed, disposed {} instances", count);
        }
    }
}

/// A fixed-size, cloneable handle to a set of reusable instances.
pub struct ResourcePool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("size", &self.inner.size)
            .field("idle", &self.inner.available.available_permits())
            .finish()
    }
}

impl<T: Send + 'static> ResourcePool<T> {
    /// Build `size` instances up front.
    ///
    /// The factory receives the slot number. The first factory error aborts
    /// construction; instances already built are dropped. Sizes beyond
    /// `u32::MAX` cannot be tracked by the semaphore and are rejected.
    pub fn new<E, F>(size: usize, mut factory: F) -> Result<Self, E>
    where
        F: FnMut(usize) -> Result<T, E>,
        E: From<PoolError>,
    {
        if u32::try_from(size).is_err() {
            return Err(PoolError::TooLarge { size }.into());
        }
        let mut idle = Vec::with_capacity(size);
        for slot in 0..size {
            idle.push(factory(slot)?);
        }
        debug!("Resource pool ready with {} instances", size);

        Ok(Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(idle),
                available: Semaphore::new(size),
                size,
                dispose: Mutex::new(None),
            }),
        })
    }

    /// Run `dispose` on each instance when the pool is closed or abandoned.
    pub fn with_disposer<F>(self, dispose: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        *self.inner.dispose.lock() = Some(Box::new(dispose));
        self
    }

    /// Wait until an instance is idle and borrow it.
    ///
    /// Fails only if the pool was closed while waiting.
    pub async fn acquire(&self) -> Result<Pooled<T>, PoolError> {
        let permit = self
            .inner
            .available
            .acquire()
            .await
            .map_err(|_| PoolError::Closed)?;
        // The permit is re-added when the guard hands the instance back.
        permit.forget();

        match self.inner.idle.lock().pop() {
            Some(item) => Ok(Pooled {
                item: Some(item),
                inner: Arc::clone(&self.inner),
            }),
            None => {
                self.inner.available.add_permits(1);
                Err(PoolError::Exhausted)
            }
        }
    }

    /// Number of instances the pool was built with.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Number of instances currently parked.
    pub fn idle(&self) -> usize {
        self.inner.available.available_permits()
    }

    /// Wait for every borrowed instance to come back, then dispose of all of
    /// them. Returns how many instances were disposed.
    ///
    /// Other clones of this pool see [`PoolError::Closed`] afterwards.
    pub async fn close(self) -> Result<usize, PoolError> {
        let size = u32::try_from(self.inner.size)
            .map_err(|_| PoolError::TooLarge { size: self.inner.size })?;
        let all = self
            .inner
            .available
            .acquire_many(size)
            .await
            .map_err(|_| PoolError::Closed)?;
        all.forget();
        self.inner.available.close();

        let count = self.inner.dispose_idle();
        debug!("Resource pool closed, disposed {} instances", count);
        Ok(count)
    }
}

/// A borrowed pool instance. Returned to the pool exactly once, on drop.
pub struct Pooled<T> {
    item: Option<T>,
    inner: Arc<PoolInner<T>>,
}

impl<T> Pooled<T> {
    /// Hand the instance back now instead of at end of scope.
    pub fn release(self) {}
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.item).finish()
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `item` is only taken in `drop`.
        self.item.as_ref().unwrap_or_else(|| unreachable!("pooled item taken before drop"))
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!("pooled item taken before drop"))
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.inner.idle.lock().push(item);
            self.inner.available.add_permits(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_pending, assert_ready_ok, task};

    #[tokio::test]
    async fn builds_size_instances_eagerly() {
        let pool = ResourcePool::new(3, |slot| Ok::<_, PoolError>(slot)).unwrap();
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.idle(), 3);
    }

    #[test]
    fn factory_failure_is_fatal() {
        let result = ResourcePool::new(4, |slot| {
            if slot == 2 {
                Err(PoolError::Exhausted)
            } else {
                Ok(slot)
            }
        });
        assert_eq!(result.unwrap_err(), PoolError::Exhausted);
    }

    #[tokio::test]
    async fn guard_returns_instance_on_drop() {
        let pool = ResourcePool::new(1, |_| Ok::<_, PoolError>(String::from("engine"))).unwrap();
        {
            let mut guard = pool.acquire().await.unwrap();
            guard.push_str("-used");
            assert_eq!(pool.idle(), 0);
        }
        assert_eq!(pool.idle(), 1);
        let guard = pool.acquire().await.unwrap();
        assert_eq!(&*guard, "engine-used");
    }

    #[tokio::test]
    async fn acquire_waits_until_release() {
        let pool = ResourcePool::new(1, |_| Ok::<_, PoolError>(7u32)).unwrap();
        let held = pool.acquire().await.unwrap();

        let mut waiting = task::spawn(pool.acquire());
        assert_pending!(waiting.poll());

        held.release();
        assert!(waiting.is_woken());
        let got = assert_ready_ok!(waiting.poll());
        assert_eq!(*got, 7);
    }

    #[tokio::test]
    async fn guard_is_returned_when_worker_panics() {
        let pool = ResourcePool::new(1, |_| Ok::<_, PoolError>(0u8)).unwrap();
        let p = pool.clone();
        let joined = tokio::spawn(async move {
            let _guard = p.acquire().await.unwrap();
            panic!("worker blew up");
        })
        .await;
        assert!(joined.is_err());
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test]
    async fn close_waits_for_borrowers_and_disposes_all() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disposed);
        let pool = ResourcePool::new(2, |slot| Ok::<_, PoolError>(slot))
            .unwrap()
            .with_disposer(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let borrowed = pool.acquire().await.unwrap();
        let other = pool.clone();

        let closing = tokio::spawn(pool.close());

        tokio::task::yield_now().await;
        assert_eq!(disposed.load(Ordering::SeqCst), 0);

        drop(borrowed);
        let count = closing.await.unwrap().unwrap();
        assert_eq!(count, 2);
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
        assert_eq!(other.acquire().await.unwrap_err(), PoolError::Closed);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn oversized_pool_is_rejected() {
        let result = ResourcePool::new(u32::MAX as usize + 1, |_| Ok::<_, PoolError>(0u8));
        assert!(matches!(result, Err(PoolError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn abandoned_pool_disposes_on_last_drop() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disposed);
        let pool = ResourcePool::new(3, |slot| Ok::<_, PoolError>(slot))
            .unwrap()
            .with_disposer(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let guard = pool.acquire().await.unwrap();
        let clone = pool.clone();

        drop(pool);
        drop(clone);
        assert_eq!(disposed.load(Ordering::SeqCst), 0, "a guard still holds the pool");

        drop(guard);
        assert_eq!(disposed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn closed_pool_does_not_dispose_twice() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disposed);
        let pool = ResourcePool::new(2, |slot| Ok::<_, PoolError>(slot))
            .unwrap()
            .with_disposer(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let other = pool.clone();
        assert_eq!(pool.close().await.unwrap(), 2);
        drop(other);
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pooled_guard_debug_shows_item() {
        let pool = ResourcePool::new(1, |_| Ok::<_, PoolError>(42u32)).unwrap();
        let guard = pool.acquire().await.unwrap();
        assert_eq!(format!("{guard:?}"), "Pooled(Some(42))");
    }
}
