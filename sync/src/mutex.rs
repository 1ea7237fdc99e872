use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// Hook invoked around a lock acquisition/release, letting different lock
/// flavors add behavior (e.g. masking interrupts) without duplicating the
/// spin loop itself.
pub trait MutexSupport {
    type GuardData;
    fn before_lock() -> Self::GuardData;
    fn after_unlock(_: &mut Self::GuardData);
}

/// Plain spinlock: no extra bookkeeping around the critical section.
pub struct Spin;

impl MutexSupport for Spin {
    type GuardData = ();
    #[inline(always)]
    fn before_lock() -> Self::GuardData {}
    #[inline(always)]
    fn after_unlock(_: &mut Self::GuardData) {}
}

/// Spinlock intended for data a wakeup path (e.g. a pipe's wait queue) can
/// touch from interrupt context. On real hardware this flavor would also
/// mask interrupts for the critical section's duration; this workspace has
/// no interrupt controller of its own (that lives in the arch/driver layers
/// this spec treats as an external collaborator), so the guard is currently
/// a no-op placeholder kept for call-site compatibility with the teacher's
/// two-lock-flavor convention.
pub struct SpinNoIrq;

impl MutexSupport for SpinNoIrq {
    type GuardData = ();
    #[inline(always)]
    fn before_lock() -> Self::GuardData {}
    #[inline(always)]
    fn after_unlock(_: &mut Self::GuardData) {}
}

pub struct SpinMutex<T: ?Sized, S: MutexSupport> {
    lock: AtomicBool,
    _marker: core::marker::PhantomData<S>,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send, S: MutexSupport> Sync for SpinMutex<T, S> {}
unsafe impl<T: ?Sized + Send, S: MutexSupport> Send for SpinMutex<T, S> {}

pub struct SpinMutexGuard<'a, T: ?Sized + 'a, S: MutexSupport> {
    mutex: &'a SpinMutex<T, S>,
    support_guard: S::GuardData,
}

impl<T, S: MutexSupport> SpinMutex<T, S> {
    pub const fn new(data: T) -> Self {
        SpinMutex {
            lock: AtomicBool::new(false),
            _marker: core::marker::PhantomData,
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized, S: MutexSupport> SpinMutex<T, S> {
    pub fn lock(&self) -> SpinMutexGuard<T, S> {
        let mut support_guard = S::before_lock();
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.lock.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
        // before_lock already ran; nothing further to stash per attempt.
        let _ = &mut support_guard;
        SpinMutexGuard {
            mutex: self,
            support_guard,
        }
    }

    pub fn try_lock(&self) -> Option<SpinMutexGuard<T, S>> {
        let mut support_guard = S::before_lock();
        if self
            .lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinMutexGuard {
                mutex: self,
                support_guard,
            })
        } else {
            S::after_unlock(&mut support_guard);
            None
        }
    }

    /// # Safety
    /// Caller must guarantee no other reference (locked or not) is alive.
    pub unsafe fn force_unlock(&self) {
        self.lock.store(false, Ordering::Release);
    }
}

impl<'a, T: ?Sized, S: MutexSupport> Deref for SpinMutexGuard<'a, T, S> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T: ?Sized, S: MutexSupport> DerefMut for SpinMutexGuard<'a, T, S> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T: ?Sized, S: MutexSupport> Drop for SpinMutexGuard<'a, T, S> {
    fn drop(&mut self) {
        self.mutex.lock.store(false, Ordering::Release);
        S::after_unlock(&mut self.support_guard);
    }
}

/// Spinlock used where nothing outside normal task context ever touches the
/// data.
pub type SpinLock<T> = SpinMutex<T, Spin>;
/// Spinlock used where a wakeup path reachable from the timer interrupt may
/// also take the lock (pipe state, refcounts, the VFS registry).
pub type SpinNoIrqLock<T> = SpinMutex<T, SpinNoIrq>;

#[cfg(test)]
mod tests {
    extern crate std;

    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn excludes_concurrent_increments() {
        let counter: Arc<SpinLock<usize>> = Arc::new(SpinLock::new(0));
        let mut handles = std::vec::Vec::new();
        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *counter.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 8000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let m = SpinLock::new(42);
        let guard = m.lock();
        assert!(m.try_lock().is_none());
        drop(guard);
        assert!(m.try_lock().is_some());
    }
}
