//! A lock which puts contending threads to sleep.
//!
//! Spin locks from `em_spin` must not be held while the holder blocks. [`SleepLock`] is for the
//! critical sections that do block, such as calls into the file system: contending threads are
//! queued and blocked through [`Threads`] until the holder releases the lock.

use alloc::collections::VecDeque;
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

use em_spin::Mutex;
use ember_sys_common::Pid;

use crate::platform::Threads;

/// The bookkeeping of a [`SleepLock`].
struct State {
    /// The thread holding the lock.
    owner: Option<Pid>,
    /// The threads waiting for the lock, oldest first.
    waiters: VecDeque<Pid>,
}

/// A mutually exclusive lock protecting a value of type `T`, which blocks contending threads.
///
/// The lock is released when the [`SleepLockGuard`] returned by [`SleepLock::lock`] goes out of
/// scope. Waiters are woken up in the order they started waiting, but a thread that did not wait
/// may still take the lock first.
pub struct SleepLock<T> {
    state: Mutex<State>,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SleepLock<T> {}
unsafe impl<T: Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    /// Creates a new unlocked [`SleepLock<T>`].
    pub const fn new(value: T) -> Self {
        Self {
            state: Mutex::new(State {
                owner: None,
                waiters: VecDeque::new(),
            }),
            value: UnsafeCell::new(value),
        }
    }

    /// Returns the thread holding the lock, if any.
    ///
    /// Like [`Mutex::is_locked`], this is only a hint.
    pub fn owner(&self) -> Option<Pid> {
        self.state.lock().owner
    }

    /// Locks the value, blocking the current thread of `threads` until the lock is available.
    ///
    /// # Panics
    ///
    /// This function panics if the current thread already holds the lock.
    pub fn lock<'a, Th: Threads>(&'a self, threads: &'a Th) -> SleepLockGuard<'a, T, Th> {
        let current = threads.current();

        loop {
            {
                let mut state = self.state.lock();
                match state.owner {
                    None => {
                        state.owner = Some(current);
                        break;
                    }
                    Some(owner) if owner == current => {
                        panic!("thread {current} locked a sleep lock it already holds");
                    }
                    Some(_) => {
                        if !state.waiters.contains(&current) {
                            state.waiters.push_back(current);
                        }
                    }
                }
            }
            threads.block_current();
        }

        SleepLockGuard {
            lock: self,
            threads,
            _not_send: PhantomData,
        }
    }

    /// Returns the inner value without locking.
    ///
    /// The exclusive borrow ensures that no guard exists.
    #[inline(always)]
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

impl<T> fmt::Debug for SleepLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SleepLock")
            .field("owner", &self.owner())
            .finish_non_exhaustive()
    }
}

/// Holds a [`SleepLock<T>`]. It must be released by the thread that acquired it.
pub struct SleepLockGuard<'a, T, Th: Threads> {
    lock: &'a SleepLock<T>,
    threads: &'a Th,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T, Th: Threads> Deref for SleepLockGuard<'a, T, Th> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        // SAFETY:
        //  The guard exists, so the current thread owns the lock.
        unsafe { &*self.lock.value.get() }
    }
}

impl<'a, T, Th: Threads> DerefMut for SleepLockGuard<'a, T, Th> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY:
        //  The guard exists and is borrowed mutably, so this is the only reference.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<'a, T, Th: Threads> Drop for SleepLockGuard<'a, T, Th> {
    fn drop(&mut self) {
        let next = {
            let mut state = self.lock.state.lock();
            state.owner = None;
            state.waiters.pop_front()
        };

        if let Some(next) = next {
            self.threads.unblock(next);
        }
    }
}
