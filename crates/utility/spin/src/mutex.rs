use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

/// A mutually exclusive lock protecting a value of type `T`.
///
/// The lock is released when the [`MutexLock`] returned by [`Mutex::lock`] goes out of scope,
/// including on early returns.
///
/// # Fairness
///
/// This mutex is *not* fair. This means that there is no guarantee that threads will acquire the
/// lock in the order they requested it.
pub struct Mutex<T> {
    /// The protected value.
    value: UnsafeCell<T>,
    /// the current state of the mutex.
    lock: AtomicBool,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new [`Mutex<T>`] with the given value.
    ///
    /// The mutex is initially unlocked.
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            lock: AtomicBool::new(false),
        }
    }

    /// Returns whether the mutex is currently locked.
    ///
    /// Note that this function can only be used as a hint, as the mutex may change state by the
    /// time this function returns.
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.lock.load(Relaxed)
    }

    /// Locks the mutex and returns a guard that releases the lock when dropped.
    #[inline]
    pub fn lock(&self) -> MutexLock<T> {
        while self
            .lock
            .compare_exchange_weak(false, true, Acquire, Relaxed)
            .is_err()
        {
            // Wait until the lock seems released.
            while self.is_locked() {
                core::hint::spin_loop();
            }
        }

        // SAFETY:
        //  We just acquired the lock, no other guard exists.
        unsafe { MutexLock::new(self) }
    }

    /// Attempts to lock the mutex without spinning.
    ///
    /// Returns [`None`] if the mutex is already locked.
    #[inline]
    pub fn try_lock(&self) -> Option<MutexLock<T>> {
        self.lock
            .compare_exchange(false, true, Acquire, Relaxed)
            .ok()
            // SAFETY:
            //  The exchange succeeded, so we own the lock.
            .map(|_| unsafe { MutexLock::new(self) })
    }

    /// Returns the inner value without locking the mutex.
    ///
    /// This is safe because the mutex must be exclusively borrowed to call this function, which
    /// ensures that no lock exists for it.
    #[inline(always)]
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Consumes the mutex, returning the protected value.
    #[inline(always)]
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Holds a lock on a [`Mutex<T>`], ensuring exclusive access to the protected value.
pub struct MutexLock<'a, T> {
    value: &'a mut T,
    lock: &'a AtomicBool,
}

impl<'a, T> MutexLock<'a, T> {
    /// # Safety
    ///
    /// The caller must have acquired the lock of `mutex`.
    #[inline(always)]
    unsafe fn new(mutex: &'a Mutex<T>) -> Self {
        Self {
            value: unsafe { &mut *mutex.value.get() },
            lock: &mutex.lock,
        }
    }
}

impl<'a, T> Deref for MutexLock<'a, T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.value
    }
}

impl<'a, T> DerefMut for MutexLock<'a, T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value
    }
}

impl<'a, T> Drop for MutexLock<'a, T> {
    #[inline(always)]
    fn drop(&mut self) {
        self.lock.store(false, Release);
    }
}

impl<'a, T: fmt::Debug> fmt::Debug for MutexLock<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
