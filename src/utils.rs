use std::sync::{Mutex, MutexGuard, PoisonError};

pub trait MutexUtils<T> {
    /// Lock a mutex and execute a function with its lock.
    /// This makes sure that the mutex is locked only during the function execution.
    ///
    /// A poisoned mutex is recovered: the guarded data never holds half-applied updates.
    fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(MutexGuard<'_, T>) -> R;
}

impl<T> MutexUtils<T> for Mutex<T> {
    fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(MutexGuard<'_, T>) -> R,
    {
        f(self.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
