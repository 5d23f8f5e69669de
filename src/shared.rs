//! User-facing owning handles around a [`ControlBlock`]: `Shared<T>` (strong) and `Weak<T>`.
//!
//! Value semantics mirror `std::sync::Arc`/`std::sync::Weak` exactly; the only addition is that
//! construction picks a hazard domain (defaulting to the crate's process-wide one), which is what
//! lets an [`crate::AtomicShared<T>`] built from the same domain safely `load` these pointers.

use core::fmt;
use core::ops::Deref;
use core::ptr::NonNull;

use crate::control::ControlBlock;
use crate::hazard::HazardBag;

#[cfg(not(feature = "check-loom"))]
use crate::HAZARDS;

/// An atomically reference-counted, hazard-pointer-aware owning pointer.
///
/// Functionally equivalent to `std::sync::Arc<T>`; the difference surfaces only when a `Shared`
/// is stored in an [`crate::AtomicShared`], whose `load` needs `inc_ref_if_not_zero` (used
/// internally by [`Weak::upgrade`] too) to safely adopt a reference under concurrent mutation.
pub struct Shared<T> {
    pub(crate) cb: NonNull<ControlBlock<T>>,
}

// SAFETY: `Shared<T>` provides shared access to a `T` across threads exactly like `Arc<T>`, and
// requires the same bounds for the same reason.
unsafe impl<T: Send + Sync> Send for Shared<T> {}
unsafe impl<T: Send + Sync> Sync for Shared<T> {}

impl<T> Shared<T> {
    /// Allocates `value` on the crate's default hazard domain.
    #[cfg(not(feature = "check-loom"))]
    pub fn new(value: T) -> Self {
        Self::new_in(&HAZARDS, value)
    }

    /// Allocates `value`, associating the resulting control block with `domain`.
    ///
    /// Only combine this with an [`crate::AtomicShared`] built against the *same* `domain` (see
    /// `AtomicShared::new_in`); mixing domains between a `Shared` and the `AtomicShared` it is
    /// stored into is a programmer error caught by a debug assertion at `store`/`compare_exchange`
    /// time.
    pub fn new_in(domain: &'static HazardBag, value: T) -> Self {
        Self {
            cb: ControlBlock::allocate(domain, value),
        }
    }

    /// Constructs a `Shared` from a control block pointer that already carries one strong
    /// reference (i.e. ownership of that reference transfers to the returned `Shared`).
    ///
    /// # Safety
    ///
    /// `cb` must point at a live `ControlBlock<T>` and the caller must be relinquishing exactly
    /// one strong reference to it.
    pub(crate) unsafe fn from_raw(cb: NonNull<ControlBlock<T>>) -> Self {
        Self { cb }
    }

    /// Decomposes `this` into its raw control block pointer without releasing its strong
    /// reference; the reference is now owned by whoever holds the returned pointer.
    pub(crate) fn into_raw(self) -> NonNull<ControlBlock<T>> {
        let cb = self.cb;
        core::mem::forget(self);
        cb
    }

    pub(crate) fn domain(&self) -> &'static HazardBag {
        unsafe { self.cb.as_ref() }.domain()
    }

    /// Whether two `Shared`s point at the same control block (identity, not value equality).
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.cb == other.cb
    }

    /// Number of outstanding [`Shared`] handles, including `this`.
    pub fn strong_count(this: &Self) -> usize {
        unsafe { this.cb.as_ref() }.strong_count()
    }

    /// Number of outstanding [`Weak`] handles, not counting the strong collective's own.
    pub fn weak_count(this: &Self) -> usize {
        unsafe { this.cb.as_ref() }.weak_count()
    }

    /// Creates a [`Weak`] pointer to the same value.
    pub fn downgrade(this: &Self) -> Weak<T> {
        unsafe { this.cb.as_ref() }.inc_weak();
        Weak { cb: this.cb }
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        unsafe { self.cb.as_ref() }.inc_ref();
        Self { cb: self.cb }
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.cb.as_ref().data_ptr() }
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        unsafe { ControlBlock::dec_ref(self.cb) };
    }
}

/// A non-owning pointer that does not keep `T` alive, but can attempt to upgrade to a [`Shared`].
pub struct Weak<T> {
    pub(crate) cb: NonNull<ControlBlock<T>>,
}

unsafe impl<T: Send + Sync> Send for Weak<T> {}
unsafe impl<T: Send + Sync> Sync for Weak<T> {}

impl<T> Weak<T> {
    /// Attempts to upgrade to a [`Shared`], succeeding iff the value has not yet been dropped.
    ///
    /// This is the only safe way to adopt a reference from an unknown (possibly already-dead)
    /// pointer source: it is `ControlBlock::inc_ref_if_not_zero` at the API boundary.
    pub fn upgrade(&self) -> Option<Shared<T>> {
        if unsafe { self.cb.as_ref() }.inc_ref_if_not_zero() {
            Some(Shared { cb: self.cb })
        } else {
            None
        }
    }
}

impl<T> Clone for Weak<T> {
    fn clone(&self) -> Self {
        unsafe { self.cb.as_ref() }.inc_weak();
        Self { cb: self.cb }
    }
}

impl<T> Drop for Weak<T> {
    fn drop(&mut self) {
        unsafe { ControlBlock::dec_weak(self.cb) };
    }
}

/// Allocates `value` on the heap and returns a [`Shared`] to it, on the crate's default domain.
#[cfg(not(feature = "check-loom"))]
pub fn make_shared<T>(value: T) -> Shared<T> {
    Shared::new(value)
}

/// As [`make_shared`], but against an explicit (non-default) hazard domain.
pub fn make_shared_in<T>(domain: &'static HazardBag, value: T) -> Shared<T> {
    Shared::new_in(domain, value)
}

#[cfg(all(test, not(feature = "check-loom")))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct DropCounter(Arc<AtomicUsize>);
    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn drops_payload_exactly_once_when_last_strong_goes_away() {
        let count = Arc::new(AtomicUsize::new(0));
        let a = make_shared(DropCounter(count.clone()));
        let b = a.clone();
        assert_eq!(Shared::strong_count(&a), 2);
        drop(a);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn weak_upgrade_succeeds_while_strong_alive_and_fails_after() {
        let shared = make_shared(5usize);
        let weak = Shared::downgrade(&shared);
        assert_eq!(*weak.upgrade().unwrap(), 5);
        drop(shared);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn ptr_eq_identifies_shared_clones() {
        let a = make_shared(1u32);
        let b = a.clone();
        let c = make_shared(1u32);
        assert!(Shared::ptr_eq(&a, &b));
        assert!(!Shared::ptr_eq(&a, &c));
    }
}
