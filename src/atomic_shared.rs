//! Lock-free atomic slot holding a [`Shared`], coordinating with the hazard domain for safe
//! `load` under concurrent mutation.
//!
//! This is the composition the rest of the crate exists to support: `load`'s correctness rests
//! on two independent mechanisms neither of which is sufficient alone (see the module docs on
//! why in `lib.rs`) — a [`Shield`] makes the *pointer read* safe, and
//! `ControlBlock::inc_ref_if_not_zero` makes the *adoption* of that pointer safe against a
//! concurrent writer that has already logically destroyed it.

use core::marker::PhantomData;
use core::ptr;
use core::ptr::NonNull;

cfg_if::cfg_if! {
    if #[cfg(feature = "check-loom")] {
        use loom::sync::atomic::{AtomicPtr, Ordering};
    } else {
        use core::sync::atomic::{AtomicPtr, Ordering};
    }
}

use crate::control::ControlBlock;
use crate::hazard::{HazardBag, Shield};
use crate::shared::Shared;

#[cfg(not(feature = "check-loom"))]
use crate::HAZARDS;

/// Derives a CAS failure ordering from the caller's requested success ordering, per the crate's
/// fixed rule: `AcqRel -> Acquire`, `Release -> Relaxed`, everything else maps to itself.
fn failure_ordering(success: Ordering) -> Ordering {
    match success {
        Ordering::Release => Ordering::Relaxed,
        Ordering::AcqRel => Ordering::Acquire,
        other => other,
    }
}

/// An atomic, hazard-pointer-protected slot holding an `Option<Shared<T>>`.
///
/// `store`, `exchange`, `load` and the `compare_exchange` family are all lock-free; `load` is the
/// operation that actually exercises the hazard domain, and never blocks on another thread's
/// progress (it either returns a result or observes a writer's CAS step and retries).
pub struct AtomicShared<T> {
    ptr: AtomicPtr<ControlBlock<T>>,
    domain: &'static HazardBag,
    _marker: PhantomData<ControlBlock<T>>,
}

unsafe impl<T: Send + Sync> Send for AtomicShared<T> {}
unsafe impl<T: Send + Sync> Sync for AtomicShared<T> {}

impl<T> AtomicShared<T> {
    /// Creates a slot holding `value`, on the crate's default hazard domain.
    #[cfg(not(feature = "check-loom"))]
    pub fn new(value: T) -> Self {
        Self::new_in(&HAZARDS, value)
    }

    /// Creates a slot holding `value`, reading and writing through `domain`.
    ///
    /// Every [`Shared<T>`] ever `store`d or `compare_exchange`d into this slot must have been
    /// allocated against this same `domain` (`Shared::new_in(domain, ..)`); a debug assertion
    /// checks this on every write.
    pub fn new_in(domain: &'static HazardBag, value: T) -> Self {
        let shared = Shared::new_in(domain, value);
        Self {
            ptr: AtomicPtr::new(shared.into_raw().as_ptr()),
            domain,
            _marker: PhantomData,
        }
    }

    /// Creates an empty slot on the crate's default hazard domain.
    #[cfg(not(feature = "check-loom"))]
    pub fn null() -> Self {
        Self::null_in(&HAZARDS)
    }

    /// Creates an empty slot reading and writing through `domain`.
    pub fn null_in(domain: &'static HazardBag) -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            domain,
            _marker: PhantomData,
        }
    }

    fn check_domain(&self, shared: &Shared<T>) {
        debug_assert!(
            core::ptr::eq(shared.domain(), self.domain),
            "Shared stored into an AtomicShared built against a different hazard domain"
        );
    }

    /// Atomically replaces the held value with `new`, dropping the previous value's strong
    /// reference.
    pub fn store(&self, new: Option<Shared<T>>, order: Ordering) {
        if let Some(shared) = &new {
            self.check_domain(shared);
        }
        let new_ptr = new.map_or(ptr::null_mut(), |s| s.into_raw().as_ptr());
        let old_ptr = self.ptr.swap(new_ptr, order);
        if let Some(old) = NonNull::new(old_ptr) {
            unsafe { ControlBlock::dec_ref(old) };
        }
    }

    /// Atomically replaces the held value with `new`, returning the previous value (ownership of
    /// its strong reference transfers to the caller).
    pub fn exchange(&self, new: Option<Shared<T>>, order: Ordering) -> Option<Shared<T>> {
        if let Some(shared) = &new {
            self.check_domain(shared);
        }
        let new_ptr = new.map_or(ptr::null_mut(), |s| s.into_raw().as_ptr());
        let old_ptr = self.ptr.swap(new_ptr, order);
        NonNull::new(old_ptr).map(|cb| unsafe { Shared::from_raw(cb) })
    }

    /// The critical path: safely reads the current value.
    ///
    /// 1. Acquires a [`Shield`] from this slot's domain.
    /// 2. Publish-and-reloads the control block pointer until stable (`Shield::protect`).
    /// 3. If null, returns `None`.
    /// 4. Tries `inc_ref_if_not_zero`. On success, returns a `Shared`. On failure (the block is
    ///    logically dead — strong already hit zero, but not yet replaced or still hazard-visible)
    ///    retries from step 2: some writer is in the process of replacing it.
    ///
    /// `order` is accepted for symmetry with `store`/`exchange`/`compare_exchange` (and with
    /// `std::sync::atomic`'s own API shape); the happens-before guarantee callers actually rely on
    /// comes from `inc_ref_if_not_zero`'s acquire-on-success, per the crate's fixed memory-order
    /// assignment (see the module docs in `lib.rs`), so no caller-tunable fence is layered on top.
    pub fn load(&self, _order: Ordering) -> Option<Shared<T>> {
        let shield = Shield::new(self.domain);
        loop {
            let raw = shield.protect(&self.ptr);
            let cb = NonNull::new(raw)?;
            if unsafe { cb.as_ref() }.inc_ref_if_not_zero() {
                return Some(unsafe { Shared::from_raw(cb) });
            }
        }
    }

    /// Compares the current value against `current` (by pointer identity) and, if they match,
    /// replaces it with `new`. May fail spuriously even when `current` matches (weak CAS).
    ///
    /// On success, returns the old value (ownership transferred). On failure, `new` is returned
    /// back to the caller untouched, alongside a freshly reloaded `Shared` view (never a
    /// use-after-free opportunity) of whatever the slot currently holds.
    pub fn compare_exchange_weak(
        &self,
        current: Option<&Shared<T>>,
        new: Option<Shared<T>>,
        success: Ordering,
    ) -> Result<Option<Shared<T>>, CompareExchangeError<T>> {
        self.compare_exchange_impl(current, new, success, true)
    }

    /// As [`AtomicShared::compare_exchange_weak`], but never fails spuriously.
    pub fn compare_exchange_strong(
        &self,
        current: Option<&Shared<T>>,
        new: Option<Shared<T>>,
        success: Ordering,
    ) -> Result<Option<Shared<T>>, CompareExchangeError<T>> {
        self.compare_exchange_impl(current, new, success, false)
    }

    fn compare_exchange_impl(
        &self,
        current: Option<&Shared<T>>,
        new: Option<Shared<T>>,
        success: Ordering,
        weak: bool,
    ) -> Result<Option<Shared<T>>, CompareExchangeError<T>> {
        if let Some(shared) = &new {
            self.check_domain(shared);
        }
        let current_ptr = current.map_or(ptr::null_mut(), |s| s.cb.as_ptr());
        let new_ptr = new.as_ref().map_or(ptr::null_mut(), |s| s.cb.as_ptr());
        let failure = failure_ordering(success);

        let result = if weak {
            self.ptr
                .compare_exchange_weak(current_ptr, new_ptr, success, failure)
        } else {
            self.ptr
                .compare_exchange(current_ptr, new_ptr, success, failure)
        };

        match result {
            Ok(old_ptr) => {
                core::mem::forget(new); // ownership moved into the slot
                Ok(NonNull::new(old_ptr).map(|cb| unsafe { Shared::from_raw(cb) }))
            }
            Err(_actual) => Err(CompareExchangeError {
                new,
                current: self.load(failure),
            }),
        }
    }
}

/// `AtomicShared::compare_exchange_{weak,strong}` returns ownership of `new` on failure, along
/// with a freshly (and safely) reloaded view of the slot's current value.
pub struct CompareExchangeError<T> {
    /// The value that was passed as `new`, handed back unchanged.
    pub new: Option<Shared<T>>,
    /// A freshly reloaded, safely reference-counted view of the slot at the time of failure.
    pub current: Option<Shared<T>>,
}

impl<T> Drop for AtomicShared<T> {
    fn drop(&mut self) {
        let p = *self.ptr.get_mut();
        if let Some(cb) = NonNull::new(p) {
            unsafe { ControlBlock::dec_ref(cb) };
        }
    }
}

#[cfg(all(test, not(feature = "check-loom")))]
mod tests {
    use super::*;
    use crate::shared::make_shared;
    use std::sync::atomic::Ordering;

    #[test]
    fn store_then_load_round_trips_identity() {
        let atomic = AtomicShared::new(1u32);
        let original = atomic.load(Ordering::Acquire).unwrap();
        let replacement = make_shared(2u32);
        atomic.store(Some(replacement.clone()), Ordering::Release);
        let loaded = atomic.load(Ordering::Acquire).unwrap();
        assert!(Shared::ptr_eq(&loaded, &replacement));
        assert!(!Shared::ptr_eq(&loaded, &original));
        assert_eq!(*loaded, 2);
    }

    #[test]
    fn compare_exchange_strong_succeeds_on_matching_current() {
        let atomic = AtomicShared::new(10u32);
        let current = atomic.load(Ordering::Acquire).unwrap();
        let desired = make_shared(20u32);
        let old = atomic
            .compare_exchange_strong(Some(&current), Some(desired), Ordering::AcqRel)
            .expect("current matched, CAS must succeed");
        assert!(Shared::ptr_eq(&old.unwrap(), &current));
        assert_eq!(*atomic.load(Ordering::Acquire).unwrap(), 20);
    }

    #[test]
    fn compare_exchange_strong_fails_and_returns_new_and_fresh_current() {
        let atomic = AtomicShared::new(10u32);
        let stale = make_shared(999u32);
        let desired = make_shared(20u32);
        let err = atomic
            .compare_exchange_strong(Some(&stale), Some(desired), Ordering::AcqRel)
            .unwrap_err();
        assert_eq!(*err.new.unwrap(), 20);
        assert_eq!(*err.current.unwrap(), 10);
    }
}
