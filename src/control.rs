//! Split strong/weak reference-counting control block shared by [`crate::Shared`],
//! [`crate::Weak`] and [`crate::AtomicShared`].
//!
//! Layout and counter discipline follow `std::sync::Arc`'s `ArcInner` closely; the one addition
//! is `domain`, which remembers which [`HazardBag`] this block's memory must be retired through.
//! That is what lets [`crate::AtomicShared::load`] safely adopt a block it only just finished
//! hazard-protecting: the block is never freed by a direct `Box::from_raw`, only ever retired.

use core::cell::UnsafeCell;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;

cfg_if::cfg_if! {
    if #[cfg(feature = "check-loom")] {
        use loom::sync::atomic::{AtomicUsize, Ordering, fence};
    } else {
        use core::sync::atomic::{AtomicUsize, Ordering, fence};
    }
}

use crate::hazard::HazardBag;
use crate::retire;

/// The out-of-line record backing every [`crate::Shared`]/[`crate::Weak`].
///
/// Strong count reaching zero destroys `data` in place; weak count reaching zero (which only
/// happens once strong has already reached zero, since the "strong collective" holds one
/// conceptual weak reference) retires the block's own allocation.
pub(crate) struct ControlBlock<T> {
    strong: AtomicUsize,
    weak: AtomicUsize,
    domain: &'static HazardBag,
    data: ManuallyDrop<UnsafeCell<T>>,
}

// SAFETY: a `ControlBlock<T>` is only ever reached through `NonNull` pointers shared across
// threads by `Shared`/`Weak`/`AtomicShared`; `T: Send + Sync` is exactly the bound those types
// themselves require to be `Send`/`Sync`.
unsafe impl<T: Send + Sync> Send for ControlBlock<T> {}
unsafe impl<T: Send + Sync> Sync for ControlBlock<T> {}

impl<T> ControlBlock<T> {
    /// Allocates a new block with one strong and one weak (the strong collective's) reference.
    pub(crate) fn allocate(domain: &'static HazardBag, value: T) -> NonNull<Self> {
        let block = Box::new(Self {
            strong: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
            domain,
            data: ManuallyDrop::new(UnsafeCell::new(value)),
        });
        NonNull::from(Box::leak(block))
    }

    pub(crate) fn domain(&self) -> &'static HazardBag {
        self.domain
    }

    /// Raw pointer to the payload. Valid to dereference as long as the strong count has not yet
    /// dropped to zero.
    pub(crate) fn data_ptr(&self) -> *mut T {
        self.data.get()
    }

    pub(crate) fn strong_count(&self) -> usize {
        self.strong.load(Ordering::Acquire)
    }

    /// Weak references visible to users, excluding the strong collective's own reference.
    pub(crate) fn weak_count(&self) -> usize {
        let weak = self.weak.load(Ordering::Acquire);
        if self.strong_count() > 0 { weak - 1 } else { weak }
    }

    /// Adds one strong reference. Caller must already hold a strong reference (i.e. this is a
    /// `Shared::clone`, never an "adopt an unknown pointer" path — that is
    /// [`ControlBlock::inc_ref_if_not_zero`]).
    pub(crate) fn inc_ref(&self) {
        let prev = self.strong.fetch_add(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "inc_ref on a control block with no strong references");
    }

    /// The critical primitive for lock-free readers: atomically "strong++ unless strong == 0".
    pub(crate) fn inc_ref_if_not_zero(&self) -> bool {
        let mut current = self.strong.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            match self.strong.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn inc_weak(&self) {
        self.weak.fetch_add(1, Ordering::Relaxed);
    }

    /// Releases one strong reference. On the transition to zero, destroys the payload in place
    /// and releases the strong collective's weak reference.
    ///
    /// # Safety
    ///
    /// `this` must be a block this caller holds a strong reference to, and this function must be
    /// called at most once per reference (i.e. it consumes the reference).
    pub(crate) unsafe fn dec_ref(this: NonNull<Self>) {
        let cb = unsafe { this.as_ref() };
        if cb.strong.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            tracing::trace!("control block strong count reached zero");
            unsafe { core::ptr::drop_in_place(cb.data_ptr()) };
            unsafe { Self::dec_weak(this) };
        }
    }

    /// Releases one weak reference (this includes the strong collective's reference, released
    /// from within [`ControlBlock::dec_ref`]). On the transition to zero, retires the block's own
    /// allocation through the domain it was created against.
    ///
    /// # Safety
    ///
    /// Same contract as [`ControlBlock::dec_ref`], applied to the weak count.
    pub(crate) unsafe fn dec_weak(this: NonNull<Self>) {
        let cb = unsafe { this.as_ref() };
        if cb.weak.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            tracing::trace!("control block weak count reached zero, retiring block");
            let domain = cb.domain;
            unsafe { retire::retire_on(domain, this.as_ptr()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HazardBag;

    #[test]
    fn inc_if_not_zero_fails_after_strong_reaches_zero() {
        static DOMAIN: HazardBag = HazardBag::new();
        let cb = ControlBlock::allocate(&DOMAIN, 7u32);
        unsafe { ControlBlock::dec_ref(cb) }; // strong 1 -> 0, payload dropped, block retired
        // Below the retire threshold, the block is merely retired, not yet freed, so reading
        // `strong` here is not a use-after-free; it is exactly the window hazard pointers exist
        // to make observable and safe.
        assert!(!unsafe { cb.as_ref() }.inc_ref_if_not_zero());
    }

    #[test]
    fn strong_and_weak_count_after_clone_and_downgrade() {
        static DOMAIN: HazardBag = HazardBag::new();
        let cb = ControlBlock::allocate(&DOMAIN, 42u32);
        let r = unsafe { cb.as_ref() };
        assert_eq!(r.strong_count(), 1);
        assert_eq!(r.weak_count(), 0);
        r.inc_ref();
        assert_eq!(r.strong_count(), 2);
        r.inc_weak();
        assert_eq!(r.weak_count(), 1);
        unsafe {
            ControlBlock::dec_weak(cb);
            ControlBlock::dec_ref(cb);
            ControlBlock::dec_ref(cb);
        }
    }
}
