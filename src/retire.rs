use core::marker::PhantomData;

cfg_if::cfg_if! {
    if #[cfg(feature = "check-loom")] {
        use loom::sync::atomic::{fence, Ordering};
    } else {
        use core::sync::atomic::{fence, Ordering};
    }
}

use super::HazardBag;
#[cfg(not(feature = "check-loom"))]
use super::HAZARDS;

#[cfg(not(feature = "check-loom"))]
use std::cell::RefCell;

type Retired = (*mut (), unsafe fn(*mut ()));

/// Thread-local list of retired pointers.
#[derive(Debug)]
pub struct RetiredSet<'s> {
    hazards: &'s HazardBag,
    /// The first element of the pair is the machine representation of the pointer and the second
    /// is the function pointer to `free::<T>` where `T` is the type of the object.
    inner: Vec<Retired>,
    _marker: PhantomData<*const ()>, // !Send + !Sync
}

impl<'s> RetiredSet<'s> {
    /// The default max length of a retired pointer list, used by domains built with
    /// [`crate::Config::default`]. A domain built with an explicit [`crate::Config::scan_threshold`]
    /// overrides this via [`HazardBag::scan_threshold`].
    const THRESHOLD: usize = crate::config::Config::DEFAULT_SCAN_THRESHOLD;

    /// Create a new retired pointer list protected by the given `HazardBag`.
    pub fn new(hazards: &'s HazardBag) -> Self {
        Self {
            hazards,
            inner: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Retires a pointer.
    ///
    /// # Safety
    ///
    /// * `pointer` must be removed from shared memory before calling this function, and must be
    ///   valid.
    /// * The same `pointer` should only be retired once.
    ///
    /// # Note
    ///
    /// `T: Send` is not required because the retired pointers are not sent to other threads.
    pub unsafe fn retire<T>(&mut self, pointer: *mut T) {
        /// Frees a pointer. This function is defined here instead of `collect()` as we know about
        /// the type of `pointer` only at the time of retiring it.
        ///
        /// # Safety
        ///
        /// * Subsumes the safety requirements of [`Box::from_raw`]. In particular, one must have
        ///   unique ownership to `data`.
        ///
        /// [`Box::from_raw`]: https://doc.rust-lang.org/std/boxed/struct.Box.html#method.from_raw
        unsafe fn free<T>(data: *mut ()) {
            drop(unsafe { Box::from_raw(data.cast::<T>()) })
        }
        self.inner.push((pointer.cast(), free::<T>));
        let threshold = self.hazards.scan_threshold();
        if self.inner.len() >= threshold {
            tracing::trace!(threshold, "retired list threshold crossed");
            self.collect();
        }
    }

    /// Free the pointers that are `retire`d by the current thread and not `protect`ed by any other
    /// threads.
    pub fn collect(&mut self) {
        // Matches the release in `Shield::set`: without this, a hazard pointer published just
        // before this scan could be missed and its pointee freed out from under the reader.
        fence(Ordering::Acquire);
        let hazerd_ptrs = self.hazards.all_hazards();
        let mut can_free = Vec::new();
        self.inner.retain(|(ptr, deleter)| {
            if hazerd_ptrs.contains(ptr) {
                true
            } else {
                can_free.push((*ptr, *deleter));
                false
            }
        });
        tracing::trace!(
            scanned = self.inner.len() + can_free.len(),
            freed = can_free.len(),
            "retired list scan"
        );
        for (ptr, deleter) in can_free {
            unsafe { deleter(ptr) };
        }
    }
}

#[cfg(not(feature = "check-loom"))]
impl Default for RetiredSet<'static> {
    fn default() -> Self {
        Self::new(&HAZARDS)
    }
}

#[cfg(not(feature = "check-loom"))]
thread_local! {
    /// Per-thread cache of `RetiredSet`s, one per distinct domain this thread has ever retired
    /// against. A linear scan is intentional: in practice a thread touches one domain (the
    /// default) or, rarely, a handful of private domains, so a `Vec` beats a `HashMap` on both
    /// allocation and lookup cost for the realistic sizes involved.
    static RETIRED_BY_DOMAIN: RefCell<Vec<(*const HazardBag, RetiredSet<'static>)>> =
        RefCell::new(Vec::new());
}

/// Retires `ptr` against `domain`'s current-thread retired list, creating that list on first use.
///
/// This is how [`crate::control::ControlBlock`] reclaims its own allocation: every control block
/// remembers the domain it was created against, so a reader's [`crate::hazard::Shield::protect`]
/// on that domain is honoured no matter which `Shared`/`AtomicShared` happens to drop the last
/// reference.
///
/// # Safety
///
/// Same contract as [`RetiredSet::retire`]: `ptr` must already be unreachable from shared memory
/// and must be retired at most once.
#[cfg(not(feature = "check-loom"))]
pub(crate) unsafe fn retire_on<T>(domain: &'static HazardBag, ptr: *mut T) {
    RETIRED_BY_DOMAIN.with(|cell| {
        let mut sets = cell.borrow_mut();
        let idx = match sets
            .iter()
            .position(|(d, _)| core::ptr::eq(*d, domain as *const HazardBag))
        {
            Some(idx) => idx,
            None => {
                sets.push((domain as *const HazardBag, RetiredSet::new(domain)));
                sets.len() - 1
            }
        };
        unsafe { sets[idx].1.retire(ptr) };
    });
}

/// Loom builds skip the multi-domain retired-list cache (see the note on `RetiredSet`'s own
/// `Drop` impl above: `thread_local!` + loom's model iterations don't mix) and free the control
/// block's allocation directly instead. This does not model the production reclamation path, but
/// loom coverage for this crate targets the CAS races in `control`/`atomic_shared`, not the
/// retired-list bookkeeping already covered by `retire.rs`'s own non-loom tests.
#[cfg(feature = "check-loom")]
pub(crate) unsafe fn retire_on<T>(_domain: &'static HazardBag, ptr: *mut T) {
    drop(unsafe { Box::from_raw(ptr) });
}

// this triggers loom internal bug
#[cfg(not(feature = "check-loom"))]
impl Drop for RetiredSet<'_> {
    fn drop(&mut self) {
        // In a production-quality implementation of hazard pointers, the remaining local retired
        // pointers will be moved to a global list of retired pointers, which are then reclaimed by
        // the other threads. For pedagogical purposes, here we simply wait for all retired pointers
        // are no longer protected.
        while !self.inner.is_empty() {
            self.collect();
        }
    }
}

#[cfg(all(test, not(feature = "check-loom")))]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::rc::Rc;

    use super::{HazardBag, RetiredSet};

    // retire `THRESHOLD` pointers to trigger collection
    #[test]
    fn retire_threshold_collect() {
        struct Tester(Rc<RefCell<HashSet<usize>>>, usize);
        impl Drop for Tester {
            fn drop(&mut self) {
                let _ = self.0.borrow_mut().insert(self.1);
            }
        }
        let hazards = HazardBag::new();
        let mut retires = RetiredSet::new(&hazards);
        let freed = Rc::new(RefCell::new(HashSet::new()));
        for i in 0..RetiredSet::THRESHOLD {
            unsafe { retires.retire(Box::leak(Box::new(Tester(freed.clone(), i)))) };
        }
        let freed = Rc::try_unwrap(freed).unwrap().into_inner();

        assert_eq!(freed, (0..RetiredSet::THRESHOLD).collect())
    }
}
