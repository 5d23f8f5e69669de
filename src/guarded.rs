//! A dereference-safe, non-owning reference backed by a [`Shield`].
//!
//! `Guarded<T>` is for collaborator algorithms that want to read through a raw hazard-protected
//! pointer directly (a Michael–Scott queue node, say) without paying for reference counting.
//! Validity ends when the `Guarded` drops: the underlying `Shield` releases its slot, and the
//! pointee becomes retireable by anyone holding it.

use core::fmt;
use core::ops::Deref;
use core::ptr::NonNull;

cfg_if::cfg_if! {
    if #[cfg(feature = "check-loom")] {
        use loom::sync::atomic::AtomicPtr;
    } else {
        use core::sync::atomic::AtomicPtr;
    }
}

use crate::hazard::Shield;

/// Pairs a [`Shield`] with a pointer already known to be protected by it.
pub struct Guarded<T> {
    shield: Shield,
    ptr: NonNull<T>,
}

impl<T> Guarded<T> {
    /// Combines an already-protecting `shield` with the pointer it protects.
    ///
    /// # Safety
    ///
    /// `ptr` must be the exact value most recently published into `shield`'s cell (e.g. the
    /// return value of `shield.protect(src)`), so that `ptr` cannot be freed while `shield` is
    /// held.
    pub unsafe fn new(shield: Shield, ptr: NonNull<T>) -> Self {
        Self { shield, ptr }
    }

    /// Convenience constructor: protects `src` through `shield` and wraps the result, if
    /// non-null.
    pub fn protect(shield: Shield, src: &AtomicPtr<T>) -> Option<Self> {
        let raw = shield.protect(src);
        NonNull::new(raw).map(|ptr| Self { shield, ptr })
    }

    /// Borrows the protected value.
    pub fn get(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }

    /// The raw pointer this guard protects.
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Releases the shield early, discarding the guard. Equivalent to `drop(guarded)`, spelled out
    /// for call sites that want the release to read as deliberate.
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for Guarded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T: fmt::Debug> fmt::Debug for Guarded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guarded").field("value", self.get()).finish()
    }
}

// `Shield` wraps a `NonNull<HazardSlot>`, and `HazardSlot` is itself `Send + Sync` (hazard.rs),
// so moving or sharing a `Guarded` across threads is sound independent of `T`'s own auto traits,
// save for `T: Sync` to let `&T` cross threads through `get`/`Deref`.
unsafe impl<T: Sync> Send for Guarded<T> {}
unsafe impl<T: Sync> Sync for Guarded<T> {}
