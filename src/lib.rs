//! Hazard-pointer based safe memory reclamation, with cooperating reference-counted and atomic
//! smart pointers.
//!
//! The crate solves the fundamental problem of lock-free programming: a reader loads a pointer
//! to a node, and must be able to safely dereference it even though some other thread may be
//! trying to free that same node. Two mechanisms cooperate to make this safe:
//!
//! - A **hazard domain** ([`HazardBag`]) lets reader threads publish the pointers they intend to
//!   dereference ([`Shield`]/[`HazardPointer`]) and lets writer threads defer deletion
//!   ([`retire`]) until no reader still holds one.
//! - A **control block** ([`Shared`]/[`Weak`]) gives lock-free readers the
//!   `increment-if-not-zero` primitive needed to safely adopt a reference from a pointer source
//!   they don't yet know is alive.
//!
//! [`AtomicShared`] composes the two: its `load` protects the pointer read with a hazard pointer,
//! then tries to increment the strong count, retrying if the block had already been logically
//! destroyed. Neither mechanism alone is sufficient — the hazard pointer keeps the *memory* of the
//! control block alive long enough to attempt the increment; the increment-if-not-zero keeps the
//! *logical* reference count from being adopted after it has already reached zero.
//!
//! Concrete lock-free containers built on top of this core (a Treiber stack, a Michael–Scott
//! queue, an ordered list) are not part of this crate's public surface; they live under `tests/`
//! as integration tests exercising the API the way an external consumer crate would.

mod atomic_shared;
pub mod backoff;
pub mod config;
mod control;
pub mod error;
mod guarded;
pub mod hazard;
pub mod marked;
pub mod retire;
mod shared;

pub use atomic_shared::{AtomicShared, CompareExchangeError};
pub use backoff::{Backoff, ExpBackoff, NoBackoff, YieldBackoff};
pub use config::Config;
pub use error::HazardError;
pub use guarded::Guarded;
pub use hazard::{HazardBag, Shield};
pub use marked::Marked;
pub use retire::RetiredSet;
#[cfg(not(feature = "check-loom"))]
pub use shared::make_shared;
pub use shared::{Shared, Weak, make_shared_in};

/// The crate's movable, scoped hazard-pointer handle. An alias kept for readers coming from the
/// "hazard pointer" vocabulary in the wider literature; identical to [`Shield`].
pub type HazardPointer = Shield;

/// The process-wide default hazard domain. Created lazily the first time any thread in the
/// process touches it, and outlives every thread that ever attaches to it, by construction (see
/// [`HazardBag`]'s own doc comment on why slots are deactivated and recycled rather than freed).
#[cfg(not(feature = "check-loom"))]
pub static HAZARDS: HazardBag = HazardBag::new();

/// Returns the process-wide default hazard domain.
#[cfg(not(feature = "check-loom"))]
pub fn default_domain() -> &'static HazardBag {
    &HAZARDS
}

/// Acquires a [`HazardPointer`] from the default domain.
///
/// # Panics
///
/// Panics if the default domain were ever given a bounded [`Config::max_slots`] (it is not, by
/// construction — only a domain built via [`HazardBag::with_config`] and then leaked can have a
/// bound) and that bound is exhausted.
#[cfg(not(feature = "check-loom"))]
pub fn make_hazard_pointer() -> HazardPointer {
    Shield::new(&HAZARDS)
}

/// As [`make_hazard_pointer`], against an explicit (non-default) domain.
pub fn make_hazard_pointer_in(domain: &HazardBag) -> HazardPointer {
    Shield::new(domain)
}

/// Retires `ptr` on the default domain's current-thread retired list.
///
/// # Safety
///
/// `ptr` must already be unreachable from any shared location (unlinked from every data structure
/// that could hand it to a reader), and must be retired at most once.
#[cfg(not(feature = "check-loom"))]
pub unsafe fn retire<T>(ptr: *mut T) {
    unsafe { retire::retire_on(&HAZARDS, ptr) };
}

/// As [`retire`], against an explicit (non-default) domain.
///
/// # Safety
///
/// Same contract as [`retire`].
pub unsafe fn retire_in<T>(domain: &'static HazardBag, ptr: *mut T) {
    unsafe { retire::retire_on(domain, ptr) };
}

/// A helper for collaborator data structures: stores nothing itself, but gives any `Box`-owned
/// node a uniform way to hand itself to the default domain's retire machinery once it has been
/// unlinked from shared memory, instead of every call site spelling out `retire::<Self>(ptr)`.
///
/// # Safety
///
/// Implementors must ensure `retire` is only called after the object has been made unreachable
/// from any location a concurrent reader could still be protecting, and at most once per object.
#[cfg(not(feature = "check-loom"))]
pub unsafe trait Retirable: Sized {
    /// Hands `self` to the default domain's retire machinery.
    ///
    /// # Safety
    ///
    /// See the trait-level safety contract.
    unsafe fn retire(self: Box<Self>) {
        unsafe { retire(Box::into_raw(self)) };
    }
}
