//! Error taxonomy for the few operations that can genuinely fail.
//!
//! Most of this crate's retry loops (CAS loops, `inc_ref_if_not_zero`, `protect`) never surface a
//! failure to the caller: they either retry until a definitive result is reached or return an
//! empty value (`None`), which is not an error. `HazardError` exists for the handful of cases that
//! are programmer misuse rather than expected concurrent contention.

use thiserror::Error;

/// Failures reachable through the crate's public API.
///
/// Every variant here corresponds to a programmer-misuse condition, not ordinary concurrent
/// contention. Callers that hit one of these should treat it as fatal: the default entry points
/// (`make_hazard_pointer`, `Shield::new`) panic instead of returning this type, and only the
/// `try_`-prefixed entry points hand it back for inspection.
#[derive(Debug, Error)]
pub enum HazardError {
    /// A domain configured with [`crate::Config::max_slots`] has no free slot left to recycle and
    /// is not permitted to allocate another one.
    #[error("hazard domain has no free slot (configured limit reached)")]
    SlotsExhausted,
}
