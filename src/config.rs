//! Tunable knobs for a [`crate::HazardBag`] domain.
//!
//! The defaults match the constants the reclamation algorithm has always used; `Config` exists so
//! a caller can override them for a private domain without recompiling the crate (see DESIGN.md
//! for why the defaults themselves are not changed).

/// Configuration for constructing a [`crate::HazardBag`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Number of retired entries a thread accumulates before it triggers a scan.
    ///
    /// Lower values reclaim memory sooner at the cost of more frequent scans; higher values
    /// amortise the scan cost over more retirements. Default: 64.
    pub scan_threshold: usize,
    /// Upper bound on the number of hazard slots this domain will ever allocate.
    ///
    /// `None` (the default) means the domain grows without bound, recycling inactive slots first
    /// and allocating a new one only when every existing slot is in use. `Some(n)` makes slot
    /// exhaustion observable via [`crate::hazard::Shield::try_new`] instead of growing forever.
    pub max_slots: Option<usize>,
}

impl Config {
    /// The scan threshold used when no `Config` is supplied.
    pub const DEFAULT_SCAN_THRESHOLD: usize = 64;
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_threshold: Self::DEFAULT_SCAN_THRESHOLD,
            max_slots: None,
        }
    }
}
