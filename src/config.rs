//! Detour configuration.
//!
//! [`DetourConfig`] controls how [`crate::MethodDetour::detour_with`] patches the entry
//! point of its target. Everything else about a detour is fixed by the target method.

use std::time::Duration;

/// How a detour installs its patch.
///
/// ```rust
/// use std::time::Duration;
/// use cildetour::DetourConfig;
///
/// let config = DetourConfig {
///     settle_delay: Duration::from_millis(10),
///     ..DetourConfig::default()
/// };
/// assert!(config.resolve_indirection);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetourConfig {
    /// How long entering threads are parked on the spin marker before the rest of the
    /// jump is written (default: 3 ms)
    pub settle_delay: Duration,

    /// Patch the code behind a `jmp [mem]` stub rather than the stub (default: true)
    /// Entry points handed out by a runtime are often such stubs; patching the stub
    /// would miss callers that jump to the code directly.
    pub resolve_indirection: bool,

    /// Restore the previous page protection once the patch is written (default: true)
    pub restore_protection: bool,
}

impl Default for DetourConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(3),
            resolve_indirection: true,
            restore_protection: true,
        }
    }
}

impl DetourConfig {
    /// No settle delay.
    ///
    /// Only safe while no other thread can be executing the target, e.g. during start-up.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Patch exactly the given entry point, never following indirect jumps.
    #[must_use]
    pub fn literal() -> Self {
        Self {
            resolve_indirection: false,
            ..Self::default()
        }
    }

    /// Leave patched pages readable, writable and executable.
    ///
    /// Saves two protection changes per patch on targets that get patched repeatedly.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            restore_protection: false,
            ..Self::default()
        }
    }
}
