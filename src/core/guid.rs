//! Process-wide unique identifiers.
//!
//! Every long-lived engine object carries a [`Guid`], handed out from a
//! single monotonic counter. GUIDs are never reused; equality between
//! objects is by GUID, not by address.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GUID: AtomicU64 = AtomicU64::new(1);

/// A 64-bit process-wide unique identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid(u64);

impl Guid {
    /// Allocates the next GUID. Monotonic, never zero.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_GUID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, for GPU-visible data and debug dumps.
    #[inline]
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guids_are_monotonic_and_unique() {
        let a = Guid::next();
        let b = Guid::next();
        assert!(b.value() > a.value());
        assert_ne!(a, b);
    }
}
