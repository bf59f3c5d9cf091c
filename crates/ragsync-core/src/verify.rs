//! Post-mutation consistency gate.
//!
//! The expected chunk count is accumulated analytically by the build
//! engine (carried-forward counts plus freshly produced ones). It is never
//! read back from the store. The manifest only advances when the store's
//! reported count matches it.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Consistent { count: u64 },
    Mismatch { expected: u64, observed: u64 },
}

impl Verification {
    pub fn is_consistent(&self) -> bool {
        matches!(self, Verification::Consistent { .. })
    }
}

pub fn verify(expected_chunk_count: u64, observed_store_count: u64) -> Verification {
    if expected_chunk_count == observed_store_count {
        Verification::Consistent {
            count: observed_store_count,
        }
    } else {
        Verification::Mismatch {
            expected: expected_chunk_count,
            observed: observed_store_count,
        }
    }
}
