// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read sampling: deciding per read whether the secondary is exercised.
//!
//! Verifying every read doubles the read load on the secondary. The
//! sampler lets deployments trade verification coverage for load by
//! checking only a percentage of reads.

use rand::Rng;

/// Decides, per read operation, whether it should be mirrored to the
/// secondary for verification.
pub trait ReadSampler: Send + Sync {
    fn should_sample_next_read(&self) -> bool;
}

/// Samples a fixed percentage of reads, uniformly at random.
pub struct PercentageReadSampler {
    percent: u32,
}

impl PercentageReadSampler {
    /// `percent` is clamped to 0..=100.
    #[must_use]
    pub fn new(percent: u32) -> Self {
        Self { percent: percent.min(100) }
    }

    /// Sampler that verifies every read.
    #[must_use]
    pub fn always() -> Self {
        Self::new(100)
    }

    /// Sampler that never verifies reads.
    #[must_use]
    pub fn never() -> Self {
        Self::new(0)
    }
}

impl ReadSampler for PercentageReadSampler {
    fn should_sample_next_read(&self) -> bool {
        match self.percent {
            0 => false,
            100 => true,
            percent => rand::thread_rng().gen_range(0..100) < percent,
        }
    }
}
