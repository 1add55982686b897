//! Vectorizer configuration and statistics.

use crate::error::ErrorKind;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the whole-function vectorizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorizeConfig {
    /// Work-item dimension that is spread across lanes.
    pub dimension: u32,
    /// Use gather/scatter for irregular addresses when the target has them.
    pub enable_gather_scatter: bool,
    /// Merge interleaved accesses into wide accesses.
    pub enable_interleaved_combine: bool,
    /// If-convert divergent regions. When off, divergent branches are rejected.
    pub enable_linearization: bool,
    /// Run the IR verifier on the result.
    pub verify_output: bool,
    /// Widest factor for which per-lane instantiation is accepted.
    pub max_instantiation_width: u32,
    /// Treat unknown external calls as possible synchronization points.
    pub assume_unknown_calls_convergent: bool,
}

impl Default for VectorizeConfig {
    fn default() -> Self {
        Self {
            dimension: 0,
            enable_gather_scatter: true,
            enable_interleaved_combine: true,
            enable_linearization: true,
            verify_output: true,
            max_instantiation_width: 64,
            assume_unknown_calls_convergent: false,
        }
    }
}

impl VectorizeConfig {
    /// Configuration that only performs transformations with no memory
    /// reordering and treats external calls as synchronizing.
    pub fn conservative() -> Self {
        Self {
            enable_gather_scatter: false,
            enable_interleaved_combine: false,
            max_instantiation_width: 16,
            assume_unknown_calls_convergent: true,
            ..Default::default()
        }
    }

    /// Configuration for maximum vectorization.
    pub fn aggressive() -> Self {
        Self {
            max_instantiation_width: 256,
            verify_output: false,
            ..Default::default()
        }
    }

    /// Vectorize along another work-item dimension.
    pub fn with_dimension(mut self, dimension: u32) -> Self {
        self.dimension = dimension;
        self
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from vectorization attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorizeStats {
    /// Number of attempts.
    pub attempts: usize,
    /// Number of functions successfully vectorized.
    pub successes: usize,
    pub rejected_cfg: usize,
    pub rejected_unsupported: usize,
    pub rejected_divergent_barrier: usize,
    pub rejected_factor: usize,
    pub rejected_verify: usize,
    /// Values rewritten as one vector.
    pub values_packetized: usize,
    /// Values rewritten as per-lane scalars.
    pub values_instantiated: usize,
    /// Collective calls lowered across the lane group.
    pub collectives_lowered: usize,
    /// Divergent regions if-converted.
    pub regions_linearized: usize,
    /// Interleaved groups merged into wide accesses.
    pub interleaved_groups_merged: usize,
}

impl VectorizeStats {
    /// Merge statistics from another instance.
    pub fn merge(&mut self, other: &VectorizeStats) {
        self.attempts += other.attempts;
        self.successes += other.successes;
        self.rejected_cfg += other.rejected_cfg;
        self.rejected_unsupported += other.rejected_unsupported;
        self.rejected_divergent_barrier += other.rejected_divergent_barrier;
        self.rejected_factor += other.rejected_factor;
        self.rejected_verify += other.rejected_verify;
        self.values_packetized += other.values_packetized;
        self.values_instantiated += other.values_instantiated;
        self.collectives_lowered += other.collectives_lowered;
        self.regions_linearized += other.regions_linearized;
        self.interleaved_groups_merged += other.interleaved_groups_merged;
    }

    /// Count a rejection of the given kind.
    pub fn record_rejection(&mut self, kind: ErrorKind) {
        match kind {
            ErrorKind::IneligibleCfg => self.rejected_cfg += 1,
            ErrorKind::Unsupported => self.rejected_unsupported += 1,
            ErrorKind::DivergentBarrier => self.rejected_divergent_barrier += 1,
            ErrorKind::InvalidFactor => self.rejected_factor += 1,
            ErrorKind::Verification => self.rejected_verify += 1,
        }
    }

    /// Total rejections.
    pub fn rejections(&self) -> usize {
        self.rejected_cfg
            + self.rejected_unsupported
            + self.rejected_divergent_barrier
            + self.rejected_factor
            + self.rejected_verify
    }

    /// Get the vectorization success rate.
    pub fn success_rate(&self) -> f32 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f32 / self.attempts as f32
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
