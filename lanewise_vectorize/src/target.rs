//! Target descriptor and vectorization factors.

use crate::builtins::{BuiltinInfo, StandardBuiltins};
use crate::error::{VectorizeError, VectorizeResult};
use lanewise_ir::{LaneGroup, ScalarType};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Vectorization Factor
// =============================================================================

/// Requested lane-group size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorizationFactor {
    /// Lane count (minimum lane count when scalable).
    pub min_lanes: u32,
    /// Whether the real lane count is `min_lanes × vscale`.
    pub scalable: bool,
}

impl VectorizationFactor {
    pub const fn fixed(lanes: u32) -> Self {
        Self {
            min_lanes: lanes,
            scalable: false,
        }
    }

    pub const fn scalable(min_lanes: u32) -> Self {
        Self {
            min_lanes,
            scalable: true,
        }
    }

    /// Check for the degenerate factor of one fixed lane.
    #[inline]
    pub const fn is_scalar(self) -> bool {
        self.min_lanes == 1 && !self.scalable
    }

    /// Lane-group metadata for the rewritten function.
    #[inline]
    pub const fn lane_group(self) -> LaneGroup {
        LaneGroup {
            lanes: self.min_lanes,
            scalable: self.scalable,
        }
    }
}

impl fmt::Display for VectorizationFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scalable {
            write!(f, "vscale x {}", self.min_lanes)
        } else {
            write!(f, "{}", self.min_lanes)
        }
    }
}

// =============================================================================
// Target Descriptor
// =============================================================================

/// Capabilities of the target the vectorized function is compiled for.
#[derive(Clone)]
pub struct TargetDescriptor {
    pub name: String,
    /// Width of one native vector register.
    pub native_vector_bits: u32,
    /// Number of architectural vector registers.
    pub vector_registers: u32,
    /// Runtime-sized vectors are available.
    pub supports_scalable: bool,
    /// Native gather/scatter instructions.
    pub supports_gather_scatter: bool,
    /// Native masked loads and stores.
    pub supports_masked_memory: bool,
    /// Widest fixed lane group accepted.
    pub max_fixed_width: u32,
    /// Builtin classification.
    pub builtins: Arc<dyn BuiltinInfo + Send + Sync>,
}

impl fmt::Debug for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetDescriptor")
            .field("name", &self.name)
            .field("native_vector_bits", &self.native_vector_bits)
            .field("vector_registers", &self.vector_registers)
            .field("supports_scalable", &self.supports_scalable)
            .field("supports_gather_scatter", &self.supports_gather_scatter)
            .field("supports_masked_memory", &self.supports_masked_memory)
            .field("max_fixed_width", &self.max_fixed_width)
            .finish_non_exhaustive()
    }
}

impl TargetDescriptor {
    fn generic(name: &str, bits: u32, registers: u32) -> Self {
        Self {
            name: name.to_string(),
            native_vector_bits: bits,
            vector_registers: registers,
            supports_scalable: false,
            supports_gather_scatter: false,
            supports_masked_memory: true,
            max_fixed_width: 64,
            builtins: Arc::new(StandardBuiltins::new()),
        }
    }

    /// 128-bit vectors, 16 registers, no gather/scatter.
    pub fn generic_128() -> Self {
        Self::generic("generic-128", 128, 16)
    }

    /// 256-bit vectors, 16 registers, gather/scatter.
    pub fn generic_256() -> Self {
        Self {
            supports_gather_scatter: true,
            ..Self::generic("generic-256", 256, 16)
        }
    }

    /// 512-bit vectors, 32 registers, gather/scatter.
    pub fn generic_512() -> Self {
        Self {
            supports_gather_scatter: true,
            ..Self::generic("generic-512", 512, 32)
        }
    }

    /// Runtime-sized vectors with a 128-bit minimum.
    pub fn generic_scalable() -> Self {
        Self {
            supports_scalable: true,
            supports_gather_scatter: true,
            ..Self::generic("generic-scalable", 128, 32)
        }
    }

    /// Replace the builtin provider.
    pub fn with_builtins(mut self, builtins: Arc<dyn BuiltinInfo + Send + Sync>) -> Self {
        self.builtins = builtins;
        self
    }

    /// Lanes of `elem` held by one native register.
    pub fn native_lanes(&self, elem: ScalarType) -> u32 {
        let bits = elem.size_bytes() * 8;
        (self.native_vector_bits / bits).max(1)
    }

    /// Check that a factor can be requested on this target.
    pub fn validate_factor(&self, factor: VectorizationFactor) -> VectorizeResult<()> {
        let reason = if factor.min_lanes == 0 {
            Some("lane count must be positive")
        } else if !factor.min_lanes.is_power_of_two() {
            Some("lane count must be a power of two")
        } else if factor.scalable && !self.supports_scalable {
            Some("target has no scalable vectors")
        } else if !factor.scalable && factor.min_lanes > self.max_fixed_width {
            Some("lane count exceeds the target maximum")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(VectorizeError::InvalidFactor { factor, reason }),
            None => Ok(()),
        }
    }
}

impl Default for TargetDescriptor {
    fn default() -> Self {
        Self::generic_256()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let t = TargetDescriptor::generic_128();
        assert_eq!(t.native_vector_bits, 128);
        assert!(!t.supports_gather_scatter);
        assert_eq!(t.native_lanes(ScalarType::F32), 4);
        assert_eq!(t.native_lanes(ScalarType::F64), 2);

        let t = TargetDescriptor::generic_512();
        assert_eq!(t.native_lanes(ScalarType::I32), 16);
        assert!(TargetDescriptor::generic_scalable().supports_scalable);
    }

    #[test]
    fn test_validate_factor() {
        let t = TargetDescriptor::generic_256();
        assert!(t.validate_factor(VectorizationFactor::fixed(1)).is_ok());
        assert!(t.validate_factor(VectorizationFactor::fixed(8)).is_ok());
        assert!(t.validate_factor(VectorizationFactor::fixed(0)).is_err());
        assert!(t.validate_factor(VectorizationFactor::fixed(6)).is_err());
        assert!(t.validate_factor(VectorizationFactor::fixed(128)).is_err());
        assert!(t.validate_factor(VectorizationFactor::scalable(4)).is_err());

        let t = TargetDescriptor::generic_scalable();
        assert!(t.validate_factor(VectorizationFactor::scalable(4)).is_ok());
    }

    #[test]
    fn test_factor_display() {
        assert_eq!(VectorizationFactor::fixed(8).to_string(), "8");
        assert_eq!(VectorizationFactor::scalable(4).to_string(), "vscale x 4");
        assert!(VectorizationFactor::fixed(1).is_scalar());
        assert!(!VectorizationFactor::scalable(1).is_scalar());
    }
}
