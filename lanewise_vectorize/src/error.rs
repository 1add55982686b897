//! Vectorization errors.
//!
//! Every error is recoverable at function granularity: the attempt is
//! abandoned and the scalar function stays usable.

use crate::target::VectorizationFactor;
use lanewise_ir::{BlockId, InstId, VerifyError};
use std::fmt;

// =============================================================================
// CFG Issues
// =============================================================================

/// Why a control-flow graph cannot be vectorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgIssue {
    /// The function has no blocks.
    Empty,
    /// No block returns.
    NoExit,
    /// More than one block returns or is unreachable.
    MultipleExits { count: usize },
    /// Multi-way branch.
    Switch { inst: InstId },
    /// Retreating edge whose target does not dominate its source.
    Irreducible { from: BlockId, to: BlockId },
}

impl fmt::Display for CfgIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfgIssue::Empty => write!(f, "function has no blocks"),
            CfgIssue::NoExit => write!(f, "function has no exit block"),
            CfgIssue::MultipleExits { count } => {
                write!(f, "function has {} exit blocks, expected one", count)
            }
            CfgIssue::Switch { inst } => write!(f, "switch at inst {} is not supported", inst),
            CfgIssue::Irreducible { from, to } => {
                write!(f, "irreducible control flow on edge bb{} -> bb{}", from, to)
            }
        }
    }
}

// =============================================================================
// Vectorize Error
// =============================================================================

/// Error taxonomy of a vectorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    IneligibleCfg,
    Unsupported,
    DivergentBarrier,
    InvalidFactor,
    Verification,
}

/// Errors that abort a vectorization attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorizeError {
    /// The control-flow graph cannot be transformed.
    IneligibleCfg(CfgIssue),
    /// No rewrite rule exists for an instruction.
    Unsupported { inst: Option<InstId>, reason: String },
    /// A synchronization point is reachable under a divergent condition.
    DivergentBarrier { inst: InstId },
    /// The requested factor does not fit the target.
    InvalidFactor {
        factor: VectorizationFactor,
        reason: &'static str,
    },
    /// The rewritten function is malformed.
    Verify(VerifyError),
}

impl VectorizeError {
    /// Shorthand for an unsupported instruction.
    pub fn unsupported(inst: InstId, reason: impl Into<String>) -> Self {
        VectorizeError::Unsupported {
            inst: Some(inst),
            reason: reason.into(),
        }
    }

    /// Taxonomy bucket.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VectorizeError::IneligibleCfg(_) => ErrorKind::IneligibleCfg,
            VectorizeError::Unsupported { .. } => ErrorKind::Unsupported,
            VectorizeError::DivergentBarrier { .. } => ErrorKind::DivergentBarrier,
            VectorizeError::InvalidFactor { .. } => ErrorKind::InvalidFactor,
            VectorizeError::Verify(_) => ErrorKind::Verification,
        }
    }

    /// Offending instruction, if one is known.
    pub fn inst(&self) -> Option<InstId> {
        match self {
            VectorizeError::IneligibleCfg(CfgIssue::Switch { inst }) => Some(*inst),
            VectorizeError::Unsupported { inst, .. } => *inst,
            VectorizeError::DivergentBarrier { inst } => Some(*inst),
            VectorizeError::Verify(e) => e.inst,
            _ => None,
        }
    }
}

impl fmt::Display for VectorizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorizeError::IneligibleCfg(issue) => write!(f, "ineligible control flow: {}", issue),
            VectorizeError::Unsupported { reason, .. } => {
                write!(f, "unsupported construct: {}", reason)
            }
            VectorizeError::DivergentBarrier { inst } => {
                write!(f, "synchronization at inst {} is reachable under divergent control", inst)
            }
            VectorizeError::InvalidFactor { factor, reason } => {
                write!(f, "invalid vectorization factor {}: {}", factor, reason)
            }
            VectorizeError::Verify(e) => write!(f, "vectorized function is invalid: {}", e),
        }
    }
}

impl std::error::Error for VectorizeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VectorizeError::Verify(e) => Some(e),
            _ => None,
        }
    }
}

impl From<VerifyError> for VectorizeError {
    fn from(e: VerifyError) -> Self {
        VectorizeError::Verify(e)
    }
}

/// Result type for vectorization.
pub type VectorizeResult<T> = Result<T, VectorizeError>;

// =============================================================================
// Tests
// =============================================================================
