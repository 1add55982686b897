//! Whole-function vectorizer for data-parallel kernels.
//!
//! A kernel written for one work item is rewritten so that a single
//! invocation processes a group of `W` consecutive work items, one per SIMD
//! lane. Values identical across the group stay scalar; values that differ
//! become vectors or, where no vector form exists, per-lane copies.
//!
//! # Modules
//!
//! - [`analysis`]: uniformity, control-flow eligibility, strides, liveness
//!   and the packetization plan
//! - [`transform`]: linearization, packetization, per-lane instantiation,
//!   collective lowering and interleaved-access combining
//! - [`builtins`]: classification of runtime builtins
//! - [`target`]: vector capabilities and vectorization factors
//! - [`pass`]: the [`Vectorizer`] driver
//!
//! # Example
//!
//! ```text
//! let vectorizer = Vectorizer::new(TargetDescriptor::generic_256(), VectorizeConfig::default());
//! let out = vectorizer.vectorize(&kernel, VectorizationFactor::fixed(8), &LogRemarks)?;
//! ```

pub mod analysis;
pub mod builtins;
pub mod config;
pub mod error;
pub mod pass;
pub mod remark;
pub mod target;
pub mod transform;

pub use analysis::WidthAdvice;
pub use builtins::{
    BuiltinInfo, BuiltinKind, CollectiveDescriptor, CollectiveOp, CollectiveScope, LaneDim,
    StandardBuiltins,
};
pub use config::{VectorizeConfig, VectorizeStats};
pub use error::{CfgIssue, ErrorKind, VectorizeError, VectorizeResult};
pub use pass::{VectorizedFunction, Vectorizer};
pub use remark::{CollectedRemarks, LogRemarks, Remark, RemarkEmitter, RemarkKind};
pub use target::{TargetDescriptor, VectorizationFactor};
