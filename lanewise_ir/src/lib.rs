//! SSA intermediate representation for data-parallel kernels.
//!
//! A kernel is a [`Function`] written for a single work item. The IR keeps
//! values, instructions and blocks in arenas addressed by typed ids, which
//! keeps side tables cheap and lets passes edit in place.
//!
//! # Modules
//!
//! - [`arena`]: typed ids, arenas, secondary maps and bit sets
//! - [`types`]: scalar and vector types
//! - [`function`]: values, instructions, blocks and editing primitives
//! - [`builder`]: cursor-based instruction construction
//! - [`cfg`]: control-flow graph, (post-)dominators and loops
//! - [`verify`]: structural, type and SSA checks
//! - [`interp`]: reference interpreter used to check transformations

pub mod arena;
pub mod builder;
pub mod cfg;
pub mod display;
pub mod function;
pub mod interp;
pub mod operators;
pub mod types;
pub mod verify;

pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use builder::{Builder, InsertPoint};
pub use cfg::{Cfg, DominatorTree, LoopAnalysis, PostDominatorTree};
pub use function::{
    BlockData, BlockId, Constant, Function, InstData, InstId, InstKind, LaneGroup, Param,
    ParamAttrs, ValueData, ValueId, ValueKind,
};
pub use interp::{Environment, InterpError, InterpResult, Interpreter, Memory, Val};
pub use operators::{BinaryOp, CastOp, CmpOp, RecurKind, UnaryOp};
pub use types::{ScalarType, Type, VectorType};
pub use verify::{verify_function, VerifyError, VerifyResult};
