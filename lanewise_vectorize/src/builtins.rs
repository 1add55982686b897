//! Builtin classification.
//!
//! The vectorizer never interprets callee names itself. A [`BuiltinInfo`]
//! provider tells it which calls produce the lane identity, which are
//! lane-group collectives, which synchronize and which are element-wise pure
//! functions. [`StandardBuiltins`] covers the OpenCL C work-item and
//! sub-/work-group functions.
//!
//! # Neutral elements and scan identities
//!
//! Two constants exist per recurrence kind and they differ for floats:
//!
//! | kind  | [`neutral_value`] | [`scan_identity`] |
//! |-------|-------------------|-------------------|
//! | fadd  | -0.0              | 0.0               |
//! | fmin  | NaN               | +inf              |
//! | fmax  | NaN               | -inf              |
//!
//! The neutral value pads partial vectors inside a reduction or scan and never
//! changes a result. The scan identity is the value lane 0 receives from an
//! exclusive scan.

use lanewise_ir::{Constant, Function, InstId, InstKind, RecurKind, ScalarType, Type};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

// =============================================================================
// Classification
// =============================================================================

/// Which lane index a lane-identity builtin returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaneDim {
    /// Work-item index in a constant dimension.
    Index(u32),
    /// Index within the sub-group.
    SubGroup,
    /// Dimension operand is not a constant.
    Dynamic,
}

/// Collective operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectiveOp {
    Reduce,
    ScanInclusive,
    ScanExclusive,
    Broadcast,
    Any,
    All,
}

/// Set of lanes a collective spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectiveScope {
    /// Exactly the lane group of one vectorized invocation.
    SubGroup,
    /// The whole work group, possibly several lane groups.
    WorkGroup,
}

/// A lane-group collective call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectiveDescriptor {
    pub op: CollectiveOp,
    pub scope: CollectiveScope,
    pub recurrence: RecurKind,
    pub scalar_type: ScalarType,
}

/// What a call does, as far as vectorization is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    /// Returns the calling lane's index.
    LaneIdentity { dimension: LaneDim },
    /// Same result for every lane of a group (sizes, group ids).
    GroupInvariant,
    Collective(CollectiveDescriptor),
    /// Lane-group synchronization point.
    Barrier,
    /// Side-effect free and element-wise.
    Pure,
    /// Result differs per lane even for identical arguments.
    InherentlyVarying,
    /// Side-effecting call that is known not to synchronize.
    NeverConvergent,
    /// Arbitrary external call.
    Unknown,
}

impl BuiltinKind {
    /// Check if the call must run once per active lane.
    #[inline]
    pub fn is_per_lane_side_effect(self) -> bool {
        matches!(
            self,
            BuiltinKind::Unknown | BuiltinKind::NeverConvergent | BuiltinKind::InherentlyVarying
        )
    }

    /// Check if the call synchronizes the lane group.
    #[inline]
    pub fn is_convergent(self) -> bool {
        matches!(self, BuiltinKind::Barrier | BuiltinKind::Collective(_))
    }
}

/// Static view of a call site handed to the classifier.
#[derive(Debug, Clone)]
pub struct CallInfo<'a> {
    pub callee: &'a str,
    /// Integer constant arguments (`None` where not constant).
    pub const_args: SmallVec<[Option<i64>; 4]>,
    pub arg_types: SmallVec<[Type; 4]>,
    pub ret_ty: Type,
}

impl<'a> CallInfo<'a> {
    /// Extract call information from a call instruction.
    pub fn from_inst(func: &'a Function, inst: InstId) -> Option<CallInfo<'a>> {
        let InstKind::Call { callee, args, .. } = &func.inst(inst).kind else {
            return None;
        };
        Some(CallInfo {
            callee: callee.as_str(),
            const_args: args.iter().map(|&a| func.as_const_int(a)).collect(),
            arg_types: args.iter().map(|&a| func.value_ty(a)).collect(),
            ret_ty: func
                .inst_result(inst)
                .map(|r| func.value_ty(r))
                .unwrap_or(Type::VOID),
        })
    }

    /// Element type of the first argument, falling back to the result type.
    pub fn operand_type(&self) -> ScalarType {
        self.arg_types
            .first()
            .and_then(|t| t.element())
            .or_else(|| self.ret_ty.element())
            .unwrap_or(ScalarType::I32)
    }
}

/// Classifies calls for the vectorizer.
pub trait BuiltinInfo {
    fn classify(&self, call: &CallInfo<'_>) -> BuiltinKind;
}

/// Classify the call at `inst` (`None` if it is not a call).
pub fn classify_call(
    builtins: &dyn BuiltinInfo,
    func: &Function,
    inst: InstId,
) -> Option<BuiltinKind> {
    CallInfo::from_inst(func, inst).map(|info| builtins.classify(&info))
}

// =============================================================================
// Neutral Elements
// =============================================================================

fn int_bounds(elem: ScalarType) -> (i64, i64) {
    match elem {
        ScalarType::I32 => (i32::MIN as i64, i32::MAX as i64),
        _ => (i64::MIN, i64::MAX),
    }
}

/// Element that leaves any value unchanged under `kind`.
pub fn neutral_value(kind: RecurKind, elem: ScalarType) -> Constant {
    if elem == ScalarType::Bool {
        return Constant::Bool(matches!(
            kind,
            RecurKind::And | RecurKind::Mul | RecurKind::UMin | RecurKind::SMax
        ));
    }
    let (min, max) = int_bounds(elem);
    match kind {
        RecurKind::Add | RecurKind::Or | RecurKind::Xor | RecurKind::UMax => Constant::Int(0),
        RecurKind::Mul => Constant::Int(1),
        RecurKind::And | RecurKind::UMin => Constant::Int(-1),
        RecurKind::SMin => Constant::Int(max),
        RecurKind::SMax => Constant::Int(min),
        RecurKind::FAdd => Constant::Float(-0.0),
        RecurKind::FMul => Constant::Float(1.0),
        RecurKind::FMin | RecurKind::FMax => Constant::Float(f64::NAN),
    }
}

/// Value lane 0 receives from an exclusive scan.
pub fn scan_identity(kind: RecurKind, elem: ScalarType) -> Constant {
    match kind {
        RecurKind::FAdd => Constant::Float(0.0),
        RecurKind::FMin => Constant::Float(f64::INFINITY),
        RecurKind::FMax => Constant::Float(f64::NEG_INFINITY),
        other => neutral_value(other, elem),
    }
}

// =============================================================================
// Standard Builtins
// =============================================================================

const GROUP_INVARIANT: &[&str] = &[
    "get_local_size",
    "get_global_size",
    "get_enqueued_local_size",
    "get_group_id",
    "get_num_groups",
    "get_global_offset",
    "get_work_dim",
    "get_sub_group_size",
    "get_max_sub_group_size",
    "get_num_sub_groups",
    "get_sub_group_id",
];

const BARRIERS: &[&str] = &[
    "barrier",
    "work_group_barrier",
    "sub_group_barrier",
    "mem_fence",
];

const PURE_MATH: &[&str] = &[
    "sqrt", "fabs", "fmin", "fmax", "floor", "ceil", "exp", "log", "sin", "cos", "pow", "fma",
    "mad", "abs", "min", "max", "clamp",
];

/// OpenCL C builtin names.
#[derive(Debug, Clone, Default)]
pub struct StandardBuiltins {
    extra_pure: FxHashSet<String>,
    never_convergent: FxHashSet<String>,
    inherently_varying: FxHashSet<String>,
}

impl StandardBuiltins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `name` as a pure element-wise function.
    pub fn with_pure(mut self, name: &str) -> Self {
        self.extra_pure.insert(name.to_string());
        self
    }

    /// Treat `name` as a side-effecting call that never synchronizes.
    pub fn with_never_convergent(mut self, name: &str) -> Self {
        self.never_convergent.insert(name.to_string());
        self
    }

    /// Treat `name` as producing a different value in every lane.
    pub fn with_inherently_varying(mut self, name: &str) -> Self {
        self.inherently_varying.insert(name.to_string());
        self
    }

    fn parse_collective(name: &str, call: &CallInfo<'_>) -> Option<CollectiveDescriptor> {
        let (scope, rest) = if let Some(rest) = name.strip_prefix("sub_group_") {
            (CollectiveScope::SubGroup, rest)
        } else if let Some(rest) = name.strip_prefix("work_group_") {
            (CollectiveScope::WorkGroup, rest)
        } else {
            return None;
        };
        let elem = call.operand_type();
        let (op, recurrence) = match rest {
            "broadcast" => (CollectiveOp::Broadcast, RecurKind::Or),
            "any" => (CollectiveOp::Any, RecurKind::Or),
            "all" => (CollectiveOp::All, RecurKind::And),
            _ => {
                let (op, kind) = if let Some(k) = rest.strip_prefix("reduce_") {
                    (CollectiveOp::Reduce, k)
                } else if let Some(k) = rest.strip_prefix("scan_inclusive_") {
                    (CollectiveOp::ScanInclusive, k)
                } else if let Some(k) = rest.strip_prefix("scan_exclusive_") {
                    (CollectiveOp::ScanExclusive, k)
                } else {
                    return None;
                };
                (op, Self::parse_recurrence(kind, elem)?)
            }
        };
        Some(CollectiveDescriptor {
            op,
            scope,
            recurrence,
            scalar_type: elem,
        })
    }

    fn parse_recurrence(name: &str, elem: ScalarType) -> Option<RecurKind> {
        let float = elem.is_float();
        Some(match (name, float) {
            ("add", false) => RecurKind::Add,
            ("add", true) => RecurKind::FAdd,
            ("mul", false) => RecurKind::Mul,
            ("mul", true) => RecurKind::FMul,
            ("min", false) => RecurKind::SMin,
            ("min", true) => RecurKind::FMin,
            ("max", false) => RecurKind::SMax,
            ("max", true) => RecurKind::FMax,
            ("umin", false) => RecurKind::UMin,
            ("umax", false) => RecurKind::UMax,
            ("and", false) => RecurKind::And,
            ("or", false) => RecurKind::Or,
            ("xor", false) => RecurKind::Xor,
            _ => return None,
        })
    }
}

impl BuiltinInfo for StandardBuiltins {
    fn classify(&self, call: &CallInfo<'_>) -> BuiltinKind {
        let name = call.callee;
        match name {
            "get_global_id" | "get_local_id" => {
                let dimension = match call.const_args.first().copied().flatten() {
                    Some(d) if d >= 0 => LaneDim::Index(d as u32),
                    _ => LaneDim::Dynamic,
                };
                return BuiltinKind::LaneIdentity { dimension };
            }
            "get_sub_group_local_id" => {
                return BuiltinKind::LaneIdentity {
                    dimension: LaneDim::SubGroup,
                };
            }
            _ => {}
        }
        if GROUP_INVARIANT.contains(&name) {
            BuiltinKind::GroupInvariant
        } else if BARRIERS.contains(&name) {
            BuiltinKind::Barrier
        } else if let Some(desc) = Self::parse_collective(name, call) {
            BuiltinKind::Collective(desc)
        } else if PURE_MATH.contains(&name) || self.extra_pure.contains(name) {
            BuiltinKind::Pure
        } else if self.inherently_varying.contains(name) {
            BuiltinKind::InherentlyVarying
        } else if self.never_convergent.contains(name) {
            BuiltinKind::NeverConvergent
        } else {
            BuiltinKind::Unknown
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn call<'a>(callee: &'a str, arg: Option<i64>, ty: Type) -> CallInfo<'a> {
        CallInfo {
            callee,
            const_args: smallvec![arg],
            arg_types: smallvec![ty],
            ret_ty: ty,
        }
    }

    #[test]
    fn test_lane_identity() {
        let b = StandardBuiltins::new();
        assert_eq!(
            b.classify(&call("get_global_id", Some(0), Type::I32)),
            BuiltinKind::LaneIdentity {
                dimension: LaneDim::Index(0)
            }
        );
        assert_eq!(
            b.classify(&call("get_local_id", None, Type::I32)),
            BuiltinKind::LaneIdentity {
                dimension: LaneDim::Dynamic
            }
        );
        assert_eq!(
            b.classify(&call("get_local_size", Some(0), Type::I32)),
            BuiltinKind::GroupInvariant
        );
    }

    #[test]
    fn test_collectives() {
        let b = StandardBuiltins::new();
        let kind = b.classify(&call("sub_group_reduce_add", None, Type::F32));
        assert_eq!(
            kind,
            BuiltinKind::Collective(CollectiveDescriptor {
                op: CollectiveOp::Reduce,
                scope: CollectiveScope::SubGroup,
                recurrence: RecurKind::FAdd,
                scalar_type: ScalarType::F32,
            })
        );
        let kind = b.classify(&call("work_group_scan_exclusive_max", None, Type::I32));
        let BuiltinKind::Collective(desc) = kind else {
            panic!("expected collective, got {:?}", kind);
        };
        assert_eq!(desc.op, CollectiveOp::ScanExclusive);
        assert_eq!(desc.scope, CollectiveScope::WorkGroup);
        assert_eq!(desc.recurrence, RecurKind::SMax);
        assert_eq!(
            b.classify(&call("sub_group_reduce_xor", None, Type::F32)),
            BuiltinKind::Unknown
        );
    }

    #[test]
    fn test_custom_sets() {
        let b = StandardBuiltins::new()
            .with_pure("my_math")
            .with_never_convergent("printf")
            .with_inherently_varying("rand");
        assert_eq!(b.classify(&call("my_math", None, Type::F32)), BuiltinKind::Pure);
        assert_eq!(b.classify(&call("printf", None, Type::I32)), BuiltinKind::NeverConvergent);
        assert_eq!(b.classify(&call("rand", None, Type::I32)), BuiltinKind::InherentlyVarying);
        assert_eq!(b.classify(&call("complex_call", None, Type::I32)), BuiltinKind::Unknown);
        assert_eq!(b.classify(&call("barrier", Some(1), Type::I32)), BuiltinKind::Barrier);
    }

    fn is_nan(c: Constant) -> bool {
        matches!(c, Constant::Float(x) if x.is_nan())
    }

    #[test]
    fn test_float_min_max_constants() {
        for elem in [ScalarType::F32, ScalarType::F64] {
            assert!(is_nan(neutral_value(RecurKind::FMin, elem)));
            assert!(is_nan(neutral_value(RecurKind::FMax, elem)));
            assert_eq!(scan_identity(RecurKind::FMin, elem), Constant::Float(f64::INFINITY));
            assert_eq!(scan_identity(RecurKind::FMax, elem), Constant::Float(f64::NEG_INFINITY));
        }
    }

    #[test]
    fn test_fadd_pads_with_negative_zero() {
        let Constant::Float(pad) = neutral_value(RecurKind::FAdd, ScalarType::F32) else {
            panic!("float neutral expected");
        };
        assert!(pad == 0.0 && pad.is_sign_negative());
        let Constant::Float(first) = scan_identity(RecurKind::FAdd, ScalarType::F32) else {
            panic!("float identity expected");
        };
        assert!(first == 0.0 && first.is_sign_positive());
    }

    #[test]
    fn test_integer_min_max_constants() {
        assert_eq!(neutral_value(RecurKind::SMin, ScalarType::I32), Constant::Int(i32::MAX as i64));
        assert_eq!(scan_identity(RecurKind::SMin, ScalarType::I32), Constant::Int(i32::MAX as i64));
        assert_eq!(neutral_value(RecurKind::SMin, ScalarType::I64), Constant::Int(i64::MAX));
        assert_eq!(neutral_value(RecurKind::UMax, ScalarType::I32), Constant::Int(0));
        assert_eq!(scan_identity(RecurKind::UMax, ScalarType::I64), Constant::Int(0));
    }

    #[test]
    fn test_neutral_and_scan_identity_differ_for_float_min_max() {
        let n = neutral_value(RecurKind::FMin, ScalarType::F32);
        assert!(matches!(n, Constant::Float(x) if x.is_nan()));
        assert_eq!(
            scan_identity(RecurKind::FMin, ScalarType::F32),
            Constant::Float(f64::INFINITY)
        );
        assert_eq!(
            scan_identity(RecurKind::FMax, ScalarType::F32),
            Constant::Float(f64::NEG_INFINITY)
        );
        assert_eq!(
            neutral_value(RecurKind::SMin, ScalarType::I32),
            Constant::Int(i32::MAX as i64)
        );
        assert_eq!(scan_identity(RecurKind::Add, ScalarType::I64), Constant::Int(0));
        assert_eq!(neutral_value(RecurKind::And, ScalarType::Bool), Constant::Bool(true));
    }
}
