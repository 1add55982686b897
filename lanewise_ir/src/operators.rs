//! Operator definitions for the kernel IR.
//!
//! Operators are organized by category:
//! - **Binary**: integer, bitwise, shift, floating-point and min/max
//! - **Unary**: negation, bitwise not, float helpers
//! - **Comparison**: signed/unsigned integer and ordered float predicates
//! - **Cast**: width and int/float conversions
//! - **Recurrence**: associative combiners used by horizontal reductions
//!
//! Each operator carries the semantic facts the analyses need
//! (commutativity, trapping, float-ness).

use super::types::ScalarType;

// =============================================================================
// Binary Operators
// =============================================================================

/// Two-operand arithmetic/logic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BinaryOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    /// Signed division; traps on a zero divisor.
    SDiv = 3,
    /// Signed remainder; traps on a zero divisor.
    SRem = 4,
    /// Unsigned division; traps on a zero divisor.
    UDiv = 5,
    /// Unsigned remainder; traps on a zero divisor.
    URem = 6,
    And = 7,
    Or = 8,
    Xor = 9,
    Shl = 10,
    /// Arithmetic shift right.
    AShr = 11,
    /// Logical shift right.
    LShr = 12,
    SMin = 13,
    SMax = 14,
    UMin = 15,
    UMax = 16,
    FAdd = 32,
    FSub = 33,
    FMul = 34,
    FDiv = 35,
    FMin = 36,
    FMax = 37,
}

impl BinaryOp {
    /// Check if `a op b == b op a`.
    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Xor
                | BinaryOp::SMin
                | BinaryOp::SMax
                | BinaryOp::UMin
                | BinaryOp::UMax
                | BinaryOp::FAdd
                | BinaryOp::FMul
                | BinaryOp::FMin
                | BinaryOp::FMax
        )
    }

    /// Check if this operator works on floating-point operands.
    #[inline]
    pub const fn is_float(self) -> bool {
        (self as u8) >= 32
    }

    /// Check if the operator can trap (division by zero).
    #[inline]
    pub const fn may_trap(self) -> bool {
        matches!(
            self,
            BinaryOp::SDiv | BinaryOp::SRem | BinaryOp::UDiv | BinaryOp::URem
        )
    }

    /// Check if the operator is defined for the given element type.
    pub const fn accepts(self, elem: ScalarType) -> bool {
        if self.is_float() {
            elem.is_float()
        } else if matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor) {
            elem.is_int() || matches!(elem, ScalarType::Bool)
        } else {
            elem.is_int()
        }
    }

    /// Textual mnemonic.
    pub const fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::SRem => "srem",
            BinaryOp::UDiv => "udiv",
            BinaryOp::URem => "urem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::AShr => "ashr",
            BinaryOp::LShr => "lshr",
            BinaryOp::SMin => "smin",
            BinaryOp::SMax => "smax",
            BinaryOp::UMin => "umin",
            BinaryOp::UMax => "umax",
            BinaryOp::FAdd => "fadd",
            BinaryOp::FSub => "fsub",
            BinaryOp::FMul => "fmul",
            BinaryOp::FDiv => "fdiv",
            BinaryOp::FMin => "fmin",
            BinaryOp::FMax => "fmax",
        }
    }
}

// =============================================================================
// Unary Operators
// =============================================================================

/// Single-operand operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnaryOp {
    /// Integer negation (wrapping).
    Neg = 0,
    /// Bitwise/logical not.
    Not = 1,
    FNeg = 2,
    FAbs = 3,
    Sqrt = 4,
}

impl UnaryOp {
    /// Check if this operator works on floating-point operands.
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, UnaryOp::FNeg | UnaryOp::FAbs | UnaryOp::Sqrt)
    }

    /// Textual mnemonic.
    pub const fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
            UnaryOp::FNeg => "fneg",
            UnaryOp::FAbs => "fabs",
            UnaryOp::Sqrt => "sqrt",
        }
    }
}

// =============================================================================
// Comparison Operators
// =============================================================================

/// Comparison predicate. Float predicates are ordered (false on NaN).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CmpOp {
    Eq = 0,
    Ne = 1,
    Slt = 2,
    Sle = 3,
    Sgt = 4,
    Sge = 5,
    Ult = 6,
    Ule = 7,
    Ugt = 8,
    Uge = 9,
    FEq = 16,
    FNe = 17,
    FLt = 18,
    FLe = 19,
    FGt = 20,
    FGe = 21,
}

impl CmpOp {
    /// Logical negation of the predicate (integers only; float negation is
    /// not ordered).
    pub const fn inverse(self) -> Option<Self> {
        Some(match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Slt => CmpOp::Sge,
            CmpOp::Sle => CmpOp::Sgt,
            CmpOp::Sgt => CmpOp::Sle,
            CmpOp::Sge => CmpOp::Slt,
            CmpOp::Ult => CmpOp::Uge,
            CmpOp::Ule => CmpOp::Ugt,
            CmpOp::Ugt => CmpOp::Ule,
            CmpOp::Uge => CmpOp::Ult,
            _ => return None,
        })
    }

    /// Check if this is a float predicate.
    #[inline]
    pub const fn is_float(self) -> bool {
        (self as u8) >= 16
    }

    /// Textual mnemonic.
    pub const fn name(self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Slt => "slt",
            CmpOp::Sle => "sle",
            CmpOp::Sgt => "sgt",
            CmpOp::Sge => "sge",
            CmpOp::Ult => "ult",
            CmpOp::Ule => "ule",
            CmpOp::Ugt => "ugt",
            CmpOp::Uge => "uge",
            CmpOp::FEq => "feq",
            CmpOp::FNe => "fne",
            CmpOp::FLt => "flt",
            CmpOp::FLe => "fle",
            CmpOp::FGt => "fgt",
            CmpOp::FGe => "fge",
        }
    }
}

// =============================================================================
// Cast Operators
// =============================================================================

/// Conversion operator. The destination is the instruction's result type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CastOp {
    SExt = 0,
    ZExt = 1,
    Trunc = 2,
    SIToFP = 3,
    FPToSI = 4,
    FPExt = 5,
    FPTrunc = 6,
}

impl CastOp {
    /// Textual mnemonic.
    pub const fn name(self) -> &'static str {
        match self {
            CastOp::SExt => "sext",
            CastOp::ZExt => "zext",
            CastOp::Trunc => "trunc",
            CastOp::SIToFP => "sitofp",
            CastOp::FPToSI => "fptosi",
            CastOp::FPExt => "fpext",
            CastOp::FPTrunc => "fptrunc",
        }
    }

    /// Check if the conversion keeps the integer value (modulo width), so a
    /// per-lane linear progression survives it.
    #[inline]
    pub const fn preserves_integer_value(self) -> bool {
        matches!(self, CastOp::SExt | CastOp::ZExt | CastOp::Trunc)
    }
}

// =============================================================================
// Recurrence Kinds
// =============================================================================

/// Associative combiner used by horizontal reductions and scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecurKind {
    Add = 0,
    Mul = 1,
    SMin = 2,
    SMax = 3,
    UMin = 4,
    UMax = 5,
    And = 6,
    Or = 7,
    Xor = 8,
    FAdd = 16,
    FMul = 17,
    FMin = 18,
    FMax = 19,
}

impl RecurKind {
    /// The binary operator that combines two partial results.
    pub const fn binary_op(self) -> BinaryOp {
        match self {
            RecurKind::Add => BinaryOp::Add,
            RecurKind::Mul => BinaryOp::Mul,
            RecurKind::SMin => BinaryOp::SMin,
            RecurKind::SMax => BinaryOp::SMax,
            RecurKind::UMin => BinaryOp::UMin,
            RecurKind::UMax => BinaryOp::UMax,
            RecurKind::And => BinaryOp::And,
            RecurKind::Or => BinaryOp::Or,
            RecurKind::Xor => BinaryOp::Xor,
            RecurKind::FAdd => BinaryOp::FAdd,
            RecurKind::FMul => BinaryOp::FMul,
            RecurKind::FMin => BinaryOp::FMin,
            RecurKind::FMax => BinaryOp::FMax,
        }
    }

    /// Check if this is a floating-point recurrence.
    #[inline]
    pub const fn is_float(self) -> bool {
        (self as u8) >= 16
    }

    /// Check if reordering the combination can change the bits of the result.
    #[inline]
    pub const fn is_reorder_exact(self) -> bool {
        !matches!(self, RecurKind::FAdd | RecurKind::FMul)
    }

    /// Textual mnemonic.
    pub const fn name(self) -> &'static str {
        match self {
            RecurKind::Add => "add",
            RecurKind::Mul => "mul",
            RecurKind::SMin => "smin",
            RecurKind::SMax => "smax",
            RecurKind::UMin => "umin",
            RecurKind::UMax => "umax",
            RecurKind::And => "and",
            RecurKind::Or => "or",
            RecurKind::Xor => "xor",
            RecurKind::FAdd => "fadd",
            RecurKind::FMul => "fmul",
            RecurKind::FMin => "fmin",
            RecurKind::FMax => "fmax",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
