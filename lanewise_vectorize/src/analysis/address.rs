//! Pointer provenance and symbolic address arithmetic.
//!
//! Two services:
//! - [`memory_root`] / [`may_alias`]: coarse provenance used to decide whether
//!   two accesses can touch the same memory.
//! - [`AddressExpr`]: `root + constant + Σ scale·term` decomposition of a
//!   pointer, used to prove that two addresses differ by a compile-time
//!   constant.

use lanewise_ir::{
    BinaryOp, CastOp, Constant, Function, InstId, InstKind, ParamAttrs, ValueId, ValueKind,
};
use std::collections::BTreeMap;

// =============================================================================
// Provenance
// =============================================================================

/// Object a pointer is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemRoot {
    /// A private stack buffer.
    Alloca(InstId),
    /// A pointer parameter.
    Param(u32),
    /// Anything else (loaded pointers, selects, integers).
    Unknown,
}

/// Follow element-pointer bases back to the underlying object.
pub fn memory_root(func: &Function, ptr: ValueId) -> MemRoot {
    let mut current = ptr;
    loop {
        match func.value(current).kind {
            ValueKind::Param(i) => return MemRoot::Param(i),
            ValueKind::Inst(inst) => match &func.inst(inst).kind {
                InstKind::ElementPtr { base, .. } => current = *base,
                InstKind::Alloca { .. } => return MemRoot::Alloca(inst),
                _ => return MemRoot::Unknown,
            },
            _ => return MemRoot::Unknown,
        }
    }
}

fn is_noalias(func: &Function, index: u32) -> bool {
    func.params
        .get(index as usize)
        .is_some_and(|p| p.attrs.contains(ParamAttrs::NOALIAS))
}

/// Check if two roots may refer to the same object.
pub fn roots_may_alias(func: &Function, a: MemRoot, b: MemRoot) -> bool {
    match (a, b) {
        (MemRoot::Alloca(x), MemRoot::Alloca(y)) => x == y,
        (MemRoot::Alloca(_), MemRoot::Param(_)) | (MemRoot::Param(_), MemRoot::Alloca(_)) => false,
        (MemRoot::Param(x), MemRoot::Param(y)) => {
            x == y || !(is_noalias(func, x) || is_noalias(func, y))
        }
        _ => true,
    }
}

/// Check if two pointers may refer to the same object.
pub fn may_alias(func: &Function, a: ValueId, b: ValueId) -> bool {
    roots_may_alias(func, memory_root(func, a), memory_root(func, b))
}

/// Root written or read by a memory instruction (`Unknown` for calls).
pub fn access_root(func: &Function, inst: InstId) -> Option<MemRoot> {
    match &func.inst(inst).kind {
        InstKind::Load { ptr, .. }
        | InstKind::Store { ptr, .. }
        | InstKind::InterleavedLoad { ptr, .. }
        | InstKind::InterleavedStore { ptr, .. } => Some(memory_root(func, *ptr)),
        InstKind::Gather { .. } | InstKind::Scatter { .. } | InstKind::Call { .. } => {
            Some(MemRoot::Unknown)
        }
        _ => None,
    }
}

// =============================================================================
// Symbolic Addresses
// =============================================================================

/// `root + offset + Σ terms[v] · v`, all in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressExpr {
    pub root: ValueId,
    pub offset: i64,
    pub terms: BTreeMap<ValueId, i64>,
}

#[derive(Debug, Default)]
struct LinearInt {
    offset: i64,
    terms: BTreeMap<ValueId, i64>,
}

impl LinearInt {
    fn add_scaled(&mut self, other: LinearInt, scale: i64) -> Option<()> {
        self.offset = self.offset.checked_add(other.offset.checked_mul(scale)?)?;
        for (v, s) in other.terms {
            let entry = self.terms.entry(v).or_insert(0);
            *entry = entry.checked_add(s.checked_mul(scale)?)?;
        }
        self.terms.retain(|_, s| *s != 0);
        Some(())
    }
}

const MAX_DEPTH: u32 = 16;

fn decompose_int(func: &Function, v: ValueId, depth: u32) -> Option<LinearInt> {
    let leaf = |v: ValueId| LinearInt {
        offset: 0,
        terms: BTreeMap::from([(v, 1)]),
    };
    if let Some(Constant::Int(c)) = func.as_const(v) {
        return Some(LinearInt {
            offset: c,
            terms: BTreeMap::new(),
        });
    }
    let Some(inst) = func.def_inst(v) else {
        return Some(leaf(v));
    };
    if depth >= MAX_DEPTH {
        return Some(leaf(v));
    }
    let mut out = LinearInt::default();
    match &func.inst(inst).kind {
        InstKind::Binary {
            op: BinaryOp::Add,
            lhs,
            rhs,
        } => {
            out.add_scaled(decompose_int(func, *lhs, depth + 1)?, 1)?;
            out.add_scaled(decompose_int(func, *rhs, depth + 1)?, 1)?;
        }
        InstKind::Binary {
            op: BinaryOp::Sub,
            lhs,
            rhs,
        } => {
            out.add_scaled(decompose_int(func, *lhs, depth + 1)?, 1)?;
            out.add_scaled(decompose_int(func, *rhs, depth + 1)?, -1)?;
        }
        InstKind::Binary {
            op: BinaryOp::Mul,
            lhs,
            rhs,
        } => match (func.as_const_int(*lhs), func.as_const_int(*rhs)) {
            (_, Some(c)) => out.add_scaled(decompose_int(func, *lhs, depth + 1)?, c)?,
            (Some(c), _) => out.add_scaled(decompose_int(func, *rhs, depth + 1)?, c)?,
            _ => return Some(leaf(v)),
        },
        InstKind::Binary {
            op: BinaryOp::Shl,
            lhs,
            rhs,
        } => match func.as_const_int(*rhs) {
            Some(c) if (0..32).contains(&c) => {
                out.add_scaled(decompose_int(func, *lhs, depth + 1)?, 1i64 << c)?
            }
            _ => return Some(leaf(v)),
        },
        InstKind::Cast {
            op: CastOp::SExt | CastOp::ZExt,
            value,
        } => return decompose_int(func, *value, depth + 1),
        _ => return Some(leaf(v)),
    }
    Some(out)
}

impl AddressExpr {
    /// Decompose a pointer value.
    pub fn decompose(func: &Function, ptr: ValueId) -> Option<AddressExpr> {
        let mut expr = LinearInt::default();
        let mut current = ptr;
        for _ in 0..MAX_DEPTH {
            let inst = func.def_inst(current);
            let Some(InstKind::ElementPtr { base, index, elem }) = inst.map(|i| &func.inst(i).kind)
            else {
                return Some(AddressExpr {
                    root: current,
                    offset: expr.offset,
                    terms: expr.terms,
                });
            };
            let index = decompose_int(func, *index, 0)?;
            expr.add_scaled(index, elem.size_bytes() as i64)?;
            current = *base;
        }
        None
    }

    /// `other - self` in bytes, if it is a compile-time constant.
    pub fn distance_to(&self, other: &AddressExpr) -> Option<i64> {
        if self.root != other.root || self.terms != other.terms {
            return None;
        }
        other.offset.checked_sub(self.offset)
    }
}

/// Constant byte distance `b - a` between two pointers.
pub fn constant_distance(func: &Function, a: ValueId, b: ValueId) -> Option<i64> {
    let ea = AddressExpr::decompose(func, a)?;
    let eb = AddressExpr::decompose(func, b)?;
    ea.distance_to(&eb)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use lanewise_ir::{Builder, ScalarType, Type};

    #[test]
    fn test_roots_and_aliasing() {
        let mut func = Function::new("k", Type::VOID);
        let a = func.add_param("a", Type::PTR, ParamAttrs::NOALIAS);
        let b = func.add_param("b", Type::PTR, ParamAttrs::empty());
        let c = func.add_param("c", Type::PTR, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let mut bld = Builder::at_end(&mut func, entry);
        let buf = bld.alloca(ScalarType::I32, 4);
        let one = bld.const_int(ScalarType::I64, 1);
        let a1 = bld.element_ptr(a, one, ScalarType::F32);
        let buf1 = bld.element_ptr(buf, one, ScalarType::I32);
        bld.ret(None);

        assert_eq!(memory_root(&func, a1), MemRoot::Param(0));
        assert!(matches!(memory_root(&func, buf1), MemRoot::Alloca(_)));
        assert!(!may_alias(&func, a1, b));
        assert!(may_alias(&func, b, c));
        assert!(!may_alias(&func, buf1, c));
        assert!(may_alias(&func, buf, buf1));
    }

    #[test]
    fn test_constant_distance() {
        // out[2*i] and out[2*i + 1] with the products computed separately.
        let mut func = Function::new("k", Type::VOID);
        let out = func.add_param("out", Type::PTR, ParamAttrs::empty());
        let i = func.add_param("i", Type::I64, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let two = b.const_int(ScalarType::I64, 2);
        let one = b.const_int(ScalarType::I64, 1);
        let even = b.mul(i, two);
        let twice = b.binary(BinaryOp::Shl, i, one);
        let odd = b.add(twice, one);
        let p0 = b.element_ptr(out, even, ScalarType::F32);
        let p1 = b.element_ptr(out, odd, ScalarType::F32);
        let q = b.element_ptr(out, i, ScalarType::F32);
        b.ret(None);

        assert_eq!(constant_distance(&func, p0, p1), Some(4));
        assert_eq!(constant_distance(&func, p1, p0), Some(-4));
        assert_eq!(constant_distance(&func, p0, q), None);
    }
}
