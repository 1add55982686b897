//! Per-lane stride analysis.
//!
//! For every varying integer or pointer value, determines whether the value
//! of lane `i + 1` minus the value of lane `i` is a compile-time constant.
//! Pointer strides are in bytes, integer strides in units of the integer.
//!
//! Address arithmetic is assumed not to wrap between lanes of one group, so
//! extensions and truncations pass a stride through unchanged.

use super::uniformity::UniformityInfo;
use crate::builtins::{classify_call, BuiltinInfo, BuiltinKind, LaneDim};
use lanewise_ir::{BinaryOp, CastOp, Cfg, Function, InstId, InstKind, ValueId};
use rustc_hash::FxHashMap;

/// Lane-to-lane behavior of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stride {
    /// Same in every lane.
    Uniform,
    /// Lane `i` is `lane0 + i * step`.
    Linear(i64),
    /// No constant relationship between lanes.
    Irregular,
}

impl Stride {
    /// Step between consecutive lanes, treating uniform values as step 0.
    #[inline]
    pub fn step(self) -> Option<i64> {
        match self {
            Stride::Uniform => Some(0),
            Stride::Linear(s) => Some(s),
            Stride::Irregular => None,
        }
    }
}

/// Strides of all varying values of a function.
#[derive(Debug, Clone, Default)]
pub struct StrideInfo {
    strides: FxHashMap<ValueId, Stride>,
}

impl StrideInfo {
    /// Compute strides in reverse post-order. Phis are irregular.
    pub fn compute(
        func: &Function,
        uniformity: &UniformityInfo,
        builtins: &dyn BuiltinInfo,
        dimension: u32,
    ) -> Self {
        let mut info = StrideInfo::default();
        let cfg = Cfg::build(func);
        for &block in cfg.rpo() {
            for &inst in func.block_insts(block) {
                let Some(result) = func.inst_result(inst) else {
                    continue;
                };
                if !uniformity.is_inst_varying(inst) {
                    continue;
                }
                let stride = info.stride_of_inst(func, builtins, dimension, inst);
                info.strides.insert(result, stride);
            }
        }
        info
    }

    /// Stride of a value. Values without a recorded stride are uniform.
    #[inline]
    pub fn stride(&self, v: ValueId) -> Stride {
        self.strides.get(&v).copied().unwrap_or(Stride::Uniform)
    }

    fn stride_of_inst(
        &self,
        func: &Function,
        builtins: &dyn BuiltinInfo,
        dimension: u32,
        inst: InstId,
    ) -> Stride {
        let linear = |step: Option<i64>| step.map_or(Stride::Irregular, Stride::Linear);
        match &func.inst(inst).kind {
            InstKind::Call { .. } => match classify_call(builtins, func, inst) {
                Some(BuiltinKind::LaneIdentity {
                    dimension: LaneDim::Index(d),
                }) if d == dimension => Stride::Linear(1),
                Some(BuiltinKind::LaneIdentity {
                    dimension: LaneDim::SubGroup,
                }) => Stride::Linear(1),
                _ => Stride::Irregular,
            },
            InstKind::Binary { op, lhs, rhs } => {
                let (a, b) = (self.stride(*lhs).step(), self.stride(*rhs).step());
                match op {
                    BinaryOp::Add => linear(a.zip(b).and_then(|(a, b)| a.checked_add(b))),
                    BinaryOp::Sub => linear(a.zip(b).and_then(|(a, b)| a.checked_sub(b))),
                    BinaryOp::Mul => match (func.as_const_int(*lhs), func.as_const_int(*rhs)) {
                        (_, Some(c)) => linear(a.and_then(|a| a.checked_mul(c))),
                        (Some(c), _) => linear(b.and_then(|b| b.checked_mul(c))),
                        _ => Stride::Irregular,
                    },
                    BinaryOp::Shl => match func.as_const_int(*rhs) {
                        Some(c) if (0..63).contains(&c) => {
                            linear(a.and_then(|a| a.checked_mul(1i64 << c)))
                        }
                        _ => Stride::Irregular,
                    },
                    _ => Stride::Irregular,
                }
            }
            InstKind::Cast {
                op: CastOp::SExt | CastOp::ZExt | CastOp::Trunc,
                value,
            } => self.stride(*value),
            InstKind::ElementPtr { base, index, elem } => {
                let size = elem.size_bytes() as i64;
                let base = self.stride(*base).step();
                let index = self.stride(*index).step();
                linear(
                    base.zip(index)
                        .and_then(|(b, i)| i.checked_mul(size).and_then(|s| s.checked_add(b))),
                )
            }
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => {
                let then_stride = self.stride(*then_value);
                if self.strides.contains_key(cond) || then_stride != self.stride(*else_value) {
                    Stride::Irregular
                } else {
                    then_stride
                }
            }
            _ => Stride::Irregular,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::StandardBuiltins;
    use lanewise_ir::{Builder, ParamAttrs, ScalarType, Type};

    #[test]
    fn test_address_strides() {
        let mut func = Function::new("k", Type::VOID);
        let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
        let n = func.add_param("n", Type::I64, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let zero = b.const_int(ScalarType::I32, 0);
        let two = b.const_int(ScalarType::I64, 2);
        let one = b.const_int(ScalarType::I64, 1);
        let gid32 = b.call_value("get_global_id", &[zero], Type::I32);
        let gid = b.cast(CastOp::SExt, gid32, ScalarType::I64);
        let off = b.add(gid, n);
        let p_contig = b.element_ptr(out, off, ScalarType::F32);
        let twice = b.mul(gid, two);
        let odd = b.add(twice, one);
        let p_inter = b.element_ptr(out, odd, ScalarType::F32);
        let sq = b.mul(gid, gid);
        let p_irreg = b.element_ptr(out, sq, ScalarType::F32);
        let shl = b.binary(BinaryOp::Shl, gid, one);
        b.ret(None);

        let builtins = StandardBuiltins::new();
        let uniformity = UniformityInfo::compute(&func, &builtins, 0);
        let info = StrideInfo::compute(&func, &uniformity, &builtins, 0);

        assert_eq!(info.stride(gid32), Stride::Linear(1));
        assert_eq!(info.stride(gid), Stride::Linear(1));
        assert_eq!(info.stride(n), Stride::Uniform);
        assert_eq!(info.stride(p_contig), Stride::Linear(4));
        assert_eq!(info.stride(twice), Stride::Linear(2));
        assert_eq!(info.stride(p_inter), Stride::Linear(8));
        assert_eq!(info.stride(sq), Stride::Irregular);
        assert_eq!(info.stride(p_irreg), Stride::Irregular);
        assert_eq!(info.stride(shl), Stride::Linear(2));
    }

    #[test]
    fn test_other_dimension_is_uniform() {
        let mut func = Function::new("k", Type::VOID);
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let one = b.const_int(ScalarType::I32, 1);
        let gid1 = b.call_value("get_global_id", &[one], Type::I64);
        b.ret(None);

        let builtins = StandardBuiltins::new();
        let uniformity = UniformityInfo::compute(&func, &builtins, 0);
        let info = StrideInfo::compute(&func, &uniformity, &builtins, 0);
        assert_eq!(info.stride(gid1), Stride::Uniform);

        let uniformity = UniformityInfo::compute(&func, &builtins, 1);
        let info = StrideInfo::compute(&func, &uniformity, &builtins, 1);
        assert_eq!(info.stride(gid1), Stride::Linear(1));
    }
}
