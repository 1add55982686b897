//! Cursor-based instruction builder.
//!
//! A [`Builder`] borrows a [`Function`] mutably and inserts instructions at an
//! [`InsertPoint`]. Result types are derived from operand types, so callers
//! only spell out types where the IR cannot infer them (loads, phis, calls).
//!
//! Consecutive insertions keep program order for every insert point: an
//! `After` cursor advances past each new instruction.

use super::function::{BlockId, Function, InstId, InstKind, ValueId};
use super::operators::{BinaryOp, CastOp, CmpOp, RecurKind, UnaryOp};
use super::types::{ScalarType, Type, VectorType};
use smallvec::SmallVec;

// =============================================================================
// Insert Point
// =============================================================================

/// Where the next instruction goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    /// Append at the end of the block.
    End(BlockId),
    /// Right before the block's terminator (at the end if there is none).
    BeforeTerminator(BlockId),
    /// After the block's phis.
    BlockStart(BlockId),
    /// Right before an instruction.
    Before(InstId),
    /// Right after an instruction.
    After(InstId),
}

// =============================================================================
// Builder
// =============================================================================

/// Instruction builder over a mutable function.
pub struct Builder<'f> {
    func: &'f mut Function,
    point: InsertPoint,
}

impl<'f> Builder<'f> {
    /// Create a builder positioned at `point`.
    pub fn new(func: &'f mut Function, point: InsertPoint) -> Self {
        Builder { func, point }
    }

    /// Builder appending to the end of `block`.
    pub fn at_end(func: &'f mut Function, block: BlockId) -> Self {
        Self::new(func, InsertPoint::End(block))
    }

    /// Move the cursor.
    #[inline]
    pub fn set_point(&mut self, point: InsertPoint) {
        self.point = point;
    }

    /// Current cursor.
    #[inline]
    pub fn point(&self) -> InsertPoint {
        self.point
    }

    /// The function being built.
    #[inline]
    pub fn func(&mut self) -> &mut Function {
        &mut *self.func
    }

    /// Read-only view of the function.
    #[inline]
    pub fn func_ref(&self) -> &Function {
        &*self.func
    }

    /// Insert an instruction of the given result type at the cursor.
    pub fn insert(&mut self, kind: InstKind, ty: Type) -> InstId {
        let (block, index) = self.resolve();
        let inst = self.func.insert_inst(block, index, kind, ty);
        match self.point {
            InsertPoint::After(_) | InsertPoint::BlockStart(_) => {
                self.point = InsertPoint::After(inst);
            }
            _ => {}
        }
        inst
    }

    /// Insert a value-producing instruction and return its value.
    ///
    /// Yields `ValueId::INVALID` for a void type, which the verifier rejects
    /// at any use.
    pub fn insert_value(&mut self, kind: InstKind, ty: Type) -> ValueId {
        let inst = self.insert(kind, ty);
        self.func.inst_result(inst).unwrap_or(ValueId::INVALID)
    }

    fn resolve(&self) -> (BlockId, usize) {
        match self.point {
            InsertPoint::End(block) => (block, self.func.block_insts(block).len()),
            InsertPoint::BeforeTerminator(block) => {
                let len = self.func.block_insts(block).len();
                match self.func.terminator(block) {
                    Some(_) => (block, len - 1),
                    None => (block, len),
                }
            }
            InsertPoint::BlockStart(block) => (block, self.func.first_non_phi(block)),
            InsertPoint::Before(inst) => {
                let block = self.func.inst(inst).block;
                (block, self.func.inst_position(inst).unwrap_or(0))
            }
            InsertPoint::After(inst) => {
                let block = self.func.inst(inst).block;
                let index = self
                    .func
                    .inst_position(inst)
                    .map(|p| p + 1)
                    .unwrap_or_else(|| self.func.block_insts(block).len());
                (block, index)
            }
        }
    }

    // =========================================================================
    // Constants
    // =========================================================================

    pub fn const_int(&mut self, ty: ScalarType, v: i64) -> ValueId {
        self.func.const_int(ty, v)
    }

    pub fn const_bool(&mut self, v: bool) -> ValueId {
        self.func.const_bool(v)
    }

    pub fn const_float(&mut self, ty: ScalarType, v: f64) -> ValueId {
        self.func.const_float(ty, v)
    }

    // =========================================================================
    // Arithmetic
    // =========================================================================

    pub fn binary(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.func.value_ty(lhs);
        self.insert_value(InstKind::Binary { op, lhs, rhs }, ty)
    }

    pub fn add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn and(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::And, lhs, rhs)
    }

    pub fn or(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Or, lhs, rhs)
    }

    pub fn unary(&mut self, op: UnaryOp, operand: ValueId) -> ValueId {
        let ty = self.func.value_ty(operand);
        self.insert_value(InstKind::Unary { op, operand }, ty)
    }

    pub fn not(&mut self, operand: ValueId) -> ValueId {
        self.unary(UnaryOp::Not, operand)
    }

    pub fn cmp(&mut self, op: CmpOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.func.value_ty(lhs).with_element(ScalarType::Bool);
        self.insert_value(InstKind::Cmp { op, lhs, rhs }, ty)
    }

    /// Convert to `to`, keeping the operand's lane shape.
    pub fn cast(&mut self, op: CastOp, value: ValueId, to: ScalarType) -> ValueId {
        let ty = self.func.value_ty(value).with_element(to);
        self.insert_value(InstKind::Cast { op, value }, ty)
    }

    pub fn select(&mut self, cond: ValueId, then_value: ValueId, else_value: ValueId) -> ValueId {
        let ty = self.func.value_ty(then_value);
        self.insert_value(
            InstKind::Select {
                cond,
                then_value,
                else_value,
            },
            ty,
        )
    }

    // =========================================================================
    // Memory
    // =========================================================================

    /// Address arithmetic. The result is a vector of pointers when either
    /// operand is a vector.
    pub fn element_ptr(&mut self, base: ValueId, index: ValueId, elem: ScalarType) -> ValueId {
        let base_ty = self.func.value_ty(base);
        let index_ty = self.func.value_ty(index);
        let ty = match (base_ty.as_vector(), index_ty.as_vector()) {
            (Some(shape), _) | (None, Some(shape)) => Type::PTR.with_lanes(shape),
            (None, None) => Type::PTR,
        };
        self.insert_value(InstKind::ElementPtr { base, index, elem }, ty)
    }

    pub fn alloca(&mut self, elem: ScalarType, count: u32) -> ValueId {
        self.insert_value(InstKind::Alloca { elem, count }, Type::PTR)
    }

    pub fn load(&mut self, ty: Type, ptr: ValueId, mask: Option<ValueId>, align: u32) -> ValueId {
        self.insert_value(InstKind::Load { ptr, mask, align }, ty)
    }

    pub fn store(
        &mut self,
        ptr: ValueId,
        value: ValueId,
        mask: Option<ValueId>,
        align: u32,
    ) -> InstId {
        self.insert(
            InstKind::Store {
                ptr,
                value,
                mask,
                align,
            },
            Type::VOID,
        )
    }

    pub fn interleaved_load(
        &mut self,
        ty: Type,
        ptr: ValueId,
        stride: i64,
        mask: Option<ValueId>,
    ) -> ValueId {
        self.insert_value(InstKind::InterleavedLoad { ptr, stride, mask }, ty)
    }

    pub fn interleaved_store(
        &mut self,
        ptr: ValueId,
        value: ValueId,
        stride: i64,
        mask: Option<ValueId>,
    ) -> InstId {
        self.insert(
            InstKind::InterleavedStore {
                ptr,
                value,
                stride,
                mask,
            },
            Type::VOID,
        )
    }

    pub fn gather(&mut self, ty: Type, ptrs: ValueId, mask: Option<ValueId>) -> ValueId {
        self.insert_value(InstKind::Gather { ptrs, mask }, ty)
    }

    pub fn scatter(&mut self, ptrs: ValueId, value: ValueId, mask: Option<ValueId>) -> InstId {
        self.insert(InstKind::Scatter { ptrs, value, mask }, Type::VOID)
    }

    // =========================================================================
    // Calls and phis
    // =========================================================================

    pub fn call(
        &mut self,
        callee: impl Into<String>,
        args: &[ValueId],
        mask: Option<ValueId>,
        ret_ty: Type,
    ) -> InstId {
        self.insert(
            InstKind::Call {
                callee: callee.into(),
                args: SmallVec::from_slice(args),
                mask,
            },
            ret_ty,
        )
    }

    /// Unmasked call returning a value.
    pub fn call_value(
        &mut self,
        callee: impl Into<String>,
        args: &[ValueId],
        ret_ty: Type,
    ) -> ValueId {
        let inst = self.call(callee, args, None, ret_ty);
        self.func.inst_result(inst).unwrap_or(ValueId::INVALID)
    }

    pub fn phi(&mut self, ty: Type, incoming: &[(BlockId, ValueId)]) -> ValueId {
        self.insert_value(
            InstKind::Phi {
                incoming: SmallVec::from_slice(incoming),
            },
            ty,
        )
    }

    // =========================================================================
    // Vector operations
    // =========================================================================

    /// Broadcast to the lane shape of `shape`.
    pub fn splat(&mut self, value: ValueId, shape: VectorType) -> ValueId {
        let ty = self.func.value_ty(value).with_lanes(shape);
        self.insert_value(InstKind::Splat { value }, ty)
    }

    pub fn step_vector(&mut self, ty: Type) -> ValueId {
        self.insert_value(InstKind::StepVector, ty)
    }

    pub fn extract_element(&mut self, vector: ValueId, index: ValueId) -> ValueId {
        let elem = self.func.value_ty(vector).element().map(Type::Scalar);
        self.insert_value(
            InstKind::ExtractElement { vector, index },
            elem.unwrap_or(Type::VOID),
        )
    }

    pub fn insert_element(&mut self, vector: ValueId, value: ValueId, index: ValueId) -> ValueId {
        let ty = self.func.value_ty(vector);
        self.insert_value(
            InstKind::InsertElement {
                vector,
                value,
                index,
            },
            ty,
        )
    }

    /// Shuffle with a fixed-width result of `mask.len()` lanes.
    pub fn shuffle(&mut self, sources: &[ValueId], mask: Vec<u32>) -> ValueId {
        let elem = sources
            .first()
            .and_then(|&s| self.func.value_ty(s).element())
            .unwrap_or(ScalarType::I32);
        let ty = Type::vector(elem, mask.len() as u32);
        self.insert_value(
            InstKind::Shuffle {
                sources: SmallVec::from_slice(sources),
                mask,
            },
            ty,
        )
    }

    pub fn vector_reduce(&mut self, kind: RecurKind, vector: ValueId) -> ValueId {
        let elem = self.func.value_ty(vector).element().map(Type::Scalar);
        self.insert_value(InstKind::VectorReduce { kind, vector }, elem.unwrap_or(Type::VOID))
    }

    // =========================================================================
    // Terminators
    // =========================================================================

    pub fn br(&mut self, target: BlockId) -> InstId {
        self.insert(InstKind::Br { target }, Type::VOID)
    }

    pub fn cond_br(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) -> InstId {
        self.insert(
            InstKind::CondBr {
                cond,
                then_block,
                else_block,
            },
            Type::VOID,
        )
    }

    pub fn switch(
        &mut self,
        value: ValueId,
        cases: Vec<(i64, BlockId)>,
        default: BlockId,
    ) -> InstId {
        self.insert(
            InstKind::Switch {
                value,
                cases,
                default,
            },
            Type::VOID,
        )
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> InstId {
        self.insert(InstKind::Ret { value }, Type::VOID)
    }

    pub fn unreachable(&mut self) -> InstId {
        self.insert(InstKind::Unreachable, Type::VOID)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::ParamAttrs;

    #[test]
    fn test_after_cursor_keeps_order() {
        let mut func = Function::new("f", Type::VOID);
        let x = func.add_param("x", Type::I32, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let first = b.add(x, x);
        b.ret(None);

        let anchor = func.def_inst(first).expect("instruction result");
        let mut b = Builder::new(&mut func, InsertPoint::After(anchor));
        let second = b.mul(first, x);
        let third = b.add(second, x);

        let order: Vec<_> = func
            .block_insts(entry)
            .iter()
            .filter_map(|&i| func.inst_result(i))
            .collect();
        assert_eq!(order, vec![first, second, third]);
    }

    #[test]
    fn test_before_terminator() {
        let mut func = Function::new("f", Type::I32);
        let x = func.add_param("x", Type::I32, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        b.ret(Some(x));
        b.set_point(InsertPoint::BeforeTerminator(entry));
        let y = b.add(x, x);

        let insts = func.block_insts(entry);
        assert_eq!(func.inst_result(insts[0]), Some(y));
        assert!(func.inst(insts[1]).kind.is_terminator());
    }

    #[test]
    fn test_inferred_types() {
        let mut func = Function::new("f", Type::VOID);
        let base = func.add_param("p", Type::PTR, ParamAttrs::NOALIAS);
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);

        let shape = VectorType::fixed(ScalarType::I64, 4);
        let step = b.step_vector(Type::vector(ScalarType::I64, 4));
        let ptrs = b.element_ptr(base, step, ScalarType::F32);
        let c = b.const_int(ScalarType::I64, 3);
        let splat = b.splat(c, shape);
        let lt = b.cmp(CmpOp::Slt, step, splat);
        let narrow = b.cast(CastOp::Trunc, step, ScalarType::I32);

        assert_eq!(func.value_ty(ptrs), Type::vector(ScalarType::Ptr, 4));
        assert_eq!(func.value_ty(lt), Type::vector(ScalarType::Bool, 4));
        assert_eq!(func.value_ty(narrow), Type::vector(ScalarType::I32, 4));
    }

    #[test]
    fn test_shuffle_and_reduce_types() {
        let mut func = Function::new("f", Type::VOID);
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let v = b.step_vector(Type::vector(ScalarType::I32, 4));
        let s = b.shuffle(&[v, v], vec![0, 4, 1, 5, 2, 6, 3, 7]);
        let r = b.vector_reduce(RecurKind::Add, s);

        assert_eq!(func.value_ty(s), Type::vector(ScalarType::I32, 8));
        assert_eq!(func.value_ty(r), Type::I32);
    }
}
