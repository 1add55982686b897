//! SSA function representation.
//!
//! A [`Function`] owns three arenas: values, instructions and blocks. Every
//! instruction that produces a value owns exactly one [`ValueData`] entry;
//! parameters, constants and `undef` are values without a defining
//! instruction.
//!
//! # Layout
//!
//! `layout` is the block order; the first block is the entry. Each block keeps
//! its instructions in program order, phis first and a single terminator last.
//!
//! # Deletion
//!
//! Removing an instruction unlinks it from its block and sets
//! [`InstFlags::DEAD`]. Ids are never reused, so side tables keyed by ids stay
//! valid across edits.

use super::arena::{Arena, Id, SecondaryMap};
use super::operators::{BinaryOp, CastOp, CmpOp, RecurKind, UnaryOp};
use super::types::{ScalarType, Type};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

/// Value identifier.
pub type ValueId = Id<ValueData>;
/// Instruction identifier.
pub type InstId = Id<InstData>;
/// Basic block identifier.
pub type BlockId = Id<BlockData>;

// =============================================================================
// Values
// =============================================================================

/// A compile-time constant. The value's [`Type`] decides its width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Bool(bool),
    /// Integer or pointer bits, sign-extended to 64 bits.
    Int(i64),
    Float(f64),
}

/// What defines a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    /// The n-th function parameter.
    Param(u32),
    Const(Constant),
    /// Result of an instruction.
    Inst(InstId),
    Undef,
}

/// A value with its type.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueData {
    pub kind: ValueKind,
    pub ty: Type,
}

bitflags::bitflags! {
    /// Parameter attributes.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ParamAttrs: u8 {
        /// Pointer does not alias any other pointer reachable by the kernel.
        const NOALIAS = 0b0000_0001;
        /// Memory behind the pointer is never written.
        const READONLY = 0b0000_0010;
    }
}

impl Default for ParamAttrs {
    fn default() -> Self {
        ParamAttrs::empty()
    }
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub attrs: ParamAttrs,
    pub value: ValueId,
}

// =============================================================================
// Instructions
// =============================================================================

/// Operation performed by an instruction.
///
/// All value-producing operations are element-wise on vectors; a scalar
/// operand next to vector operands is broadcast only where noted.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Binary {
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Unary {
        op: UnaryOp,
        operand: ValueId,
    },
    /// Produces `Bool` (or a vector of `Bool`).
    Cmp {
        op: CmpOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Converts to the instruction's result type.
    Cast {
        op: CastOp,
        value: ValueId,
    },
    /// A scalar condition picks whole operands; a vector condition picks
    /// per lane.
    Select {
        cond: ValueId,
        then_value: ValueId,
        else_value: ValueId,
    },
    /// `base + index * size_of(elem)`. A scalar base or index is broadcast.
    ElementPtr {
        base: ValueId,
        index: ValueId,
        elem: ScalarType,
    },
    /// Private buffer of `count` elements.
    Alloca {
        elem: ScalarType,
        count: u32,
    },
    /// Reads the result type from `ptr`. A vector result reads consecutive
    /// elements. Masked-off lanes read as zero and never touch memory.
    Load {
        ptr: ValueId,
        mask: Option<ValueId>,
        align: u32,
    },
    Store {
        ptr: ValueId,
        value: ValueId,
        mask: Option<ValueId>,
        align: u32,
    },
    /// Lane `i` reads element `i * stride` relative to `ptr`.
    InterleavedLoad {
        ptr: ValueId,
        stride: i64,
        mask: Option<ValueId>,
    },
    InterleavedStore {
        ptr: ValueId,
        value: ValueId,
        stride: i64,
        mask: Option<ValueId>,
    },
    /// Lane `i` reads through `ptrs[i]`.
    Gather {
        ptrs: ValueId,
        mask: Option<ValueId>,
    },
    Scatter {
        ptrs: ValueId,
        value: ValueId,
        mask: Option<ValueId>,
    },
    /// Call to a symbolic callee. Vector arguments call once per active lane.
    Call {
        callee: String,
        args: SmallVec<[ValueId; 4]>,
        mask: Option<ValueId>,
    },
    Phi {
        incoming: SmallVec<[(BlockId, ValueId); 2]>,
    },
    /// Broadcasts a scalar to every lane of the result type.
    Splat {
        value: ValueId,
    },
    /// `<0, 1, 2, ...>` with the result's lane count.
    StepVector,
    ExtractElement {
        vector: ValueId,
        index: ValueId,
    },
    InsertElement {
        vector: ValueId,
        value: ValueId,
        index: ValueId,
    },
    /// Lane `i` of the result is lane `mask[i]` of the concatenated sources.
    Shuffle {
        sources: SmallVec<[ValueId; 2]>,
        mask: Vec<u32>,
    },
    /// Folds all lanes in lane order.
    VectorReduce {
        kind: RecurKind,
        vector: ValueId,
    },
    Br {
        target: BlockId,
    },
    CondBr {
        cond: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Switch {
        value: ValueId,
        cases: Vec<(i64, BlockId)>,
        default: BlockId,
    },
    Ret {
        value: Option<ValueId>,
    },
    Unreachable,
}

impl InstKind {
    /// All value operands, in a fixed order (mask last).
    pub fn operands(&self) -> SmallVec<[ValueId; 4]> {
        let mut ops = SmallVec::new();
        match self {
            InstKind::Binary { lhs, rhs, .. } | InstKind::Cmp { lhs, rhs, .. } => {
                ops.push(*lhs);
                ops.push(*rhs);
            }
            InstKind::Unary { operand, .. } => ops.push(*operand),
            InstKind::Cast { value, .. } | InstKind::Splat { value } => ops.push(*value),
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => ops.extend([*cond, *then_value, *else_value]),
            InstKind::ElementPtr { base, index, .. } => ops.extend([*base, *index]),
            InstKind::Alloca { .. } | InstKind::StepVector | InstKind::Unreachable => {}
            InstKind::Br { .. } => {}
            InstKind::Load { ptr, mask, .. } | InstKind::InterleavedLoad { ptr, mask, .. } => {
                ops.push(*ptr);
                ops.extend(*mask);
            }
            InstKind::Store {
                ptr, value, mask, ..
            }
            | InstKind::InterleavedStore {
                ptr, value, mask, ..
            } => {
                ops.extend([*ptr, *value]);
                ops.extend(*mask);
            }
            InstKind::Gather { ptrs, mask } => {
                ops.push(*ptrs);
                ops.extend(*mask);
            }
            InstKind::Scatter { ptrs, value, mask } => {
                ops.extend([*ptrs, *value]);
                ops.extend(*mask);
            }
            InstKind::Call { args, mask, .. } => {
                ops.extend(args.iter().copied());
                ops.extend(*mask);
            }
            InstKind::Phi { incoming } => ops.extend(incoming.iter().map(|&(_, v)| v)),
            InstKind::ExtractElement { vector, index } => ops.extend([*vector, *index]),
            InstKind::InsertElement {
                vector,
                value,
                index,
            } => ops.extend([*vector, *value, *index]),
            InstKind::Shuffle { sources, .. } => ops.extend(sources.iter().copied()),
            InstKind::VectorReduce { vector, .. } => ops.push(*vector),
            InstKind::CondBr { cond, .. } => ops.push(*cond),
            InstKind::Switch { value, .. } => ops.push(*value),
            InstKind::Ret { value } => ops.extend(*value),
        }
        ops
    }

    /// Rewrite every value operand through `f`.
    pub fn map_operands(&mut self, mut f: impl FnMut(ValueId) -> ValueId) {
        match self {
            InstKind::Binary { lhs, rhs, .. } | InstKind::Cmp { lhs, rhs, .. } => {
                *lhs = f(*lhs);
                *rhs = f(*rhs);
            }
            InstKind::Unary { operand, .. } => *operand = f(*operand),
            InstKind::Cast { value, .. } | InstKind::Splat { value } => *value = f(*value),
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => {
                *cond = f(*cond);
                *then_value = f(*then_value);
                *else_value = f(*else_value);
            }
            InstKind::ElementPtr { base, index, .. } => {
                *base = f(*base);
                *index = f(*index);
            }
            InstKind::Alloca { .. }
            | InstKind::StepVector
            | InstKind::Unreachable
            | InstKind::Br { .. } => {}
            InstKind::Load { ptr, mask, .. } | InstKind::InterleavedLoad { ptr, mask, .. } => {
                *ptr = f(*ptr);
                map_mask(mask, &mut f);
            }
            InstKind::Store {
                ptr, value, mask, ..
            }
            | InstKind::InterleavedStore {
                ptr, value, mask, ..
            } => {
                *ptr = f(*ptr);
                *value = f(*value);
                map_mask(mask, &mut f);
            }
            InstKind::Gather { ptrs, mask } => {
                *ptrs = f(*ptrs);
                map_mask(mask, &mut f);
            }
            InstKind::Scatter { ptrs, value, mask } => {
                *ptrs = f(*ptrs);
                *value = f(*value);
                map_mask(mask, &mut f);
            }
            InstKind::Call { args, mask, .. } => {
                for arg in args.iter_mut() {
                    *arg = f(*arg);
                }
                map_mask(mask, &mut f);
            }
            InstKind::Phi { incoming } => {
                for (_, v) in incoming.iter_mut() {
                    *v = f(*v);
                }
            }
            InstKind::ExtractElement { vector, index } => {
                *vector = f(*vector);
                *index = f(*index);
            }
            InstKind::InsertElement {
                vector,
                value,
                index,
            } => {
                *vector = f(*vector);
                *value = f(*value);
                *index = f(*index);
            }
            InstKind::Shuffle { sources, .. } => {
                for s in sources.iter_mut() {
                    *s = f(*s);
                }
            }
            InstKind::VectorReduce { vector, .. } => *vector = f(*vector),
            InstKind::CondBr { cond, .. } => *cond = f(*cond),
            InstKind::Switch { value, .. } => *value = f(*value),
            InstKind::Ret { value } => {
                if let Some(v) = value {
                    *v = f(*v);
                }
            }
        }
    }

    /// Successor blocks of a terminator (empty otherwise).
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            InstKind::Br { target } => smallvec::smallvec![*target],
            InstKind::CondBr {
                then_block,
                else_block,
                ..
            } => smallvec::smallvec![*then_block, *else_block],
            InstKind::Switch { cases, default, .. } => {
                let mut succs: SmallVec<[BlockId; 2]> = SmallVec::new();
                succs.push(*default);
                succs.extend(cases.iter().map(|&(_, b)| b));
                succs
            }
            _ => SmallVec::new(),
        }
    }

    /// Rewrite successor blocks through `f`.
    pub fn map_successors(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        match self {
            InstKind::Br { target } => *target = f(*target),
            InstKind::CondBr {
                then_block,
                else_block,
                ..
            } => {
                *then_block = f(*then_block);
                *else_block = f(*else_block);
            }
            InstKind::Switch { cases, default, .. } => {
                *default = f(*default);
                for (_, b) in cases.iter_mut() {
                    *b = f(*b);
                }
            }
            _ => {}
        }
    }

    /// Check if this instruction ends a block.
    #[inline]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Br { .. }
                | InstKind::CondBr { .. }
                | InstKind::Switch { .. }
                | InstKind::Ret { .. }
                | InstKind::Unreachable
        )
    }

    /// Check if this is a phi.
    #[inline]
    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }

    /// Check if the instruction may write memory. Calls are assumed to.
    pub fn may_write_memory(&self) -> bool {
        matches!(
            self,
            InstKind::Store { .. }
                | InstKind::InterleavedStore { .. }
                | InstKind::Scatter { .. }
                | InstKind::Call { .. }
        )
    }

    /// Check if the instruction may read memory. Calls are assumed to.
    pub fn may_read_memory(&self) -> bool {
        matches!(
            self,
            InstKind::Load { .. }
                | InstKind::InterleavedLoad { .. }
                | InstKind::Gather { .. }
                | InstKind::Call { .. }
        )
    }

    /// The mask operand of a predicated operation.
    pub fn mask(&self) -> Option<ValueId> {
        match self {
            InstKind::Load { mask, .. }
            | InstKind::Store { mask, .. }
            | InstKind::InterleavedLoad { mask, .. }
            | InstKind::InterleavedStore { mask, .. }
            | InstKind::Gather { mask, .. }
            | InstKind::Scatter { mask, .. }
            | InstKind::Call { mask, .. } => *mask,
            _ => None,
        }
    }

    /// Replace the mask operand. No effect on unpredicated operations.
    pub fn set_mask(&mut self, new_mask: Option<ValueId>) {
        match self {
            InstKind::Load { mask, .. }
            | InstKind::Store { mask, .. }
            | InstKind::InterleavedLoad { mask, .. }
            | InstKind::InterleavedStore { mask, .. }
            | InstKind::Gather { mask, .. }
            | InstKind::Scatter { mask, .. }
            | InstKind::Call { mask, .. } => *mask = new_mask,
            _ => {}
        }
    }

    /// Textual mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            InstKind::Binary { op, .. } => op.name(),
            InstKind::Unary { op, .. } => op.name(),
            InstKind::Cmp { .. } => "cmp",
            InstKind::Cast { op, .. } => op.name(),
            InstKind::Select { .. } => "select",
            InstKind::ElementPtr { .. } => "elementptr",
            InstKind::Alloca { .. } => "alloca",
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::InterleavedLoad { .. } => "interleaved.load",
            InstKind::InterleavedStore { .. } => "interleaved.store",
            InstKind::Gather { .. } => "gather",
            InstKind::Scatter { .. } => "scatter",
            InstKind::Call { .. } => "call",
            InstKind::Phi { .. } => "phi",
            InstKind::Splat { .. } => "splat",
            InstKind::StepVector => "stepvector",
            InstKind::ExtractElement { .. } => "extractelement",
            InstKind::InsertElement { .. } => "insertelement",
            InstKind::Shuffle { .. } => "shuffle",
            InstKind::VectorReduce { .. } => "reduce",
            InstKind::Br { .. } => "br",
            InstKind::CondBr { .. } => "condbr",
            InstKind::Switch { .. } => "switch",
            InstKind::Ret { .. } => "ret",
            InstKind::Unreachable => "unreachable",
        }
    }
}

bitflags::bitflags! {
    /// Instruction state flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct InstFlags: u8 {
        /// Removed from its block; the id must not be referenced.
        const DEAD = 0b0000_0001;
    }
}

impl Default for InstFlags {
    fn default() -> Self {
        InstFlags::empty()
    }
}

/// An instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct InstData {
    pub kind: InstKind,
    /// The produced value, if the result type is not void.
    pub result: Option<ValueId>,
    /// Owning block.
    pub block: BlockId,
    pub flags: InstFlags,
}

impl InstData {
    /// Check if the instruction was removed.
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.flags.contains(InstFlags::DEAD)
    }
}

fn map_mask(mask: &mut Option<ValueId>, f: &mut impl FnMut(ValueId) -> ValueId) {
    if let Some(m) = mask {
        *m = f(*m);
    }
}

// =============================================================================
// Blocks
// =============================================================================

/// A basic block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockData {
    pub name: String,
    /// Instructions in program order.
    pub insts: Vec<InstId>,
}

// =============================================================================
// Function
// =============================================================================

/// Lane-group metadata carried by a vectorized function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaneGroup {
    /// Lanes per invocation (minimum when scalable).
    pub lanes: u32,
    /// Whether the real lane count is `lanes × vscale`.
    pub scalable: bool,
}

/// A kernel function in SSA form.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret_ty: Type,
    pub values: Arena<ValueData>,
    pub insts: Arena<InstData>,
    pub blocks: Arena<BlockData>,
    /// Block order; the first block is the entry.
    pub layout: Vec<BlockId>,
    /// Set on functions that process a whole lane group per invocation.
    pub vector_width: Option<LaneGroup>,
}

impl Function {
    /// Create an empty function.
    pub fn new(name: impl Into<String>, ret_ty: Type) -> Self {
        Function {
            name: name.into(),
            params: Vec::new(),
            ret_ty,
            values: Arena::new(),
            insts: Arena::new(),
            blocks: Arena::new(),
            layout: Vec::new(),
            vector_width: None,
        }
    }

    // -------------------------------------------------------------------------
    // Parameters and constants
    // -------------------------------------------------------------------------

    /// Append a parameter and return its value.
    pub fn add_param(&mut self, name: impl Into<String>, ty: Type, attrs: ParamAttrs) -> ValueId {
        let index = self.params.len() as u32;
        let value = self.values.alloc(ValueData {
            kind: ValueKind::Param(index),
            ty,
        });
        self.params.push(Param {
            name: name.into(),
            ty,
            attrs,
            value,
        });
        value
    }

    /// Value of the n-th parameter.
    #[inline]
    pub fn param_value(&self, index: usize) -> ValueId {
        self.params[index].value
    }

    /// Create a constant of the given type.
    pub fn constant(&mut self, ty: Type, c: Constant) -> ValueId {
        self.values.alloc(ValueData {
            kind: ValueKind::Const(c),
            ty,
        })
    }

    /// Integer (or pointer) constant.
    pub fn const_int(&mut self, ty: ScalarType, v: i64) -> ValueId {
        self.constant(Type::Scalar(ty), Constant::Int(v))
    }

    /// Boolean constant.
    pub fn const_bool(&mut self, v: bool) -> ValueId {
        self.constant(Type::BOOL, Constant::Bool(v))
    }

    /// Floating-point constant.
    pub fn const_float(&mut self, ty: ScalarType, v: f64) -> ValueId {
        self.constant(Type::Scalar(ty), Constant::Float(v))
    }

    /// An undefined value of the given type.
    pub fn undef(&mut self, ty: Type) -> ValueId {
        self.values.alloc(ValueData {
            kind: ValueKind::Undef,
            ty,
        })
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Value data.
    #[inline]
    pub fn value(&self, v: ValueId) -> &ValueData {
        &self.values[v]
    }

    /// Type of a value.
    #[inline]
    pub fn value_ty(&self, v: ValueId) -> Type {
        self.values[v].ty
    }

    /// Constant payload, if `v` is a constant.
    #[inline]
    pub fn as_const(&self, v: ValueId) -> Option<Constant> {
        match self.values[v].kind {
            ValueKind::Const(c) => Some(c),
            _ => None,
        }
    }

    /// Integer payload, if `v` is an integer constant.
    #[inline]
    pub fn as_const_int(&self, v: ValueId) -> Option<i64> {
        match self.as_const(v) {
            Some(Constant::Int(i)) => Some(i),
            _ => None,
        }
    }

    /// Defining instruction of a value.
    #[inline]
    pub fn def_inst(&self, v: ValueId) -> Option<InstId> {
        match self.values[v].kind {
            ValueKind::Inst(inst) => Some(inst),
            _ => None,
        }
    }

    /// Instruction data.
    #[inline]
    pub fn inst(&self, id: InstId) -> &InstData {
        &self.insts[id]
    }

    /// Mutable instruction data.
    #[inline]
    pub fn inst_mut(&mut self, id: InstId) -> &mut InstData {
        &mut self.insts[id]
    }

    /// Result value of an instruction.
    #[inline]
    pub fn inst_result(&self, id: InstId) -> Option<ValueId> {
        self.insts[id].result
    }

    /// Block data.
    #[inline]
    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id]
    }

    /// Instructions of a block in program order.
    #[inline]
    pub fn block_insts(&self, id: BlockId) -> &[InstId] {
        &self.blocks[id].insts
    }

    /// Entry block.
    #[inline]
    pub fn entry_block(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    /// Terminator of a block, if its last instruction is one.
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block]
            .insts
            .last()
            .copied()
            .filter(|&i| self.insts[i].kind.is_terminator())
    }

    /// Successors of a block.
    pub fn successors(&self, block: BlockId) -> SmallVec<[BlockId; 2]> {
        self.terminator(block)
            .map(|t| self.insts[t].kind.successors())
            .unwrap_or_default()
    }

    /// Position of an instruction within its block.
    pub fn inst_position(&self, id: InstId) -> Option<usize> {
        let block = self.insts[id].block;
        self.blocks[block].insts.iter().position(|&i| i == id)
    }

    /// Index of the first non-phi instruction of a block.
    pub fn first_non_phi(&self, block: BlockId) -> usize {
        self.blocks[block]
            .insts
            .iter()
            .position(|&i| !self.insts[i].kind.is_phi())
            .unwrap_or(self.blocks[block].insts.len())
    }

    /// All live instructions in layout order.
    pub fn insts_in_order(&self) -> Vec<InstId> {
        self.layout
            .iter()
            .flat_map(|&b| self.blocks[b].insts.iter().copied())
            .collect()
    }

    /// Number of live instructions.
    pub fn num_live_insts(&self) -> usize {
        self.layout.iter().map(|&b| self.blocks[b].insts.len()).sum()
    }

    /// Users of every value (each user listed once), in layout order.
    pub fn users(&self) -> SecondaryMap<ValueData, Vec<InstId>> {
        let mut users: SecondaryMap<ValueData, Vec<InstId>> =
            SecondaryMap::with_capacity(self.values.len());
        for inst in self.insts_in_order() {
            let mut seen: SmallVec<[ValueId; 4]> = SmallVec::new();
            for op in self.insts[inst].kind.operands() {
                if !seen.contains(&op) {
                    seen.push(op);
                    users.entry(op).push(inst);
                }
            }
        }
        users
    }

    /// Check if a value has a vector type anywhere in the function.
    pub fn has_vector_values(&self) -> bool {
        self.params.iter().any(|p| p.ty.is_vector())
            || self.ret_ty.is_vector()
            || self.insts_in_order().into_iter().any(|i| {
                self.insts[i]
                    .result
                    .is_some_and(|v| self.values[v].ty.is_vector())
            })
    }

    // -------------------------------------------------------------------------
    // Editing
    // -------------------------------------------------------------------------

    /// Append a new empty block to the layout.
    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let block = self.blocks.alloc(BlockData {
            name: name.into(),
            insts: Vec::new(),
        });
        self.layout.push(block);
        block
    }

    /// Create an instruction at `index` within `block`.
    ///
    /// A value is allocated for any non-void `ty`.
    pub fn insert_inst(
        &mut self,
        block: BlockId,
        index: usize,
        kind: InstKind,
        ty: Type,
    ) -> InstId {
        let inst = self.insts.next_id();
        let result = if ty.is_void() {
            None
        } else {
            Some(self.values.alloc(ValueData {
                kind: ValueKind::Inst(inst),
                ty,
            }))
        };
        let id = self.insts.alloc(InstData {
            kind,
            result,
            block,
            flags: InstFlags::empty(),
        });
        debug_assert_eq!(id, inst);
        self.blocks[block].insts.insert(index, id);
        id
    }

    /// Unlink an instruction from its block and mark it dead.
    pub fn remove_inst(&mut self, id: InstId) {
        if self.insts[id].is_dead() {
            return;
        }
        let block = self.insts[id].block;
        self.blocks[block].insts.retain(|&i| i != id);
        self.insts[id].flags.insert(InstFlags::DEAD);
    }

    /// Replace every use of `old` with `new` in live instructions.
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        for inst in self.insts_in_order() {
            self.insts[inst]
                .kind
                .map_operands(|v| if v == old { new } else { v });
        }
    }

    /// Remove a block and all of its instructions from the function.
    pub fn remove_block(&mut self, block: BlockId) {
        for inst in self.blocks[block].insts.clone() {
            self.insts[inst].flags.insert(InstFlags::DEAD);
        }
        self.blocks[block].insts.clear();
        self.layout.retain(|&b| b != block);
    }

    /// Remove blocks not reachable from the entry and drop phi inputs that
    /// came from them. Returns the number of removed blocks.
    pub fn remove_unreachable_blocks(&mut self) -> usize {
        let Some(entry) = self.entry_block() else {
            return 0;
        };
        let mut reachable = FxHashSet::default();
        let mut stack = vec![entry];
        while let Some(block) = stack.pop() {
            if reachable.insert(block) {
                stack.extend(self.successors(block));
            }
        }

        let dead: Vec<BlockId> = self
            .layout
            .iter()
            .copied()
            .filter(|b| !reachable.contains(b))
            .collect();
        if dead.is_empty() {
            return 0;
        }
        for &block in &dead {
            self.remove_block(block);
        }
        for inst in self.insts_in_order() {
            if let InstKind::Phi { incoming } = &mut self.insts[inst].kind {
                incoming.retain(|(pred, _)| reachable.contains(pred));
            }
        }
        dead.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
