//! Structural and type verifier.
//!
//! Checks, in order:
//! 1. every block ends in exactly one terminator and phis lead their block
//! 2. phi inputs match the block's predecessors one-to-one
//! 3. operands refer to live values of matching types
//! 4. definitions dominate their uses (phi uses at the end of the incoming
//!    block)

use super::cfg::{Cfg, DominatorTree};
use super::function::{BlockId, Function, InstId, InstKind, ValueId, ValueKind};
use super::types::{ScalarType, Type};
use rustc_hash::FxHashMap;
use std::fmt;

/// A verifier finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    pub function: String,
    pub inst: Option<InstId>,
    pub message: String,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inst {
            Some(inst) => write!(f, "in @{} at inst {}: {}", self.function, inst, self.message),
            None => write!(f, "in @{}: {}", self.function, self.message),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Result type for verification.
pub type VerifyResult<T> = Result<T, VerifyError>;

/// Verify a function.
pub fn verify_function(func: &Function) -> VerifyResult<()> {
    Verifier::new(func).run()
}

struct Verifier<'a> {
    func: &'a Function,
}

impl<'a> Verifier<'a> {
    fn new(func: &'a Function) -> Self {
        Verifier { func }
    }

    fn error(&self, inst: Option<InstId>, message: impl Into<String>) -> VerifyError {
        VerifyError {
            function: self.func.name.clone(),
            inst,
            message: message.into(),
        }
    }

    fn run(&self) -> VerifyResult<()> {
        let func = self.func;
        if func.layout.is_empty() {
            return Err(self.error(None, "function has no blocks"));
        }
        for &block in &func.layout {
            self.check_block_shape(block)?;
        }

        let cfg = Cfg::build(func);
        let dom = DominatorTree::build(&cfg);
        let mut position: FxHashMap<InstId, usize> = FxHashMap::default();
        for &block in &func.layout {
            for (i, &inst) in func.block_insts(block).iter().enumerate() {
                position.insert(inst, i);
            }
        }

        for &block in &func.layout {
            for &inst in func.block_insts(block) {
                let data = func.inst(inst);
                if data.is_dead() {
                    return Err(self.error(Some(inst), "dead instruction still linked"));
                }
                if data.block != block {
                    return Err(self.error(Some(inst), "instruction block link is stale"));
                }
                self.check_types(inst)?;
                if cfg.is_reachable(block) {
                    self.check_dominance(inst, &cfg, &dom, &position)?;
                }
            }
            if cfg.is_reachable(block) {
                self.check_phis(block, &cfg)?;
            }
        }
        Ok(())
    }

    fn check_block_shape(&self, block: BlockId) -> VerifyResult<()> {
        let func = self.func;
        let insts = func.block_insts(block);
        let name = &func.block(block).name;
        let Some(&last) = insts.last() else {
            return Err(self.error(None, format!("block {} is empty", name)));
        };
        if !func.inst(last).kind.is_terminator() {
            return Err(self.error(Some(last), format!("block {} lacks a terminator", name)));
        }
        let mut seen_non_phi = false;
        for &inst in &insts[..insts.len() - 1] {
            let kind = &func.inst(inst).kind;
            if kind.is_terminator() {
                return Err(self.error(Some(inst), "terminator in the middle of a block"));
            }
            if kind.is_phi() && seen_non_phi {
                return Err(self.error(Some(inst), "phi after a non-phi instruction"));
            }
            seen_non_phi |= !kind.is_phi();
        }
        for succ in func.successors(block) {
            if !func.layout.contains(&succ) {
                return Err(self.error(Some(last), "branch to a removed block"));
            }
        }
        Ok(())
    }

    fn check_phis(&self, block: BlockId, cfg: &Cfg) -> VerifyResult<()> {
        let func = self.func;
        let preds = cfg.predecessors(block);
        for &inst in func.block_insts(block) {
            let InstKind::Phi { incoming } = &func.inst(inst).kind else {
                continue;
            };
            for &pred in preds {
                let count = incoming.iter().filter(|(b, _)| *b == pred).count();
                if count != 1 {
                    return Err(self.error(
                        Some(inst),
                        format!("phi has {} inputs for predecessor {}", count, pred),
                    ));
                }
            }
            if let Some((b, _)) = incoming.iter().find(|(b, _)| !preds.contains(b)) {
                return Err(self.error(Some(inst), format!("phi input from non-predecessor {}", b)));
            }
        }
        Ok(())
    }

    fn value_ty(&self, inst: InstId, v: ValueId) -> VerifyResult<Type> {
        let func = self.func;
        if !v.is_valid() || v.as_usize() >= func.values.len() {
            return Err(self.error(Some(inst), "operand is not a value"));
        }
        if let ValueKind::Inst(def) = func.value(v).kind {
            if func.inst(def).is_dead() {
                return Err(self.error(Some(inst), format!("use of deleted value %{}", v)));
            }
        }
        Ok(func.value_ty(v))
    }

    fn expect(&self, inst: InstId, cond: bool, message: &str) -> VerifyResult<()> {
        if cond {
            Ok(())
        } else {
            Err(self.error(Some(inst), message.to_string()))
        }
    }

    fn check_types(&self, inst: InstId) -> VerifyResult<()> {
        let func = self.func;
        let data = func.inst(inst);
        let result_ty = data.result.map(|r| func.value_ty(r)).unwrap_or(Type::VOID);
        let mut tys = Vec::new();
        for op in data.kind.operands() {
            tys.push(self.value_ty(inst, op)?);
        }
        let same_shape = |a: Type, b: Type| {
            a.with_element(ScalarType::Bool) == b.with_element(ScalarType::Bool)
        };
        let is_mask_for = |mask: Type, data_ty: Type| {
            mask.element() == Some(ScalarType::Bool)
                && (mask.is_scalar() || same_shape(mask, data_ty))
        };

        match &data.kind {
            InstKind::Binary { op, .. } => {
                self.expect(inst, tys[0] == tys[1], "binary operand types differ")?;
                self.expect(inst, tys[0] == result_ty, "binary result type mismatch")?;
                let elem = tys[0].element().unwrap_or(ScalarType::Bool);
                self.expect(inst, op.accepts(elem), "binary operator not defined for type")?;
            }
            InstKind::Unary { .. } => {
                self.expect(inst, tys[0] == result_ty, "unary result type mismatch")?;
            }
            InstKind::Cmp { .. } => {
                self.expect(inst, tys[0] == tys[1], "compare operand types differ")?;
                self.expect(
                    inst,
                    result_ty == tys[0].with_element(ScalarType::Bool),
                    "compare result must be bool of operand shape",
                )?;
            }
            InstKind::Cast { .. } => {
                self.expect(inst, same_shape(tys[0], result_ty), "cast changes lane shape")?;
            }
            InstKind::Select { .. } => {
                self.expect(inst, tys[1] == tys[2], "select arms differ")?;
                self.expect(inst, tys[1] == result_ty, "select result type mismatch")?;
                self.expect(inst, is_mask_for(tys[0], tys[1]), "select condition shape")?;
            }
            InstKind::ElementPtr { .. } => {
                self.expect(
                    inst,
                    tys[0].element() == Some(ScalarType::Ptr),
                    "element pointer base must be a pointer",
                )?;
                self.expect(
                    inst,
                    tys[1].element().is_some_and(|e| e.is_int()),
                    "element pointer index must be an integer",
                )?;
                self.expect(
                    inst,
                    result_ty.element() == Some(ScalarType::Ptr),
                    "element pointer result must be a pointer",
                )?;
            }
            InstKind::Alloca { .. } => {
                self.expect(inst, result_ty == Type::PTR, "alloca yields a pointer")?;
            }
            InstKind::Load { mask, .. } | InstKind::InterleavedLoad { mask, .. } => {
                self.expect(inst, tys[0] == Type::PTR, "load address must be a scalar pointer")?;
                if mask.is_some() {
                    self.expect(inst, is_mask_for(tys[1], result_ty), "load mask shape")?;
                }
            }
            InstKind::Store { mask, .. } | InstKind::InterleavedStore { mask, .. } => {
                self.expect(inst, tys[0] == Type::PTR, "store address must be a scalar pointer")?;
                if mask.is_some() {
                    self.expect(inst, is_mask_for(tys[2], tys[1]), "store mask shape")?;
                }
            }
            InstKind::Gather { mask, .. } => {
                self.expect(
                    inst,
                    tys[0].is_vector() && same_shape(tys[0], result_ty),
                    "gather needs a pointer vector of the result shape",
                )?;
                if mask.is_some() {
                    self.expect(inst, is_mask_for(tys[1], result_ty), "gather mask shape")?;
                }
            }
            InstKind::Scatter { mask, .. } => {
                self.expect(
                    inst,
                    tys[0].is_vector() && same_shape(tys[0], tys[1]),
                    "scatter needs a pointer vector of the value shape",
                )?;
                if mask.is_some() {
                    self.expect(inst, is_mask_for(tys[2], tys[1]), "scatter mask shape")?;
                }
            }
            InstKind::Call { mask, .. } => {
                if mask.is_some() {
                    let mask_ty = tys[tys.len() - 1];
                    self.expect(
                        inst,
                        mask_ty.element() == Some(ScalarType::Bool),
                        "call mask must be bool",
                    )?;
                }
            }
            InstKind::Phi { .. } => {
                self.expect(
                    inst,
                    tys.iter().all(|&t| t == result_ty),
                    "phi input type mismatch",
                )?;
            }
            InstKind::Splat { .. } => {
                self.expect(
                    inst,
                    tys[0].is_scalar()
                        && result_ty.is_vector()
                        && tys[0].element() == result_ty.element(),
                    "splat must widen a scalar",
                )?;
            }
            InstKind::StepVector => {
                self.expect(
                    inst,
                    result_ty.is_vector() && result_ty.element().is_some_and(|e| e.is_int()),
                    "step vector must be an integer vector",
                )?;
            }
            InstKind::ExtractElement { .. } => {
                self.expect(
                    inst,
                    tys[0].is_vector()
                        && tys[0].element() == result_ty.element()
                        && result_ty.is_scalar(),
                    "extract element type mismatch",
                )?;
            }
            InstKind::InsertElement { .. } => {
                self.expect(
                    inst,
                    tys[0] == result_ty
                        && tys[1].is_scalar()
                        && tys[1].element() == tys[0].element(),
                    "insert element type mismatch",
                )?;
            }
            InstKind::Shuffle { mask, .. } => {
                let elem = tys[0].element();
                self.expect(
                    inst,
                    tys.iter().all(|t| t.element() == elem && t.fixed_lanes().is_some()),
                    "shuffle sources must be fixed vectors of one element type",
                )?;
                let total: u32 = tys.iter().filter_map(|t| t.fixed_lanes()).sum();
                self.expect(
                    inst,
                    mask.iter().all(|&m| m < total),
                    "shuffle mask index out of range",
                )?;
            }
            InstKind::VectorReduce { kind, .. } => {
                self.expect(
                    inst,
                    tys[0].is_vector() && Some(result_ty) == tys[0].element().map(Type::Scalar),
                    "reduce yields the element type",
                )?;
                self.expect(
                    inst,
                    kind.binary_op().accepts(tys[0].element().unwrap_or(ScalarType::Bool)),
                    "reduction kind not defined for type",
                )?;
            }
            InstKind::CondBr { .. } => {
                self.expect(inst, tys[0] == Type::BOOL, "branch condition must be a scalar bool")?;
            }
            InstKind::Switch { .. } => {
                self.expect(
                    inst,
                    tys[0].is_scalar() && tys[0].element().is_some_and(|e| e.is_int()),
                    "switch value must be a scalar integer",
                )?;
            }
            InstKind::Ret { value } => {
                let ty = if value.is_some() { tys[0] } else { Type::VOID };
                self.expect(inst, ty == func.ret_ty, "return type mismatch")?;
            }
            InstKind::Br { .. } | InstKind::Unreachable => {}
        }
        Ok(())
    }

    fn check_dominance(
        &self,
        inst: InstId,
        cfg: &Cfg,
        dom: &DominatorTree,
        position: &FxHashMap<InstId, usize>,
    ) -> VerifyResult<()> {
        let func = self.func;
        let data = func.inst(inst);
        let block = data.block;

        let defined_at = |v: ValueId| -> Option<(BlockId, usize)> {
            let def = func.def_inst(v)?;
            Some((func.inst(def).block, position.get(&def).copied().unwrap_or(0)))
        };

        if let InstKind::Phi { incoming } = &data.kind {
            for &(pred, v) in incoming {
                if !cfg.is_reachable(pred) {
                    continue;
                }
                if let Some((def_block, _)) = defined_at(v) {
                    if !dom.dominates(def_block, pred) {
                        return Err(self.error(
                            Some(inst),
                            format!("phi input %{} does not dominate edge from {}", v, pred),
                        ));
                    }
                }
            }
            return Ok(());
        }

        let here = position.get(&inst).copied().unwrap_or(0);
        for v in data.kind.operands() {
            let Some((def_block, def_pos)) = defined_at(v) else {
                continue;
            };
            let ok = if def_block == block {
                def_pos < here
            } else {
                dom.dominates(def_block, block)
            };
            if !ok {
                return Err(self.error(
                    Some(inst),
                    format!("use of %{} not dominated by its definition", v),
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
