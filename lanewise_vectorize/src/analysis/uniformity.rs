//! Uniformity (divergence) analysis.
//!
//! Classifies every instruction as Uniform or Varying across the lanes of a
//! group. Void instructions are classified too, which lets stores and calls
//! act as varying memory writers.
//!
//! # Seeds
//!
//! - lane-identity builtins in the vectorized dimension
//! - inherently varying builtins and per-lane side-effecting calls
//! - allocas (every lane owns its buffer)
//!
//! # Propagation
//!
//! An instruction is varying if any operand (its mask included) is varying,
//! if it sits in a block that is control dependent on a divergent branch, or
//! if it is a phi at the join point of a divergent branch. Loads are also
//! varying when they may alias a varying writer. Reductions, broadcasts and
//! any/all collectives are uniform regardless of their operands.
//!
//! The fixed point is reached by sweeping in reverse post-order until nothing
//! changes; every sweep only adds to the varying set.

use super::address::{access_root, roots_may_alias, MemRoot};
use crate::builtins::{classify_call, BuiltinInfo, BuiltinKind, CollectiveOp, LaneDim};
use lanewise_ir::{
    BitSet, BlockId, Cfg, Function, InstId, InstKind, PostDominatorTree, ValueId, ValueKind,
};
use log::trace;
use rustc_hash::FxHashMap;

/// Lane behavior of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uniformity {
    Uniform,
    Varying,
}

/// Result of the uniformity analysis. Immutable once computed.
#[derive(Debug, Clone)]
pub struct UniformityInfo {
    varying: BitSet,
    tainted_blocks: BitSet,
    divergent_branches: Vec<InstId>,
}

impl UniformityInfo {
    /// Analyze `func`, spreading `dimension` across lanes.
    pub fn compute(func: &Function, builtins: &dyn BuiltinInfo, dimension: u32) -> Self {
        UniformityAnalysis::new(func, builtins, dimension).run()
    }

    /// Classification of an instruction.
    #[inline]
    pub fn inst_uniformity(&self, inst: InstId) -> Uniformity {
        if self.varying.contains(inst.as_usize()) {
            Uniformity::Varying
        } else {
            Uniformity::Uniform
        }
    }

    /// Check if an instruction is varying.
    #[inline]
    pub fn is_inst_varying(&self, inst: InstId) -> bool {
        self.varying.contains(inst.as_usize())
    }

    /// Check if a value is varying. Parameters and constants are uniform.
    pub fn is_varying(&self, func: &Function, v: ValueId) -> bool {
        match func.value(v).kind {
            ValueKind::Inst(inst) => self.is_inst_varying(inst),
            _ => false,
        }
    }

    /// Check if a value is uniform.
    #[inline]
    pub fn is_uniform(&self, func: &Function, v: ValueId) -> bool {
        !self.is_varying(func, v)
    }

    /// Check if a block executes under divergent control.
    #[inline]
    pub fn is_block_divergent(&self, block: BlockId) -> bool {
        self.tainted_blocks.contains(block.as_usize())
    }

    /// Conditional branches with a varying condition, in reverse post-order.
    #[inline]
    pub fn divergent_branches(&self) -> &[InstId] {
        &self.divergent_branches
    }

    /// Number of varying instructions.
    pub fn varying_count(&self) -> usize {
        self.varying.count()
    }
}

// =============================================================================
// Analysis
// =============================================================================

struct UniformityAnalysis<'a> {
    func: &'a Function,
    builtins: &'a dyn BuiltinInfo,
    dimension: u32,
    cfg: Cfg,
    pdt: PostDominatorTree,
    calls: FxHashMap<InstId, BuiltinKind>,
    varying: BitSet,
    tainted_blocks: BitSet,
    /// Join blocks of divergent branches.
    joins: BitSet,
    /// Roots written by varying writers.
    varying_writes: Vec<MemRoot>,
}

impl<'a> UniformityAnalysis<'a> {
    fn new(func: &'a Function, builtins: &'a dyn BuiltinInfo, dimension: u32) -> Self {
        let cfg = Cfg::build(func);
        let pdt = PostDominatorTree::build(&cfg);
        UniformityAnalysis {
            func,
            builtins,
            dimension,
            cfg,
            pdt,
            calls: FxHashMap::default(),
            varying: BitSet::with_capacity(func.insts.len()),
            tainted_blocks: BitSet::new(),
            joins: BitSet::new(),
            varying_writes: Vec::new(),
        }
    }

    fn run(mut self) -> UniformityInfo {
        let func = self.func;
        for &block in self.cfg.rpo() {
            for &inst in func.block_insts(block) {
                if let Some(kind) = classify_call(self.builtins, func, inst) {
                    self.calls.insert(inst, kind);
                }
            }
        }

        let mut sweeps = 0;
        let mut changed = true;
        while changed {
            changed = false;
            sweeps += 1;
            for bi in 0..self.cfg.rpo().len() {
                let block = self.cfg.rpo()[bi];
                for &inst in func.block_insts(block) {
                    if self.varying.contains(inst.as_usize())
                        || !self.compute_varying(block, inst)
                    {
                        continue;
                    }
                    self.varying.insert(inst.as_usize());
                    changed = true;
                    self.on_new_varying(block, inst);
                }
            }
        }
        trace!(
            "uniformity of @{}: {} varying after {} sweeps",
            func.name,
            self.varying.count(),
            sweeps
        );

        let mut divergent_branches = Vec::new();
        for &block in self.cfg.rpo() {
            if let Some(term) = func.terminator(block) {
                if matches!(func.inst(term).kind, InstKind::CondBr { .. })
                    && self.varying.contains(term.as_usize())
                {
                    divergent_branches.push(term);
                }
            }
        }

        UniformityInfo {
            varying: self.varying,
            tainted_blocks: self.tainted_blocks,
            divergent_branches,
        }
    }

    fn is_value_varying(&self, v: ValueId) -> bool {
        match self.func.value(v).kind {
            ValueKind::Inst(inst) => self.varying.contains(inst.as_usize()),
            _ => false,
        }
    }

    fn compute_varying(&self, block: BlockId, inst: InstId) -> bool {
        let func = self.func;
        let kind = &func.inst(inst).kind;

        if let InstKind::Phi { .. } = kind {
            if self.joins.contains(block.as_usize())
                || self.tainted_blocks.contains(block.as_usize())
            {
                return true;
            }
            return kind.operands().iter().any(|&v| self.is_value_varying(v));
        }
        if self.tainted_blocks.contains(block.as_usize()) {
            return true;
        }

        let operands_varying = || kind.operands().iter().any(|&v| self.is_value_varying(v));
        match kind {
            InstKind::Call { .. } => match self.calls.get(&inst).copied() {
                Some(BuiltinKind::LaneIdentity { dimension }) => match dimension {
                    LaneDim::Index(d) => d == self.dimension,
                    LaneDim::SubGroup | LaneDim::Dynamic => true,
                },
                Some(BuiltinKind::Collective(desc)) => match desc.op {
                    CollectiveOp::ScanInclusive | CollectiveOp::ScanExclusive => true,
                    _ => false,
                },
                Some(BuiltinKind::Barrier) => false,
                Some(kind) if kind.is_per_lane_side_effect() => true,
                _ => operands_varying(),
            },
            InstKind::Alloca { .. } => true,
            InstKind::Load { ptr, .. } | InstKind::InterleavedLoad { ptr, .. } => {
                if operands_varying() {
                    return true;
                }
                let root = super::address::memory_root(func, *ptr);
                self.varying_writes
                    .iter()
                    .any(|&w| roots_may_alias(func, w, root))
            }
            InstKind::Gather { .. } => operands_varying() || !self.varying_writes.is_empty(),
            _ => operands_varying(),
        }
    }

    fn on_new_varying(&mut self, block: BlockId, inst: InstId) {
        let func = self.func;
        let kind = &func.inst(inst).kind;
        if kind.may_write_memory() {
            if let Some(root) = access_root(func, inst) {
                let is_writer = match kind {
                    InstKind::Call { .. } => self
                        .calls
                        .get(&inst)
                        .is_some_and(|k| k.is_per_lane_side_effect()),
                    _ => true,
                };
                if is_writer && !self.varying_writes.contains(&root) {
                    self.varying_writes.push(root);
                }
            }
        }
        if let InstKind::CondBr { .. } = kind {
            self.taint_region(block);
        }
    }

    /// Mark every block between a divergent branch and its join as tainted,
    /// and the join itself as a phi join.
    fn taint_region(&mut self, branch_block: BlockId) {
        let join = self.pdt.ipdom(branch_block);
        if let Some(join) = join {
            self.joins.insert(join.as_usize());
        }
        let mut stack: Vec<BlockId> = self.cfg.successors(branch_block).to_vec();
        while let Some(block) = stack.pop() {
            if Some(block) == join || !self.tainted_blocks.insert(block.as_usize()) {
                continue;
            }
            stack.extend(self.cfg.successors(block).iter().copied());
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
    use lanewise_ir::{Builder, CmpOp, ParamAttrs, ScalarType, Type};

    fn analyze(func: &Function) -> UniformityInfo {
        UniformityInfo::compute(func, &StandardBuiltins::new(), 0)
    }

    #[test]
    fn test_lane_id_propagates() {
        let mut func = Function::new("k", Type::VOID);
        let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
        let n = func.add_param("n", Type::I64, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let zero = b.const_int(ScalarType::I32, 0);
        let one = b.const_int(ScalarType::I32, 1);
        let gid = b.call_value("get_global_id", &[zero], Type::I64);
        let gid1 = b.call_value("get_global_id", &[one], Type::I64);
        let size = b.call_value("get_local_size", &[zero], Type::I64);
        let sum = b.add(gid, n);
        let usum = b.add(size, n);
        let p = b.element_ptr(out, sum, ScalarType::I64);
        b.store(p, usum, None, 8);
        b.ret(None);

        let info = analyze(&func);
        assert!(info.is_varying(&func, gid));
        assert!(info.is_uniform(&func, gid1));
        assert!(info.is_uniform(&func, size));
        assert!(info.is_varying(&func, sum));
        assert!(info.is_uniform(&func, usum));
        assert!(info.is_varying(&func, p));
        assert!(info.is_uniform(&func, n));
        assert!(info.divergent_branches().is_empty());

        let inst = |v| func.def_inst(v).expect("instruction result");
        assert_eq!(info.inst_uniformity(inst(gid)), Uniformity::Varying);
        assert_eq!(info.inst_uniformity(inst(sum)), Uniformity::Varying);
        assert_eq!(info.inst_uniformity(inst(size)), Uniformity::Uniform);
        assert_eq!(info.inst_uniformity(inst(usum)), Uniformity::Uniform);
    }

    #[test]
    fn test_control_dependence_taints_region_and_join() {
        // entry: c = gid < 4; condbr c, then, join
        // then: x = n + 1; br join
        // join: phi [n, entry], [x, then]
        let mut func = Function::new("k", Type::I64);
        let n = func.add_param("n", Type::I64, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let then_b = func.add_block("then");
        let join = func.add_block("join");
        let mut b = Builder::at_end(&mut func, entry);
        let zero = b.const_int(ScalarType::I32, 0);
        let gid = b.call_value("get_global_id", &[zero], Type::I64);
        let four = b.const_int(ScalarType::I64, 4);
        let c = b.cmp(CmpOp::Slt, gid, four);
        let br = b.cond_br(c, then_b, join);
        let mut b = Builder::at_end(&mut func, then_b);
        let one = b.const_int(ScalarType::I64, 1);
        let x = b.add(n, one);
        b.br(join);
        let mut b = Builder::at_end(&mut func, join);
        let phi = b.phi(Type::I64, &[(entry, n), (then_b, x)]);
        b.ret(Some(phi));

        let info = analyze(&func);
        assert_eq!(info.divergent_branches(), &[br]);
        assert!(info.is_block_divergent(then_b));
        assert!(!info.is_block_divergent(join));
        assert!(info.is_varying(&func, x));
        assert!(info.is_varying(&func, phi));
    }

    #[test]
    fn test_uniform_branch_keeps_phi_uniform() {
        let mut func = Function::new("k", Type::I64);
        let n = func.add_param("n", Type::I64, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let then_b = func.add_block("then");
        let join = func.add_block("join");
        let mut b = Builder::at_end(&mut func, entry);
        let four = b.const_int(ScalarType::I64, 4);
        let c = b.cmp(CmpOp::Slt, n, four);
        b.cond_br(c, then_b, join);
        let mut b = Builder::at_end(&mut func, then_b);
        let x = b.add(n, four);
        b.br(join);
        let mut b = Builder::at_end(&mut func, join);
        let phi = b.phi(Type::I64, &[(entry, n), (then_b, x)]);
        b.ret(Some(phi));

        let info = analyze(&func);
        assert!(info.divergent_branches().is_empty());
        assert!(info.is_uniform(&func, phi));
        assert_eq!(info.varying_count(), 0);
    }

    #[test]
    fn test_loads_aliasing_varying_stores() {
        let mut func = Function::new("k", Type::VOID);
        let a = func.add_param("a", Type::PTR, ParamAttrs::NOALIAS);
        let b_ptr = func.add_param("b", Type::PTR, ParamAttrs::NOALIAS);
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let zero = b.const_int(ScalarType::I32, 0);
        let gid = b.call_value("get_global_id", &[zero], Type::I64);
        let pa = b.element_ptr(a, gid, ScalarType::I64);
        b.store(pa, gid, None, 8);
        let la = b.load(Type::I64, a, None, 8);
        let lb = b.load(Type::I64, b_ptr, None, 8);
        b.ret(None);

        let info = analyze(&func);
        assert!(info.is_varying(&func, la));
        assert!(info.is_uniform(&func, lb));
    }

    #[test]
    fn test_collective_results() {
        let mut func = Function::new("k", Type::VOID);
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let zero = b.const_int(ScalarType::I32, 0);
        let gid = b.call_value("get_global_id", &[zero], Type::I32);
        let red = b.call_value("sub_group_reduce_add", &[gid], Type::I32);
        let scan = b.call_value("sub_group_scan_inclusive_add", &[gid], Type::I32);
        let ext = b.call_value("complex_call", &[zero], Type::I32);
        b.call("barrier", &[zero], None, Type::VOID);
        b.ret(None);

        let info = analyze(&func);
        assert!(info.is_uniform(&func, red));
        assert!(info.is_varying(&func, scan));
        assert!(info.is_varying(&func, ext));
    }
}
