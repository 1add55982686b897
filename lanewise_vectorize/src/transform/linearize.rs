//! Linearization of divergent regions.
//!
//! A region is the set of blocks between a divergent branch and its
//! immediate post-dominator (the join). Linearization turns the region into a
//! straight chain of blocks that every lane executes:
//!
//! ```text
//!        head                     head
//!       /    \                      |
//!    then    else        →        then   (predicated by  c)
//!       \    /                      |
//!        join                     else   (predicated by !c)
//!                                   |
//!                                 join   (phis become selects)
//! ```
//!
//! Every block gets a block mask, the OR of its incoming edge masks. Memory
//! accesses and per-lane side-effect calls are predicated on the block mask,
//! trapping division gets a safe divisor on inactive lanes, and phis become
//! select chains over the incoming edge masks. The rewrite stays scalar: the
//! masks are ordinary boolean values which packetization later widens.
//!
//! Regions are processed outermost first. Each linearized region flattens
//! every branch nested in it, so uniformity is recomputed between regions.

use crate::analysis::uniformity::UniformityInfo;
use crate::builtins::{classify_call, BuiltinInfo, BuiltinKind};
use crate::config::VectorizeConfig;
use crate::error::{VectorizeError, VectorizeResult};
use lanewise_ir::{
    BlockId, Builder, Cfg, Function, InsertPoint, InstId, InstKind, PostDominatorTree, ValueId,
};
use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

/// Edge mask; `None` means every lane takes the edge.
type Mask = Option<ValueId>;

// =============================================================================
// Divergent Region
// =============================================================================

/// Blocks controlled by one divergent branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivergentRegion {
    /// The divergent branch terminating `head`.
    pub branch: InstId,
    pub head: BlockId,
    /// Immediate post-dominator of `head`.
    pub join: BlockId,
    /// Blocks strictly between `head` and `join`, in reverse post-order.
    pub blocks: Vec<BlockId>,
}

impl DivergentRegion {
    /// Find the region of a divergent branch.
    pub fn find(
        func: &Function,
        cfg: &Cfg,
        pdt: &PostDominatorTree,
        branch: InstId,
    ) -> VectorizeResult<Self> {
        let head = func.inst(branch).block;
        let join = pdt
            .ipdom(head)
            .ok_or_else(|| {
                VectorizeError::unsupported(branch, "divergent branch has no join point")
            })?;

        let mut members: FxHashSet<BlockId> = FxHashSet::default();
        let mut stack: Vec<BlockId> = cfg.successors(head).to_vec();
        while let Some(block) = stack.pop() {
            if block == join || !members.insert(block) {
                continue;
            }
            if block == head {
                return Err(VectorizeError::unsupported(branch, "divergent loop"));
            }
            stack.extend(cfg.successors(block).iter().copied());
        }

        for &block in &members {
            for &pred in cfg.predecessors(block) {
                if pred != head && !members.contains(&pred) {
                    return Err(VectorizeError::unsupported(
                        branch,
                        "divergent region has more than one entry",
                    ));
                }
            }
        }
        for (from, to) in cfg.retreating_edges() {
            if members.contains(&from) && members.contains(&to) {
                return Err(VectorizeError::unsupported(branch, "loop inside a divergent region"));
            }
        }

        let blocks = cfg
            .rpo()
            .iter()
            .copied()
            .filter(|b| members.contains(b))
            .collect();
        Ok(DivergentRegion {
            branch,
            head,
            join,
            blocks,
        })
    }

    /// Reject synchronization points that not every lane would reach.
    pub fn check_synchronization(
        &self,
        func: &Function,
        builtins: &dyn BuiltinInfo,
        config: &VectorizeConfig,
    ) -> VectorizeResult<()> {
        for &block in &self.blocks {
            for &inst in func.block_insts(block) {
                let synchronizes = match classify_call(builtins, func, inst) {
                    Some(kind) if kind.is_convergent() => true,
                    Some(BuiltinKind::Unknown) => config.assume_unknown_calls_convergent,
                    _ => false,
                };
                if synchronizes {
                    return Err(VectorizeError::DivergentBarrier { inst });
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Linearization
// =============================================================================

/// Linearize every divergent region. Returns the number of regions.
pub fn linearize_divergent_regions(
    func: &mut Function,
    builtins: &dyn BuiltinInfo,
    config: &VectorizeConfig,
) -> VectorizeResult<usize> {
    let mut count = 0;
    loop {
        let uniformity = UniformityInfo::compute(func, builtins, config.dimension);
        let Some(&branch) = uniformity.divergent_branches().first() else {
            return Ok(count);
        };
        let cfg = Cfg::build(func);
        let pdt = PostDominatorTree::build(&cfg);
        let region = DivergentRegion::find(func, &cfg, &pdt, branch)?;
        region.check_synchronization(func, builtins, config)?;
        debug!(
            "linearizing region of bb{}: {} blocks, join bb{}",
            region.head,
            region.blocks.len(),
            region.join
        );
        Linearizer::new(func, builtins, &cfg, &region).run();
        count += 1;
    }
}

struct Linearizer<'a> {
    func: &'a mut Function,
    builtins: &'a dyn BuiltinInfo,
    cfg: &'a Cfg,
    region: &'a DivergentRegion,
    block_masks: FxHashMap<BlockId, Mask>,
    edge_masks: FxHashMap<(BlockId, BlockId), Mask>,
}

impl<'a> Linearizer<'a> {
    fn new(
        func: &'a mut Function,
        builtins: &'a dyn BuiltinInfo,
        cfg: &'a Cfg,
        region: &'a DivergentRegion,
    ) -> Self {
        Self {
            func,
            builtins,
            cfg,
            region,
            block_masks: FxHashMap::default(),
            edge_masks: FxHashMap::default(),
        }
    }

    fn run(mut self) {
        let head = self.region.head;
        self.block_masks.insert(head, None);
        self.compute_edge_masks(head);

        let region = self.region;
        for &block in &region.blocks {
            let mask = self.compute_block_mask(block);
            self.block_masks.insert(block, mask);
            self.fold_phis(block);
            if let Some(mask) = mask {
                self.predicate(block, mask);
            }
            self.compute_edge_masks(block);
        }

        self.fold_join_phis();
        self.rewire();
    }

    fn edge_mask(&self, from: BlockId, to: BlockId) -> Mask {
        self.edge_masks.get(&(from, to)).copied().flatten()
    }

    /// OR of the incoming edge masks, at the top of `block`.
    fn compute_block_mask(&mut self, block: BlockId) -> Mask {
        let mut masks: SmallVec<[ValueId; 4]> = SmallVec::new();
        for &pred in self.cfg.predecessors(block) {
            match self.edge_masks.get(&(pred, block)).copied().flatten() {
                Some(m) => masks.push(m),
                None => return None,
            }
        }
        let (&first, rest) = masks.split_first()?;
        let mut b = Builder::new(self.func, InsertPoint::BlockStart(block));
        Some(rest.iter().fold(first, |acc, &m| b.or(acc, m)))
    }

    /// Masks of the edges leaving `block`, before its terminator.
    fn compute_edge_masks(&mut self, block: BlockId) {
        let Some(term) = self.func.terminator(block) else {
            return;
        };
        let mask = self.block_masks.get(&block).copied().flatten();
        match self.func.inst(term).kind.clone() {
            InstKind::Br { target } => {
                self.edge_masks.insert((block, target), mask);
            }
            InstKind::CondBr {
                then_block,
                else_block,
                ..
            } if then_block == else_block => {
                self.edge_masks.insert((block, then_block), mask);
            }
            InstKind::CondBr {
                cond,
                then_block,
                else_block,
            } => {
                let mut b = Builder::new(self.func, InsertPoint::BeforeTerminator(block));
                let not_cond = b.not(cond);
                let (taken, not_taken) = match mask {
                    Some(m) => (b.and(m, cond), b.and(m, not_cond)),
                    None => (cond, not_cond),
                };
                self.edge_masks.insert((block, then_block), Some(taken));
                self.edge_masks.insert((block, else_block), Some(not_taken));
            }
            _ => {}
        }
    }

    /// Merge `(pred, value)` pairs into one value selected by edge mask.
    fn select_chain(
        &mut self,
        point: InsertPoint,
        to: BlockId,
        incoming: &[(BlockId, ValueId)],
    ) -> Option<ValueId> {
        let (&(_, first), rest) = incoming.split_first()?;
        let masks: SmallVec<[Mask; 4]> =
            rest.iter().map(|&(pred, _)| self.edge_mask(pred, to)).collect();
        let mut b = Builder::new(self.func, point);
        let mut acc = first;
        for (&(_, value), mask) in rest.iter().zip(masks) {
            acc = match mask {
                Some(m) => b.select(m, value, acc),
                None => value,
            };
        }
        Some(acc)
    }

    /// Replace the phis of a region block with select chains.
    fn fold_phis(&mut self, block: BlockId) {
        let phis: Vec<InstId> = self
            .func
            .block_insts(block)
            .iter()
            .copied()
            .take_while(|&i| self.func.inst(i).kind.is_phi())
            .collect();
        // Selects go after the block mask so they can share one cursor.
        let mut point = InsertPoint::BlockStart(block);
        for phi in phis {
            let InstKind::Phi { incoming } = self.func.inst(phi).kind.clone() else {
                continue;
            };
            let Some(result) = self.func.inst_result(phi) else {
                continue;
            };
            if let Some(merged) = self.select_chain(point, block, &incoming) {
                if let Some(def) = self.func.def_inst(merged) {
                    if self.func.inst(def).block == block {
                        point = InsertPoint::After(def);
                    }
                }
                self.func.replace_all_uses(result, merged);
            }
            self.func.remove_inst(phi);
        }
    }

    /// Guard everything in `block` that must not run on inactive lanes.
    fn predicate(&mut self, block: BlockId, mask: ValueId) {
        let insts: Vec<InstId> = self
            .func
            .block_insts(block)
            .iter()
            .copied()
            .filter(|&i| {
                let kind = &self.func.inst(i).kind;
                !kind.is_phi() && !kind.is_terminator()
            })
            .collect();
        for inst in insts {
            match self.func.inst(inst).kind.clone() {
                InstKind::Load { mask: existing, .. }
                | InstKind::Store { mask: existing, .. }
                | InstKind::Gather { mask: existing, .. }
                | InstKind::Scatter { mask: existing, .. } => {
                    self.set_mask(inst, existing, mask);
                }
                InstKind::Call { mask: existing, .. } => {
                    let per_lane = classify_call(self.builtins, self.func, inst)
                        .is_some_and(|k| k.is_per_lane_side_effect());
                    if per_lane {
                        self.set_mask(inst, existing, mask);
                    }
                }
                InstKind::Binary { op, lhs, rhs } if op.may_trap() => {
                    let Some(elem) = self.func.value_ty(rhs).element() else {
                        continue;
                    };
                    let one = self.func.const_int(elem, 1);
                    let safe =
                        Builder::new(self.func, InsertPoint::Before(inst)).select(mask, rhs, one);
                    self.func.inst_mut(inst).kind = InstKind::Binary { op, lhs, rhs: safe };
                    trace!("guarded divisor of {} inst {}", op.name(), inst);
                }
                _ => {}
            }
        }
    }

    fn set_mask(&mut self, inst: InstId, existing: Option<ValueId>, mask: ValueId) {
        let combined = match existing {
            Some(e) => Builder::new(self.func, InsertPoint::Before(inst)).and(e, mask),
            None => mask,
        };
        self.func.inst_mut(inst).kind.set_mask(Some(combined));
    }

    /// Merge the join's region-side phi inputs into one input from the end
    /// of the chain.
    fn fold_join_phis(&mut self) {
        let join = self.region.join;
        let head = self.region.head;
        let last = self.region.blocks.last().copied().unwrap_or(head);
        let inside = |b: BlockId, region: &DivergentRegion| b == head || region.blocks.contains(&b);

        let phis: Vec<InstId> = self
            .func
            .block_insts(join)
            .iter()
            .copied()
            .take_while(|&i| self.func.inst(i).kind.is_phi())
            .collect();
        for phi in phis {
            let InstKind::Phi { incoming } = self.func.inst(phi).kind.clone() else {
                continue;
            };
            let (internal, external): (SmallVec<[_; 2]>, SmallVec<[_; 2]>) =
                incoming.iter().copied().partition(|&(pred, _)| inside(pred, self.region));
            let point = InsertPoint::BeforeTerminator(last);
            let Some(merged) = self.select_chain(point, join, &internal) else {
                continue;
            };
            let mut rebuilt = external;
            rebuilt.push((last, merged));
            self.func.inst_mut(phi).kind = InstKind::Phi { incoming: rebuilt };
        }
    }

    /// Chain head and region blocks in reverse post-order, ending at the join.
    fn rewire(&mut self) {
        let join = self.region.join;
        let mut chain: Vec<BlockId> = Vec::with_capacity(self.region.blocks.len() + 1);
        chain.push(self.region.head);
        chain.extend(self.region.blocks.iter().copied());

        for (i, &block) in chain.iter().enumerate() {
            let next = chain.get(i + 1).copied().unwrap_or(join);
            if let Some(term) = self.func.terminator(block) {
                self.func.remove_inst(term);
            }
            Builder::at_end(self.func, block).br(next);
        }

        // A join reached only from the chain needs no phis.
        let preds = self
            .func
            .layout
            .iter()
            .filter(|&&b| self.func.successors(b).contains(&join))
            .count();
        if preds != 1 {
            return;
        }
        let phis: Vec<InstId> = self
            .func
            .block_insts(join)
            .iter()
            .copied()
            .take_while(|&i| self.func.inst(i).kind.is_phi())
            .collect();
        for phi in phis {
            let single = match &self.func.inst(phi).kind {
                InstKind::Phi { incoming } if incoming.len() == 1 => incoming[0].1,
                _ => continue,
            };
            if let Some(result) = self.func.inst_result(phi) {
                self.func.replace_all_uses(result, single);
            }
            self.func.remove_inst(phi);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
