//! Liveness and register-pressure advice.
//!
//! Standard backward dataflow over the CFG:
//!
//! ```text
//! LiveOut(B) = ∪ LiveIn(S) for S in succ(B), plus phi inputs flowing out of B
//! LiveIn(B)  = (LiveOut(B) − Defs(B)) ∪ Uses(B)
//! ```
//!
//! Phi operands are uses on the incoming edge, not in the phi's block.
//! Parameters and instruction results are tracked; constants are not.
//!
//! Live sets are reported in program order (parameters first, then
//! definitions in layout order) so width heuristics are deterministic.

use super::uniformity::UniformityInfo;
use crate::target::{TargetDescriptor, VectorizationFactor};
use lanewise_ir::{
    BitSet, BlockData, BlockId, Cfg, Function, InstKind, SecondaryMap, ValueData, ValueId,
    ValueKind,
};

/// Register-pressure estimate for the caller's width choice. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WidthAdvice {
    /// Maximum number of simultaneously live values.
    pub peak_live: usize,
    /// Vector registers needed at the peak for the requested factor.
    pub estimated_vector_pressure: u32,
    /// Widest power-of-two factor whose pressure fits the register file.
    pub max_profitable_width: u32,
}

/// Per-block live sets.
#[derive(Debug, Clone)]
pub struct Liveness {
    live_in: SecondaryMap<BlockData, Vec<ValueId>>,
    live_out: SecondaryMap<BlockData, Vec<ValueId>>,
    in_sets: SecondaryMap<BlockData, BitSet>,
    out_sets: SecondaryMap<BlockData, BitSet>,
    blocks: Vec<BlockId>,
    peak_live: usize,
}

fn is_tracked(func: &Function, v: ValueId) -> bool {
    matches!(func.value(v).kind, ValueKind::Param(_) | ValueKind::Inst(_))
}

impl Liveness {
    /// Compute liveness to a fixed point.
    pub fn compute(func: &Function) -> Self {
        let cfg = Cfg::build(func);
        let n = func.blocks.len();
        let mut uses: SecondaryMap<BlockData, BitSet> = SecondaryMap::with_capacity(n);
        let mut defs: SecondaryMap<BlockData, BitSet> = SecondaryMap::with_capacity(n);
        let mut phi_out: SecondaryMap<BlockData, BitSet> = SecondaryMap::with_capacity(n);

        for &block in cfg.rpo() {
            let mut block_uses = BitSet::new();
            let mut block_defs = BitSet::new();
            for &inst in func.block_insts(block) {
                let kind = &func.inst(inst).kind;
                if let InstKind::Phi { incoming } = kind {
                    for &(pred, v) in incoming {
                        if is_tracked(func, v) {
                            phi_out.entry(pred).insert(v.as_usize());
                        }
                    }
                } else {
                    for op in kind.operands() {
                        if is_tracked(func, op) && !block_defs.contains(op.as_usize()) {
                            block_uses.insert(op.as_usize());
                        }
                    }
                }
                if let Some(result) = func.inst_result(inst) {
                    block_defs.insert(result.as_usize());
                }
            }
            uses.set(block, block_uses);
            defs.set(block, block_defs);
        }

        let mut in_sets: SecondaryMap<BlockData, BitSet> = SecondaryMap::with_capacity(n);
        let mut out_sets: SecondaryMap<BlockData, BitSet> = SecondaryMap::with_capacity(n);
        let mut changed = true;
        while changed {
            changed = false;
            for &block in cfg.rpo().iter().rev() {
                let mut out = phi_out.get(block).clone();
                for &succ in cfg.successors(block) {
                    out.union_with(in_sets.get(succ));
                }
                let mut live_in = out.clone();
                live_in.subtract(defs.get(block));
                live_in.union_with(uses.get(block));
                if &live_in != in_sets.get(block) {
                    in_sets.set(block, live_in);
                    changed = true;
                }
                out_sets.set(block, out);
            }
        }

        let rank = program_ranks(func);
        let ordered = |set: &BitSet| -> Vec<ValueId> {
            let mut values: Vec<ValueId> = set.iter().map(|i| ValueId::new(i as u32)).collect();
            values.sort_by_key(|v| rank.get(*v).unwrap_or(u32::MAX));
            values
        };
        let mut live = Liveness {
            live_in: SecondaryMap::with_capacity(n),
            live_out: SecondaryMap::with_capacity(n),
            in_sets,
            out_sets,
            blocks: cfg.rpo().to_vec(),
            peak_live: 0,
        };
        for &block in cfg.rpo() {
            live.live_in.set(block, ordered(live.in_sets.get(block)));
            live.live_out.set(block, ordered(live.out_sets.get(block)));
        }
        let mut peak = 0;
        live.walk(func, |set| peak = peak.max(set.count()));
        live.peak_live = peak;
        live
    }

    /// Values live on entry to `block`, in program order.
    #[inline]
    pub fn live_in(&self, block: BlockId) -> &[ValueId] {
        self.live_in.get(block)
    }

    /// Values live on exit from `block`, in program order.
    #[inline]
    pub fn live_out(&self, block: BlockId) -> &[ValueId] {
        self.live_out.get(block)
    }

    /// Peak number of simultaneously live values.
    #[inline]
    pub fn peak_live(&self) -> usize {
        self.peak_live
    }

    /// Call `f` with the live set at every program point, walking each block
    /// backward from its live-out set.
    fn walk(&self, func: &Function, mut f: impl FnMut(&BitSet)) {
        for &block in &self.blocks {
            let mut live = self.out_sets.get(block).clone();
            f(&live);
            for &inst in func.block_insts(block).iter().rev() {
                if let Some(result) = func.inst_result(inst) {
                    live.remove(result.as_usize());
                }
                let kind = &func.inst(inst).kind;
                if !kind.is_phi() {
                    for op in kind.operands() {
                        if is_tracked(func, op) {
                            live.insert(op.as_usize());
                        }
                    }
                }
                f(&live);
            }
        }
    }

    /// Estimate vector register pressure for `factor`.
    ///
    /// Uniform values stay in scalar registers; each varying value occupies
    /// `lanes × element bits` of vector register space.
    pub fn width_advice(
        &self,
        func: &Function,
        uniformity: &UniformityInfo,
        target: &TargetDescriptor,
        factor: VectorizationFactor,
    ) -> WidthAdvice {
        let mut peak_varying_bits: u64 = 0;
        self.walk(func, |set| {
            let bits: u64 = set
                .iter()
                .map(|i| ValueId::new(i as u32))
                .filter(|&v| uniformity.is_varying(func, v))
                .map(|v| func.value_ty(v).element().map_or(0, |e| e.size_bytes() as u64 * 8))
                .sum();
            peak_varying_bits = peak_varying_bits.max(bits);
        });

        let native = u64::from(target.native_vector_bits.max(1));
        let pressure = |lanes: u32| -> u32 {
            let bits = peak_varying_bits * u64::from(lanes);
            bits.div_ceil(native).min(u64::from(u32::MAX)) as u32
        };
        let registers = target.vector_registers;
        let mut max_profitable_width = 1;
        let mut width = 2;
        while width <= target.max_fixed_width && pressure(width) <= registers {
            max_profitable_width = width;
            width *= 2;
        }

        WidthAdvice {
            peak_live: self.peak_live,
            estimated_vector_pressure: pressure(factor.min_lanes),
            max_profitable_width,
        }
    }
}

/// Program-order rank of every tracked value.
fn program_ranks(func: &Function) -> SecondaryMap<ValueData, Option<u32>> {
    let mut rank: SecondaryMap<ValueData, Option<u32>> =
        SecondaryMap::with_capacity(func.values.len());
    let mut next = 0u32;
    for param in &func.params {
        rank.set(param.value, Some(next));
        next += 1;
    }
    for inst in func.insts_in_order() {
        if let Some(result) = func.inst_result(inst) {
            rank.set(result, Some(next));
            next += 1;
        }
    }
    rank
}

// =============================================================================
// Tests
// =============================================================================
