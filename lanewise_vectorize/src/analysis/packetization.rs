//! Packetization need and per-value rewrite plans.
//!
//! Decides, for every varying value, whether it becomes one vector
//! ("packet"), `N` scalar copies ("instances"), or is rebuilt from the
//! lane-identity base. Memory accesses are given a [`MemoryForm`] from the
//! stride of their address.
//!
//! The need set is built backward from vector leaves:
//!
//! - data and mask of varying stores that stay vector accesses
//! - varying return values
//! - arguments of lane-group collectives
//!
//! Address computations consumed only by contiguous or interleaved accesses
//! are never added, so they stay scalar pointers.

use super::stride::{Stride, StrideInfo};
use super::uniformity::{Uniformity, UniformityInfo};
use crate::builtins::{classify_call, BuiltinInfo, BuiltinKind, LaneDim};
use crate::config::VectorizeConfig;
use crate::target::{TargetDescriptor, VectorizationFactor};
use lanewise_ir::{Cfg, Function, InstId, InstKind, ValueId};
use rustc_hash::{FxHashMap, FxHashSet};

/// How a varying memory access is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryForm {
    /// Consecutive elements from the lane-0 address.
    Contiguous,
    /// Every `stride`-th element from the lane-0 address.
    Interleaved { stride: i64 },
    /// One address per lane.
    GatherScatter,
    /// One scalar access per lane, in lane order.
    Instantiate,
}

impl MemoryForm {
    /// Check if the access becomes a single vector operation.
    #[inline]
    pub fn is_vector(self) -> bool {
        !matches!(self, MemoryForm::Instantiate)
    }
}

/// Rewrite decision for one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValuePlan {
    /// Unchanged scalar.
    Uniform,
    /// One vector instruction.
    Packet,
    /// One scalar instruction per lane.
    Instance,
    /// Lane-identity builtin: base id plus lane index.
    LaneId,
}

/// Plans for a function.
#[derive(Debug, Clone, Default)]
pub struct PacketizationPlan {
    plans: FxHashMap<ValueId, ValuePlan>,
    memory: FxHashMap<InstId, MemoryForm>,
    needed: FxHashSet<ValueId>,
}

impl PacketizationPlan {
    /// Build plans for every varying value of `func`.
    pub fn compute(
        func: &Function,
        uniformity: &UniformityInfo,
        strides: &StrideInfo,
        builtins: &dyn BuiltinInfo,
        target: &TargetDescriptor,
        config: &VectorizeConfig,
        factor: VectorizationFactor,
    ) -> Self {
        let mut plan = PacketizationPlan::default();
        let cfg = Cfg::build(func);
        let order: Vec<InstId> = cfg
            .rpo()
            .iter()
            .flat_map(|&b| func.block_insts(b).iter().copied())
            .collect();

        let mut calls: FxHashMap<InstId, BuiltinKind> = FxHashMap::default();
        for &inst in &order {
            if let Some(kind) = classify_call(builtins, func, inst) {
                calls.insert(inst, kind);
            }
            if uniformity.is_inst_varying(inst) {
                if let Some(form) = memory_form(func, inst, strides, target, config) {
                    plan.memory.insert(inst, form);
                }
            }
        }

        // Seed the need set from leaves.
        let mut worklist: Vec<ValueId> = Vec::new();
        let mark = |v: ValueId, worklist: &mut Vec<ValueId>| {
            if uniformity.is_varying(func, v) {
                worklist.push(v);
            }
        };
        for &inst in &order {
            let kind = &func.inst(inst).kind;
            match kind {
                InstKind::Store { value, mask, .. }
                | InstKind::InterleavedStore { value, mask, .. } => {
                    if plan.memory.get(&inst).is_some_and(|f| f.is_vector()) {
                        mark(*value, &mut worklist);
                        if let Some(m) = mask {
                            mark(*m, &mut worklist);
                        }
                        if plan.memory.get(&inst) == Some(&MemoryForm::GatherScatter) {
                            if let InstKind::Store { ptr, .. } = kind {
                                mark(*ptr, &mut worklist);
                            }
                        }
                    }
                }
                InstKind::Ret { value: Some(v) } => mark(*v, &mut worklist),
                InstKind::Call { args, .. } => {
                    if let Some(BuiltinKind::Collective(_)) = calls.get(&inst) {
                        for &arg in args {
                            mark(arg, &mut worklist);
                        }
                    }
                }
                _ => {}
            }
        }

        // Propagate through packetizable definitions.
        while let Some(v) = worklist.pop() {
            if !plan.needed.insert(v) {
                continue;
            }
            let Some(inst) = func.def_inst(v) else {
                continue;
            };
            if !plan.is_packetizable(func, inst, &calls) {
                continue;
            }
            let kind = &func.inst(inst).kind;
            match kind {
                InstKind::Load { mask, .. } => {
                    if let Some(m) = mask {
                        mark(*m, &mut worklist);
                    }
                    if plan.memory.get(&inst) == Some(&MemoryForm::GatherScatter) {
                        if let InstKind::Load { ptr, .. } = kind {
                            mark(*ptr, &mut worklist);
                        }
                    }
                }
                InstKind::Call { .. }
                    if matches!(calls.get(&inst), Some(BuiltinKind::Collective(_))) => {}
                _ => {
                    for op in kind.operands() {
                        mark(op, &mut worklist);
                    }
                }
            }
        }

        // Assign plans.
        for &inst in &order {
            let Some(result) = func.inst_result(inst) else {
                continue;
            };
            let value_plan = if uniformity.inst_uniformity(inst) == Uniformity::Uniform {
                continue;
            } else if matches!(
                calls.get(&inst),
                Some(BuiltinKind::LaneIdentity {
                    dimension: LaneDim::Index(_) | LaneDim::SubGroup
                })
            ) {
                ValuePlan::LaneId
            } else if matches!(calls.get(&inst), Some(BuiltinKind::Collective(_))) {
                ValuePlan::Packet
            } else if plan.needed.contains(&result)
                && plan.is_packetizable(func, inst, &calls)
                && !factor.is_scalar()
            {
                ValuePlan::Packet
            } else {
                ValuePlan::Instance
            };
            plan.plans.insert(result, value_plan);
        }
        plan
    }

    fn is_packetizable(
        &self,
        func: &Function,
        inst: InstId,
        calls: &FxHashMap<InstId, BuiltinKind>,
    ) -> bool {
        match &func.inst(inst).kind {
            InstKind::Binary { .. }
            | InstKind::Unary { .. }
            | InstKind::Cmp { .. }
            | InstKind::Cast { .. }
            | InstKind::Select { .. }
            | InstKind::ElementPtr { .. }
            | InstKind::Phi { .. } => true,
            InstKind::Load { .. } => self.memory.get(&inst).is_some_and(|f| f.is_vector()),
            InstKind::Call { .. } => matches!(
                calls.get(&inst),
                Some(BuiltinKind::Pure) | Some(BuiltinKind::Collective(_))
            ),
            _ => false,
        }
    }

    /// Plan of a value. Values created after planning are uniform.
    #[inline]
    pub fn plan(&self, v: ValueId) -> ValuePlan {
        self.plans.get(&v).copied().unwrap_or(ValuePlan::Uniform)
    }

    /// Memory form of a varying access.
    #[inline]
    pub fn memory_form(&self, inst: InstId) -> Option<MemoryForm> {
        self.memory.get(&inst).copied()
    }

    /// Check if a value was reached from a vector leaf.
    #[inline]
    pub fn is_needed(&self, v: ValueId) -> bool {
        self.needed.contains(&v)
    }

    /// Number of values planned as packets.
    pub fn packet_count(&self) -> usize {
        self.plans.values().filter(|&&p| p == ValuePlan::Packet).count()
    }

    /// Number of values planned as instances.
    pub fn instance_count(&self) -> usize {
        self.plans.values().filter(|&&p| p == ValuePlan::Instance).count()
    }
}

/// Access shape for a varying memory instruction.
fn memory_form(
    func: &Function,
    inst: InstId,
    strides: &StrideInfo,
    target: &TargetDescriptor,
    config: &VectorizeConfig,
) -> Option<MemoryForm> {
    let kind = &func.inst(inst).kind;
    let (ptr, elem) = match kind {
        InstKind::Load { ptr, .. } => (*ptr, func.value_ty(func.inst_result(inst)?).element()?),
        InstKind::Store { ptr, value, .. } => (*ptr, func.value_ty(*value).element()?),
        _ => return None,
    };
    if kind.mask().is_some() && !target.supports_masked_memory {
        return Some(MemoryForm::Instantiate);
    }
    let size = elem.size_bytes() as i64;
    let gather = config.enable_gather_scatter && target.supports_gather_scatter;
    Some(match strides.stride(ptr) {
        Stride::Linear(s) if s == size => MemoryForm::Contiguous,
        Stride::Linear(s) if s != 0 && s % size == 0 => {
            MemoryForm::Interleaved { stride: s / size }
        }
        Stride::Uniform | Stride::Linear(0) => MemoryForm::Instantiate,
        _ if gather => MemoryForm::GatherScatter,
        _ => MemoryForm::Instantiate,
    })
}

// =============================================================================
// Tests
// =============================================================================
