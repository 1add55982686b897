//! Packetizer
//!
//! Rewrites a linearized scalar function so that one invocation processes a
//! whole lane group. Every varying value gets one of two representations:
//!
//! - a **packet**: one vector value holding every lane
//! - **instances**: `N` scalar values, one per lane
//!
//! Uniform values keep their scalar form. Conversions between forms are built
//! on demand and memoized:
//!
//! | have \ want | packet                  | lane `i`                    |
//! |-------------|-------------------------|-----------------------------|
//! | uniform     | splat                   | the value itself            |
//! | lane id     | splat(base) + step      | base + i                    |
//! | packet      | -                       | extract element `i`         |
//! | instances   | insert-element chain    | -                           |
//!
//! # Placement
//!
//! New instructions must dominate every use of the value they stand for.
//! Replacements are emitted right before the instruction they replace;
//! conversions are appended to an anchor chain directly after the definition
//! they convert, or at the top of the entry block for parameters and
//! constants. Phis get placeholders whose inputs are filled in once every
//! definition has a representation.
//!
//! # Order
//!
//! Instructions are visited in reverse post-order, so operands are always
//! rewritten before their users, except for phi inputs along back edges.
//! Lanes of instantiated values are built lazily with an explicit worklist
//! (see `instantiator.rs`).

use crate::analysis::packetization::{MemoryForm, PacketizationPlan, ValuePlan};
use crate::analysis::uniformity::UniformityInfo;
use crate::builtins::{classify_call, BuiltinInfo, BuiltinKind};
use crate::config::{VectorizeConfig, VectorizeStats};
use crate::error::{VectorizeError, VectorizeResult};
use crate::target::VectorizationFactor;
use lanewise_ir::{
    BlockId, Builder, Cfg, Function, InsertPoint, InstId, InstKind, ScalarType, Type, ValueId,
    VectorType,
};
use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

// =============================================================================
// Pending Phis
// =============================================================================

/// Representation a phi placeholder stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PhiForm {
    Packet,
    Lane(u32),
}

/// A phi whose inputs are filled in after the main walk.
#[derive(Debug, Clone, Copy)]
pub(super) struct PendingPhi {
    /// The phi to fill.
    pub phi: InstId,
    /// The original phi whose inputs are translated.
    pub original: InstId,
    pub form: PhiForm,
}

// =============================================================================
// Packetizer
// =============================================================================

/// Rewrite context of one packetization attempt.
pub struct Packetizer<'a> {
    pub(super) func: &'a mut Function,
    pub(super) uniformity: &'a UniformityInfo,
    pub(super) plan: &'a PacketizationPlan,
    pub(super) builtins: &'a dyn BuiltinInfo,
    pub(super) config: &'a VectorizeConfig,
    pub(super) factor: VectorizationFactor,
    pub(super) stats: &'a mut VectorizeStats,
    pub(super) entry: BlockId,
    /// Call classifications of the original instructions.
    pub(super) calls: FxHashMap<InstId, BuiltinKind>,
    pub(super) packets: FxHashMap<ValueId, ValueId>,
    pub(super) instances: FxHashMap<(ValueId, u32), ValueId>,
    /// Last instruction of the anchor chain behind a definition.
    pub(super) tails: FxHashMap<InstId, InstId>,
    pub(super) entry_tail: Option<InstId>,
    /// Originals reused as lane 0.
    pub(super) kept: FxHashSet<InstId>,
    /// Operands of kept originals before they were rewired to lane 0.
    pub(super) originals: FxHashMap<InstId, InstKind>,
    /// Originals superseded by new instructions.
    pub(super) replaced: Vec<InstId>,
    pub(super) pending: Vec<PendingPhi>,
}

/// Packetize `func` in place.
///
/// `func` must be free of divergent branches and `plan` must have been
/// computed on it in its current form.
pub fn packetize(
    func: &mut Function,
    uniformity: &UniformityInfo,
    plan: &PacketizationPlan,
    builtins: &dyn BuiltinInfo,
    config: &VectorizeConfig,
    factor: VectorizationFactor,
    stats: &mut VectorizeStats,
) -> VectorizeResult<()> {
    let entry = func
        .entry_block()
        .ok_or_else(|| VectorizeError::Unsupported {
            inst: None,
            reason: "function has no entry block".to_string(),
        })?;
    Packetizer {
        func,
        uniformity,
        plan,
        builtins,
        config,
        factor,
        stats,
        entry,
        calls: FxHashMap::default(),
        packets: FxHashMap::default(),
        instances: FxHashMap::default(),
        tails: FxHashMap::default(),
        entry_tail: None,
        kept: FxHashSet::default(),
        originals: FxHashMap::default(),
        replaced: Vec::new(),
        pending: Vec::new(),
    }
    .run()
}

impl<'a> Packetizer<'a> {
    fn run(mut self) -> VectorizeResult<()> {
        let cfg = Cfg::build(self.func);
        let order: Vec<InstId> = cfg
            .rpo()
            .iter()
            .flat_map(|&b| self.func.block_insts(b).to_vec())
            .collect();
        for &inst in &order {
            if let Some(kind) = classify_call(self.builtins, self.func, inst) {
                self.calls.insert(inst, kind);
            }
        }

        for &inst in &order {
            if self.func.inst(inst).is_dead() {
                continue;
            }
            if let Some(BuiltinKind::Collective(desc)) = self.calls.get(&inst).copied() {
                self.lower_collective(inst, desc)?;
                continue;
            }
            if let InstKind::Ret { value: Some(v) } = self.func.inst(inst).kind {
                self.rewrite_return(inst, v)?;
                continue;
            }
            if !self.uniformity.is_inst_varying(inst) {
                continue;
            }
            match self.func.inst_result(inst) {
                Some(result) => self.rewrite_value(inst, result)?,
                None => self.rewrite_effect(inst)?,
            }
        }

        self.patch_phis()?;
        for inst in std::mem::take(&mut self.replaced) {
            self.func.remove_inst(inst);
        }
        self.func.vector_width = Some(self.factor.lane_group());
        debug!(
            "packetized @{}: {} packets, {} lane values",
            self.func.name,
            self.packets.len(),
            self.instances.len()
        );
        Ok(())
    }

    // =========================================================================
    // Shapes
    // =========================================================================

    /// Vector shape of the lane group for `elem`.
    pub(super) fn shape(&self, elem: ScalarType) -> VectorType {
        if self.factor.scalable {
            VectorType::scalable(elem, self.factor.min_lanes)
        } else {
            VectorType::fixed(elem, self.factor.min_lanes)
        }
    }

    /// Widen a scalar type to the lane group.
    pub(super) fn widen(&self, ty: Type) -> Type {
        match ty.element() {
            Some(elem) => ty.with_lanes(self.shape(elem)),
            None => ty,
        }
    }

    /// Fixed lane count, or `Unsupported` for scalable factors.
    pub(super) fn fixed_lanes(&self, inst: InstId, what: &str) -> VectorizeResult<u32> {
        if self.factor.scalable {
            Err(VectorizeError::unsupported(
                inst,
                format!("{} needs a fixed lane count", what),
            ))
        } else {
            Ok(self.factor.min_lanes)
        }
    }

    #[inline]
    pub(super) fn is_uniform(&self, v: ValueId) -> bool {
        self.uniformity.is_uniform(self.func, v)
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Emit instructions on the anchor chain of `src`.
    pub(super) fn emit_after<R>(
        &mut self,
        src: ValueId,
        build: impl FnOnce(&mut Builder<'_>) -> R,
    ) -> R {
        let def = self.func.def_inst(src);
        let point = match def {
            Some(d) => match self.tails.get(&d) {
                Some(&tail) => InsertPoint::After(tail),
                None if self.func.inst(d).kind.is_phi() => {
                    InsertPoint::BlockStart(self.func.inst(d).block)
                }
                None => InsertPoint::After(d),
            },
            None => match self.entry_tail {
                Some(tail) => InsertPoint::After(tail),
                None => InsertPoint::BlockStart(self.entry),
            },
        };
        let mut b = Builder::new(self.func, point);
        let result = build(&mut b);
        if let InsertPoint::After(last) = b.point() {
            match def {
                Some(d) => {
                    self.tails.insert(d, last);
                }
                None => self.entry_tail = Some(last),
            }
        }
        result
    }

    /// Emit instructions right before `inst`.
    pub(super) fn emit_before<R>(
        &mut self,
        inst: InstId,
        build: impl FnOnce(&mut Builder<'_>) -> R,
    ) -> R {
        let mut b = Builder::new(self.func, InsertPoint::Before(inst));
        build(&mut b)
    }

    // =========================================================================
    // Representations
    // =========================================================================

    /// Vector form of `v`.
    pub(super) fn packet(&mut self, v: ValueId) -> VectorizeResult<ValueId> {
        if let Some(&p) = self.packets.get(&v) {
            return Ok(p);
        }
        let ty = self.func.value_ty(v);
        let elem = ty.element().ok_or_else(|| VectorizeError::Unsupported {
            inst: self.func.def_inst(v),
            reason: "void value used as an operand".to_string(),
        })?;
        let shape = self.shape(elem);
        let packet = match self.plan.plan(v) {
            ValuePlan::Uniform => self.emit_after(v, |b| b.splat(v, shape)),
            ValuePlan::LaneId => {
                let vector_ty = ty.with_lanes(shape);
                self.emit_after(v, |b| {
                    let base = b.splat(v, shape);
                    let step = b.step_vector(vector_ty);
                    b.add(base, step)
                })
            }
            ValuePlan::Packet => {
                return Err(VectorizeError::Unsupported {
                    inst: self.func.def_inst(v),
                    reason: "vector value used before its definition".to_string(),
                });
            }
            ValuePlan::Instance => {
                let def = self.func.def_inst(v).unwrap_or(InstId::INVALID);
                let lanes = self.fixed_lanes(def, "assembling per-lane values")?;
                let mut parts = Vec::with_capacity(lanes as usize);
                for lane in 0..lanes {
                    parts.push(self.instance(v, lane)?);
                }
                let vector_ty = ty.with_lanes(shape);
                let undef = self.func.undef(vector_ty);
                self.emit_after(v, |b| {
                    let mut acc = undef;
                    for (lane, &part) in parts.iter().enumerate() {
                        let index = b.const_int(ScalarType::I32, lane as i64);
                        acc = b.insert_element(acc, part, index);
                    }
                    acc
                })
            }
        };
        self.packets.insert(v, packet);
        Ok(packet)
    }

    /// Scalar value of `v` in `lane`.
    pub(super) fn instance(&mut self, v: ValueId, lane: u32) -> VectorizeResult<ValueId> {
        if let Some(&i) = self.instances.get(&(v, lane)) {
            return Ok(i);
        }
        let value = match self.plan.plan(v) {
            ValuePlan::Uniform => return Ok(v),
            ValuePlan::LaneId if lane == 0 => v,
            ValuePlan::LaneId => {
                let elem = self.func.value_ty(v).element().unwrap_or(ScalarType::I32);
                self.emit_after(v, |b| {
                    let offset = b.const_int(elem, lane as i64);
                    b.add(v, offset)
                })
            }
            ValuePlan::Packet => {
                let packet = self.packet(v)?;
                self.emit_after(packet, |b| {
                    let index = b.const_int(ScalarType::I32, lane as i64);
                    b.extract_element(packet, index)
                })
            }
            ValuePlan::Instance if lane == 0 => v,
            ValuePlan::Instance => return self.build_lane(v, lane),
        };
        self.instances.insert((v, lane), value);
        Ok(value)
    }

    /// Mask operand of a vector memory operation. Uniform masks stay scalar.
    pub(super) fn vector_mask(
        &mut self,
        mask: Option<ValueId>,
    ) -> VectorizeResult<Option<ValueId>> {
        match mask {
            Some(m) if !self.is_uniform(m) => Ok(Some(self.packet(m)?)),
            other => Ok(other),
        }
    }

    // =========================================================================
    // Rewriting
    // =========================================================================

    fn rewrite_value(&mut self, inst: InstId, result: ValueId) -> VectorizeResult<()> {
        match self.plan.plan(result) {
            ValuePlan::Uniform | ValuePlan::LaneId => Ok(()),
            ValuePlan::Packet => {
                let packet = self.build_packet(inst, result)?;
                trace!("packet for inst {}: v{}", inst, packet);
                self.packets.insert(result, packet);
                self.replaced.push(inst);
                self.stats.values_packetized += 1;
                Ok(())
            }
            ValuePlan::Instance => self.instantiate_value(inst, result),
        }
    }

    /// One vector instruction standing for `inst` across all lanes.
    fn build_packet(&mut self, inst: InstId, result: ValueId) -> VectorizeResult<ValueId> {
        let ty = self.func.value_ty(result);
        let vector_ty = self.widen(ty);
        let kind = self.func.inst(inst).kind.clone();
        let packet = match kind {
            InstKind::Binary { op, lhs, rhs } => {
                let (l, r) = (self.packet(lhs)?, self.packet(rhs)?);
                self.emit_before(inst, |b| b.binary(op, l, r))
            }
            InstKind::Unary { op, operand } => {
                let x = self.packet(operand)?;
                self.emit_before(inst, |b| b.unary(op, x))
            }
            InstKind::Cmp { op, lhs, rhs } => {
                let (l, r) = (self.packet(lhs)?, self.packet(rhs)?);
                self.emit_before(inst, |b| b.cmp(op, l, r))
            }
            InstKind::Cast { op, value } => {
                let to = ty.element().unwrap_or(ScalarType::I32);
                let x = self.packet(value)?;
                self.emit_before(inst, |b| b.cast(op, x, to))
            }
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => {
                let c = if self.is_uniform(cond) {
                    cond
                } else {
                    self.packet(cond)?
                };
                let (t, e) = (self.packet(then_value)?, self.packet(else_value)?);
                self.emit_before(inst, |b| b.select(c, t, e))
            }
            InstKind::ElementPtr { base, index, elem } => {
                let base = if self.is_uniform(base) {
                    base
                } else {
                    self.packet(base)?
                };
                let index = if self.is_uniform(index) {
                    index
                } else {
                    self.packet(index)?
                };
                self.emit_before(inst, |b| b.element_ptr(base, index, elem))
            }
            InstKind::Load { ptr, mask, align } => {
                let mask = self.vector_mask(mask)?;
                match self.plan.memory_form(inst) {
                    Some(MemoryForm::Contiguous) => {
                        let base = self.instance(ptr, 0)?;
                        self.emit_before(inst, |b| b.load(vector_ty, base, mask, align))
                    }
                    Some(MemoryForm::Interleaved { stride }) => {
                        let base = self.instance(ptr, 0)?;
                        self.emit_before(inst, |b| {
                            b.interleaved_load(vector_ty, base, stride, mask)
                        })
                    }
                    Some(MemoryForm::GatherScatter) => {
                        let ptrs = self.packet(ptr)?;
                        self.emit_before(inst, |b| b.gather(vector_ty, ptrs, mask))
                    }
                    _ => return Err(VectorizeError::unsupported(inst, "load has no vector form")),
                }
            }
            InstKind::Phi { .. } => {
                let phi = self.emit_before(inst, |b| b.phi(vector_ty, &[]));
                let placeholder = self.func.def_inst(phi).unwrap_or(InstId::INVALID);
                self.pending.push(PendingPhi {
                    phi: placeholder,
                    original: inst,
                    form: PhiForm::Packet,
                });
                phi
            }
            InstKind::Call { callee, args, mask } => {
                let mut vector_args = Vec::with_capacity(args.len());
                for &arg in &args {
                    vector_args.push(self.packet(arg)?);
                }
                let mask = self.vector_mask(mask)?;
                let call =
                    self.emit_before(inst, |b| b.call(callee, &vector_args, mask, vector_ty));
                self.func
                    .inst_result(call)
                    .ok_or_else(|| VectorizeError::unsupported(inst, "call result vanished"))?
            }
            other => {
                return Err(VectorizeError::unsupported(
                    inst,
                    format!("no vector form for {}", other.mnemonic()),
                ));
            }
        };
        Ok(packet)
    }

    /// Rewrite a varying instruction without a result.
    fn rewrite_effect(&mut self, inst: InstId) -> VectorizeResult<()> {
        let kind = self.func.inst(inst).kind.clone();
        match kind {
            InstKind::Store {
                ptr,
                value,
                mask,
                align,
            } => {
                let form = self.plan.memory_form(inst).unwrap_or(MemoryForm::Instantiate);
                if form == MemoryForm::Instantiate {
                    return self.instantiate_effect(inst);
                }
                let data = self.packet(value)?;
                let mask = self.vector_mask(mask)?;
                match form {
                    MemoryForm::Contiguous => {
                        let base = self.instance(ptr, 0)?;
                        self.emit_before(inst, |b| b.store(base, data, mask, align));
                    }
                    MemoryForm::Interleaved { stride } => {
                        let base = self.instance(ptr, 0)?;
                        self.emit_before(inst, |b| b.interleaved_store(base, data, stride, mask));
                    }
                    _ => {
                        let ptrs = self.packet(ptr)?;
                        self.emit_before(inst, |b| b.scatter(ptrs, data, mask));
                    }
                }
                self.replaced.push(inst);
                self.stats.values_packetized += 1;
                Ok(())
            }
            InstKind::Call { .. } => self.instantiate_effect(inst),
            other => Err(VectorizeError::unsupported(
                inst,
                format!("no vector form for {}", other.mnemonic()),
            )),
        }
    }

    /// Return one result per lane.
    fn rewrite_return(&mut self, inst: InstId, value: ValueId) -> VectorizeResult<()> {
        let packet = self.packet(value)?;
        self.func.inst_mut(inst).kind = InstKind::Ret { value: Some(packet) };
        self.func.ret_ty = self.widen(self.func.ret_ty);
        Ok(())
    }

    /// Kind of `inst` as it was before lane-0 rewiring.
    pub(super) fn source_kind(&self, inst: InstId) -> InstKind {
        match self.originals.get(&inst) {
            Some(kind) => kind.clone(),
            None => self.func.inst(inst).kind.clone(),
        }
    }

    /// Replace every use of `old`, including in saved originals.
    pub(super) fn replace_uses(&mut self, old: ValueId, new: ValueId) {
        self.func.replace_all_uses(old, new);
        for kind in self.originals.values_mut() {
            kind.map_operands(|v| if v == old { new } else { v });
        }
    }

    // =========================================================================
    // Phis
    // =========================================================================

    /// Fill in the inputs of every placeholder phi.
    fn patch_phis(&mut self) -> VectorizeResult<()> {
        while let Some(pending) = self.pending.pop() {
            let InstKind::Phi { incoming } = self.source_kind(pending.original) else {
                continue;
            };
            let mut translated = incoming.clone();
            for (slot, &(_, v)) in translated.iter_mut().zip(incoming.iter()) {
                slot.1 = match pending.form {
                    PhiForm::Packet => self.packet(v)?,
                    PhiForm::Lane(lane) => self.instance(v, lane)?,
                };
            }
            self.func.inst_mut(pending.phi).kind = InstKind::Phi { incoming: translated };
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
