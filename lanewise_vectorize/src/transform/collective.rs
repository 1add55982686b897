//! Lane-group collectives.
//!
//! Sub-group collectives are lowered completely inside the vectorized
//! function, since the lane group is the sub-group. Work-group collectives
//! keep a call to the runtime, but feed it one partial per lane group:
//!
//! ```text
//! %r = call @work_group_reduce_add(%x)
//!
//! =>
//!
//! %p = vector_reduce add %x.vec
//! %r = call @work_group_reduce_add(%p)
//! ```
//!
//! Scans use a log-step (Hillis-Steele) shift-and-combine over the packet.
//! Work-group scans add the exclusive scan of the group totals, obtained from
//! the runtime, to the local scan.

use super::packetizer::Packetizer;
use crate::builtins::{
    neutral_value, scan_identity, CollectiveDescriptor, CollectiveOp, CollectiveScope,
};
use crate::error::{VectorizeError, VectorizeResult};
use lanewise_ir::{CastOp, CmpOp, InstId, InstKind, RecurKind, ScalarType, Type, ValueId};
use log::debug;

/// Runtime name suffix of a recurrence.
fn recurrence_suffix(kind: RecurKind) -> &'static str {
    match kind {
        RecurKind::Add | RecurKind::FAdd => "add",
        RecurKind::Mul | RecurKind::FMul => "mul",
        RecurKind::SMin | RecurKind::FMin => "min",
        RecurKind::SMax | RecurKind::FMax => "max",
        RecurKind::UMin => "umin",
        RecurKind::UMax => "umax",
        RecurKind::And => "and",
        RecurKind::Or => "or",
        RecurKind::Xor => "xor",
    }
}

impl<'a> Packetizer<'a> {
    /// Lower one collective call.
    pub(super) fn lower_collective(
        &mut self,
        inst: InstId,
        desc: CollectiveDescriptor,
    ) -> VectorizeResult<()> {
        let InstKind::Call { args, .. } = self.func.inst(inst).kind.clone() else {
            return Err(VectorizeError::unsupported(inst, "collective is not a call"));
        };
        let Some(&x) = args.first() else {
            return Err(VectorizeError::unsupported(inst, "collective without an operand"));
        };
        let result = self.func.inst_result(inst);
        debug!(
            "lowering {:?} {:?} over {} lanes",
            desc.scope, desc.op, self.factor.min_lanes
        );

        match desc.op {
            CollectiveOp::Broadcast => {
                let index = args
                    .get(1)
                    .copied()
                    .ok_or_else(|| {
                        VectorizeError::unsupported(inst, "broadcast without a lane index")
                    })?;
                if desc.scope == CollectiveScope::WorkGroup {
                    return Err(VectorizeError::unsupported(inst, "work-group broadcast"));
                }
                if !self.is_uniform(index) {
                    return Err(VectorizeError::unsupported(inst, "broadcast from a varying lane"));
                }
                let packet = self.packet(x)?;
                let value = self.emit_before(inst, |b| b.extract_element(packet, index));
                self.finish_uniform(inst, result, value);
            }
            CollectiveOp::Reduce => {
                let packet = self.packet(x)?;
                let partial = self.emit_before(inst, |b| b.vector_reduce(desc.recurrence, packet));
                self.finish_reduction(inst, desc.scope, result, partial);
            }
            CollectiveOp::Any | CollectiveOp::All => {
                let partial = self.lower_vote(inst, desc, x, result)?;
                self.finish_reduction(inst, desc.scope, result, partial);
            }
            CollectiveOp::ScanInclusive | CollectiveOp::ScanExclusive => {
                let scan = self.lower_scan(inst, desc, x)?;
                let result = result
                    .ok_or_else(|| VectorizeError::unsupported(inst, "scan without a result"))?;
                self.packets.insert(result, scan);
                self.replaced.push(inst);
            }
        }
        self.stats.collectives_lowered += 1;
        Ok(())
    }

    /// Replace a sub-group collective by a value computed in place.
    fn finish_uniform(&mut self, inst: InstId, result: Option<ValueId>, value: ValueId) {
        if let Some(r) = result {
            self.replace_uses(r, value);
        }
        self.replaced.push(inst);
    }

    fn finish_reduction(
        &mut self,
        inst: InstId,
        scope: CollectiveScope,
        result: Option<ValueId>,
        partial: ValueId,
    ) {
        match scope {
            CollectiveScope::SubGroup => self.finish_uniform(inst, result, partial),
            CollectiveScope::WorkGroup => {
                if let InstKind::Call { args, .. } = &mut self.func.inst_mut(inst).kind {
                    args[0] = partial;
                }
            }
        }
    }

    /// `any`/`all`: reduce the truth of every lane.
    fn lower_vote(
        &mut self,
        inst: InstId,
        desc: CollectiveDescriptor,
        x: ValueId,
        result: Option<ValueId>,
    ) -> VectorizeResult<ValueId> {
        let elem = self.func.value_ty(x).element().unwrap_or(ScalarType::I32);
        let shape = self.shape(elem);
        let ret_elem = result
            .and_then(|r| self.func.value_ty(r).element())
            .unwrap_or(ScalarType::I32);
        let zero = if elem.is_float() {
            self.func.const_float(elem, 0.0)
        } else {
            self.func.const_int(elem, 0)
        };
        let packet = self.packet(x)?;
        let kind = if desc.op == CollectiveOp::Any {
            RecurKind::Or
        } else {
            RecurKind::And
        };
        Ok(self.emit_before(inst, |b| {
            let truth = if elem == ScalarType::Bool {
                packet
            } else {
                let zeros = b.splat(zero, shape);
                let op = if elem.is_float() { CmpOp::FNe } else { CmpOp::Ne };
                b.cmp(op, packet, zeros)
            };
            let vote = b.vector_reduce(kind, truth);
            if ret_elem == ScalarType::Bool {
                vote
            } else {
                b.cast(CastOp::ZExt, vote, ret_elem)
            }
        }))
    }

    /// Inclusive or exclusive scan of `x` across the lane group.
    fn lower_scan(
        &mut self,
        inst: InstId,
        desc: CollectiveDescriptor,
        x: ValueId,
    ) -> VectorizeResult<ValueId> {
        let lanes = self.fixed_lanes(inst, "scan")?;
        let elem = self.func.value_ty(x).element().unwrap_or(ScalarType::I32);
        let shape = self.shape(elem);
        let elem_ty = Type::Scalar(elem);
        let op = desc.recurrence.binary_op();
        let neutral = self.func.constant(elem_ty, neutral_value(desc.recurrence, elem));
        let identity = self.func.constant(elem_ty, scan_identity(desc.recurrence, elem));
        let exclusive = desc.op == CollectiveOp::ScanExclusive;
        let packet = self.packet(x)?;

        let local = self.emit_before(inst, |b| {
            let pad = b.splat(neutral, shape);
            let mut acc = packet;
            let mut k = 1;
            while k < lanes {
                let mask = (0..lanes).map(|j| if j >= k { j - k } else { lanes + j }).collect();
                let shifted = b.shuffle(&[acc, pad], mask);
                acc = b.binary(op, acc, shifted);
                k *= 2;
            }
            if exclusive {
                let first = b.splat(identity, shape);
                let mask = (0..lanes).map(|j| if j >= 1 { j - 1 } else { lanes }).collect();
                acc = b.shuffle(&[acc, first], mask);
            }
            acc
        });

        if desc.scope == CollectiveScope::SubGroup {
            return Ok(local);
        }

        // Offset by what earlier lane groups contributed.
        let callee = format!("work_group_scan_exclusive_{}", recurrence_suffix(desc.recurrence));
        let recurrence = desc.recurrence;
        let prefix = self.emit_before(inst, |b| {
            let total = b.vector_reduce(recurrence, packet);
            b.call_value(callee, &[total], elem_ty)
        });
        Ok(self.emit_before(inst, |b| {
            let offset = b.splat(prefix, shape);
            b.binary(op, offset, local)
        }))
    }
}
