//! Per-lane instantiation.
//!
//! Values that cannot become a single vector operation are replicated once
//! per lane. The original instruction is kept and becomes lane 0; its operands
//! are rewired to their lane-0 values.
//!
//! # Side effects
//!
//! Stores and calls with per-lane side effects are replicated eagerly, right
//! where the original was, in ascending lane order:
//!
//! ```text
//! call @log(%x)          call @log(%x.0)
//!                  =>    call @log(%x.1)
//!                        call @log(%x.2)
//!                        call @log(%x.3)
//! ```
//!
//! Everything else is replicated lazily: lane `i` of a value is only built
//! when some user asks for it, so address computations feeding contiguous
//! accesses never grow past lane 0.

use super::packetizer::{Packetizer, PendingPhi, PhiForm};
use crate::analysis::packetization::ValuePlan;
use crate::builtins::{BuiltinKind, LaneDim};
use crate::error::{VectorizeError, VectorizeResult};
use lanewise_ir::{Builder, InsertPoint, InstId, InstKind, Type, ValueId};
use log::trace;
use rustc_hash::FxHashMap;

impl<'a> Packetizer<'a> {
    /// Lane count for instantiating `inst`.
    pub(super) fn check_instantiable(&self, inst: InstId) -> VectorizeResult<u32> {
        let lanes = self.fixed_lanes(inst, "per-lane instantiation")?;
        if lanes > self.config.max_instantiation_width {
            return Err(VectorizeError::unsupported(
                inst,
                format!(
                    "{} lanes exceed the instantiation limit of {}",
                    lanes, self.config.max_instantiation_width
                ),
            ));
        }
        Ok(lanes)
    }

    /// Make `inst` lane 0 of an instantiated value.
    ///
    /// Only lane 0 is materialized here; other lanes are built on demand.
    pub(super) fn instantiate_value(
        &mut self,
        inst: InstId,
        result: ValueId,
    ) -> VectorizeResult<()> {
        match self.calls.get(&inst).copied() {
            Some(BuiltinKind::LaneIdentity {
                dimension: LaneDim::Dynamic,
            }) => {
                return Err(VectorizeError::unsupported(
                    inst,
                    "lane identity with a non-constant dimension",
                ));
            }
            Some(kind) if kind.is_per_lane_side_effect() => return self.instantiate_effect(inst),
            _ => {}
        }

        let kind = self.func.inst(inst).kind.clone();
        if kind.is_phi() {
            self.originals.insert(inst, kind);
            self.pending.push(PendingPhi {
                phi: inst,
                original: inst,
                form: PhiForm::Lane(0),
            });
        } else {
            self.rewire_lane_zero(inst, kind)?;
        }
        self.instances.insert((result, 0), result);
        Ok(())
    }

    /// Replicate a side-effecting instruction for every lane, in lane order.
    pub(super) fn instantiate_effect(&mut self, inst: InstId) -> VectorizeResult<()> {
        let lanes = self.check_instantiable(inst)?;
        let kind = self.func.inst(inst).kind.clone();
        let result = self.func.inst_result(inst);
        let ty = result.map_or(Type::VOID, |r| self.func.value_ty(r));
        self.rewire_lane_zero(inst, kind.clone())?;

        let mut prev = inst;
        for lane in 1..lanes {
            let map = self.lane_operands(&kind, lane)?;
            let mut clone = kind.clone();
            clone.map_operands(|o| map.get(&o).copied().unwrap_or(o));
            prev = Builder::new(self.func, InsertPoint::After(prev)).insert(clone, ty);
            if let (Some(r), Some(v)) = (result, self.func.inst_result(prev)) {
                self.instances.insert((r, lane), v);
            }
        }
        if let Some(r) = result {
            self.instances.insert((r, 0), r);
        }
        self.tails.insert(inst, prev);
        self.stats.values_instantiated += 1;
        trace!("instantiated inst {} over {} lanes", inst, lanes);
        Ok(())
    }

    fn rewire_lane_zero(&mut self, inst: InstId, kind: InstKind) -> VectorizeResult<()> {
        let map = self.lane_operands(&kind, 0)?;
        let mut rewired = kind.clone();
        rewired.map_operands(|o| map.get(&o).copied().unwrap_or(o));
        self.func.inst_mut(inst).kind = rewired;
        self.originals.insert(inst, kind);
        self.kept.insert(inst);
        Ok(())
    }

    fn lane_operands(
        &mut self,
        kind: &InstKind,
        lane: u32,
    ) -> VectorizeResult<FxHashMap<ValueId, ValueId>> {
        let mut map = FxHashMap::default();
        for op in kind.operands() {
            if !map.contains_key(&op) {
                let value = self.instance(op, lane)?;
                map.insert(op, value);
            }
        }
        Ok(map)
    }

    /// Build lane `lane` of an instantiated value and everything it needs.
    pub(super) fn build_lane(&mut self, v: ValueId, lane: u32) -> VectorizeResult<ValueId> {
        let mut stack = vec![v];
        while let Some(&top) = stack.last() {
            if self.instances.contains_key(&(top, lane)) {
                stack.pop();
                continue;
            }
            let def = self.func.def_inst(top).ok_or_else(|| VectorizeError::Unsupported {
                inst: None,
                reason: "per-lane value without a definition".to_string(),
            })?;
            self.check_instantiable(def)?;
            let ty = self.func.value_ty(top);
            let kind = self.source_kind(def);

            if kind.is_phi() {
                let phi = Builder::new(self.func, InsertPoint::After(def)).phi(ty, &[]);
                let placeholder = self.func.def_inst(phi).unwrap_or(InstId::INVALID);
                self.pending.push(PendingPhi {
                    phi: placeholder,
                    original: def,
                    form: PhiForm::Lane(lane),
                });
                self.instances.insert((top, lane), phi);
                stack.pop();
                continue;
            }

            let missing: Vec<ValueId> = kind
                .operands()
                .into_iter()
                .filter(|&o| {
                    self.plan.plan(o) == ValuePlan::Instance
                        && !self.instances.contains_key(&(o, lane))
                })
                .collect();
            if !missing.is_empty() {
                stack.extend(missing);
                continue;
            }

            let map = self.lane_operands(&kind, lane)?;
            let mut clone = kind;
            clone.map_operands(|o| map.get(&o).copied().unwrap_or(o));
            let value = self.emit_after(top, |b| b.insert_value(clone, ty));
            self.instances.insert((top, lane), value);
            if lane == 1 {
                self.stats.values_instantiated += 1;
            }
            stack.pop();
        }
        self.instances
            .get(&(v, lane))
            .copied()
            .ok_or_else(|| VectorizeError::Unsupported {
                inst: self.func.def_inst(v),
                reason: format!("lane {} could not be built", lane),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::super::packetizer::packetize;
    use crate::analysis::packetization::PacketizationPlan;
    use crate::analysis::stride::StrideInfo;
    use crate::analysis::uniformity::UniformityInfo;
    use crate::builtins::StandardBuiltins;
    use crate::config::{VectorizeConfig, VectorizeStats};
    use crate::error::{ErrorKind, VectorizeResult};
    use crate::target::{TargetDescriptor, VectorizationFactor};
    use lanewise_ir::{
        verify_function, Builder, CastOp, Function, InstKind, InterpResult, Interpreter, Memory,
        ParamAttrs, ScalarType, Type, Val,
    };

    fn run(
        func: &mut Function,
        target: &TargetDescriptor,
        config: &VectorizeConfig,
        factor: VectorizationFactor,
    ) -> VectorizeResult<VectorizeStats> {
        let builtins = StandardBuiltins::new();
        let uniformity = UniformityInfo::compute(func, &builtins, 0);
        let strides = StrideInfo::compute(func, &uniformity, &builtins, 0);
        let plan = PacketizationPlan::compute(
            func,
            &uniformity,
            &strides,
            &builtins,
            target,
            config,
            factor,
        );
        let mut stats = VectorizeStats::default();
        packetize(func, &uniformity, &plan, &builtins, config, factor, &mut stats)?;
        Ok(stats)
    }

    /// trace_lane(gid)
    fn logger() -> Function {
        let mut func = Function::new("logger", Type::VOID);
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let zero = b.const_int(ScalarType::I32, 0);
        let gid = b.call_value("get_global_id", &[zero], Type::I32);
        b.call("trace_lane", &[gid], None, Type::VOID);
        b.ret(None);
        func
    }

    #[test]
    fn test_side_effects_run_in_lane_order() {
        let mut func = logger();
        let stats = run(
            &mut func,
            &TargetDescriptor::generic_128(),
            &VectorizeConfig::default(),
            VectorizationFactor::fixed(4),
        )
        .expect("instantiates");
        verify_function(&func).expect("valid");
        assert_eq!(stats.values_instantiated, 1);
        let calls = func
            .insts_in_order()
            .into_iter()
            .filter(|&i| {
                matches!(
                    &func.inst(i).kind,
                    InstKind::Call { callee, .. } if callee == "trace_lane"
                )
            })
            .count();
        assert_eq!(calls, 4);

        let mut seen = Vec::new();
        let mut env = |name: &str, args: &[Val], _: &mut Memory| -> InterpResult<Option<Val>> {
            match name {
                "get_global_id" => return Ok(Some(Val::I32(8))),
                _ => seen.push(args[0].as_i64()),
            }
            Ok(None)
        };
        Interpreter::new(&func)
            .run(&[], &mut Memory::new(), &mut env)
            .expect("runs");
        assert_eq!(seen, vec![8, 9, 10, 11]);
    }

    #[test]
    fn test_scalable_instantiation_rejected() {
        let mut func = logger();
        let err = run(
            &mut func,
            &TargetDescriptor::generic_scalable(),
            &VectorizeConfig::default(),
            VectorizationFactor::scalable(4),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_instantiation_width_limit() {
        let mut func = logger();
        let config = VectorizeConfig {
            max_instantiation_width: 4,
            ..VectorizeConfig::default()
        };
        let err = run(
            &mut func,
            &TargetDescriptor::generic_256(),
            &config,
            VectorizationFactor::fixed(8),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(err.inst().is_some());
    }

    #[test]
    fn test_irregular_store_builds_lanes_on_demand() {
        // out[gid * gid] = (i32) gid
        let mut func = Function::new("squares", Type::VOID);
        let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let zero = b.const_int(ScalarType::I32, 0);
        let gid = b.call_value("get_global_id", &[zero], Type::I64);
        let idx = b.mul(gid, gid);
        let p = b.element_ptr(out, idx, ScalarType::I32);
        let v = b.cast(CastOp::Trunc, gid, ScalarType::I32);
        b.store(p, v, None, 4);
        b.ret(None);

        // No gather/scatter on this target.
        let stats = run(
            &mut func,
            &TargetDescriptor::generic_128(),
            &VectorizeConfig::default(),
            VectorizationFactor::fixed(4),
        )
        .expect("instantiates");
        verify_function(&func).expect("valid");
        assert_eq!(stats.values_packetized, 0);
        assert_eq!(stats.values_instantiated, 4);
        let stores = func
            .insts_in_order()
            .into_iter()
            .filter(|&i| matches!(func.inst(i).kind, InstKind::Store { .. }))
            .count();
        assert_eq!(stores, 4);

        let mut mem = Memory::new();
        let out_addr = mem.alloc_i32s(&[-1; 10]);
        let mut env = |_: &str, _: &[Val], _: &mut Memory| -> InterpResult<Option<Val>> {
            Ok(Some(Val::I64(0)))
        };
        Interpreter::new(&func)
            .run(&[Val::Ptr(out_addr)], &mut mem, &mut env)
            .expect("runs");
        assert_eq!(
            mem.read_i32s(out_addr, 10),
            Ok(vec![0, 1, -1, -1, 2, -1, -1, -1, -1, 3])
        );
    }
}
