//! Rewriting stages of the vectorizer.
//!
//! Stages run in this order on a copy of the input function:
//!
//! 1. [`linearize`]: if-convert divergent regions
//! 2. [`packetizer`]: widen varying values (with [`instantiator`] and
//!    [`collective`] lowering)
//! 3. [`interleaved`]: merge complete interleave groups
//! 4. [`remove_dead_code`]

pub mod collective;
pub mod instantiator;
pub mod interleaved;
pub mod linearize;
pub mod packetizer;

pub use interleaved::combine_interleaved;
pub use linearize::{linearize_divergent_regions, DivergentRegion};
pub use packetizer::packetize;

use crate::builtins::{classify_call, BuiltinInfo, BuiltinKind};
use lanewise_ir::{Function, InstId, InstKind};

/// Check if `inst` can be deleted once its result is unused.
fn is_removable(func: &Function, builtins: &dyn BuiltinInfo, inst: InstId) -> bool {
    let kind = &func.inst(inst).kind;
    match kind {
        InstKind::Call { .. } => matches!(
            classify_call(builtins, func, inst),
            Some(BuiltinKind::LaneIdentity { .. } | BuiltinKind::GroupInvariant | BuiltinKind::Pure)
        ),
        InstKind::Load { .. }
        | InstKind::InterleavedLoad { .. }
        | InstKind::Gather { .. }
        | InstKind::Alloca { .. }
        | InstKind::Phi { .. } => true,
        _ => !kind.is_terminator() && !kind.may_write_memory() && func.inst_result(inst).is_some(),
    }
}

/// Delete instructions whose results are never used. Returns the number of
/// removed instructions.
pub fn remove_dead_code(func: &mut Function, builtins: &dyn BuiltinInfo) -> usize {
    let mut removed = 0;
    loop {
        let users = func.users();
        let dead: Vec<InstId> = func
            .insts_in_order()
            .into_iter()
            .filter(|&inst| {
                func.inst_result(inst)
                    .is_some_and(|r| users.get(r).iter().all(|&u| u == inst))
                    && is_removable(func, builtins, inst)
            })
            .collect();
        if dead.is_empty() {
            return removed;
        }
        removed += dead.len();
        for inst in dead {
            func.remove_inst(inst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::StandardBuiltins;
    use lanewise_ir::{Builder, ScalarType, Type};

    #[test]
    fn test_dead_chain_removed() {
        let mut func = Function::new("dead", Type::VOID);
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let zero = b.const_int(ScalarType::I32, 0);
        let gid = b.call_value("get_global_id", &[zero], Type::I32);
        let x = b.add(gid, gid);
        let _ = b.mul(x, x);
        b.call("trace_lane", &[zero], None, Type::VOID);
        let _ = b.call_value("rand", &[], Type::I32);
        b.ret(None);

        let removed = remove_dead_code(&mut func, &StandardBuiltins::new());
        assert_eq!(removed, 3);
        // The unknown calls stay.
        assert_eq!(func.num_live_insts(), 3);
    }

    #[test]
    fn test_self_referencing_phi_removed() {
        let mut func = Function::new("loop", Type::VOID);
        let entry = func.add_block("entry");
        let header = func.add_block("header");
        let mut b = Builder::at_end(&mut func, entry);
        let zero = b.const_int(ScalarType::I32, 0);
        b.br(header);
        let mut b = Builder::at_end(&mut func, header);
        let phi = b.phi(Type::I32, &[(entry, zero)]);
        let cond = b.const_bool(true);
        let done = func.add_block("done");
        let mut b = Builder::at_end(&mut func, header);
        b.cond_br(cond, header, done);
        Builder::at_end(&mut func, done).ret(None);
        let inst = func.def_inst(phi).expect("phi");
        if let InstKind::Phi { incoming } = &mut func.inst_mut(inst).kind {
            incoming.push((header, phi));
        }

        assert_eq!(remove_dead_code(&mut func, &StandardBuiltins::new()), 1);
        assert!(func.inst(inst).is_dead());
    }
}
