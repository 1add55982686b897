//! Control-flow eligibility.
//!
//! A function can be vectorized when its CFG has exactly one exit, only
//! two-way branches and no irreducible cycles. Eligible functions are further
//! split into convergent ones and ones with divergent branches, which need
//! linearization before packetization.

use super::uniformity::UniformityInfo;
use crate::error::{CfgIssue, VectorizeError, VectorizeResult};
use lanewise_ir::cfg::find_irreducible_edge;
use lanewise_ir::{Cfg, DominatorTree, Function, InstId, InstKind};
use smallvec::SmallVec;

/// Result of an eligibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    /// Every branch condition is uniform.
    Convergent,
    /// Branches whose condition is varying, in reverse post-order.
    MayDiverge { branches: SmallVec<[InstId; 4]> },
}

impl Convergence {
    /// Check if the function has no divergent branch.
    #[inline]
    pub fn is_convergent(&self) -> bool {
        matches!(self, Convergence::Convergent)
    }
}

/// Check structural eligibility only.
pub fn check_structure(func: &Function, cfg: &Cfg) -> VectorizeResult<()> {
    if cfg.is_empty() {
        return Err(VectorizeError::IneligibleCfg(CfgIssue::Empty));
    }
    for &block in cfg.rpo() {
        if let Some(term) = func.terminator(block) {
            if let InstKind::Switch { .. } = func.inst(term).kind {
                return Err(VectorizeError::IneligibleCfg(CfgIssue::Switch { inst: term }));
            }
        }
    }
    match cfg.exits().len() {
        0 => return Err(VectorizeError::IneligibleCfg(CfgIssue::NoExit)),
        1 => {}
        count => return Err(VectorizeError::IneligibleCfg(CfgIssue::MultipleExits { count })),
    }
    let dom = DominatorTree::build(cfg);
    if let Some((from, to)) = find_irreducible_edge(cfg, &dom) {
        return Err(VectorizeError::IneligibleCfg(CfgIssue::Irreducible { from, to }));
    }
    Ok(())
}

/// Classify a function's control flow.
pub fn analyze_control_flow(
    func: &Function,
    uniformity: &UniformityInfo,
) -> VectorizeResult<Convergence> {
    let cfg = Cfg::build(func);
    check_structure(func, &cfg)?;
    let branches = uniformity.divergent_branches();
    if branches.is_empty() {
        Ok(Convergence::Convergent)
    } else {
        Ok(Convergence::MayDiverge {
            branches: branches.iter().copied().collect(),
        })
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

    fn classify(func: &Function) -> VectorizeResult<Convergence> {
        let uniformity = UniformityInfo::compute(func, &StandardBuiltins::new(), 0);
        analyze_control_flow(func, &uniformity)
    }

    #[test]
    fn test_straight_line_is_convergent() {
        let mut func = Function::new("k", Type::VOID);
        let entry = func.add_block("entry");
        Builder::at_end(&mut func, entry).ret(None);
        assert_eq!(classify(&func), Ok(Convergence::Convergent));
    }

    #[test]
    fn test_empty_function() {
        let func = Function::new("k", Type::VOID);
        assert_eq!(
            classify(&func),
            Err(VectorizeError::IneligibleCfg(CfgIssue::Empty))
        );
    }

    #[test]
    fn test_multiple_exits() {
        let mut func = Function::new("k", Type::VOID);
        let c = func.add_param("c", Type::BOOL, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let a = func.add_block("a");
        let b = func.add_block("b");
        Builder::at_end(&mut func, entry).cond_br(c, a, b);
        Builder::at_end(&mut func, a).ret(None);
        Builder::at_end(&mut func, b).unreachable();
        assert_eq!(
            classify(&func),
            Err(VectorizeError::IneligibleCfg(CfgIssue::MultipleExits { count: 2 }))
        );
    }

    #[test]
    fn test_switch_rejected() {
        let mut func = Function::new("k", Type::VOID);
        let x = func.add_param("x", Type::I32, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let exit = func.add_block("exit");
        let sw = Builder::at_end(&mut func, entry).switch(x, vec![(1, exit)], exit);
        Builder::at_end(&mut func, exit).ret(None);
        assert_eq!(
            classify(&func),
            Err(VectorizeError::IneligibleCfg(CfgIssue::Switch { inst: sw }))
        );
    }

    #[test]
    fn test_irreducible_rejected() {
        // entry -> a | b, a <-> b, both -> exit
        let mut func = Function::new("k", Type::VOID);
        let c = func.add_param("c", Type::BOOL, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let a = func.add_block("a");
        let b = func.add_block("b");
        let exit = func.add_block("exit");
        Builder::at_end(&mut func, entry).cond_br(c, a, b);
        Builder::at_end(&mut func, a).cond_br(c, b, exit);
        Builder::at_end(&mut func, b).cond_br(c, a, exit);
        Builder::at_end(&mut func, exit).ret(None);
        assert!(matches!(
            classify(&func),
            Err(VectorizeError::IneligibleCfg(CfgIssue::Irreducible { .. }))
        ));
    }

    #[test]
    fn test_divergent_branch_reported() {
        let mut func = Function::new("k", Type::VOID);
        let entry = func.add_block("entry");
        let then_b = func.add_block("then");
        let exit = func.add_block("exit");
        let mut b = Builder::at_end(&mut func, entry);
        let zero = b.const_int(ScalarType::I32, 0);
        let gid = b.call_value("get_global_id", &[zero], Type::I32);
        let c = b.cmp(CmpOp::Eq, gid, zero);
        let br = b.cond_br(c, then_b, exit);
        Builder::at_end(&mut func, then_b).br(exit);
        Builder::at_end(&mut func, exit).ret(None);

        let result = classify(&func).expect("eligible");
        assert!(!result.is_convergent());
        assert_eq!(
            result,
            Convergence::MayDiverge {
                branches: smallvec::smallvec![br]
            }
        );
    }
}
