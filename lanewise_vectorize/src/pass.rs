//! Whole-function vectorization driver.
//!
//! Runs the analyses and rewriting stages on a private copy of a kernel
//! function:
//!
//! ```text
//! validate factor
//!   -> uniformity -> control-flow eligibility
//!   -> linearize divergent regions -> uniformity (again)
//!   -> liveness advice -> strides + packetization plan
//!   -> packetize / instantiate -> combine interleaved accesses
//!   -> dead code -> verify
//! ```
//!
//! Any failure abandons the copy; the caller's function is never touched.
//! Every outcome is reported to a [`RemarkEmitter`].

use crate::analysis::{
    analyze_control_flow, Liveness, PacketizationPlan, StrideInfo, UniformityInfo, WidthAdvice,
};
use crate::config::{VectorizeConfig, VectorizeStats};
use crate::error::{VectorizeError, VectorizeResult};
use crate::remark::{Remark, RemarkEmitter};
use crate::target::{TargetDescriptor, VectorizationFactor};
use crate::transform::{
    combine_interleaved, linearize_divergent_regions, packetize, remove_dead_code,
};
use lanewise_ir::{verify_function, Function, InstKind};
use log::debug;
use parking_lot::Mutex;

// =============================================================================
// Result
// =============================================================================

/// A successfully vectorized function.
#[derive(Debug, Clone)]
pub struct VectorizedFunction {
    /// The rewritten function, processing one lane group per invocation.
    pub function: Function,
    pub factor: VectorizationFactor,
    /// Register-pressure advice computed for `factor`.
    pub advice: WidthAdvice,
    /// Statistics of this attempt only.
    pub stats: VectorizeStats,
}

// =============================================================================
// Vectorizer
// =============================================================================

/// Whole-function vectorizer for one target.
///
/// Attempts share no mutable state apart from the accumulated statistics, so
/// one vectorizer can serve several threads.
pub struct Vectorizer {
    target: TargetDescriptor,
    config: VectorizeConfig,
    stats: Mutex<VectorizeStats>,
}

impl Vectorizer {
    /// Create a vectorizer for `target`.
    pub fn new(target: TargetDescriptor, config: VectorizeConfig) -> Self {
        Self {
            target,
            config,
            stats: Mutex::new(VectorizeStats::default()),
        }
    }

    /// Get the target.
    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    /// Get the configuration.
    pub fn config(&self) -> &VectorizeConfig {
        &self.config
    }

    /// Snapshot of the statistics accumulated over all attempts.
    pub fn stats(&self) -> VectorizeStats {
        self.stats.lock().clone()
    }

    /// Clear accumulated statistics.
    pub fn reset_stats(&self) {
        *self.stats.lock() = VectorizeStats::default();
    }

    /// Vectorize a copy of `func` for `factor`.
    ///
    /// Factor 1 returns `func` unchanged apart from `vector_width`.
    pub fn vectorize(
        &self,
        func: &Function,
        factor: VectorizationFactor,
        remarks: &dyn RemarkEmitter,
    ) -> VectorizeResult<VectorizedFunction> {
        let mut stats = VectorizeStats {
            attempts: 1,
            ..Default::default()
        };
        let result = self.attempt(func, factor, &mut stats);
        match &result {
            Ok(vectorized) => {
                stats.successes = 1;
                remarks.emit(Remark::passed(
                    &func.name,
                    format!(
                        "vectorized with factor {} ({} packetized, {} instantiated)",
                        factor, stats.values_packetized, stats.values_instantiated
                    ),
                ));
                remarks.emit(Remark::analysis(
                    &func.name,
                    format!(
                        "peak live values {}, vector pressure {}, widest profitable factor {}",
                        vectorized.advice.peak_live,
                        vectorized.advice.estimated_vector_pressure,
                        vectorized.advice.max_profitable_width
                    ),
                ));
            }
            Err(err) => {
                stats.record_rejection(err.kind());
                remarks.emit(Remark::missed(
                    &func.name,
                    err.inst(),
                    format!("not vectorized with factor {}: {}", factor, err),
                ));
            }
        }
        self.stats.lock().merge(&stats);
        result.map(|mut vectorized| {
            vectorized.stats = stats;
            vectorized
        })
    }

    /// Vectorize `func` in place. On failure `func` is left unchanged.
    pub fn vectorize_in_place(
        &self,
        func: &mut Function,
        factor: VectorizationFactor,
        remarks: &dyn RemarkEmitter,
    ) -> VectorizeResult<WidthAdvice> {
        let vectorized = self.vectorize(func, factor, remarks)?;
        *func = vectorized.function;
        Ok(vectorized.advice)
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    fn attempt(
        &self,
        original: &Function,
        factor: VectorizationFactor,
        stats: &mut VectorizeStats,
    ) -> VectorizeResult<VectorizedFunction> {
        self.target.validate_factor(factor)?;
        check_scalar_input(original)?;

        let builtins = &*self.target.builtins;
        let dimension = self.config.dimension;
        let mut func = original.clone();
        func.remove_unreachable_blocks();

        let uniformity = UniformityInfo::compute(&func, builtins, dimension);
        let convergence = analyze_control_flow(&func, &uniformity)?;
        debug!(
            "@{}: {} varying instructions, convergent: {}",
            func.name,
            uniformity.varying_count(),
            convergence.is_convergent()
        );

        if factor.is_scalar() {
            let advice =
                Liveness::compute(&func).width_advice(&func, &uniformity, &self.target, factor);
            // Width 1 hands back the input itself, unreachable blocks included.
            let mut function = original.clone();
            function.vector_width = Some(factor.lane_group());
            return Ok(VectorizedFunction {
                function,
                factor,
                advice,
                stats: VectorizeStats::default(),
            });
        }

        if !convergence.is_convergent() {
            if !self.config.enable_linearization {
                return Err(VectorizeError::Unsupported {
                    inst: uniformity.divergent_branches().first().copied(),
                    reason: "divergent control flow with linearization disabled".to_string(),
                });
            }
            stats.regions_linearized +=
                linearize_divergent_regions(&mut func, builtins, &self.config)?;
        }

        let uniformity = UniformityInfo::compute(&func, builtins, dimension);
        let advice =
            Liveness::compute(&func).width_advice(&func, &uniformity, &self.target, factor);
        let strides = StrideInfo::compute(&func, &uniformity, builtins, dimension);
        let plan = PacketizationPlan::compute(
            &func,
            &uniformity,
            &strides,
            builtins,
            &self.target,
            &self.config,
            factor,
        );
        debug!(
            "@{}: {} packets, {} instances planned",
            func.name,
            plan.packet_count(),
            plan.instance_count()
        );

        packetize(&mut func, &uniformity, &plan, builtins, &self.config, factor, stats)?;
        if self.config.enable_interleaved_combine && !factor.scalable {
            stats.interleaved_groups_merged += combine_interleaved(&mut func, builtins);
        }
        remove_dead_code(&mut func, builtins);

        if self.config.verify_output {
            verify_function(&func)?;
        }
        Ok(VectorizedFunction {
            function: func,
            factor,
            advice,
            stats: VectorizeStats::default(),
        })
    }
}

impl std::fmt::Debug for Vectorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vectorizer")
            .field("target", &self.target)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Reject functions that already contain lane-group operations.
fn check_scalar_input(func: &Function) -> VectorizeResult<()> {
    if func.vector_width.is_some() {
        return Err(VectorizeError::Unsupported {
            inst: None,
            reason: "function is already vectorized".to_string(),
        });
    }
    if func.has_vector_values() {
        return Err(VectorizeError::Unsupported {
            inst: None,
            reason: "function already uses vector types".to_string(),
        });
    }
    for inst in func.insts_in_order() {
        if let InstKind::InterleavedLoad { .. }
        | InstKind::InterleavedStore { .. }
        | InstKind::Gather { .. }
        | InstKind::Scatter { .. }
        | InstKind::Shuffle { .. } = func.inst(inst).kind
        {
            return Err(VectorizeError::unsupported(
                inst,
                "vector memory operation in scalar input",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::remark::{CollectedRemarks, RemarkKind};
    use lanewise_ir::{Builder, ParamAttrs, ScalarType, Type};

    fn copy_kernel() -> Function {
        let mut func = Function::new("copy", Type::VOID);
        let input = func.add_param("in", Type::PTR, ParamAttrs::NOALIAS);
        let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let zero = b.const_int(ScalarType::I32, 0);
        let gid = b.call_value("get_global_id", &[zero], Type::I64);
        let p = b.element_ptr(input, gid, ScalarType::F32);
        let x = b.load(Type::F32, p, None, 4);
        let q = b.element_ptr(out, gid, ScalarType::F32);
        b.store(q, x, None, 4);
        b.ret(None);
        func
    }

    fn vectorizer(target: TargetDescriptor) -> Vectorizer {
        Vectorizer::new(target, VectorizeConfig::default())
    }

    #[test]
    fn test_vectorizer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Vectorizer>();
    }

    #[test]
    fn test_success_reports_remarks_and_stats() {
        let vectorizer = vectorizer(TargetDescriptor::generic_256());
        let remarks = CollectedRemarks::new();
        let out = vectorizer
            .vectorize(&copy_kernel(), VectorizationFactor::fixed(8), &remarks)
            .expect("vectorizes");
        let width = Some(VectorizationFactor::fixed(8).lane_group());
        assert_eq!(out.function.vector_width, width);
        assert_eq!(out.stats.successes, 1);
        assert_eq!(remarks.of_kind(RemarkKind::Passed).len(), 1);
        assert_eq!(remarks.of_kind(RemarkKind::Analysis).len(), 1);
        assert_eq!(vectorizer.stats().successes, 1);
        assert_eq!(vectorizer.stats().attempts, 1);
    }

    #[test]
    fn test_invalid_factor_rejected() {
        let vectorizer = vectorizer(TargetDescriptor::generic_128());
        let remarks = CollectedRemarks::new();
        let err = vectorizer
            .vectorize(&copy_kernel(), VectorizationFactor::fixed(3), &remarks)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFactor);
        assert_eq!(remarks.of_kind(RemarkKind::Missed).len(), 1);
        assert_eq!(vectorizer.stats().rejected_factor, 1);
    }

    #[test]
    fn test_vectorized_input_rejected() {
        let vectorizer = vectorizer(TargetDescriptor::generic_256());
        let remarks = CollectedRemarks::new();
        let once = vectorizer
            .vectorize(&copy_kernel(), VectorizationFactor::fixed(4), &remarks)
            .expect("vectorizes");
        let err = vectorizer
            .vectorize(&once.function, VectorizationFactor::fixed(4), &remarks)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_in_place_commits_on_success() {
        let vectorizer = vectorizer(TargetDescriptor::generic_256());
        let mut func = copy_kernel();
        vectorizer
            .vectorize_in_place(&mut func, VectorizationFactor::fixed(4), &CollectedRemarks::new())
            .expect("vectorizes");
        assert!(func.vector_width.is_some());
        assert!(func.has_vector_values());
    }

    #[test]
    fn test_width_one_keeps_unreachable_blocks() {
        let vectorizer = vectorizer(TargetDescriptor::generic_256());
        let mut func = copy_kernel();
        let dead = func.add_block("dead");
        Builder::at_end(&mut func, dead).ret(None);

        let out = vectorizer
            .vectorize(&func, VectorizationFactor::fixed(1), &CollectedRemarks::new())
            .expect("vectorizes");
        let mut expected = func.clone();
        expected.vector_width = Some(VectorizationFactor::fixed(1).lane_group());
        assert_eq!(out.function, expected);
        assert!(out.function.layout.contains(&dead));
    }

    #[test]
    fn test_reset_stats() {
        let vectorizer = vectorizer(TargetDescriptor::generic_256());
        let remarks = CollectedRemarks::new();
        let _ = vectorizer.vectorize(&copy_kernel(), VectorizationFactor::fixed(4), &remarks);
        assert_eq!(vectorizer.stats().attempts, 1);
        vectorizer.reset_stats();
        assert_eq!(vectorizer.stats(), VectorizeStats::default());
    }
}
