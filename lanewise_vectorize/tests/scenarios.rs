//! End-to-end vectorization scenarios.

mod common;

use common::*;
use lanewise_ir::{InstKind, Val};
use lanewise_vectorize::{
    CollectedRemarks, ErrorKind, RemarkKind, TargetDescriptor, VectorizationFactor,
    VectorizeConfig, Vectorizer,
};

fn vectorizer(target: TargetDescriptor) -> Vectorizer {
    init_logging();
    Vectorizer::new(target, VectorizeConfig::default())
}

// =============================================================================
// Shapes of the output
// =============================================================================

#[test]
fn test_relu_is_fully_packetized() {
    let v = vectorizer(TargetDescriptor::generic_128());
    let out = v
        .vectorize(&relu(), VectorizationFactor::fixed(4), &CollectedRemarks::new())
        .expect("vectorizes");
    let func = &out.function;

    assert_eq!(count_vector(func, |k| matches!(k, InstKind::Load { .. })), 1);
    assert_eq!(count(func, |k| matches!(k, InstKind::Load { .. })), 1);
    assert_eq!(count_vector(func, |k| matches!(k, InstKind::Cmp { .. })), 1);
    assert_eq!(count_vector(func, |k| matches!(k, InstKind::Select { .. })), 1);
    assert_eq!(count(func, |k| matches!(k, InstKind::Store { .. })), 1);
    assert_eq!(count(func, |k| matches!(k, InstKind::Gather { .. })), 0);
    assert_eq!(out.stats.values_instantiated, 0);
    assert_eq!(out.stats.successes, 1);

    let input = vec![3, -1, 0, 9, -7, 2, -2, 5];
    let result = run_groups(func, 8, 4, &[input, vec![0; 8]], &[], &mut standard_calls);
    assert_eq!(result[1], vec![3, 0, 0, 9, 0, 2, 0, 5]);
}

#[test]
fn test_unsupported_call_falls_back_to_instantiation() {
    let v = vectorizer(TargetDescriptor::generic_256());
    let out = v
        .vectorize(&branchy_call(), VectorizationFactor::fixed(4), &CollectedRemarks::new())
        .expect("vectorizes");
    let func = &out.function;

    assert_eq!(calls_to(func, "complex_call"), 4);
    assert_eq!(out.stats.regions_linearized, 1);
    assert!(out.stats.values_instantiated >= 1);
    assert_eq!(out.stats.interleaved_groups_merged, 0);

    // Only even work items reach the call, in lane order.
    let mut seen = Vec::new();
    let mut calls = |name: &str, args: &[Val]| {
        seen.push(args[0].as_i64());
        standard_calls(name, args)
    };
    let result = run_groups(func, 8, 4, &[vec![-1; 8]], &[], &mut calls);
    assert_eq!(result[0], vec![1, 0, 7, 0, 13, 0, 19, 0]);
    assert_eq!(seen, vec![0, 2, 4, 6]);
}

#[test]
fn test_interleaved_stores_merged() {
    let v = vectorizer(TargetDescriptor::generic_256());
    let out = v
        .vectorize(&spread(false), VectorizationFactor::fixed(4), &CollectedRemarks::new())
        .expect("vectorizes");
    let func = &out.function;

    assert_eq!(out.stats.interleaved_groups_merged, 1);
    assert_eq!(count(func, |k| matches!(k, InstKind::InterleavedStore { .. })), 0);
    assert_eq!(count(func, |k| matches!(k, InstKind::Store { .. })), 1);
    let result = run_groups(func, 4, 4, &[vec![0; 8]], &[], &mut standard_calls);
    assert_eq!(result[0], vec![0, 0, 1, 1, 2, 4, 3, 9]);
}

#[test]
fn test_no_merge_across_barrier() {
    let v = vectorizer(TargetDescriptor::generic_256());
    let out = v
        .vectorize(&spread(true), VectorizationFactor::fixed(4), &CollectedRemarks::new())
        .expect("vectorizes");
    assert_eq!(out.stats.interleaved_groups_merged, 0);
    assert_eq!(
        count(&out.function, |k| matches!(k, InstKind::InterleavedStore { .. })),
        2
    );
}

#[test]
fn test_combining_can_be_disabled() {
    init_logging();
    let config = VectorizeConfig {
        enable_interleaved_combine: false,
        ..VectorizeConfig::default()
    };
    let v = Vectorizer::new(TargetDescriptor::generic_256(), config);
    let out = v
        .vectorize(&spread(false), VectorizationFactor::fixed(4), &CollectedRemarks::new())
        .expect("vectorizes");
    assert_eq!(out.stats.interleaved_groups_merged, 0);
    assert_eq!(
        count(&out.function, |k| matches!(k, InstKind::InterleavedStore { .. })),
        2
    );
}

#[test]
fn test_width_one_is_identity() {
    let v = vectorizer(TargetDescriptor::generic_256());
    for kernel in [relu(), branchy_call(), accumulate()] {
        let out = v
            .vectorize(&kernel, VectorizationFactor::fixed(1), &CollectedRemarks::new())
            .expect("vectorizes");
        let mut expected = kernel.clone();
        expected.vector_width = Some(VectorizationFactor::fixed(1).lane_group());
        assert_eq!(out.function, expected);
        assert_eq!(out.function.ret_ty, kernel.ret_ty);
    }
}

#[test]
fn test_width_advice_reported() {
    let v = vectorizer(TargetDescriptor::generic_256());
    let remarks = CollectedRemarks::new();
    let out = v
        .vectorize(&relu(), VectorizationFactor::fixed(8), &remarks)
        .expect("vectorizes");
    assert!(out.advice.peak_live > 0);
    assert!(out.advice.max_profitable_width >= 1);
    assert_eq!(remarks.of_kind(RemarkKind::Analysis).len(), 1);
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_ineligible_cfg_leaves_function_untouched() {
    let v = vectorizer(TargetDescriptor::generic_256());
    let remarks = CollectedRemarks::new();
    let mut func = switch_on_id();
    let before = func.clone();

    let err = v
        .vectorize_in_place(&mut func, VectorizationFactor::fixed(4), &remarks)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IneligibleCfg);
    assert_eq!(func, before);

    let missed = remarks.of_kind(RemarkKind::Missed);
    assert_eq!(missed.len(), 1);
    assert_eq!(missed[0].function, "switch_on_id");
    assert_eq!(v.stats().rejected_cfg, 1);
}

#[test]
fn test_divergent_loop_rejected() {
    let v = vectorizer(TargetDescriptor::generic_256());
    let mut func = divergent_loop();
    let before = func.clone();
    let err = v
        .vectorize_in_place(&mut func, VectorizationFactor::fixed(4), &CollectedRemarks::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert_eq!(func, before);
    assert_eq!(v.stats().rejected_unsupported, 1);
}

#[test]
fn test_linearization_disabled_rejects_divergence() {
    init_logging();
    let config = VectorizeConfig {
        enable_linearization: false,
        ..VectorizeConfig::default()
    };
    let v = Vectorizer::new(TargetDescriptor::generic_256(), config);
    let err = v
        .vectorize(&branchy_call(), VectorizationFactor::fixed(4), &CollectedRemarks::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert!(err.inst().is_some());
}

#[test]
fn test_scalable_factor_needs_scalable_target() {
    let v = vectorizer(TargetDescriptor::generic_256());
    let err = v
        .vectorize(&relu(), VectorizationFactor::scalable(4), &CollectedRemarks::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFactor);

    let v = vectorizer(TargetDescriptor::generic_scalable());
    let out = v
        .vectorize(&relu(), VectorizationFactor::scalable(4), &CollectedRemarks::new())
        .expect("vectorizes");
    let width = Some(VectorizationFactor::scalable(4).lane_group());
    assert_eq!(out.function.vector_width, width);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_attempts_share_one_vectorizer() {
    let v = vectorizer(TargetDescriptor::generic_256());
    let remarks = CollectedRemarks::new();
    let kernels = [relu(), branchy_call(), lookup(), spread(false), switch_on_id(), absolute()];

    std::thread::scope(|s| {
        for kernel in &kernels {
            let (v, remarks) = (&v, &remarks);
            s.spawn(move || {
                let _ = v.vectorize(kernel, VectorizationFactor::fixed(4), remarks);
            });
        }
    });

    let stats = v.stats();
    assert_eq!(stats.attempts, kernels.len());
    assert_eq!(stats.successes, kernels.len() - 1);
    assert_eq!(stats.rejected_cfg, 1);
    assert_eq!(remarks.of_kind(RemarkKind::Passed).len(), kernels.len() - 1);
    assert_eq!(remarks.of_kind(RemarkKind::Missed).len(), 1);
}
