//! Vectorized kernels must compute what the scalar kernel computes for every
//! work item.

mod common;

use common::*;
use lanewise_ir::{verify_function, Function, Val};
use lanewise_vectorize::{
    CollectedRemarks, TargetDescriptor, VectorizationFactor, VectorizeConfig, Vectorizer,
};

/// Vectorize `kernel` and compare it against the scalar kernel over `items`
/// work items, lane by lane.
fn assert_equivalent(
    kernel: &Function,
    target: TargetDescriptor,
    config: VectorizeConfig,
    lanes: u32,
    items: i64,
    buffers: &[Vec<i32>],
    extra: &[Val],
) -> Function {
    init_logging();
    let vectorizer = Vectorizer::new(target, config);
    let out = vectorizer
        .vectorize(kernel, VectorizationFactor::fixed(lanes), &CollectedRemarks::new())
        .unwrap_or_else(|e| panic!("{} not vectorized at {}: {}", kernel.name, lanes, e));
    verify_function(&out.function).expect("valid output");

    let expected = run_groups(kernel, items, 1, buffers, extra, &mut standard_calls);
    let group = lanes as i64;
    let actual = run_groups(&out.function, items, group, buffers, extra, &mut standard_calls);
    assert_eq!(actual, expected, "{} at width {}", kernel.name, lanes);
    out.function
}

fn ramp(n: i32) -> Vec<i32> {
    (0..n).map(|i| i * 7 % 11 - 5).collect()
}

#[test]
fn test_relu_all_widths() {
    for lanes in [1, 2, 4, 8] {
        assert_equivalent(
            &relu(),
            TargetDescriptor::generic_256(),
            VectorizeConfig::default(),
            lanes,
            16,
            &[ramp(16), vec![0; 16]],
            &[],
        );
    }
}

#[test]
fn test_guarded_division() {
    for lanes in [2, 4, 8] {
        assert_equivalent(
            &guarded_division(),
            TargetDescriptor::generic_256(),
            VectorizeConfig::default(),
            lanes,
            8,
            &[vec![0; 8]],
            &[],
        );
    }
}

#[test]
fn test_branchy_call() {
    assert_equivalent(
        &branchy_call(),
        TargetDescriptor::generic_128(),
        VectorizeConfig::default(),
        4,
        8,
        &[vec![-1; 8]],
        &[],
    );
}

#[test]
fn test_lookup_with_and_without_gather() {
    let table: Vec<i32> = (0..10).map(|i| 100 + i).collect();
    let idx = vec![9, 0, 3, 3, 7, 1, 2, 8];
    for target in [TargetDescriptor::generic_128(), TargetDescriptor::generic_256()] {
        assert_equivalent(
            &lookup(),
            target,
            VectorizeConfig::default(),
            4,
            8,
            &[table.clone(), idx.clone(), vec![0; 8]],
            &[],
        );
    }
}

#[test]
fn test_lookup_conservative_config() {
    let table: Vec<i32> = (0..10).map(|i| 100 + i).collect();
    let idx = vec![9, 0, 3, 3, 7, 1, 2, 8];
    assert_equivalent(
        &lookup(),
        TargetDescriptor::generic_256(),
        VectorizeConfig::conservative(),
        8,
        8,
        &[table, idx, vec![0; 8]],
        &[],
    );
}

#[test]
fn test_pure_call() {
    assert_equivalent(
        &absolute(),
        TargetDescriptor::generic_512(),
        VectorizeConfig::default(),
        16,
        32,
        &[ramp(32), vec![0; 32]],
        &[],
    );
}

#[test]
fn test_uniform_loop() {
    for lanes in [2, 4] {
        assert_equivalent(
            &accumulate(),
            TargetDescriptor::generic_256(),
            VectorizeConfig::default(),
            lanes,
            8,
            &[vec![0; 8]],
            &[Val::I32(5)],
        );
    }
}

#[test]
fn test_interleaved_spread() {
    for with_barrier in [false, true] {
        assert_equivalent(
            &spread(with_barrier),
            TargetDescriptor::generic_256(),
            VectorizeConfig::default(),
            4,
            8,
            &[vec![0; 16]],
            &[],
        );
    }
}
