//! Every specialized kernel must produce bit-identical output to the general
//! coordinate-decoding loop on the same inputs.

mod common;

use common::{
    bits, dense, random_axes, random_extents, random_layout, random_order, random_values, Placed,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strided_loops::loops::{
    run_element_wise_with_kind, run_index_reduction_with_kind, run_slice_reduction_with_kind,
    run_transform_with_kind,
};
use strided_loops::{
    classify_loop, run_element_wise, run_index_reduction, run_slice_reduction, run_transform,
    run_transform_in_place, EngineConfig, IndexMax, Launch, LoopKind, Mean, Operand, OperandMut,
    Order, Sequential, ShapeDescriptor, SliceOffsetCache, Sum, TadDescriptor,
};

fn operand<'a>(p: &'a Placed, data: &'a [f64]) -> Operand<'a, f64> {
    Operand::with_offset(&p.shape, data, p.base).unwrap()
}

fn operand_mut<'a>(p: &'a Placed, data: &'a mut [f64]) -> OperandMut<'a, f64> {
    OperandMut::with_offset(&p.shape, data, p.base).unwrap()
}

/// Values of `data` in `p`'s linear order.
fn linear(p: &Placed, data: &[f64]) -> Vec<f64> {
    let x = operand(p, data);
    (0..x.len()).map(|i| *x.get(i).unwrap()).collect()
}

#[test]
fn test_identical_contiguous_cubes() {
    let p = dense(&[10, 4, 3], Order::RowMajor);
    assert_eq!(classify_loop(&[&p.shape, &p.shape]), LoopKind::Ews1);

    let mut rng = StdRng::seed_from_u64(3);
    let x = random_values(&mut rng, p.buffer_len);
    let y = random_values(&mut rng, p.buffer_len);
    let mut fast = vec![0.0; p.buffer_len];
    let mut slow = vec![0.0; p.buffer_len];
    let launch = Launch::sequential();

    let kind = run_element_wise(
        &launch,
        operand(&p, &x),
        operand(&p, &y),
        operand_mut(&p, &mut fast),
        |a, b| a * b + 1.0,
    )
    .unwrap();
    assert_eq!(kind, LoopKind::Ews1);
    run_element_wise_with_kind(
        &launch,
        LoopKind::Common,
        operand(&p, &x),
        operand(&p, &y),
        operand_mut(&p, &mut slow),
        |a, b| a * b + 1.0,
    )
    .unwrap();
    assert_eq!(bits(&fast), bits(&slow));

    // The rank-3 nest over the same cubes, via a padded output.
    let padded =
        Placed::new(ShapeDescriptor::new(&[10, 4, 3], &[16, 4, 1], Order::RowMajor).unwrap());
    let mut nested = vec![0.0; padded.buffer_len];
    let kind = run_element_wise(
        &launch,
        operand(&p, &x),
        operand(&p, &y),
        operand_mut(&padded, &mut nested),
        |a, b| a * b + 1.0,
    )
    .unwrap();
    assert_eq!(kind, LoopKind::Rank3);
    assert_eq!(bits(&linear(&padded, &nested)), bits(&slow));
}

#[test]
fn test_element_wise_random_layouts() {
    let mut rng = StdRng::seed_from_u64(42);
    let launch = Launch::sequential();
    let mut seen = std::collections::HashSet::new();
    for _ in 0..300 {
        let extents = random_extents(&mut rng, 5, 5);
        let order = random_order(&mut rng);
        let shared_order = rng.gen_bool(0.7);
        let pick = |rng: &mut StdRng| if shared_order { order } else { random_order(rng) };
        let (ox, oy, oz) = (pick(&mut rng), pick(&mut rng), pick(&mut rng));
        let px = random_layout(&mut rng, &extents, ox);
        let py = random_layout(&mut rng, &extents, oy);
        let pz = random_layout(&mut rng, &extents, oz);

        let x = random_values(&mut rng, px.buffer_len);
        let y = random_values(&mut rng, py.buffer_len);
        let mut fast = vec![0.0; pz.buffer_len];
        let mut slow = vec![0.0; pz.buffer_len];

        let kind = run_element_wise(
            &launch,
            operand(&px, &x),
            operand(&py, &y),
            operand_mut(&pz, &mut fast),
            |a, b| a - 2.0 * b,
        )
        .unwrap();
        run_element_wise_with_kind(
            &launch,
            LoopKind::Common,
            operand(&px, &x),
            operand(&py, &y),
            operand_mut(&pz, &mut slow),
            |a, b| a - 2.0 * b,
        )
        .unwrap();
        assert_eq!(bits(&fast), bits(&slow), "kind {kind} on {extents:?}");
        seen.insert(kind);
    }
    assert!(seen.contains(&LoopKind::Common));
    assert!(seen.iter().any(|k| k.rank().is_some()));
}

#[test]
fn test_transform_random_layouts() {
    let mut rng = StdRng::seed_from_u64(7);
    let launch = Launch::sequential();
    for _ in 0..300 {
        let extents = random_extents(&mut rng, 4, 5);
        let ox = random_order(&mut rng);
        let px = random_layout(&mut rng, &extents, ox);
        // Sometimes a flat output of the same length.
        let pz = if rng.gen_bool(0.3) {
            dense(&[extents.iter().product()], Order::RowMajor)
        } else {
            let order = random_order(&mut rng);
            random_layout(&mut rng, &extents, order)
        };

        let x = random_values(&mut rng, px.buffer_len);
        let mut fast = vec![0.0; pz.buffer_len];
        let mut slow = vec![0.0; pz.buffer_len];
        let kind = run_transform(&launch, operand(&px, &x), operand_mut(&pz, &mut fast), f64::sin)
            .unwrap();
        run_transform_with_kind(
            &launch,
            LoopKind::Common,
            operand(&px, &x),
            operand_mut(&pz, &mut slow),
            f64::sin,
        )
        .unwrap();
        assert_eq!(bits(&fast), bits(&slow), "kind {kind} on {extents:?}");
    }
}

#[test]
fn test_in_place_matches_separate_output() {
    let mut rng = StdRng::seed_from_u64(21);
    let launch = Launch::sequential();
    let mut seen = std::collections::HashSet::new();
    for _ in 0..200 {
        let extents = random_extents(&mut rng, 4, 5);
        let order = random_order(&mut rng);
        let pz = if rng.gen_bool(0.3) {
            dense(&extents, order)
        } else {
            random_layout(&mut rng, &extents, order)
        };
        let original = random_values(&mut rng, pz.buffer_len);

        let mut separate = original.clone();
        run_transform(&launch, operand(&pz, &original), operand_mut(&pz, &mut separate), f64::exp)
            .unwrap();
        let mut in_place = original.clone();
        let kind = run_transform_in_place(&launch, operand_mut(&pz, &mut in_place), f64::exp)
            .unwrap();
        assert_eq!(bits(&in_place), bits(&separate), "kind {kind} on {extents:?}");
        seen.insert(kind);
    }
    assert!(seen.contains(&LoopKind::Ews1));
}

#[test]
fn test_slice_reductions_random_layouts() {
    let mut rng = StdRng::seed_from_u64(11);
    let cache = SliceOffsetCache::new();
    let config = EngineConfig::default();
    let launch = Launch::new(&config, &Sequential);
    let mut seen = std::collections::HashSet::new();

    for _ in 0..300 {
        let extents = random_extents(&mut rng, 5, 5);
        let ox = random_order(&mut rng);
        let px = random_layout(&mut rng, &extents, ox);
        let axes = random_axes(&mut rng, extents.len());
        let desc = TadDescriptor::new(px.shape.clone(), &axes, rng.gen_bool(0.2)).unwrap();
        let pack = cache.get_or_compute(&desc).unwrap();

        let out_extents: Vec<usize> = desc.excluded_axes().iter().map(|&a| extents[a]).collect();
        let pz = if rng.gen_bool(0.5) {
            dense(&out_extents, random_order(&mut rng))
        } else {
            let order = random_order(&mut rng);
            random_layout(&mut rng, &out_extents, order)
        };

        let x = random_values(&mut rng, px.buffer_len);
        let mut fast = vec![0.0; pz.buffer_len];
        let mut slow = vec![0.0; pz.buffer_len];
        let kind = run_slice_reduction(
            &launch,
            operand(&px, &x),
            &pack,
            operand_mut(&pz, &mut fast),
            &Mean::new(),
        )
        .unwrap();
        run_slice_reduction_with_kind(
            &launch,
            LoopKind::Common,
            operand(&px, &x),
            &pack,
            operand_mut(&pz, &mut slow),
            &Mean::new(),
        )
        .unwrap();
        assert_eq!(bits(&fast), bits(&slow), "kind {kind} on {extents:?} along {axes:?}");
        seen.insert(kind);

        let zi = dense(&out_extents, Order::RowMajor);
        let mut fast_i = vec![0i64; zi.buffer_len];
        let mut slow_i = vec![0i64; zi.buffer_len];
        run_index_reduction(
            &launch,
            operand(&px, &x),
            &pack,
            OperandMut::new(&zi.shape, &mut fast_i).unwrap(),
            &IndexMax::new(),
        )
        .unwrap();
        run_index_reduction_with_kind(
            &launch,
            LoopKind::Common,
            operand(&px, &x),
            &pack,
            OperandMut::new(&zi.shape, &mut slow_i).unwrap(),
            &IndexMax::new(),
        )
        .unwrap();
        assert_eq!(fast_i, slow_i);
    }
    assert!(seen.len() >= 3, "only saw {seen:?}");
}

#[test]
fn test_small_aggregation_matches_gather() {
    let mut rng = StdRng::seed_from_u64(5);
    let cache = SliceOffsetCache::new();
    let launch = Launch::sequential();
    let cases = [
        (8, 4, Order::RowMajor),
        (5, 7, Order::ColumnMajor),
        (31, 2, Order::RowMajor),
    ];
    for (rows, cols, order) in cases {
        let px = dense(&[rows, cols], order);
        let along = if order == Order::RowMajor { 0 } else { 1 };
        let pack = cache.slices_for(&px.shape, &[along], false).unwrap();
        let pz = dense(&[pack.num_slices()], Order::RowMajor);

        let x = random_values(&mut rng, px.buffer_len);
        let mut fast = vec![0.0; pz.buffer_len];
        let mut slow = vec![0.0; pz.buffer_len];
        let kind = run_slice_reduction(
            &launch,
            operand(&px, &x),
            &pack,
            operand_mut(&pz, &mut fast),
            &Sum::new(),
        )
        .unwrap();
        assert_eq!(kind, LoopKind::SmallArr2DX);
        run_slice_reduction_with_kind(
            &launch,
            LoopKind::Common,
            operand(&px, &x),
            &pack,
            operand_mut(&pz, &mut slow),
            &Sum::new(),
        )
        .unwrap();
        assert_eq!(bits(&fast), bits(&slow));
    }
}

#[cfg(feature = "parallel")]
#[test]
fn test_parallel_launch_matches_sequential() {
    use strided_loops::RayonWorkers;

    let config = EngineConfig {
        min_elements_per_task: 64,
        min_slices_per_task: 2,
        ..EngineConfig::default()
    };
    let workers = RayonWorkers::with_threads(4).unwrap();
    let parallel = Launch::new(&config, &workers);
    let sequential = Launch::sequential();

    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..50 {
        let extents = random_extents(&mut rng, 4, 12);
        let ox = random_order(&mut rng);
        let px = random_layout(&mut rng, &extents, ox);
        let oz = random_order(&mut rng);
        let pz = random_layout(&mut rng, &extents, oz);
        let x = random_values(&mut rng, px.buffer_len);
        let mut a = vec![0.0; pz.buffer_len];
        let mut b = vec![0.0; pz.buffer_len];
        run_transform(&parallel, operand(&px, &x), operand_mut(&pz, &mut a), |v| v * v).unwrap();
        run_transform(&sequential, operand(&px, &x), operand_mut(&pz, &mut b), |v| v * v).unwrap();
        assert_eq!(bits(&a), bits(&b));
    }
}
