#![feature(test)]

extern crate test;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rodtrack::geometry::StereoRig;
use rodtrack::matching::npartite::npartite_matching;
use rodtrack::matching::pairwise::{match_frame, PairwiseOptions};
use rodtrack::test_stuff::{synthetic_calibration, SyntheticScene};
use rodtrack::utils::cost_tensor::CostTensor;
use test::Bencher;

#[bench]
fn bench_npartite_010(b: &mut Bencher) {
    bench_npartite(10, b);
}

#[bench]
fn bench_npartite_050(b: &mut Bencher) {
    bench_npartite(50, b);
}

#[bench]
fn bench_npartite_100(b: &mut Bencher) {
    bench_npartite(100, b);
}

#[bench]
fn bench_pairwise_frame_020(b: &mut Bencher) {
    let rig = StereoRig::new(synthetic_calibration(), None).unwrap();
    let frame = SyntheticScene::new(20).noisy_frame(&rig, 0, 0.2, 1);
    let opts = PairwiseOptions::default();
    b.iter(|| {
        let m = match_frame(&rig, &frame, None, 0, &opts).unwrap();
        assert_eq!(m.len(), 20);
    });
}

fn bench_npartite(rods: usize, b: &mut Bencher) {
    let mut gen = StdRng::seed_from_u64(1);
    let weights = CostTensor::from_fn(vec![rods, rods, rods], |_| gen.gen_range(0.0..100.0));
    b.iter(|| {
        let matched = npartite_matching(&weights).unwrap();
        assert_eq!(matched[0].len(), rods);
    });
}
