// tests/test_phase.rs — Integration tests for the CPU demodulation path.
//
// These exercise the public API only: FrameSet validation, the uniform
// scenarios, the degenerate rule, and determinism between the rayon path
// and the single-threaded reference.

use std::f32::consts::PI;

use phasor::error::ExtractError;
use phasor::image::Image;
use phasor::phase::{demodulate_pixel, FrameSet, PhaseExtractor};

fn uniform_set(w: usize, h: usize, values: [u16; 4]) -> [Image<u16>; 4] {
    std::array::from_fn(|i| Image::filled(w, h, values[i]))
}

fn random_frames(w: usize, h: usize, seed: u32) -> [Image<u16>; 4] {
    // LCG; deterministic across runs and platforms.
    let mut rng = seed;
    let mut next = move || {
        rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
        (rng >> 16) as u16
    };
    std::array::from_fn(|_| Image::from_vec(w, h, (0..w * h).map(|_| next()).collect()))
}

// ===== Scenario 1: uniform frames, masking disabled =====

#[test]
fn uniform_frames_threshold_disabled() {
    let frames = uniform_set(40, 30, [100, 200, 150, 180]);
    let set = FrameSet::new([&frames[0], &frames[1], &frames[2], &frames[3]]).unwrap();
    let maps = PhaseExtractor::new(0.0).extract(&set);

    // numerator = 180 - 200 = -20, denominator = 100 - 150 = -50:
    // third quadrant, atan2(-20, -50) ≈ -2.7611 rad.
    let expected_phase = (-20.0f32).atan2(-50.0);
    assert!((expected_phase + 2.7611).abs() < 1e-3);

    for (x, y, p) in maps.phase.pixels() {
        assert_eq!(p, expected_phase, "phase at ({x},{y})");
    }
    assert!(maps.mask.pixels().all(|(_, _, m)| m == 1));
    assert!(maps.mean.pixels().all(|(_, _, m)| m == 157.5));
}

// ===== Scenario 2: same frames, threshold above the mean =====

#[test]
fn uniform_frames_masked_by_threshold() {
    let frames = uniform_set(40, 30, [100, 200, 150, 180]);
    let set = FrameSet::new([&frames[0], &frames[1], &frames[2], &frames[3]]).unwrap();
    let maps = PhaseExtractor::new(200.0).extract(&set);

    // Mean 157.5 < 200: every pixel masked, but phase still computed.
    let expected_phase = (-20.0f32).atan2(-50.0);
    assert!(maps.mask.pixels().all(|(_, _, m)| m == 0));
    assert!(maps.phase.pixels().all(|(_, _, p)| p == expected_phase));
    assert!(maps.mean.pixels().all(|(_, _, m)| m == 157.5));
}

// ===== Scenario 3: identical frames are degenerate =====

#[test]
fn identical_frames_are_degenerate() {
    for threshold in [0.0f32, 50.0, 500.0] {
        let frames = uniform_set(16, 16, [100, 100, 100, 100]);
        let set = FrameSet::new([&frames[0], &frames[1], &frames[2], &frames[3]]).unwrap();
        let maps = PhaseExtractor::new(threshold).extract(&set);

        assert!(maps.phase.pixels().all(|(_, _, p)| p == 0.0));
        assert!(maps.mask.pixels().all(|(_, _, m)| m == 0));
        assert!(maps.mean.pixels().all(|(_, _, m)| m == 100.0));
    }
}

// ===== Determinism =====

#[test]
fn parallel_matches_reference_bitwise() {
    let frames = random_frames(251, 173, 42);
    let set = FrameSet::new([&frames[0], &frames[1], &frames[2], &frames[3]]).unwrap();
    let ex = PhaseExtractor::new(25000.0);

    let par = ex.extract(&set);
    let refr = ex.extract_reference(&set);

    // Bit-identical, not approximately equal: f32::to_bits comparison.
    for ((x, y, a), (_, _, b)) in par.phase.pixels().zip(refr.phase.pixels()) {
        assert_eq!(a.to_bits(), b.to_bits(), "phase bits differ at ({x},{y})");
    }
    for ((x, y, a), (_, _, b)) in par.mean.pixels().zip(refr.mean.pixels()) {
        assert_eq!(a.to_bits(), b.to_bits(), "mean bits differ at ({x},{y})");
    }
    for ((x, y, a), (_, _, b)) in par.mask.pixels().zip(refr.mask.pixels()) {
        assert_eq!(a, b, "mask differs at ({x},{y})");
    }
}

#[test]
fn repeated_calls_are_identical() {
    let frames = random_frames(97, 61, 7);
    let set = FrameSet::new([&frames[0], &frames[1], &frames[2], &frames[3]]).unwrap();
    let ex = PhaseExtractor::new(10000.0);

    let first = ex.extract(&set);
    let second = ex.extract(&set);

    for ((_, _, a), (_, _, b)) in first.phase.pixels().zip(second.phase.pixels()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
    for ((_, _, a), (_, _, b)) in first.mask.pixels().zip(second.mask.pixels()) {
        assert_eq!(a, b);
    }
}

// ===== Per-pixel properties over random data =====

#[test]
fn phase_in_range_and_mean_exact() {
    let frames = random_frames(64, 64, 1234);
    let set = FrameSet::new([&frames[0], &frames[1], &frames[2], &frames[3]]).unwrap();
    let maps = PhaseExtractor::new(0.0).extract(&set);

    for y in 0..64 {
        for x in 0..64 {
            let p = maps.phase.get(x, y);
            assert!(p > -PI && p <= PI, "phase {p} out of range at ({x},{y})");

            let i0 = frames[0].get(x, y) as f32;
            let i1 = frames[1].get(x, y) as f32;
            let i2 = frames[2].get(x, y) as f32;
            let i3 = frames[3].get(x, y) as f32;
            assert_eq!(maps.mean.get(x, y), (i0 + i1 + i2 + i3) * 0.25);
        }
    }
}

#[test]
fn masking_rule_over_random_data() {
    let threshold = 30000.0f32;
    let frames = random_frames(80, 50, 99);
    let set = FrameSet::new([&frames[0], &frames[1], &frames[2], &frames[3]]).unwrap();
    let maps = PhaseExtractor::new(threshold).extract(&set);

    for y in 0..50 {
        for x in 0..80 {
            let (expected_phase, expected_mask, expected_mean) = demodulate_pixel(
                frames[0].get(x, y) as f32,
                frames[1].get(x, y) as f32,
                frames[2].get(x, y) as f32,
                frames[3].get(x, y) as f32,
                threshold,
            );
            assert_eq!(maps.phase.get(x, y), expected_phase);
            assert_eq!(maps.mask.get(x, y), expected_mask);
            assert_eq!(maps.mean.get(x, y), expected_mean);
        }
    }
}

// ===== Mixed content: degenerate and live pixels in one frame set =====

#[test]
fn mixed_degenerate_and_live_pixels() {
    // Left column degenerate (all frames equal), right column live.
    let mk = |left: u16, right: u16| Image::from_vec(2, 2, vec![left, right, left, right]);
    let a = mk(70, 100);
    let b = mk(70, 200);
    let c = mk(70, 150);
    let d = mk(70, 180);
    let set = FrameSet::new([&a, &b, &c, &d]).unwrap();
    let maps = PhaseExtractor::new(0.0).extract(&set);

    for y in 0..2 {
        assert_eq!(maps.phase.get(0, y), 0.0);
        assert_eq!(maps.mask.get(0, y), 0);
        assert_eq!(maps.mean.get(0, y), 70.0);

        assert_eq!(maps.phase.get(1, y), (-20.0f32).atan2(-50.0));
        assert_eq!(maps.mask.get(1, y), 1);
        assert_eq!(maps.mean.get(1, y), 157.5);
    }
}

// ===== Error paths =====

#[test]
fn dimension_mismatch_is_rejected() {
    let a = Image::<u16>::new(32, 32);
    let b = Image::<u16>::new(32, 32);
    let c = Image::<u16>::new(32, 32);
    let d = Image::<u16>::new(33, 32);
    match FrameSet::new([&a, &b, &c, &d]) {
        Err(ExtractError::DimensionMismatch { index: 3, .. }) => {}
        Err(other) => panic!("expected DimensionMismatch for frame 3, got {other:?}"),
        Ok(_) => panic!("mismatched frames were accepted"),
    }
}

#[test]
fn empty_frames_are_rejected() {
    let a = Image::<u16>::new(16, 0);
    let b = Image::<u16>::new(16, 0);
    let c = Image::<u16>::new(16, 0);
    let d = Image::<u16>::new(16, 0);
    assert!(matches!(
        FrameSet::new([&a, &b, &c, &d]),
        Err(ExtractError::EmptyImage)
    ));
}

#[test]
fn single_pixel_image_works() {
    let a = Image::<u16>::filled(1, 1, 100);
    let b = Image::<u16>::filled(1, 1, 200);
    let c = Image::<u16>::filled(1, 1, 150);
    let d = Image::<u16>::filled(1, 1, 180);
    let set = FrameSet::new([&a, &b, &c, &d]).unwrap();
    let maps = PhaseExtractor::new(0.0).extract(&set);
    assert_eq!(maps.mean.get(0, 0), 157.5);
    assert_eq!(maps.mask.get(0, 0), 1);
}
