// tests/test_pyramid.rs — Blur windows, gradients and pyramids used by the
// flow solvers.

use event_simulator::convolution::{convolve_separable, gaussian_kernel_1d};
use event_simulator::gradient::central_difference;
use event_simulator::image::Image;
use event_simulator::pyramid::{usable_levels, Pyramid, MIN_LEVEL_SIDE};

// ===== Windows =====

#[test]
fn separable_window_equals_clamped_2d_sum() {
    // The dense solvers rely on this: a separable blur with replicated
    // borders is the same as summing k[i]·k[j] over clamped neighbours.
    let img = Image::from_fn(9, 7, |x, y| ((x * 31 + y * 17) % 23) as f32);
    let k = gaussian_kernel_1d(2, 1.2);
    let blurred = convolve_separable(&img, &k, &k);

    let r = 2isize;
    for y in 0..7 {
        for x in 0..9 {
            let mut acc = 0.0f32;
            for j in -r..=r {
                for i in -r..=r {
                    let w = k[(i + r) as usize] * k[(j + r) as usize];
                    acc += w * img.get_clamped(x as isize + i, y as isize + j);
                }
            }
            assert!((blurred.get(x, y) - acc).abs() < 1e-3, "({x},{y}): {} vs {acc}", blurred.get(x, y));
        }
    }
}

#[test]
fn window_preserves_constant_frame() {
    let img = Image::filled(12, 12, 90u8);
    let k = gaussian_kernel_1d(3, 1.5);
    let out = convolve_separable(&img, &k, &k);
    for (x, y, v) in out.pixels() {
        assert!((v - 90.0).abs() < 1e-3, "({x},{y}) = {v}");
    }
}

// ===== Gradients =====

#[test]
fn central_difference_of_ramp() {
    let img = Image::from_fn(10, 6, |x, y| 3.0 * x as f32 + 0.5 * y as f32);
    let (gx, gy) = central_difference(&img);
    for y in 1..5 {
        for x in 1..9 {
            assert!((gx.get(x, y) - 3.0).abs() < 1e-5);
            assert!((gy.get(x, y) - 0.5).abs() < 1e-5);
        }
    }
    // Replicated border halves the one-sided difference.
    assert!((gx.get(0, 2) - 1.5).abs() < 1e-5);
}

// ===== Pyramid =====

#[test]
fn pyramid_for_davis_resolution() {
    let frame: Image<u8> = Image::new(346, 260);
    let pyr = Pyramid::build(&frame, 3, 1.0);
    assert_eq!(pyr.num_levels(), 3);
    assert_eq!((pyr.level(1).width(), pyr.level(1).height()), (173, 130));
    assert_eq!((pyr.level(2).width(), pyr.level(2).height()), (86, 65));
}

#[test]
fn small_frames_get_fewer_levels() {
    assert_eq!(usable_levels(640, 480, 5), 5);
    assert_eq!(usable_levels(32, 32, 5), 3);
    assert_eq!(usable_levels(4, 4, 3), 1);

    let tiny: Image<u8> = Image::new(20, 12);
    let pyr = Pyramid::build(&tiny, 4, 1.0);
    let coarsest = pyr.level(pyr.num_levels() - 1);
    assert!(coarsest.width().min(coarsest.height()) >= MIN_LEVEL_SIDE);
}

#[test]
fn coarse_levels_smooth_a_step_edge() {
    let img = Image::from_fn(128, 64, |x, _| if x < 64 { 0u8 } else { 255 });
    let pyr = Pyramid::build(&img, 4, 1.0);

    let steepest = |img: &Image<f32>| {
        let y = img.height() / 2;
        (1..img.width())
            .map(|x| (img.get(x, y) - img.get(x - 1, y)).abs())
            .fold(0.0f32, f32::max)
    };
    assert!(steepest(pyr.level(1)) < steepest(pyr.level(0)));
}
