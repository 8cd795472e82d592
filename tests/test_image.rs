// tests/test_image.rs — Frames, regions of interest and sub-pixel sampling.
//
// Integration tests only see the public API, so they double as a check
// that a frame can travel from a decoded image to the simulator input.

use event_simulator::image::{interpolate_bilinear, to_f32_image, Frame, FrameSize, Image, Roi};
use event_simulator::threshold::IntensityTransform;

// ===== Frame construction =====

#[test]
fn frame_size_and_indexing() {
    let frame: Frame = Image::new(346, 260);
    let size = frame.size();
    assert_eq!(size, FrameSize::new(346, 260));
    assert_eq!(size.area(), 346 * 260);
    assert_eq!(size.index(3, 2), 2 * 346 + 3);
    assert!(!size.is_empty());
    assert!(FrameSize::new(0, 10).is_empty());
}

#[test]
fn frame_from_fn_row_major() {
    let frame = Image::from_fn(3, 2, |x, y| (10 * y + x) as u8);
    assert_eq!(frame.row(0), &[0, 1, 2]);
    assert_eq!(frame.row(1), &[10, 11, 12]);
    assert_eq!(frame[(2, 1)], 12);
}

#[test]
fn gray_image_round_trip() {
    let frame = Image::from_fn(5, 4, |x, y| (x * 40 + y) as u8);
    let gray = frame.to_gray();
    assert_eq!(gray.dimensions(), (5, 4));
    let back = Frame::from_gray(gray);
    assert_eq!(back.as_slice(), frame.as_slice());
}

// ===== Regions of interest =====

#[test]
fn roi_fits_inside_frame_only() {
    let size = FrameSize::new(64, 48);
    assert!(Roi::new(0, 0, 64, 48).fits(size));
    assert!(Roi::new(10, 8, 20, 20).fits(size));
    assert!(!Roi::new(50, 0, 20, 10).fits(size));
    assert!(!Roi::new(0, 0, 0, 10).fits(size));
}

#[test]
fn crop_copies_region() {
    let frame = Image::from_fn(8, 8, |x, y| (x + 8 * y) as u8);
    let cropped = frame.crop(&Roi::new(2, 3, 3, 2));
    assert_eq!(cropped.size(), FrameSize::new(3, 2));
    assert_eq!(cropped.get(0, 0), frame.get(2, 3));
    assert_eq!(cropped.get(2, 1), frame.get(4, 4));
    assert_eq!(cropped.stride(), 3);
}

#[test]
fn packed_vec_drops_stride_padding() {
    let mut img: Image<f32> = Image::new_with_stride(3, 2, 8);
    img.set(2, 0, 1.0);
    img.set(0, 1, 2.0);
    assert_eq!(img.to_packed_vec(), vec![0.0, 0.0, 1.0, 2.0, 0.0, 0.0]);
}

// ===== Level images =====

#[test]
fn log_levels_are_monotonic_and_span_full_range() {
    let frame = Image::from_fn(256, 1, |x, _| x as u8);
    let levels = IntensityTransform::Log.level_image(&frame);
    assert!(levels.get(0, 0).abs() < 1e-6);
    assert!((levels.get(255, 0) - 255.0).abs() < 1e-3);
    for x in 1..256 {
        assert!(levels.get(x, 0) > levels.get(x - 1, 0), "not increasing at {x}");
    }
}

#[test]
fn linear_levels_equal_raw_values() {
    let frame = Image::from_fn(4, 4, |x, y| (x * 50 + y) as u8);
    let levels = IntensityTransform::Linear.level_image(&frame);
    let raw = to_f32_image(&frame);
    assert_eq!(levels.as_slice(), raw.as_slice());
}

// ===== Bilinear sampling =====

#[test]
fn bilinear_exact_on_plane() {
    let img = Image::from_fn(10, 10, |x, y| x as f32 * 2.0 - y as f32 * 5.0);
    for (px, py) in [(0.25, 0.75), (3.5, 6.1), (8.9, 0.4)] {
        let expected = px * 2.0 - py * 5.0;
        let actual = interpolate_bilinear(&img, px, py);
        assert!((actual - expected).abs() < 1e-4, "({px}, {py}): {actual} vs {expected}");
    }
}

#[test]
fn bilinear_clamps_outside_frame() {
    let img = Image::from_fn(4, 3, |x, y| (x + 10 * y) as f32);
    assert_eq!(interpolate_bilinear(&img, -5.0, -5.0), img.get(0, 0));
    assert_eq!(interpolate_bilinear(&img, 40.0, 1.0), img.get(3, 1));
    assert_eq!(interpolate_bilinear(&img, 1.0, 99.0), img.get(1, 2));
}

#[test]
fn single_pixel_frame_samples_itself() {
    let img = Image::filled(1, 1, 77.0f32);
    assert_eq!(interpolate_bilinear(&img, 0.3, -2.0), 77.0);
}
