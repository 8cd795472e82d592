// corners.rs — Shi-Tomasi "good features to track".
//
// The sparse flow calculators pick the points they track with this
// detector on the previous frame of every pair.
//
// Algorithm:
//   1. Sobel gradients Ix, Iy
//   2. Products Ix², Iy², Ix·Iy, Gaussian-blurred over the block window
//      (structure tensor M = [[Sxx, Sxy], [Sxy, Syy]])
//   3. Response = smaller eigenvalue of M:
//        λmin = (Sxx + Syy)/2 - sqrt(((Sxx - Syy)/2)² + Sxy²)
//   4. Keep 3×3 local maxima above quality_level · max(λmin)
//   5. Strongest first, reject candidates closer than min_distance to an
//      accepted corner, stop at max_corners
//
// Step 5 buckets accepted corners in a grid of min_distance-sized cells,
// so each candidate only checks the 3×3 neighbouring cells.

use serde::{Deserialize, Serialize};

use crate::convolution::gaussian_blur;
use crate::gradient::sobel_xy;
use crate::image::{Image, Pixel};

/// A detected corner at integer pixel position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub x: f32,
    pub y: f32,
    /// Smaller structure-tensor eigenvalue.
    pub score: f32,
}

/// Shi-Tomasi corner detector parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiTomasiDetector {
    /// Upper bound on returned corners.
    pub max_corners: usize,
    /// Fraction of the strongest response a corner must reach.
    pub quality_level: f32,
    /// Minimum Euclidean distance between returned corners, in pixels.
    pub min_distance: f32,
    /// Half-size of the structure tensor window (1 → 3×3).
    pub block_size: usize,
}

impl Default for ShiTomasiDetector {
    fn default() -> Self {
        ShiTomasiDetector {
            max_corners: 1000,
            quality_level: 0.01,
            min_distance: 5.0,
            block_size: 1,
        }
    }
}

impl ShiTomasiDetector {
    pub fn new(max_corners: usize, quality_level: f32, min_distance: f32) -> Self {
        ShiTomasiDetector {
            max_corners,
            quality_level,
            min_distance,
            ..Default::default()
        }
    }

    /// Minimum-eigenvalue response image.
    pub fn corner_response<T: Pixel>(&self, image: &Image<T>) -> Image<f32> {
        let (ix, iy) = sobel_xy(image);
        let (w, h) = (image.width(), image.height());

        let mut ix2 = Image::<f32>::new(w, h);
        let mut iy2 = Image::<f32>::new(w, h);
        let mut ixiy = Image::<f32>::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let gx = ix.get(x, y);
                let gy = iy.get(x, y);
                ix2.set(x, y, gx * gx);
                iy2.set(x, y, gy * gy);
                ixiy.set(x, y, gx * gy);
            }
        }

        let sigma = self.block_size as f32 * 0.5 + 0.5;
        let sxx = gaussian_blur(&ix2, self.block_size, sigma);
        let syy = gaussian_blur(&iy2, self.block_size, sigma);
        let sxy = gaussian_blur(&ixiy, self.block_size, sigma);

        Image::from_fn(w, h, |x, y| {
            let a = sxx.get(x, y);
            let b = syy.get(x, y);
            let c = sxy.get(x, y);
            let half_trace = 0.5 * (a + b);
            let half_diff = 0.5 * (a - b);
            half_trace - (half_diff * half_diff + c * c).sqrt()
        })
    }

    /// Detect corners, strongest first.
    pub fn detect<T: Pixel>(&self, image: &Image<T>) -> Vec<Corner> {
        let (w, h) = (image.width(), image.height());
        if self.max_corners == 0 || w < 3 || h < 3 {
            return Vec::new();
        }

        let response = self.corner_response(image);
        let max_response = response.pixels().map(|(_, _, v)| v).fold(0.0f32, f32::max);
        if max_response <= 0.0 {
            return Vec::new();
        }
        let threshold = max_response * self.quality_level;

        // Local maxima over 3×3, skipping the one-pixel border.
        let mut candidates = Vec::new();
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let r = response.get(x, y);
                if r < threshold || r <= 0.0 {
                    continue;
                }
                let is_max = (-1isize..=1).all(|dy| {
                    (-1isize..=1).all(|dx| {
                        response.get_clamped(x as isize + dx, y as isize + dy) <= r
                    })
                });
                if is_max {
                    candidates.push(Corner { x: x as f32, y: y as f32, score: r });
                }
            }
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.enforce_min_distance(candidates, w, h)
    }

    fn enforce_min_distance(&self, candidates: Vec<Corner>, w: usize, h: usize) -> Vec<Corner> {
        if self.min_distance <= 0.0 {
            return candidates.into_iter().take(self.max_corners).collect();
        }

        let cell = self.min_distance.ceil().max(1.0) as usize;
        let cols = w.div_ceil(cell);
        let rows = h.div_ceil(cell);
        let mut grid: Vec<Vec<Corner>> = vec![Vec::new(); cols * rows];
        let min_dist_sq = self.min_distance * self.min_distance;

        let mut accepted = Vec::new();
        for c in candidates {
            let col = (c.x as usize / cell).min(cols - 1);
            let row = (c.y as usize / cell).min(rows - 1);

            let too_close = (row.saturating_sub(1)..=(row + 1).min(rows - 1)).any(|r| {
                (col.saturating_sub(1)..=(col + 1).min(cols - 1)).any(|q| {
                    grid[r * cols + q].iter().any(|o| {
                        let dx = o.x - c.x;
                        let dy = o.y - c.y;
                        dx * dx + dy * dy < min_dist_sq
                    })
                })
            });
            if too_close {
                continue;
            }

            grid[row * cols + col].push(c);
            accepted.push(c);
            if accepted.len() >= self.max_corners {
                break;
            }
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chessboard(size: usize, cell: usize) -> Image<u8> {
        Image::from_fn(size, size, |x, y| if (x / cell + y / cell) % 2 == 0 { 20 } else { 230 })
    }

    #[test]
    fn test_chessboard_corners_near_junctions() {
        let cell = 10;
        let img = make_chessboard(80, cell);
        let corners = ShiTomasiDetector::new(100, 0.1, 5.0).detect(&img);
        assert!(corners.len() >= 10, "expected many corners, got {}", corners.len());
        for c in &corners {
            let jx = (c.x / cell as f32).round() * cell as f32;
            let jy = (c.y / cell as f32).round() * cell as f32;
            let d = ((c.x - jx).powi(2) + (c.y - jy).powi(2)).sqrt();
            assert!(d <= 3.0, "corner ({}, {}) is {d:.1}px from a junction", c.x, c.y);
        }
    }

    #[test]
    fn test_flat_image_no_corners() {
        let img = Image::filled(40, 40, 128u8);
        assert!(ShiTomasiDetector::default().detect(&img).is_empty());
    }

    #[test]
    fn test_straight_edge_is_weak() {
        // Along a straight edge λmin is ~0: only the image-border ends of
        // the edge can survive the quality threshold.
        let img = Image::from_fn(60, 60, |x, _| if x < 30 { 50u8 } else { 200 });
        let corners = ShiTomasiDetector::new(100, 0.1, 3.0).detect(&img);
        for c in &corners {
            assert!(c.y < 5.0 || c.y > 54.0, "edge interior reported as corner at y={}", c.y);
        }
    }

    #[test]
    fn test_min_distance_and_max_corners() {
        let img = make_chessboard(120, 8);
        let det = ShiTomasiDetector::new(15, 0.05, 12.0);
        let corners = det.detect(&img);
        assert!(corners.len() <= 15);
        for (i, a) in corners.iter().enumerate() {
            for b in &corners[i + 1..] {
                let d = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
                assert!(d >= 12.0, "corners {a:?} and {b:?} are {d:.1}px apart");
            }
        }
        // Sorted strongest first.
        assert!(corners.windows(2).all(|p| p[0].score >= p[1].score));
    }

    #[test]
    fn test_zero_max_corners() {
        let img = make_chessboard(40, 10);
        assert!(ShiTomasiDetector::new(0, 0.01, 1.0).detect(&img).is_empty());
    }
}
