//! Face alignment: 4-DOF similarity transform onto the canonical ArcFace
//! landmark layout, applied as an RGB affine warp.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 crop.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Align a detected face to the canonical 112×112 crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let matrix = similarity_transform(landmarks, &REFERENCE_LANDMARKS);
    warp_rgb(image, &matrix, ALIGNED_SIZE)
}

/// Least-squares similarity transform (scale, rotation, translation) from
/// `src` to `dst` landmark sets, as `[a, -b, tx, b, a, ty]`:
///
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Normal equations for the overdetermined system: each landmark pair
    // contributes rows [sx, -sy, 1, 0] -> dx and [sy, sx, 0, 1] -> dy over
    // the unknowns [a, b, tx, ty].
    let mut ata = [[0.0f32; 4]; 4];
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];
        let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
        for (row, rhs) in rows {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += row[j] * row[k];
                }
                atb[j] += row[j] * rhs;
            }
        }
    }

    let [a, b, tx, ty] = solve_normal_equations(&ata, &atb);
    [a, -b, tx, b, a, ty]
}

/// Gaussian elimination with partial pivoting on the 4×4 normal equations.
fn solve_normal_equations(ata: &[[f32; 4]; 4], atb: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&a, &b| {
                m[a][col]
                    .abs()
                    .partial_cmp(&m[b][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            // Degenerate landmark geometry; identity keeps the warp defined.
            return [1.0, 0.0, 0.0, 0.0];
        }
        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }
    x
}

/// Inverse-map each output pixel through the transform and sample the photo
/// with bilinear interpolation. Out-of-bounds samples are black.
fn warp_rgb(image: &RgbImage, matrix: &[f32; 6], out_size: u32) -> RgbImage {
    let (a, tx, b, ty) = (matrix[0], matrix[2], matrix[3], matrix[5]);

    // Invert the rotation-scale block [[a, -b], [b, a]]; det = a^2 + b^2.
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return RgbImage::new(out_size, out_size);
    }
    let ia = a / det;
    let ib = b / det;

    let (w, h) = image.dimensions();
    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && (x as u32) < w && y >= 0 && (y as u32) < h {
            image.get_pixel(x as u32, y as u32).0[c] as f32
        } else {
            0.0
        }
    };

    let mut out = RgbImage::new(out_size, out_size);
    for oy in 0..out_size {
        for ox in 0..out_size {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i64;
            let y0 = sy.floor() as i64;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let mut px = [0u8; 3];
            for (c, out_c) in px.iter_mut().enumerate() {
                let v = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;
                *out_c = v.round().clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(ox, oy, Rgb(px));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_landmarks_match_reference() {
        let m = similarity_transform(&REFERENCE_LANDMARKS, &REFERENCE_LANDMARKS);
        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4);
        assert!(m[2].abs() < 1e-3);
        assert!(m[3].abs() < 1e-4);
        assert!((m[4] - 1.0).abs() < 1e-4);
        assert!(m[5].abs() < 1e-3);
    }

    #[test]
    fn doubled_landmarks_halve_the_scale() {
        let src: [(f32, f32); 5] =
            std::array::from_fn(|i| (REFERENCE_LANDMARKS[i].0 * 2.0, REFERENCE_LANDMARKS[i].1 * 2.0));
        let m = similarity_transform(&src, &REFERENCE_LANDMARKS);
        assert!((m[0] - 0.5).abs() < 0.05, "a = {}", m[0]);
    }

    #[test]
    fn aligned_output_is_canonical_size() {
        let image = RgbImage::from_pixel(640, 480, Rgb([120, 90, 60]));
        let aligned = align_face(&image, &REFERENCE_LANDMARKS);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
    }

    #[test]
    fn bright_landmark_patch_lands_near_reference() {
        let mut image = RgbImage::new(200, 200);
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // 5x5 white patch at the left-eye position.
        let (lx, ly) = (src[0].0 as i64, src[0].1 as i64);
        for dy in -2..=2i64 {
            for dx in -2..=2i64 {
                image.put_pixel((lx + dx) as u32, (ly + dy) as u32, Rgb([255, 255, 255]));
            }
        }

        let aligned = align_face(&image, &src);

        let ref_x = REFERENCE_LANDMARKS[0].0.round() as i64;
        let ref_y = REFERENCE_LANDMARKS[0].1.round() as i64;
        let mut max_val = 0u8;
        for dy in -1..=1i64 {
            for dx in -1..=1i64 {
                let (x, y) = ((ref_x + dx) as u32, (ref_y + dy) as u32);
                if x < ALIGNED_SIZE && y < ALIGNED_SIZE {
                    max_val = max_val.max(aligned.get_pixel(x, y).0[0]);
                }
            }
        }
        assert!(max_val > 100, "expected bright patch near ({ref_x}, {ref_y})");
    }
}
