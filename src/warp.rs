//! Model warper (§4.G): realigns every per-pixel state buffer to a new
//! camera pose via a 3×3 homography, then repairs the pixels the warp
//! couldn't fill from the old frame.
//!
//! Grounded on `BackgroundSubtractorSuBSENSE.cpp`'s `update()`: a long run of
//! `cv::warpPerspective` calls (one per state buffer) followed by a
//! per-pixel repair pass. `cv::warpPerspective` without `WARP_INVERSE_MAP`
//! samples `src` at the *inverse*-mapped location for every destination
//! pixel and fills anything that falls outside `src` with zero — that's
//! exactly [`warp_nearest`]'s contract, so every call site just needs the
//! already-inverted homography.

use imgref::{ImgRef, ImgVec};
use rgb::RGB8;

use crate::classifier::ClassifierState;
use crate::feedback::FeedbackFields;
use crate::geometry::Roi;
use crate::lbsp::{self, Lut, PATCH_BORDER};
use crate::rng::EngineRng;
use crate::sampler::{random_neighbor, RADIUS_5X5};
use crate::samples::SampleModel;

/// Row-major 3×3 homography, `dst = H * src` in homogeneous coordinates.
pub type Mat3 = [[f64; 3]; 3];

pub const IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Inverts a 3×3 matrix via the adjugate; `None` for a singular (or
/// near-singular) homography, which the caller should treat as "no motion".
pub fn invert(m: Mat3) -> Option<Mat3> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1]) - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let mut adj = [[0.0; 3]; 3];
    adj[0][0] = (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det;
    adj[0][1] = (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det;
    adj[0][2] = (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det;
    adj[1][0] = (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det;
    adj[1][1] = (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det;
    adj[1][2] = (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det;
    adj[2][0] = (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det;
    adj[2][1] = (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det;
    adj[2][2] = (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det;
    Some(adj)
}

fn apply(h: &Mat3, x: f64, y: f64) -> (f64, f64) {
    let w = h[2][0] * x + h[2][1] * y + h[2][2];
    if w.abs() < 1e-12 {
        return (x, y);
    }
    ((h[0][0] * x + h[0][1] * y + h[0][2]) / w, (h[1][0] * x + h[1][1] * y + h[1][2]) / w)
}

/// Nearest-neighbour inverse warp: for every destination pixel, samples
/// `src` at `h_inv` applied to that pixel's coordinates, zero-filling
/// anything that lands outside `src`'s bounds.
pub fn warp_nearest<T: Copy + Default>(src: ImgRef<'_, T>, h_inv: &Mat3) -> ImgVec<T> {
    let (w, h) = (src.width(), src.height());
    let mut out = vec![T::default(); w * h];
    for y in 0..h {
        for x in 0..w {
            let (sx, sy) = apply(h_inv, x as f64, y as f64);
            let sxi = sx.round();
            let syi = sy.round();
            if sxi >= 0.0 && syi >= 0.0 && (sxi as usize) < w && (syi as usize) < h {
                out[y * w + x] = src.buf()[syi as usize * src.stride() + sxi as usize];
            }
        }
    }
    ImgVec::new(out, w, h)
}

/// Post-warp repair for the 1-channel path (§4.G step 2): any ROI pixel
/// whose warped learning rate fell below `t_lower_cap` — i.e. every pixel
/// the warp couldn't source from the old frame — gets its descriptor
/// recomputed against the (already-replaced, unwarped) new frame, its
/// feedback fields reset, and its `N` samples reseeded from random
/// non-foreground neighbours.
#[allow(clippy::too_many_arguments)]
pub fn repair_mono(
    roi: &Roi,
    t_lower_cap: f32,
    new_frame: ImgRef<'_, u8>,
    lut: &Lut,
    fields: &mut FeedbackFields,
    last_desc: &mut ImgVec<u16>,
    last_fg: ImgRef<'_, u8>,
    samples: &mut SampleModel<u8, u16>,
    classifier_state: &mut ClassifierState,
    rng: &mut EngineRng,
) {
    for m in 0..roi.len() {
        let px = roi.idx_of_model[m];
        if fields.t_update.buf()[px] >= t_lower_cap {
            continue;
        }
        let (x, y) = roi.xy_of_model(m);
        let curr = new_frame.buf()[px];
        let desc = lbsp::compute_gray_descriptor(new_frame, x, y, curr, lut.threshold(curr));
        last_desc.buf_mut()[px] = desc;
        fields.reinitialize_pixel(px, t_lower_cap);
        classifier_state.reinitialize_pixel(px);
        for slot in 0..samples.n() {
            let (sx, sy) = random_neighbor(rng, x, y, RADIUS_5X5, PATCH_BORDER, roi.width, roi.height);
            let spx = sy * roi.width + sx;
            if last_fg.buf()[spx] == 0 {
                samples.put(slot, px, new_frame.buf()[spx], last_desc.buf()[spx]);
            }
        }
    }
}

/// Post-warp repair for the 3-channel path; see [`repair_mono`].
#[allow(clippy::too_many_arguments)]
pub fn repair_color(
    roi: &Roi,
    t_lower_cap: f32,
    new_frame: ImgRef<'_, RGB8>,
    lut: &Lut,
    fields: &mut FeedbackFields,
    last_desc: &mut ImgVec<[u16; 3]>,
    last_fg: ImgRef<'_, u8>,
    samples: &mut SampleModel<RGB8, [u16; 3]>,
    classifier_state: &mut ClassifierState,
    rng: &mut EngineRng,
) {
    for m in 0..roi.len() {
        let px = roi.idx_of_model[m];
        if fields.t_update.buf()[px] >= t_lower_cap {
            continue;
        }
        let (x, y) = roi.xy_of_model(m);
        let curr = new_frame.buf()[px];
        let channels = [curr.r, curr.g, curr.b];
        let mut desc = [0u16; 3];
        for (c, &value) in channels.iter().enumerate() {
            desc[c] = lbsp::compute_rgb_channel_descriptor(new_frame, x, y, c, value, lut.threshold(value));
        }
        last_desc.buf_mut()[px] = desc;
        fields.reinitialize_pixel(px, t_lower_cap);
        classifier_state.reinitialize_pixel(px);
        for slot in 0..samples.n() {
            let (sx, sy) = random_neighbor(rng, x, y, RADIUS_5X5, PATCH_BORDER, roi.width, roi.height);
            let spx = sy * roi.width + sx;
            if last_fg.buf()[spx] == 0 {
                samples.put(slot, px, new_frame.buf()[spx], last_desc.buf()[spx]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgref::Img;

    #[test]
    fn identity_warp_is_a_no_op() {
        let src = Img::new((0..100u16).collect(), 10, 10);
        let out = warp_nearest(src.as_ref(), &IDENTITY);
        assert_eq!(out.buf(), src.buf());
    }

    #[test]
    fn translation_shifts_pixels_and_zero_fills_the_gap() {
        // H maps src -> dst by shifting one column right; its inverse shifts left.
        let h: Mat3 = [[1.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let h_inv = invert(h).unwrap();
        let src = Img::new(vec![7u8; 5 * 5], 5, 5);
        let out = warp_nearest(src.as_ref(), &h_inv);
        for y in 0..5 {
            assert_eq!(out.buf()[y * 5], 0, "leftmost column has no source pixel after a +1 shift");
            for x in 1..5 {
                assert_eq!(out.buf()[y * 5 + x], 7);
            }
        }
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let singular: Mat3 = [[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert!(invert(singular).is_none());
    }
}
