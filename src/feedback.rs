//! Feedback controller (§4.D): six per-pixel scalar fields that evolve from
//! each pixel's match outcome and mutually regulate detection sensitivity
//! (`R_threshold`) and learning speed (`T_update`, `V_modulator`).

use imgref::ImgVec;

pub const T_INCR: f32 = 0.5;
pub const T_DECR: f32 = 0.25;
pub const R_VAR: f32 = 0.01;
pub const V_DECR: f32 = 0.1;

/// The six feedback maps plus the two long/short-window EMA pairs they're
/// driven by (§3 "Per-pixel feedback fields").
#[derive(Debug, Clone)]
pub struct FeedbackFields {
    pub r_threshold: ImgVec<f32>,
    pub v_modulator: ImgVec<f32>,
    pub t_update: ImgVec<f32>,
    pub mean_last_dist: ImgVec<f32>,
    pub mean_min_dist_lt: ImgVec<f32>,
    pub mean_min_dist_st: ImgVec<f32>,
    pub mean_raw_segm_lt: ImgVec<f32>,
    pub mean_raw_segm_st: ImgVec<f32>,
    pub mean_final_segm_lt: ImgVec<f32>,
    pub mean_final_segm_st: ImgVec<f32>,
}

impl FeedbackFields {
    pub fn new(width: usize, height: usize, t_lower: f32) -> Self {
        let flat = |v: f32| ImgVec::new(vec![v; width * height], width, height);
        Self {
            r_threshold: flat(1.0),
            v_modulator: flat(10.0),
            t_update: flat(t_lower),
            mean_last_dist: flat(0.0),
            mean_min_dist_lt: flat(0.0),
            mean_min_dist_st: flat(0.0),
            mean_raw_segm_lt: flat(0.0),
            mean_raw_segm_st: flat(0.0),
            mean_final_segm_lt: flat(0.0),
            mean_final_segm_st: flat(0.0),
        }
    }

    /// Reinitialise a single pixel's fields, used when a warp zeroes a
    /// pixel's update rate (§4.G step 2: `T=T_lower, R=1.0, V=10.0`). The
    /// distance/segmentation EMAs are left at zero, matching a pixel that
    /// has never been classified.
    pub fn reinitialize_pixel(&mut self, px: usize, t_lower: f32) {
        self.r_threshold.buf_mut()[px] = 1.0;
        self.v_modulator.buf_mut()[px] = 10.0;
        self.t_update.buf_mut()[px] = t_lower;
        self.mean_last_dist.buf_mut()[px] = 0.0;
        self.mean_min_dist_lt.buf_mut()[px] = 0.0;
        self.mean_min_dist_st.buf_mut()[px] = 0.0;
        self.mean_raw_segm_lt.buf_mut()[px] = 0.0;
        self.mean_raw_segm_st.buf_mut()[px] = 0.0;
        self.mean_final_segm_lt.buf_mut()[px] = 0.0;
        self.mean_final_segm_st.buf_mut()[px] = 0.0;
    }
}

/// Inputs to a single pixel's §4.D update, read once the classifier has
/// already produced this frame's FG/BG verdict for `px`.
pub struct FeedbackInputs {
    pub is_fg_now: bool,
    pub was_fg_last_frame: bool,
    pub is_unstable: bool,
    pub blinked: bool,
}

/// Applies the ordered §4.D update (T, then V, then R) to the fields at `px`.
pub fn update_pixel(fields: &mut FeedbackFields, px: usize, t_lower: f32, t_upper: f32, inputs: &FeedbackInputs) {
    let min_dist_lt = fields.mean_min_dist_lt.buf()[px];
    let min_dist_st = fields.mean_min_dist_st.buf()[px];
    let min_min_dist = min_dist_lt.min(min_dist_st);
    let max_min_dist = min_dist_lt.max(min_dist_st);

    let v = fields.v_modulator.buf()[px];
    let t = fields.t_update.buf_mut();

    // 1. Learning rate T(x).
    if inputs.was_fg_last_frame || (min_min_dist < 0.10 && inputs.is_fg_now) {
        t[px] += T_INCR / (max_min_dist.max(f32::EPSILON) * v.max(f32::EPSILON));
    } else {
        t[px] -= T_DECR * v / max_min_dist.max(f32::EPSILON);
    }
    t[px] = t[px].clamp(t_lower, t_upper);

    // 2. Variation modulator V(x).
    let v_field = fields.v_modulator.buf_mut();
    if max_min_dist > 0.10 && inputs.blinked {
        v_field[px] += 1.0;
    } else if v_field[px] > V_DECR {
        let delta = if inputs.was_fg_last_frame {
            V_DECR / 4.0
        } else if inputs.is_unstable {
            V_DECR / 2.0
        } else {
            V_DECR
        };
        v_field[px] = (v_field[px] - delta).max(V_DECR);
    }

    // 3. Distance threshold R(x).
    let v_now = fields.v_modulator.buf()[px];
    let r = fields.r_threshold.buf_mut();
    let bound = (1.0 + 2.0 * min_min_dist).powi(2);
    if r[px] < bound {
        r[px] += R_VAR * (v_now - V_DECR);
    } else {
        r[px] = (r[px] - R_VAR / v_now.max(f32::EPSILON)).max(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_start_within_invariant_bounds() {
        let f = FeedbackFields::new(4, 4, 2.0);
        assert!(f.r_threshold.buf().iter().all(|&r| r >= 1.0));
        assert!(f.v_modulator.buf().iter().all(|&v| v >= V_DECR));
        assert!(f.t_update.buf().iter().all(|&t| (2.0..=256.0).contains(&t)));
    }

    #[test]
    fn stable_background_drives_r_to_one() {
        let mut f = FeedbackFields::new(1, 1, 2.0);
        let inputs = FeedbackInputs { is_fg_now: false, was_fg_last_frame: false, is_unstable: false, blinked: false };
        for _ in 0..10_000 {
            update_pixel(&mut f, 0, 2.0, 256.0, &inputs);
        }
        assert!(f.r_threshold.buf()[0] <= 1.0 + 1e-3);
        assert!(f.v_modulator.buf()[0] <= V_DECR + 1e-3);
    }

    #[test]
    fn fields_stay_in_spec_ranges_under_fg_pressure() {
        let mut f = FeedbackFields::new(1, 1, 2.0);
        let inputs = FeedbackInputs { is_fg_now: true, was_fg_last_frame: true, is_unstable: true, blinked: true };
        // seed a non-degenerate min-dist so T_INCR's division isn't by ~0
        f.mean_min_dist_lt.buf_mut()[0] = 0.3;
        f.mean_min_dist_st.buf_mut()[0] = 0.3;
        for _ in 0..1000 {
            update_pixel(&mut f, 0, 2.0, 256.0, &inputs);
        }
        assert!(f.t_update.buf()[0] >= 2.0 && f.t_update.buf()[0] <= 256.0);
        assert!(f.r_threshold.buf()[0] >= 1.0);
        assert!(f.v_modulator.buf()[0] >= V_DECR);
    }
}
