//! Frame-level analyzer (§4.F): the bookkeeping that runs once per frame
//! after every pixel has been classified — advancing the `meanFinalSegm`
//! EMAs, drifting the LBSP threshold LUT, and (on a coarse downsampled grid)
//! deciding whether the scene has changed enough to rescale the learning-rate
//! bounds or trigger an automatic partial model reset.
//!
//! Blink-map bookkeeping lives in [`crate::classifier::ClassifierState`]
//! instead, since it's produced directly from the classify loop's own output
//! and is needed (one frame lagged) by that same loop's feedback call.

use imgref::{ImgRef, ImgVec};
use rgb::RGB8;

use crate::config::Config;
use crate::feedback::FeedbackFields;
use crate::geometry::Roi;
use crate::lbsp::Lut;
use crate::warp::{self, Mat3};

const DOWNSAMPLE_RATIO: usize = 8;
const NONZERO_RATIO_MIN: f32 = 0.100;
const NONZERO_RATIO_MAX: f32 = 0.500;

/// Literal value the original implementation resets the learning-rate field
/// to on an automatic reset — not `t_lower`, a lower constant that the
/// per-pixel clamp in [`crate::feedback::update_pixel`] will pull back up
/// within a few frames. Preserved verbatim rather than "corrected" to
/// `t_lower`, since nothing in the surrounding logic suggests it was a typo.
pub const RESET_T_VALUE: f32 = 1.0;

/// Fraction of the background model refreshed by an automatic reset.
pub const RESET_REFRESH_FRACTION: f32 = 0.1;

pub struct FrameAnalysisOutcome {
    pub t_bounds: (f32, f32),
    pub reset_requested: bool,
}

pub struct FrameAnalysisState {
    t_lower_base: f32,
    t_upper_base: f32,
    last_non_zero_desc_ratio: f32,
    downsampled_lt: Vec<f32>,
    downsampled_st: Vec<f32>,
    dw: usize,
    dh: usize,
    channels: usize,
    frames_since_last_reset: u32,
    model_reset_cooldown: u32,
    auto_model_reset_enabled: bool,
    t_lower_cap: f32,
    t_upper_cap: f32,
}

impl FrameAnalysisState {
    pub fn new(width: usize, height: usize, channels: usize, config: &Config, low_coverage: bool) -> Self {
        let dw = (width / DOWNSAMPLE_RATIO).max(1);
        let dh = (height / DOWNSAMPLE_RATIO).max(1);
        let (t_lower, t_upper) = config.default_t_bounds(low_coverage);
        Self {
            t_lower_base: t_lower,
            t_upper_base: t_upper,
            last_non_zero_desc_ratio: 0.0,
            downsampled_lt: vec![0.0; dw * dh * channels],
            downsampled_st: vec![0.0; dw * dh * channels],
            dw,
            dh,
            channels,
            frames_since_last_reset: 0,
            model_reset_cooldown: 0,
            auto_model_reset_enabled: config.auto_model_reset_enabled,
            t_lower_cap: t_lower,
            t_upper_cap: t_upper,
        }
    }

    pub fn t_bounds(&self) -> (f32, f32) {
        (self.t_lower_cap, self.t_upper_cap)
    }

    pub fn reset_cooldown_active(&self) -> bool {
        self.model_reset_cooldown > 0
    }

    /// §4.G: realigns the downsampled long-/short-term maps to a new camera
    /// pose. Grounded on `BackgroundSubtractorSuBSENSE.cpp::update()`, which
    /// warps these buffers with the same (unrescaled) `transmatrix` as every
    /// full-resolution buffer, just targeting `m_oDownSampledFrameSize`.
    pub(crate) fn warp(&mut self, h_inv: &Mat3) {
        self.downsampled_lt = warp_channels(&self.downsampled_lt, self.dw, self.dh, self.channels, h_inv);
        self.downsampled_st = warp_channels(&self.downsampled_st, self.dw, self.dh, self.channels, h_inv);
    }
}

/// Nearest-neighbour warp of a channel-interleaved flat buffer, one
/// `warp_nearest` pass per channel since [`warp::warp_nearest`] only knows
/// about single-sample planes.
fn warp_channels(buf: &[f32], dw: usize, dh: usize, channels: usize, h_inv: &Mat3) -> Vec<f32> {
    let mut out = vec![0f32; buf.len()];
    for c in 0..channels {
        let plane: Vec<f32> = (0..dw * dh).map(|i| buf[i * channels + c]).collect();
        let warped = warp::warp_nearest(ImgVec::new(plane, dw, dh).as_ref(), h_inv);
        for i in 0..dw * dh {
            out[i * channels + c] = warped.buf()[i];
        }
    }
    out
}

fn update_final_segm(roi: &Roi, fields: &mut FeedbackFields, last_fg: ImgRef<'_, u8>, roll_avg: (f32, f32)) {
    let (roll_lt, roll_st) = roll_avg;
    for &px in &roi.idx_of_model {
        let last = if last_fg.buf()[px] != 0 { 1.0 } else { 0.0 };
        fields.mean_final_segm_lt.buf_mut()[px] = fields.mean_final_segm_lt.buf()[px] * (1.0 - roll_lt) + last * roll_lt;
        fields.mean_final_segm_st.buf_mut()[px] = fields.mean_final_segm_st.buf()[px] * (1.0 - roll_st) + last * roll_st;
    }
}

fn drift_lut(state: &mut FrameAnalysisState, lut: &mut Lut, roi_len: usize, non_zero_desc_count: usize) {
    let ratio = non_zero_desc_count as f32 / roi_len as f32;
    let tighten = ratio < NONZERO_RATIO_MIN && state.last_non_zero_desc_ratio < NONZERO_RATIO_MIN;
    let loosen = ratio > NONZERO_RATIO_MAX && state.last_non_zero_desc_ratio > NONZERO_RATIO_MAX;
    lut.drift(loosen, tighten);
    state.last_non_zero_desc_ratio = ratio;
}

/// §4.F auto-reset firing / learning-rate rescale, shared by both channel
/// counts once each has reduced the downsampled frame to a single ratio.
fn apply_reset_bookkeeping(state: &mut FrameAnalysisState, config: &Config, ratio: f32) -> bool {
    let min_diff = config.min_color_dist_threshold as f32 / 2.0;
    let mut reset_requested = false;
    if state.auto_model_reset_enabled {
        if state.frames_since_last_reset > 1000 {
            state.auto_model_reset_enabled = false;
            log::info!("automatic background-model reset disabled: no trigger in 1000 frames");
        } else if ratio >= min_diff && state.model_reset_cooldown == 0 {
            state.frames_since_last_reset = 0;
            reset_requested = true;
            state.model_reset_cooldown = (config.n_samples_for_moving_avgs / 4.0) as u32;
            log::debug!("automatic background-model reset triggered, colorDiffRatio={:.3}", ratio);
        } else {
            state.frames_since_last_reset += 1;
        }
    } else if ratio >= min_diff * 2.0 {
        state.frames_since_last_reset = 0;
        state.auto_model_reset_enabled = true;
    }
    if ratio >= min_diff / 2.0 {
        let shift = ((ratio / 2.0) as i32).clamp(0, 30);
        state.t_lower_cap = ((state.t_lower_base as i32) >> shift).max(1) as f32;
        state.t_upper_cap = ((state.t_upper_base as i32) >> shift).max(1) as f32;
    } else {
        state.t_lower_cap = state.t_lower_base;
        state.t_upper_cap = state.t_upper_base;
    }
    if state.model_reset_cooldown > 0 {
        state.model_reset_cooldown -= 1;
    }
    reset_requested
}

fn block_bounds(index: usize, blocks: usize, extent: usize) -> (usize, usize) {
    let step = extent as f32 / blocks as f32;
    let lo = (index as f32 * step) as usize;
    let hi = (((index + 1) as f32 * step) as usize).min(extent).max(lo + 1);
    (lo, hi)
}

fn downsample_mono(current: ImgRef<'_, u8>, dw: usize, dh: usize) -> Vec<f32> {
    let (w, h) = (current.width(), current.height());
    let mut out = vec![0f32; dw * dh];
    for dy in 0..dh {
        let (y0, y1) = block_bounds(dy, dh, h);
        for dx in 0..dw {
            let (x0, x1) = block_bounds(dx, dw, w);
            let mut sum = 0f32;
            let mut count = 0f32;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += current.buf()[y * current.stride() + x] as f32;
                    count += 1.0;
                }
            }
            out[dy * dw + dx] = sum / count;
        }
    }
    out
}

fn downsample_color(current: ImgRef<'_, RGB8>, dw: usize, dh: usize) -> Vec<f32> {
    let (w, h) = (current.width(), current.height());
    let mut out = vec![0f32; dw * dh * 3];
    for dy in 0..dh {
        let (y0, y1) = block_bounds(dy, dh, h);
        for dx in 0..dw {
            let (x0, x1) = block_bounds(dx, dw, w);
            let (mut sr, mut sg, mut sb) = (0f32, 0f32, 0f32);
            let mut count = 0f32;
            for y in y0..y1 {
                for x in x0..x1 {
                    let px = current.buf()[y * current.stride() + x];
                    sr += px.r as f32;
                    sg += px.g as f32;
                    sb += px.b as f32;
                    count += 1.0;
                }
            }
            let base = (dy * dw + dx) * 3;
            out[base] = sr / count;
            out[base + 1] = sg / count;
            out[base + 2] = sb / count;
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
pub fn analyze_mono(
    state: &mut FrameAnalysisState,
    roi: &Roi,
    config: &Config,
    lut: &mut Lut,
    fields: &mut FeedbackFields,
    current: ImgRef<'_, u8>,
    last_fg: ImgRef<'_, u8>,
    non_zero_desc_count: usize,
    roll_avg: (f32, f32),
) -> FrameAnalysisOutcome {
    update_final_segm(roi, fields, last_fg, roll_avg);
    drift_lut(state, lut, roi.len(), non_zero_desc_count);

    if !config.learning_rate_scaling_enabled {
        return FrameAnalysisOutcome { t_bounds: (state.t_lower_base, state.t_upper_base), reset_requested: false };
    }

    let (roll_lt, roll_st) = roll_avg;
    let downsampled = downsample_mono(current, state.dw, state.dh);
    debug_assert_eq!(state.channels, 1);
    for i in 0..downsampled.len() {
        state.downsampled_lt[i] = state.downsampled_lt[i] * (1.0 - roll_lt) + downsampled[i] * roll_lt;
        state.downsampled_st[i] = state.downsampled_st[i] * (1.0 - roll_st) + downsampled[i] * roll_st;
    }
    let total_diff: f32 = (0..downsampled.len()).map(|i| (state.downsampled_st[i] - state.downsampled_lt[i]).abs() / 2.0).sum();
    let ratio = total_diff / downsampled.len() as f32;

    let reset_requested = apply_reset_bookkeeping(state, config, ratio);
    FrameAnalysisOutcome { t_bounds: state.t_bounds(), reset_requested }
}

#[allow(clippy::too_many_arguments)]
pub fn analyze_color(
    state: &mut FrameAnalysisState,
    roi: &Roi,
    config: &Config,
    lut: &mut Lut,
    fields: &mut FeedbackFields,
    current: ImgRef<'_, RGB8>,
    last_fg: ImgRef<'_, u8>,
    non_zero_desc_count: usize,
    roll_avg: (f32, f32),
) -> FrameAnalysisOutcome {
    update_final_segm(roi, fields, last_fg, roll_avg);
    drift_lut(state, lut, roi.len(), non_zero_desc_count);

    if !config.learning_rate_scaling_enabled {
        return FrameAnalysisOutcome { t_bounds: (state.t_lower_base, state.t_upper_base), reset_requested: false };
    }

    let (roll_lt, roll_st) = roll_avg;
    let downsampled = downsample_color(current, state.dw, state.dh);
    debug_assert_eq!(state.channels, 3);
    for i in 0..downsampled.len() {
        state.downsampled_lt[i] = state.downsampled_lt[i] * (1.0 - roll_lt) + downsampled[i] * roll_lt;
        state.downsampled_st[i] = state.downsampled_st[i] * (1.0 - roll_st) + downsampled[i] * roll_st;
    }
    let blocks = state.dw * state.dh;
    let total_diff: f32 = (0..blocks)
        .map(|i| {
            let base = i * 3;
            (0..3).map(|c| (state.downsampled_st[base + c] - state.downsampled_lt[base + c]).abs()).fold(0.0f32, f32::max)
        })
        .sum();
    let ratio = total_diff / blocks as f32;

    let reset_requested = apply_reset_bookkeeping(state, config, ratio);
    FrameAnalysisOutcome { t_bounds: state.t_bounds(), reset_requested }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgref::Img;

    #[test]
    fn unchanging_scene_never_triggers_reset() {
        let config = Config::default();
        let roi = Roi::build(None, 40, 40).unwrap();
        let mut lut = Lut::new(config.desc_dist_threshold_offset, config.rel_lbsp_threshold, true);
        let mut fields = FeedbackFields::new(40, 40, 2.0);
        let mut state = FrameAnalysisState::new(40, 40, 1, &config, false);
        let frame = Img::new(vec![100u8; 40 * 40], 40, 40);
        let last_fg = Img::new(vec![0u8; 40 * 40], 40, 40);

        let mut triggered = false;
        for _ in 0..50 {
            let outcome = analyze_mono(&mut state, &roi, &config, &mut lut, &mut fields, frame.as_ref(), last_fg.as_ref(), roi.len() / 5, (1.0, 1.0));
            triggered |= outcome.reset_requested;
        }
        assert!(!triggered, "a static scene must never trip the automatic reset");
    }

    #[test]
    fn large_jump_triggers_reset_once_cooldown_allows() {
        let config = Config::default();
        let roi = Roi::build(None, 40, 40).unwrap();
        let mut lut = Lut::new(config.desc_dist_threshold_offset, config.rel_lbsp_threshold, true);
        let mut fields = FeedbackFields::new(40, 40, 2.0);
        let mut state = FrameAnalysisState::new(40, 40, 1, &config, false);
        let dark = Img::new(vec![10u8; 40 * 40], 40, 40);
        let bright = Img::new(vec![250u8; 40 * 40], 40, 40);
        let last_fg = Img::new(vec![0u8; 40 * 40], 40, 40);

        for _ in 0..10 {
            analyze_mono(&mut state, &roi, &config, &mut lut, &mut fields, dark.as_ref(), last_fg.as_ref(), roi.len() / 5, (1.0, 1.0));
        }
        let mut triggered = false;
        for _ in 0..5 {
            let outcome = analyze_mono(&mut state, &roi, &config, &mut lut, &mut fields, bright.as_ref(), last_fg.as_ref(), roi.len() / 5, (1.0, 1.0));
            triggered |= outcome.reset_requested;
        }
        assert!(triggered, "a sustained scene-wide jump must eventually trip the automatic reset");
    }
}
