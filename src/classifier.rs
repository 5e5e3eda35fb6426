//! Per-pixel classification hot loop (§4.E).
//!
//! For every relevant pixel: compare its current color/descriptor against the
//! background samples, emit this frame's raw FG/BG verdict, maintain the
//! sample model (overwrite + neighbour spread, ghost-injection), and drive
//! the feedback fields through [`crate::feedback::update_pixel`] — all in the
//! single pass the algorithm does.
//!
//! `classify_mono` and `classify_color` are separate monomorphic functions
//! rather than one generic one: the 3-channel path checks each channel
//! individually before folding into a combined total, so a shared body would
//! just be an `if channels == 3` sprinkled through the hot loop.

use imgref::{ImgRef, ImgVec};
use rgb::RGB8;

use crate::config::Config;
use crate::feedback::{self, FeedbackFields, FeedbackInputs};
use crate::geometry::Roi;
use crate::lbsp::{self, Lut, PATCH_BORDER};
use crate::rng::EngineRng;
use crate::sampler::{random_neighbor, RADIUS_3X3, RADIUS_5X5};
use crate::samples::SampleModel;

const COLOR_MAX_1: f32 = 255.0;
const DESC_MAX_1: f32 = 16.0;
const COLOR_MAX_3: f32 = 765.0;
const DESC_MAX_3: f32 = 48.0;
/// Ratio between the 1-channel color and descriptor data ranges
/// (`255/16 = 15`), reused verbatim by both channel counts when folding a
/// descriptor distance into a combined color+descriptor score.
const COLOR_PER_DESC_BIT: u32 = 255 / 16;

const GHOSTDET_S_MIN: f32 = 0.995;
const GHOSTDET_D_MAX: f32 = 0.010;
const UNSTABLE_REG_RATIO_MIN: f32 = 0.100;
const UNSTABLE_REG_RDIST_MIN: f32 = 3.000;
/// Probability denominator for the reset-cooldown sample injection on a FG
/// verdict; a fixed constant independent of the geometry-derived `T` bounds.
const FG_RESET_INJECT_DENOM: f32 = 2.0;

/// Per-pixel state the classifier owns across frames but that isn't part of
/// the tunable feedback loop: whether a pixel is currently "unstable"
/// (widens its thresholds) and the one-frame-lagged raw-FG/blink history used
/// to compute `blinked` (§4.D's `V` update reads last frame's blink map, not
/// this frame's — the blink map is only known once this frame's own verdicts
/// are in).
pub struct ClassifierState {
    pub unstable: Vec<u8>,
    raw_fg_prev: Vec<u8>,
    raw_blink_prev: Vec<u8>,
    pub blinks: Vec<u8>,
}

impl ClassifierState {
    pub fn new(width: usize, height: usize) -> Self {
        let len = width * height;
        Self { unstable: vec![0; len], raw_fg_prev: vec![0; len], raw_blink_prev: vec![0; len], blinks: vec![0; len] }
    }

    fn update_blinks(&mut self, roi: &Roi, fg_out: &[u8]) {
        for &px in &roi.idx_of_model {
            let raw_blink = fg_out[px] ^ self.raw_fg_prev[px];
            self.blinks[px] = raw_blink | self.raw_blink_prev[px];
            self.raw_blink_prev[px] = raw_blink;
            self.raw_fg_prev[px] = fg_out[px];
        }
    }

    /// Reinitialise a single pixel, used after a warp zeroes it out (§4.G).
    pub fn reinitialize_pixel(&mut self, px: usize) {
        self.unstable[px] = 0;
        self.raw_fg_prev[px] = 0;
        self.raw_blink_prev[px] = 0;
        self.blinks[px] = 0;
    }
}

/// `(color, desc)` thresholds shared by both channel counts before the
/// 1-channel-only halving and the 3-channel-only ×3 broadcast are applied.
fn raw_thresholds(r: f32, unstable: bool, config: &Config) -> (u32, u32) {
    let stable_adj = if unstable { 0 } else { config.stab_color_dist_offset() };
    let raw_color = (r * config.min_color_dist_threshold as f32 - stable_adj as f32).max(0.0) as u32;
    let unstab_desc_offset = if unstable { config.desc_dist_threshold_offset } else { 0 };
    let desc_thr = (1u32 << (r + 0.5).floor() as u32) + config.desc_dist_threshold_offset + unstab_desc_offset;
    (raw_color, desc_thr)
}

fn is_unstable(r: f32, raw_lt: f32, raw_st: f32, final_lt: f32, final_st: f32) -> bool {
    r > UNSTABLE_REG_RDIST_MIN || (raw_lt - final_lt) > UNSTABLE_REG_RATIO_MIN || (raw_st - final_st) > UNSTABLE_REG_RATIO_MIN
}

#[allow(clippy::too_many_arguments)]
pub fn classify_mono(
    roi: &Roi,
    config: &Config,
    lut: &Lut,
    samples: &mut SampleModel<u8, u16>,
    current: ImgRef<'_, u8>,
    last_color: &mut ImgVec<u8>,
    last_desc: &mut ImgVec<u16>,
    fields: &mut FeedbackFields,
    state: &mut ClassifierState,
    last_fg: ImgRef<'_, u8>,
    t_bounds: (f32, f32),
    reset_cooldown_active: bool,
    roll_avg: (f32, f32),
    fg_out: &mut [u8],
    rng: &mut EngineRng,
) -> usize {
    let (roll_lt, roll_st) = roll_avg;
    let mut non_zero_desc_count = 0usize;

    for m in 0..roi.len() {
        let px = roi.idx_of_model[m];
        let (x, y) = roi.xy_of_model(m);
        let curr = current.buf()[px];
        if config.skip_zero_pixels && curr == 0 {
            continue;
        }

        let r = fields.r_threshold.buf()[px];
        let unstable_before = state.unstable[px] != 0;
        let (raw_color_thr, desc_thr) = raw_thresholds(r, unstable_before, config);
        let color_thr = if config.halve_mono_color_threshold { raw_color_thr / 2 } else { raw_color_thr };

        let curr_intra_desc = lbsp::compute_gray_descriptor(current, x, y, curr, lut.threshold(curr));

        let unstable_now = is_unstable(
            r,
            fields.mean_raw_segm_lt.buf()[px],
            fields.mean_raw_segm_st.buf()[px],
            fields.mean_final_segm_lt.buf()[px],
            fields.mean_final_segm_st.buf()[px],
        );
        state.unstable[px] = unstable_now as u8;

        let mut min_desc_dist = DESC_MAX_1 as u32;
        let mut min_sum_dist = COLOR_MAX_1 as u32;
        let mut good = 0usize;
        let mut s = 0usize;
        while good < config.n_required_bg_samples && s < samples.n() {
            let (bg_color, bg_desc) = samples.read(s, px);
            s += 1;
            let color_dist = (curr as i32 - bg_color as i32).unsigned_abs();
            if color_dist > color_thr {
                continue;
            }
            let intra_dist = (curr_intra_desc ^ bg_desc).count_ones();
            let inter_desc = lbsp::compute_gray_descriptor(current, x, y, bg_color, lut.threshold(bg_color));
            let inter_dist = (inter_desc ^ bg_desc).count_ones();
            let desc_dist = (intra_dist + inter_dist) / 2;
            if desc_dist > desc_thr {
                continue;
            }
            let sum_dist = ((desc_dist / 4) * COLOR_PER_DESC_BIT + color_dist).min(COLOR_MAX_1 as u32);
            if sum_dist > color_thr {
                continue;
            }
            min_desc_dist = min_desc_dist.min(desc_dist);
            min_sum_dist = min_sum_dist.min(sum_dist);
            good += 1;
        }

        let last_color_v = last_color.buf()[px];
        let last_desc_v = last_desc.buf()[px];
        let norm_last_dist =
            ((curr as i32 - last_color_v as i32).unsigned_abs() as f32 / COLOR_MAX_1 + (curr_intra_desc ^ last_desc_v).count_ones() as f32 / DESC_MAX_1) / 2.0;
        fields.mean_last_dist.buf_mut()[px] = fields.mean_last_dist.buf()[px] * (1.0 - roll_st) + norm_last_dist * roll_st;

        let is_fg = good < config.n_required_bg_samples;
        if is_fg {
            let norm_min_dist = ((min_sum_dist as f32 / COLOR_MAX_1 + min_desc_dist as f32 / DESC_MAX_1) / 2.0
                + (config.n_required_bg_samples - good) as f32 / config.n_required_bg_samples as f32)
                .min(1.0);
            fields.mean_min_dist_lt.buf_mut()[px] = fields.mean_min_dist_lt.buf()[px] * (1.0 - roll_lt) + norm_min_dist * roll_lt;
            fields.mean_min_dist_st.buf_mut()[px] = fields.mean_min_dist_st.buf()[px] * (1.0 - roll_st) + norm_min_dist * roll_st;
            fields.mean_raw_segm_lt.buf_mut()[px] = fields.mean_raw_segm_lt.buf()[px] * (1.0 - roll_lt) + roll_lt;
            fields.mean_raw_segm_st.buf_mut()[px] = fields.mean_raw_segm_st.buf()[px] * (1.0 - roll_st) + roll_st;
            fg_out[px] = 255;
            if reset_cooldown_active && rng.one_in(FG_RESET_INJECT_DENOM) {
                let slot = rng.gen_below(samples.n());
                samples.put(slot, px, curr, curr_intra_desc);
            }
        } else {
            let norm_min_dist = (min_sum_dist as f32 / COLOR_MAX_1 + min_desc_dist as f32 / DESC_MAX_1) / 2.0;
            fields.mean_min_dist_lt.buf_mut()[px] = fields.mean_min_dist_lt.buf()[px] * (1.0 - roll_lt) + norm_min_dist * roll_lt;
            fields.mean_min_dist_st.buf_mut()[px] = fields.mean_min_dist_st.buf()[px] * (1.0 - roll_st) + norm_min_dist * roll_st;
            fields.mean_raw_segm_lt.buf_mut()[px] *= 1.0 - roll_lt;
            fields.mean_raw_segm_st.buf_mut()[px] *= 1.0 - roll_st;
            fg_out[px] = 0;

            let learning_rate = fields.t_update.buf()[px].ceil().max(1.0);
            if rng.one_in(learning_rate) {
                let slot = rng.gen_below(samples.n());
                samples.put(slot, px, curr, curr_intra_desc);
            }
            let use_3x3 = config.use_3x3_spread && !unstable_now;
            let (sx, sy) = random_neighbor(rng, x, y, if use_3x3 { RADIUS_3X3 } else { RADIUS_5X5 }, PATCH_BORDER, roi.width, roi.height);
            let spx = sy * roi.width + sx;
            let spread_denom = if use_3x3 { learning_rate } else { (learning_rate / 2.0).floor() + 1.0 };
            let rand_mean_last_dist = fields.mean_last_dist.buf()[spx];
            let rand_mean_raw_segm = fields.mean_raw_segm_st.buf()[spx];
            let ghost = rand_mean_raw_segm > GHOSTDET_S_MIN && rand_mean_last_dist < GHOSTDET_D_MAX && rng.one_in(t_bounds.0);
            if rng.one_in(spread_denom) || ghost {
                let slot = rng.gen_below(samples.n());
                samples.put(slot, spx, curr, curr_intra_desc);
            }
        }

        let inputs = FeedbackInputs { is_fg_now: is_fg, was_fg_last_frame: last_fg.buf()[px] != 0, is_unstable: unstable_now, blinked: state.blinks[px] != 0 };
        feedback::update_pixel(fields, px, t_bounds.0, t_bounds.1, &inputs);

        if curr_intra_desc.count_ones() >= 2 {
            non_zero_desc_count += 1;
        }
        last_color.buf_mut()[px] = curr;
        last_desc.buf_mut()[px] = curr_intra_desc;
    }

    state.update_blinks(roi, fg_out);
    non_zero_desc_count
}

#[inline]
fn channel(px: RGB8, c: usize) -> u8 {
    match c {
        0 => px.r,
        1 => px.g,
        _ => px.b,
    }
}

#[inline]
fn hamming3(a: [u16; 3], b: [u16; 3]) -> u32 {
    (0..3).map(|c| (a[c] ^ b[c]).count_ones()).sum()
}

#[inline]
fn l1_rgb(a: RGB8, b: RGB8) -> u32 {
    (a.r as i32 - b.r as i32).unsigned_abs() + (a.g as i32 - b.g as i32).unsigned_abs() + (a.b as i32 - b.b as i32).unsigned_abs()
}

#[allow(clippy::too_many_arguments)]
pub fn classify_color(
    roi: &Roi,
    config: &Config,
    lut: &Lut,
    samples: &mut SampleModel<RGB8, [u16; 3]>,
    current: ImgRef<'_, RGB8>,
    last_color: &mut ImgVec<RGB8>,
    last_desc: &mut ImgVec<[u16; 3]>,
    fields: &mut FeedbackFields,
    state: &mut ClassifierState,
    last_fg: ImgRef<'_, u8>,
    t_bounds: (f32, f32),
    reset_cooldown_active: bool,
    roll_avg: (f32, f32),
    fg_out: &mut [u8],
    rng: &mut EngineRng,
) -> usize {
    let (roll_lt, roll_st) = roll_avg;
    let mut non_zero_desc_count = 0usize;

    for m in 0..roi.len() {
        let px = roi.idx_of_model[m];
        let (x, y) = roi.xy_of_model(m);
        let curr = current.buf()[px];
        if config.skip_zero_pixels && curr.r == 0 && curr.g == 0 && curr.b == 0 {
            continue;
        }

        let r = fields.r_threshold.buf()[px];
        let unstable_before = state.unstable[px] != 0;
        let (raw_color_thr, desc_thr) = raw_thresholds(r, unstable_before, config);
        let tot_color_thr = raw_color_thr * 3;
        let tot_desc_thr = desc_thr * 3;
        let sc_color_thr = tot_color_thr / 2;

        let mut curr_intra_desc = [0u16; 3];
        for c in 0..3 {
            let cc = channel(curr, c);
            curr_intra_desc[c] = lbsp::compute_rgb_channel_descriptor(current, x, y, c, cc, lut.threshold(cc));
        }

        let unstable_now = is_unstable(
            r,
            fields.mean_raw_segm_lt.buf()[px],
            fields.mean_raw_segm_st.buf()[px],
            fields.mean_final_segm_lt.buf()[px],
            fields.mean_final_segm_st.buf()[px],
        );
        state.unstable[px] = unstable_now as u8;

        let mut min_tot_desc = DESC_MAX_3 as u32;
        let mut min_tot_sum = COLOR_MAX_3 as u32;
        let mut good = 0usize;
        let mut s = 0usize;
        while good < config.n_required_bg_samples && s < samples.n() {
            let (bg_color, bg_desc) = samples.read(s, px);
            s += 1;
            let mut tot_desc = 0u32;
            let mut tot_sum = 0u32;
            let mut failed = false;
            for c in 0..3 {
                let cc = channel(curr, c);
                let bc = channel(bg_color, c);
                let color_dist = (cc as i32 - bc as i32).unsigned_abs();
                if color_dist > sc_color_thr {
                    failed = true;
                    break;
                }
                let intra_dist = (curr_intra_desc[c] ^ bg_desc[c]).count_ones();
                let inter_desc = lbsp::compute_rgb_channel_descriptor(current, x, y, c, bc, lut.threshold(bc));
                let inter_dist = (inter_desc ^ bg_desc[c]).count_ones();
                let desc_dist = (intra_dist + inter_dist) / 2;
                let sum_dist = ((desc_dist / 2) * COLOR_PER_DESC_BIT + color_dist).min(255);
                if sum_dist > sc_color_thr {
                    failed = true;
                    break;
                }
                tot_desc += desc_dist;
                tot_sum += sum_dist;
            }
            if !failed && (tot_desc > tot_desc_thr || tot_sum > tot_color_thr) {
                failed = true;
            }
            if !failed {
                min_tot_desc = min_tot_desc.min(tot_desc);
                min_tot_sum = min_tot_sum.min(tot_sum);
                good += 1;
            }
        }

        let last_color_v = last_color.buf()[px];
        let last_desc_v = last_desc.buf()[px];
        let norm_last_dist = (l1_rgb(curr, last_color_v) as f32 / COLOR_MAX_3 + hamming3(curr_intra_desc, last_desc_v) as f32 / DESC_MAX_3) / 2.0;
        fields.mean_last_dist.buf_mut()[px] = fields.mean_last_dist.buf()[px] * (1.0 - roll_st) + norm_last_dist * roll_st;

        let is_fg = good < config.n_required_bg_samples;
        if is_fg {
            let norm_min_dist = ((min_tot_sum as f32 / COLOR_MAX_3 + min_tot_desc as f32 / DESC_MAX_3) / 2.0
                + (config.n_required_bg_samples - good) as f32 / config.n_required_bg_samples as f32)
                .min(1.0);
            fields.mean_min_dist_lt.buf_mut()[px] = fields.mean_min_dist_lt.buf()[px] * (1.0 - roll_lt) + norm_min_dist * roll_lt;
            fields.mean_min_dist_st.buf_mut()[px] = fields.mean_min_dist_st.buf()[px] * (1.0 - roll_st) + norm_min_dist * roll_st;
            fields.mean_raw_segm_lt.buf_mut()[px] = fields.mean_raw_segm_lt.buf()[px] * (1.0 - roll_lt) + roll_lt;
            fields.mean_raw_segm_st.buf_mut()[px] = fields.mean_raw_segm_st.buf()[px] * (1.0 - roll_st) + roll_st;
            fg_out[px] = 255;
            if reset_cooldown_active && rng.one_in(FG_RESET_INJECT_DENOM) {
                let slot = rng.gen_below(samples.n());
                samples.put(slot, px, curr, curr_intra_desc);
            }
        } else {
            let norm_min_dist = (min_tot_sum as f32 / COLOR_MAX_3 + min_tot_desc as f32 / DESC_MAX_3) / 2.0;
            fields.mean_min_dist_lt.buf_mut()[px] = fields.mean_min_dist_lt.buf()[px] * (1.0 - roll_lt) + norm_min_dist * roll_lt;
            fields.mean_min_dist_st.buf_mut()[px] = fields.mean_min_dist_st.buf()[px] * (1.0 - roll_st) + norm_min_dist * roll_st;
            fields.mean_raw_segm_lt.buf_mut()[px] *= 1.0 - roll_lt;
            fields.mean_raw_segm_st.buf_mut()[px] *= 1.0 - roll_st;
            fg_out[px] = 0;

            let learning_rate = fields.t_update.buf()[px].ceil().max(1.0);
            if rng.one_in(learning_rate) {
                let slot = rng.gen_below(samples.n());
                samples.put(slot, px, curr, curr_intra_desc);
            }
            let use_3x3 = config.use_3x3_spread && !unstable_now;
            let (sx, sy) = random_neighbor(rng, x, y, if use_3x3 { RADIUS_3X3 } else { RADIUS_5X5 }, PATCH_BORDER, roi.width, roi.height);
            let spx = sy * roi.width + sx;
            let spread_denom = if use_3x3 { learning_rate } else { (learning_rate / 2.0).floor() + 1.0 };
            let rand_mean_last_dist = fields.mean_last_dist.buf()[spx];
            let rand_mean_raw_segm = fields.mean_raw_segm_st.buf()[spx];
            let ghost = rand_mean_raw_segm > GHOSTDET_S_MIN && rand_mean_last_dist < GHOSTDET_D_MAX && rng.one_in(t_bounds.0);
            if rng.one_in(spread_denom) || ghost {
                let slot = rng.gen_below(samples.n());
                samples.put(slot, spx, curr, curr_intra_desc);
            }
        }

        let inputs = FeedbackInputs { is_fg_now: is_fg, was_fg_last_frame: last_fg.buf()[px] != 0, is_unstable: unstable_now, blinked: state.blinks[px] != 0 };
        feedback::update_pixel(fields, px, t_bounds.0, t_bounds.1, &inputs);

        if curr_intra_desc.iter().map(|d| d.count_ones()).sum::<u32>() >= 4 {
            non_zero_desc_count += 1;
        }
        last_color.buf_mut()[px] = curr;
        last_desc.buf_mut()[px] = curr_intra_desc;
    }

    state.update_blinks(roi, fg_out);
    non_zero_desc_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgref::Img;

    fn flat_setup(w: usize, h: usize, value: u8) -> (Roi, Config, Lut, SampleModel<u8, u16>, ImgVec<u8>) {
        let config = Config::default();
        let roi = Roi::build(None, w, h).unwrap();
        let lut = Lut::new(config.desc_dist_threshold_offset, config.rel_lbsp_threshold, true);
        let mut samples = SampleModel::<u8, u16>::new(config.n_bg_samples, w, h);
        let img = Img::new(vec![value; w * h], w, h);
        for &px in &roi.idx_of_model {
            let desc = lbsp::compute_gray_descriptor(img.as_ref(), px % w, px / w, value, lut.threshold(value));
            for s in 0..samples.n() {
                samples.put(s, px, value, desc);
            }
        }
        (roi, config, lut, samples, img)
    }

    #[test]
    fn stable_flat_frame_classifies_as_background() {
        let (roi, config, lut, mut samples, img) = flat_setup(12, 12, 128);
        let mut last_color = ImgVec::new(vec![128u8; 12 * 12], 12, 12);
        let mut last_desc = ImgVec::new(vec![0u16; 12 * 12], 12, 12);
        let mut fields = FeedbackFields::new(12, 12, 2.0);
        let mut state = ClassifierState::new(12, 12);
        let last_fg = ImgVec::new(vec![0u8; 12 * 12], 12, 12);
        let mut fg_out = vec![0u8; 12 * 12];
        let mut rng = EngineRng::new(1);

        classify_mono(
            &roi,
            &config,
            &lut,
            &mut samples,
            img.as_ref(),
            &mut last_color,
            &mut last_desc,
            &mut fields,
            &mut state,
            last_fg.as_ref(),
            (2.0, 256.0),
            false,
            (1.0, 1.0),
            &mut fg_out,
            &mut rng,
        );

        for &px in &roi.idx_of_model {
            assert_eq!(fg_out[px], 0, "flat matching frame must classify as background");
        }
    }

    #[test]
    fn drastically_different_frame_classifies_as_foreground() {
        let (roi, config, lut, mut samples, _img) = flat_setup(12, 12, 10);
        let current = Img::new(vec![250u8; 12 * 12], 12, 12);
        let mut last_color = ImgVec::new(vec![10u8; 12 * 12], 12, 12);
        let mut last_desc = ImgVec::new(vec![0u16; 12 * 12], 12, 12);
        let mut fields = FeedbackFields::new(12, 12, 2.0);
        let mut state = ClassifierState::new(12, 12);
        let last_fg = ImgVec::new(vec![0u8; 12 * 12], 12, 12);
        let mut fg_out = vec![0u8; 12 * 12];
        let mut rng = EngineRng::new(1);

        classify_mono(
            &roi,
            &config,
            &lut,
            &mut samples,
            current.as_ref(),
            &mut last_color,
            &mut last_desc,
            &mut fields,
            &mut state,
            last_fg.as_ref(),
            (2.0, 256.0),
            false,
            (1.0, 1.0),
            &mut fg_out,
            &mut rng,
        );

        for &px in &roi.idx_of_model {
            assert_eq!(fg_out[px], 255, "frame far from every sample must classify as foreground");
        }
    }

    #[test]
    fn zero_pixel_is_skipped_when_toggled() {
        let (roi, config, lut, mut samples, _img) = flat_setup(12, 12, 100);
        let current = Img::new(vec![0u8; 12 * 12], 12, 12);
        let mut last_color = ImgVec::new(vec![100u8; 12 * 12], 12, 12);
        let mut last_desc = ImgVec::new(vec![0u16; 12 * 12], 12, 12);
        let mut fields = FeedbackFields::new(12, 12, 2.0);
        let mut state = ClassifierState::new(12, 12);
        let last_fg = ImgVec::new(vec![0u8; 12 * 12], 12, 12);
        let mut fg_out = vec![9u8; 12 * 12];
        let mut rng = EngineRng::new(1);

        classify_mono(
            &roi,
            &config,
            &lut,
            &mut samples,
            current.as_ref(),
            &mut last_color,
            &mut last_desc,
            &mut fields,
            &mut state,
            last_fg.as_ref(),
            (2.0, 256.0),
            false,
            (1.0, 1.0),
            &mut fg_out,
            &mut rng,
        );

        for &px in &roi.idx_of_model {
            assert_eq!(fg_out[px], 9, "zero-valued pixels must be left untouched, not reclassified");
        }
    }
}
