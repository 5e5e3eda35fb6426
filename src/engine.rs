//! The public engine (§6): wires the per-module pieces into the per-frame
//! lifecycle described in §5's ordering guarantee — classifier, then
//! frame-level analyzer, then morphology, with graph-cut and warp exposed as
//! separate calls a caller invokes explicitly.
//!
//! One `Engine` enum dispatches once per call to a `MonoEngine` or
//! `ColorEngine`; their hot loops are the separate monomorphic functions in
//! [`crate::classifier`], never a per-pixel branch on channel count.

use imgref::{Img, ImgVec};
use rgb::RGB8;

use crate::classifier::{self, ClassifierState};
use crate::config::{Config, ConfigBuilder};
use crate::error::{Error, Result};
use crate::feedback::FeedbackFields;
use crate::frame_analysis::{self, FrameAnalysisState, RESET_REFRESH_FRACTION, RESET_T_VALUE};
use crate::geometry::Roi;
use crate::graphcut;
use crate::lbsp::{self, Lut};
use crate::morphology;
use crate::rng::EngineRng;
use crate::samples::SampleModel;
use crate::warp::{self, Mat3};

fn roll_avg(config: &Config) -> (f32, f32) {
    (1.0 / config.n_samples_for_moving_avgs, 1.0 / config.n_samples_for_moving_avgs_st())
}

fn check_len(buf_len: usize, expected: usize) -> Result<()> {
    if buf_len != expected {
        return Err(Error::ShapeMismatch { expected_len: expected, actual_len: buf_len });
    }
    Ok(())
}

struct MonoEngine {
    width: usize,
    height: usize,
    config: Config,
    roi: Roi,
    lut: Lut,
    samples: SampleModel<u8, u16>,
    fields: FeedbackFields,
    classifier_state: ClassifierState,
    frame_state: FrameAnalysisState,
    last_color: ImgVec<u8>,
    last_desc: ImgVec<u16>,
    last_fg: ImgVec<u8>,
    rng: EngineRng,
}

struct ColorEngine {
    width: usize,
    height: usize,
    config: Config,
    roi: Roi,
    lut: Lut,
    samples: SampleModel<RGB8, [u16; 3]>,
    fields: FeedbackFields,
    classifier_state: ClassifierState,
    frame_state: FrameAnalysisState,
    last_color: ImgVec<RGB8>,
    last_desc: ImgVec<[u16; 3]>,
    last_fg: ImgVec<u8>,
    rng: EngineRng,
}

impl MonoEngine {
    fn new(config_builder: ConfigBuilder, first_frame: &[u8], width: usize, height: usize, roi_mask: Option<&[bool]>) -> Result<Self> {
        let roi = Roi::build(roi_mask, width, height)?;
        let config = config_builder.build(width, height, roi.len())?;
        let low_coverage = !config.learning_rate_scaling_enabled;
        let lut = Lut::new(config.desc_dist_threshold_offset, config.rel_lbsp_threshold, true);
        let mut samples = SampleModel::<u8, u16>::new(config.n_bg_samples, width, height);

        let last_color = Img::new(first_frame.to_vec(), width, height);
        let mut last_desc = ImgVec::new(vec![0u16; width * height], width, height);
        for m in 0..roi.len() {
            let px = roi.idx_of_model[m];
            let (x, y) = roi.xy_of_model(m);
            let curr = last_color.buf()[px];
            last_desc.buf_mut()[px] = lbsp::compute_gray_descriptor(last_color.as_ref(), x, y, curr, lut.threshold(curr));
        }
        let last_fg = ImgVec::new(vec![0u8; width * height], width, height);
        let fields = FeedbackFields::new(width, height, config.default_t_bounds(low_coverage).0);
        let classifier_state = ClassifierState::new(width, height);
        let frame_state = FrameAnalysisState::new(width, height, 1, &config, low_coverage);
        let mut rng = EngineRng::new(config.seed);

        samples.refresh(&roi, 1.0, true, last_fg.as_ref(), last_color.as_ref(), last_desc.as_ref(), &mut rng);

        Ok(Self { width, height, config, roi, lut, samples, fields, classifier_state, frame_state, last_color, last_desc, last_fg, rng })
    }

    fn process(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        check_len(frame.len(), self.width * self.height)?;
        let current = imgref::ImgRef::new(frame, self.width, self.height);
        let avg = roll_avg(&self.config);
        let t_bounds = self.frame_state.t_bounds();
        let reset_cooldown_active = self.frame_state.reset_cooldown_active();

        let mut fg_out = vec![0u8; self.width * self.height];
        let non_zero_desc_count = classifier::classify_mono(
            &self.roi,
            &self.config,
            &self.lut,
            &mut self.samples,
            current,
            &mut self.last_color,
            &mut self.last_desc,
            &mut self.fields,
            &mut self.classifier_state,
            self.last_fg.as_ref(),
            t_bounds,
            reset_cooldown_active,
            avg,
            &mut fg_out,
            &mut self.rng,
        );

        let outcome = frame_analysis::analyze_mono(
            &mut self.frame_state,
            &self.roi,
            &self.config,
            &mut self.lut,
            &mut self.fields,
            current,
            self.last_fg.as_ref(),
            non_zero_desc_count,
            avg,
        );

        if outcome.reset_requested {
            log::debug!("mono engine: firing automatic background-model reset");
            self.samples.refresh(&self.roi, RESET_REFRESH_FRACTION, false, self.last_fg.as_ref(), self.last_color.as_ref(), self.last_desc.as_ref(), &mut self.rng);
            for &px in &self.roi.idx_of_model {
                self.fields.t_update.buf_mut()[px] = RESET_T_VALUE;
            }
        }

        let raw = Img::new(fg_out, self.width, self.height);
        let completion = morphology::complete(raw.as_ref(), self.config.median_blur_kernel_size);
        morphology::mask_blinks(&mut self.classifier_state.blinks, completion.dilated_fg.buf());
        self.last_fg = completion.last_fg;
        Ok(self.last_fg.buf().to_vec())
    }

    fn warp(&mut self, new_frame: &[u8], h_inv: &Mat3) -> Result<()> {
        check_len(new_frame.len(), self.width * self.height)?;

        self.last_desc = warp::warp_nearest(self.last_desc.as_ref(), h_inv);
        self.last_fg = warp::warp_nearest(self.last_fg.as_ref(), h_inv);
        self.classifier_state.blinks = warp::warp_nearest(imgref::ImgRef::new(&self.classifier_state.blinks, self.width, self.height), h_inv).buf().to_vec();
        self.fields.r_threshold = warp::warp_nearest(self.fields.r_threshold.as_ref(), h_inv);
        self.fields.v_modulator = warp::warp_nearest(self.fields.v_modulator.as_ref(), h_inv);
        self.fields.t_update = warp::warp_nearest(self.fields.t_update.as_ref(), h_inv);
        self.fields.mean_last_dist = warp::warp_nearest(self.fields.mean_last_dist.as_ref(), h_inv);
        self.fields.mean_min_dist_lt = warp::warp_nearest(self.fields.mean_min_dist_lt.as_ref(), h_inv);
        self.fields.mean_min_dist_st = warp::warp_nearest(self.fields.mean_min_dist_st.as_ref(), h_inv);
        self.fields.mean_raw_segm_lt = warp::warp_nearest(self.fields.mean_raw_segm_lt.as_ref(), h_inv);
        self.fields.mean_raw_segm_st = warp::warp_nearest(self.fields.mean_raw_segm_st.as_ref(), h_inv);
        self.fields.mean_final_segm_lt = warp::warp_nearest(self.fields.mean_final_segm_lt.as_ref(), h_inv);
        self.fields.mean_final_segm_st = warp::warp_nearest(self.fields.mean_final_segm_st.as_ref(), h_inv);
        self.frame_state.warp(h_inv);
        for slot in 0..self.samples.n() {
            let colors = warp::warp_nearest(self.samples.color_plane(slot), h_inv);
            let descs = warp::warp_nearest(self.samples.desc_plane(slot), h_inv);
            for m in 0..self.roi.len() {
                let px = self.roi.idx_of_model[m];
                self.samples.put(slot, px, colors.buf()[px], descs.buf()[px]);
            }
        }

        self.last_color = Img::new(new_frame.to_vec(), self.width, self.height);

        let t_lower_cap = self.frame_state.t_bounds().0;
        let last_fg = self.last_fg.clone();
        warp::repair_mono(
            &self.roi,
            t_lower_cap,
            self.last_color.as_ref(),
            &self.lut,
            &mut self.fields,
            &mut self.last_desc,
            last_fg.as_ref(),
            &mut self.samples,
            &mut self.classifier_state,
            &mut self.rng,
        );
        Ok(())
    }

    fn refresh(&mut self, fraction: f32, force_fg: bool) -> Result<()> {
        if !(0.0..=1.0).contains(&fraction) || fraction <= 0.0 {
            return Err(Error::InvalidFraction(fraction));
        }
        self.samples.refresh(&self.roi, fraction, force_fg, self.last_fg.as_ref(), self.last_color.as_ref(), self.last_desc.as_ref(), &mut self.rng);
        Ok(())
    }

    fn background_image(&self) -> Vec<u8> {
        let n = self.samples.n() as f32;
        let mut sum = vec![0f32; self.width * self.height];
        for slot in 0..self.samples.n() {
            let plane = self.samples.color_plane(slot);
            for (acc, &v) in sum.iter_mut().zip(plane.buf()) {
                *acc += v as f32 / n;
            }
        }
        sum.iter().map(|&v| v.round().clamp(0.0, 255.0) as u8).collect()
    }

    fn background_descriptors(&self) -> Vec<u16> {
        let n = self.samples.n() as f32;
        let mut sum = vec![0f32; self.width * self.height];
        for slot in 0..self.samples.n() {
            for px in 0..self.width * self.height {
                let (_, desc) = self.samples.read(slot, px);
                sum[px] += desc as f32 / n;
            }
        }
        sum.iter().map(|&v| v.round().clamp(0.0, u16::MAX as f32) as u16).collect()
    }
}

impl ColorEngine {
    fn new(config_builder: ConfigBuilder, first_frame: &[RGB8], width: usize, height: usize, roi_mask: Option<&[bool]>) -> Result<Self> {
        let roi = Roi::build(roi_mask, width, height)?;
        let config = config_builder.build(width, height, roi.len())?;
        let low_coverage = !config.learning_rate_scaling_enabled;
        let lut = Lut::new(config.desc_dist_threshold_offset, config.rel_lbsp_threshold, false);
        let mut samples = SampleModel::<RGB8, [u16; 3]>::new(config.n_bg_samples, width, height);

        let last_color = Img::new(first_frame.to_vec(), width, height);
        let mut last_desc = ImgVec::new(vec![[0u16; 3]; width * height], width, height);
        for m in 0..roi.len() {
            let px = roi.idx_of_model[m];
            let (x, y) = roi.xy_of_model(m);
            let curr = last_color.buf()[px];
            let channels = [curr.r, curr.g, curr.b];
            let mut desc = [0u16; 3];
            for (c, &value) in channels.iter().enumerate() {
                desc[c] = lbsp::compute_rgb_channel_descriptor(last_color.as_ref(), x, y, c, value, lut.threshold(value));
            }
            last_desc.buf_mut()[px] = desc;
        }
        let last_fg = ImgVec::new(vec![0u8; width * height], width, height);
        let fields = FeedbackFields::new(width, height, config.default_t_bounds(low_coverage).0);
        let classifier_state = ClassifierState::new(width, height);
        let frame_state = FrameAnalysisState::new(width, height, 3, &config, low_coverage);
        let mut rng = EngineRng::new(config.seed);

        samples.refresh(&roi, 1.0, true, last_fg.as_ref(), last_color.as_ref(), last_desc.as_ref(), &mut rng);

        Ok(Self { width, height, config, roi, lut, samples, fields, classifier_state, frame_state, last_color, last_desc, last_fg, rng })
    }

    fn process(&mut self, frame: &[RGB8]) -> Result<Vec<u8>> {
        check_len(frame.len(), self.width * self.height)?;
        let current = imgref::ImgRef::new(frame, self.width, self.height);
        let avg = roll_avg(&self.config);
        let t_bounds = self.frame_state.t_bounds();
        let reset_cooldown_active = self.frame_state.reset_cooldown_active();

        let mut fg_out = vec![0u8; self.width * self.height];
        let non_zero_desc_count = classifier::classify_color(
            &self.roi,
            &self.config,
            &self.lut,
            &mut self.samples,
            current,
            &mut self.last_color,
            &mut self.last_desc,
            &mut self.fields,
            &mut self.classifier_state,
            self.last_fg.as_ref(),
            t_bounds,
            reset_cooldown_active,
            avg,
            &mut fg_out,
            &mut self.rng,
        );

        let outcome = frame_analysis::analyze_color(
            &mut self.frame_state,
            &self.roi,
            &self.config,
            &mut self.lut,
            &mut self.fields,
            current,
            self.last_fg.as_ref(),
            non_zero_desc_count,
            avg,
        );

        if outcome.reset_requested {
            log::debug!("color engine: firing automatic background-model reset");
            self.samples.refresh(&self.roi, RESET_REFRESH_FRACTION, false, self.last_fg.as_ref(), self.last_color.as_ref(), self.last_desc.as_ref(), &mut self.rng);
            for &px in &self.roi.idx_of_model {
                self.fields.t_update.buf_mut()[px] = RESET_T_VALUE;
            }
        }

        let raw = Img::new(fg_out, self.width, self.height);
        let completion = morphology::complete(raw.as_ref(), self.config.median_blur_kernel_size);
        morphology::mask_blinks(&mut self.classifier_state.blinks, completion.dilated_fg.buf());
        self.last_fg = completion.last_fg;
        Ok(self.last_fg.buf().to_vec())
    }

    fn warp(&mut self, new_frame: &[RGB8], h_inv: &Mat3) -> Result<()> {
        check_len(new_frame.len(), self.width * self.height)?;

        self.last_desc = warp::warp_nearest(self.last_desc.as_ref(), h_inv);
        self.last_fg = warp::warp_nearest(self.last_fg.as_ref(), h_inv);
        self.classifier_state.blinks = warp::warp_nearest(imgref::ImgRef::new(&self.classifier_state.blinks, self.width, self.height), h_inv).buf().to_vec();
        self.fields.r_threshold = warp::warp_nearest(self.fields.r_threshold.as_ref(), h_inv);
        self.fields.v_modulator = warp::warp_nearest(self.fields.v_modulator.as_ref(), h_inv);
        self.fields.t_update = warp::warp_nearest(self.fields.t_update.as_ref(), h_inv);
        self.fields.mean_last_dist = warp::warp_nearest(self.fields.mean_last_dist.as_ref(), h_inv);
        self.fields.mean_min_dist_lt = warp::warp_nearest(self.fields.mean_min_dist_lt.as_ref(), h_inv);
        self.fields.mean_min_dist_st = warp::warp_nearest(self.fields.mean_min_dist_st.as_ref(), h_inv);
        self.fields.mean_raw_segm_lt = warp::warp_nearest(self.fields.mean_raw_segm_lt.as_ref(), h_inv);
        self.fields.mean_raw_segm_st = warp::warp_nearest(self.fields.mean_raw_segm_st.as_ref(), h_inv);
        self.fields.mean_final_segm_lt = warp::warp_nearest(self.fields.mean_final_segm_lt.as_ref(), h_inv);
        self.fields.mean_final_segm_st = warp::warp_nearest(self.fields.mean_final_segm_st.as_ref(), h_inv);
        self.frame_state.warp(h_inv);
        for slot in 0..self.samples.n() {
            let colors = warp::warp_nearest(self.samples.color_plane(slot), h_inv);
            let descs = warp::warp_nearest(self.samples.desc_plane(slot), h_inv);
            for m in 0..self.roi.len() {
                let px = self.roi.idx_of_model[m];
                self.samples.put(slot, px, colors.buf()[px], descs.buf()[px]);
            }
        }

        self.last_color = Img::new(new_frame.to_vec(), self.width, self.height);

        let t_lower_cap = self.frame_state.t_bounds().0;
        let last_fg = self.last_fg.clone();
        warp::repair_color(
            &self.roi,
            t_lower_cap,
            self.last_color.as_ref(),
            &self.lut,
            &mut self.fields,
            &mut self.last_desc,
            last_fg.as_ref(),
            &mut self.samples,
            &mut self.classifier_state,
            &mut self.rng,
        );
        Ok(())
    }

    fn refresh(&mut self, fraction: f32, force_fg: bool) -> Result<()> {
        if !(0.0..=1.0).contains(&fraction) || fraction <= 0.0 {
            return Err(Error::InvalidFraction(fraction));
        }
        self.samples.refresh(&self.roi, fraction, force_fg, self.last_fg.as_ref(), self.last_color.as_ref(), self.last_desc.as_ref(), &mut self.rng);
        Ok(())
    }

    fn background_image(&self) -> Vec<u8> {
        let n = self.samples.n() as f32;
        let mut sum = vec![[0f32; 3]; self.width * self.height];
        for slot in 0..self.samples.n() {
            let plane = self.samples.color_plane(slot);
            for (acc, &v) in sum.iter_mut().zip(plane.buf()) {
                acc[0] += v.r as f32 / n;
                acc[1] += v.g as f32 / n;
                acc[2] += v.b as f32 / n;
            }
        }
        sum.iter().flat_map(|c| c.iter().map(|&v| v.round().clamp(0.0, 255.0) as u8)).collect()
    }

    fn background_descriptors(&self) -> Vec<u16> {
        let n = self.samples.n() as f32;
        let mut sum = vec![[0f32; 3]; self.width * self.height];
        for slot in 0..self.samples.n() {
            for px in 0..self.width * self.height {
                let (_, desc) = self.samples.read(slot, px);
                for c in 0..3 {
                    sum[px][c] += desc[c] as f32 / n;
                }
            }
        }
        sum.iter().flat_map(|c| c.iter().map(|&v| v.round().clamp(0.0, u16::MAX as f32) as u16)).collect()
    }
}

/// Per-pixel adaptive background/foreground segmentation engine (§6).
///
/// Dispatches once per call to a 1-channel or 3-channel inner engine; see
/// the module doc comment for why this isn't a trait object.
pub enum Engine {
    Mono(MonoEngine),
    Color(ColorEngine),
}

impl Engine {
    /// `initialize(firstFrame, roi?)`. `channels` must be `1` or `3`;
    /// `first_frame` must hold `width*height*channels` bytes. Internally
    /// seeds the background model from the first frame itself (Testable
    /// Property 5), matching the original's `initialize()` calling
    /// `refreshModel(1.0)` as its last step.
    pub fn initialize(config: ConfigBuilder, first_frame: &[u8], width: usize, height: usize, channels: usize, roi: Option<&[bool]>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::EmptyFrame);
        }
        match channels {
            1 => {
                check_len(first_frame.len(), width * height)?;
                Ok(Self::Mono(MonoEngine::new(config, first_frame, width, height, roi)?))
            }
            3 => {
                check_len(first_frame.len(), width * height * 3)?;
                let rgb: Vec<RGB8> = first_frame.chunks_exact(3).map(|c| RGB8::new(c[0], c[1], c[2])).collect();
                Ok(Self::Color(ColorEngine::new(config, &rgb, width, height, roi)?))
            }
            c => Err(Error::UnsupportedChannelCount(c)),
        }
    }

    /// `process(frame, learningRateOverride?)`. This crate does not expose a
    /// per-call learning-rate override: the geometry-derived/auto-reset
    /// caps already computed in `Config`/`FrameAnalysisState` are the only
    /// source of `T_lower`/`T_upper`, so there is no additional per-call
    /// knob to thread through.
    pub fn process(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Mono(e) => e.process(frame),
            Self::Color(e) => {
                if frame.len() % 3 != 0 {
                    return Err(Error::ShapeMismatch { expected_len: e.width * e.height * 3, actual_len: frame.len() });
                }
                let rgb: Vec<RGB8> = frame.chunks_exact(3).map(|c| RGB8::new(c[0], c[1], c[2])).collect();
                e.process(&rgb)
            }
        }
    }

    /// `warp(newFrame, H)`. `h` is the forward homography describing how
    /// the *scene* moved between the previous and `new_frame`; every stored
    /// buffer is resampled through its inverse (§4.G).
    pub fn warp(&mut self, new_frame: &[u8], h: Mat3) -> Result<()> {
        let h_inv = warp::invert(h).unwrap_or(warp::IDENTITY);
        match self {
            Self::Mono(e) => e.warp(new_frame, &h_inv),
            Self::Color(e) => {
                if new_frame.len() % 3 != 0 {
                    return Err(Error::ShapeMismatch { expected_len: e.width * e.height * 3, actual_len: new_frame.len() });
                }
                let rgb: Vec<RGB8> = new_frame.chunks_exact(3).map(|c| RGB8::new(c[0], c[1], c[2])).collect();
                e.warp(&rgb, &h_inv)
            }
        }
    }

    /// `refresh(fraction, forceFG?)`.
    pub fn refresh(&mut self, fraction: f32, force_fg: bool) -> Result<()> {
        match self {
            Self::Mono(e) => e.refresh(fraction, force_fg),
            Self::Color(e) => e.refresh(fraction, force_fg),
        }
    }

    /// `complete(maskInOut)`: the standalone morphological completion pass
    /// (§4.I), usable on any raw mask matching this engine's dimensions —
    /// not only the one most recently produced by `process`.
    pub fn complete(&self, mask_in_out: &mut [u8]) -> Result<()> {
        let (width, height, median_kernel) = match self {
            Self::Mono(e) => (e.width, e.height, e.config.median_blur_kernel_size),
            Self::Color(e) => (e.width, e.height, e.config.median_blur_kernel_size),
        };
        check_len(mask_in_out.len(), width * height)?;
        let raw = imgref::ImgRef::new(mask_in_out, width, height);
        let completion = morphology::complete(raw, median_kernel);
        mask_in_out.copy_from_slice(completion.last_fg.buf());
        Ok(())
    }

    /// `graphCutSmooth(image, advisory, lastMask, maskInOut)`. `image` is
    /// accepted only for shape validation at this API boundary — the patch
    /// smoother itself is driven by `advisory` and `last_mask` alone; see
    /// `graphcut`'s module doc comment and `DESIGN.md` for why `image`'s
    /// original role (feeding the patch "distance" term) now belongs to
    /// `advisory` instead.
    pub fn graph_cut_smooth(&self, image: &[u8], advisory: &[f32], last_mask: &[u8], mask_in_out: &mut [u8]) -> Result<()> {
        let (width, height, channels) = match self {
            Self::Mono(e) => (e.width, e.height, 1),
            Self::Color(e) => (e.width, e.height, 3),
        };
        check_len(image.len(), width * height * channels)?;
        check_len(advisory.len(), width * height)?;
        check_len(last_mask.len(), width * height)?;
        check_len(mask_in_out.len(), width * height)?;
        graphcut::smooth(mask_in_out, width, height, advisory, last_mask);
        Ok(())
    }

    /// `backgroundImage()`: per-pixel channel mean of the N sample colors
    /// (Testable Property 7), interleaved by channel for the color engine.
    pub fn background_image(&self) -> Vec<u8> {
        match self {
            Self::Mono(e) => e.background_image(),
            Self::Color(e) => e.background_image(),
        }
    }

    /// `backgroundDescriptors()`: per-pixel channel mean of the N sample
    /// descriptors, interleaved by channel for the color engine.
    pub fn background_descriptors(&self) -> Vec<u16> {
        match self {
            Self::Mono(e) => e.background_descriptors(),
            Self::Color(e) => e.background_descriptors(),
        }
    }

    pub fn width(&self) -> usize {
        match self {
            Self::Mono(e) => e.width,
            Self::Color(e) => e.width,
        }
    }

    pub fn height(&self) -> usize {
        match self {
            Self::Mono(e) => e.height,
            Self::Color(e) => e.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_frame(w: usize, h: usize, value: u8) -> Vec<u8> {
        vec![value; w * h]
    }

    #[test]
    fn static_scene_settles_to_an_all_background_mask() {
        let config = ConfigBuilder::default().seed(0);
        let frame = flat_frame(320, 240, 100);
        let mut engine = Engine::initialize(config, &frame, 320, 240, 1, None).unwrap();

        let mut mask = Vec::new();
        for _ in 0..100 {
            mask = engine.process(&frame).unwrap();
        }
        assert!(mask.iter().all(|&v| v == 0), "a static scene must settle to an all-background mask");
    }

    #[test]
    fn roi_masked_half_frame_is_always_background_outside_roi() {
        let w = 320;
        let h = 240;
        let config = ConfigBuilder::default().seed(1);
        let frame = flat_frame(w, h, 120);
        let mut roi_mask = vec![true; w * h];
        for y in 0..h {
            for x in 0..w / 2 {
                roi_mask[y * w + x] = false;
            }
        }
        let mut engine = Engine::initialize(config, &frame, w, h, 1, Some(&roi_mask)).unwrap();
        let mut bright = frame.clone();
        for v in bright.iter_mut() {
            *v = 250;
        }
        let mut mask = Vec::new();
        for _ in 0..5 {
            mask = engine.process(&bright).unwrap();
        }
        for y in 0..h {
            for x in 0..w / 2 {
                assert_eq!(mask[y * w + x], 0, "pixels outside the ROI must always read background");
            }
        }
    }

    #[test]
    fn determinism_same_seed_same_mask_sequence() {
        let frame = flat_frame(64, 64, 80);
        let mut a = Engine::initialize(ConfigBuilder::default().seed(7), &frame, 64, 64, 1, None).unwrap();
        let mut b = Engine::initialize(ConfigBuilder::default().seed(7), &frame, 64, 64, 1, None).unwrap();
        for i in 0..20 {
            let mut shifted = frame.clone();
            if i > 10 {
                shifted[100] = 200;
            }
            let mask_a = a.process(&shifted).unwrap();
            let mask_b = b.process(&shifted).unwrap();
            assert_eq!(mask_a, mask_b, "identical seeds must produce identical mask sequences");
        }
    }

    #[test]
    fn background_image_matches_sample_mean() {
        let frame = flat_frame(64, 64, 90);
        let engine = Engine::initialize(ConfigBuilder::default().seed(0), &frame, 64, 64, 1, None).unwrap();
        let bg = engine.background_image();
        assert_eq!(bg[64 * 32 + 32], 90, "every sample was seeded from the uniform first frame");
    }

    #[test]
    fn warp_identity_is_a_no_op_on_the_emitted_mask() {
        let frame = flat_frame(64, 64, 90);
        let mut engine = Engine::initialize(ConfigBuilder::default().seed(0), &frame, 64, 64, 1, None).unwrap();
        let before = engine.process(&frame).unwrap();
        engine.warp(&frame, warp::IDENTITY).unwrap();
        let after = engine.process(&frame).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn rejects_mismatched_frame_shape() {
        let frame = flat_frame(8, 8, 1);
        let mut engine = Engine::initialize(ConfigBuilder::default(), &frame, 8, 8, 1, None).unwrap();
        let wrong = vec![0u8; 10];
        assert!(matches!(engine.process(&wrong), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn unsupported_channel_count_is_rejected() {
        let frame = vec![0u8; 64];
        let err = Engine::initialize(ConfigBuilder::default(), &frame, 8, 8, 2, None);
        assert!(matches!(err, Err(Error::UnsupportedChannelCount(2))));
    }
}
