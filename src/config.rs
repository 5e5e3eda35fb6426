//! Tunable parameters recognized by the engine (§6), plus the validation that
//! turns bad combinations into `Error::InvalidSampleCounts` /
//! `Error::ThresholdOffsetViolation` at construction time instead of panics
//! later in the hot loop.

use crate::error::{Error, Result};

/// QVGA = 320×240; below this the engine falls back to coarser learning-rate
/// bounds, mirroring the original implementation's "low resolution" branch.
const QVGA_PIXELS: usize = 320 * 240;

/// Not named anywhere in the retrieved source (it's a default member
/// initialiser whose declaration lives in a header outside the retrieval
/// pack); `9` matches the rest of this family of background subtractors.
const DEFAULT_MEDIAN_BLUR_KERNEL_SIZE: usize = 9;

/// Validated, immutable configuration for one engine instance.
///
/// Built via [`ConfigBuilder`]; `Config::default()` reproduces the defaults
/// from §6 verbatim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// LBSP LUT slope (§4.A). Default `0.333`.
    pub rel_lbsp_threshold: f32,
    /// Base Hamming threshold offset added to the descriptor threshold. Default `3`.
    pub desc_dist_threshold_offset: u32,
    /// Base L1 color threshold. Default `30`.
    pub min_color_dist_threshold: u32,
    /// Total background samples per pixel, `N`. Default `50`.
    pub n_bg_samples: usize,
    /// Required matches for a BG verdict, `M`. Default `2`.
    pub n_required_bg_samples: usize,
    /// Long-term EMA window in frames; short-term window is this divided by 4. Default `100`.
    pub n_samples_for_moving_avgs: f32,
    /// Enables the frame-level downsampled learning-rate rescaling (§4.F).
    /// Derived from frame size / ROI coverage unless overridden.
    pub learning_rate_scaling_enabled: bool,
    /// Enables automatic model reset on large downsampled color change (§4.F).
    /// Derived from frame size / ROI coverage unless overridden.
    pub auto_model_reset_enabled: bool,
    /// Use the 3×3 neighbourhood for background spread instead of 5×5 (§4.E step 8).
    /// Derived from frame size / ROI coverage unless overridden.
    pub use_3x3_spread: bool,
    /// Odd kernel size for the completer's median blur (§4.I step 5), `3` at QVGA
    /// growing toward `13` at high resolutions. Derived from frame size unless overridden.
    pub median_blur_kernel_size: usize,
    /// Open question (SPEC_FULL §9): preserve the 1-channel color threshold
    /// halving asymmetry verbatim. Default `true`.
    pub halve_mono_color_threshold: bool,
    /// Open question (SPEC_FULL §9): preserve the invalid-zero-pixel skip
    /// heuristic verbatim. Default `true`.
    pub skip_zero_pixels: bool,
    /// RNG seed; two engines built with the same seed and fed the same
    /// frames produce bit-identical mask sequences (Testable Property 4).
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rel_lbsp_threshold: 0.333,
            desc_dist_threshold_offset: 3,
            min_color_dist_threshold: 30,
            n_bg_samples: 50,
            n_required_bg_samples: 2,
            n_samples_for_moving_avgs: 100.0,
            learning_rate_scaling_enabled: true,
            auto_model_reset_enabled: true,
            use_3x3_spread: true,
            median_blur_kernel_size: DEFAULT_MEDIAN_BLUR_KERNEL_SIZE,
            halve_mono_color_threshold: true,
            skip_zero_pixels: true,
            seed: 0,
        }
    }
}

impl Config {
    /// `stabColorDistOffset = minColorDistThreshold / 5` (§3 invariant 2).
    pub(crate) fn stab_color_dist_offset(&self) -> u32 {
        self.min_color_dist_threshold / 5
    }

    /// Short-term EMA window, `nSamplesForMovingAvgs / 4`.
    pub(crate) fn n_samples_for_moving_avgs_st(&self) -> f32 {
        self.n_samples_for_moving_avgs / 4.0
    }

    /// Derives `learning_rate_scaling_enabled`/`auto_model_reset_enabled`/`use_3x3_spread`/
    /// `median_blur_kernel_size` from frame size and ROI coverage, unless the builder
    /// explicitly overrode them. ROI covering at least half the frame, on a frame at
    /// least QVGA-sized, enables learning-rate scaling and auto-reset; below that, the
    /// 3×3 spread and the default kernel size are used unconditionally instead.
    pub(crate) fn derive_from_geometry(mut self, width: usize, height: usize, roi_pixels: usize) -> Self {
        let total = width * height;
        let large_enough_roi = total > 0 && roi_pixels * 2 >= total && total >= QVGA_PIXELS;
        self.learning_rate_scaling_enabled = large_enough_roi;
        self.auto_model_reset_enabled = large_enough_roi;
        if large_enough_roi {
            self.use_3x3_spread = total <= QVGA_PIXELS * 2;
            let raw = (((total as f32 / QVGA_PIXELS as f32) + 0.5).floor() as usize + DEFAULT_MEDIAN_BLUR_KERNEL_SIZE).min(14);
            self.median_blur_kernel_size = if raw % 2 == 1 { raw } else { raw - 1 };
        } else {
            self.use_3x3_spread = true;
            self.median_blur_kernel_size = DEFAULT_MEDIAN_BLUR_KERNEL_SIZE;
        }
        self
    }

    /// Default `(T_lower, T_upper)` pair, coarser for low ROI coverage frames
    /// as described in §4.F.
    pub(crate) fn default_t_bounds(&self, low_coverage: bool) -> (f32, f32) {
        if low_coverage { (4.0, 512.0) } else { (2.0, 256.0) }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.n_required_bg_samples == 0 || self.n_required_bg_samples > self.n_bg_samples {
            return Err(Error::InvalidSampleCounts(self.n_required_bg_samples, self.n_bg_samples));
        }
        let offset = self.stab_color_dist_offset();
        if self.min_color_dist_threshold < offset {
            return Err(Error::ThresholdOffsetViolation(self.min_color_dist_threshold, offset));
        }
        Ok(())
    }
}

/// Builder for [`Config`], mirroring the teacher's `Settings` construction
/// style: plain field overrides applied to a `Default::default()` base.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigBuilder {
    config: ConfigOverrides,
}

#[derive(Debug, Clone, Copy, Default)]
struct ConfigOverrides {
    rel_lbsp_threshold: Option<f32>,
    desc_dist_threshold_offset: Option<u32>,
    min_color_dist_threshold: Option<u32>,
    n_bg_samples: Option<usize>,
    n_required_bg_samples: Option<usize>,
    n_samples_for_moving_avgs: Option<f32>,
    learning_rate_scaling_enabled: Option<bool>,
    auto_model_reset_enabled: Option<bool>,
    use_3x3_spread: Option<bool>,
    median_blur_kernel_size: Option<usize>,
    halve_mono_color_threshold: Option<bool>,
    skip_zero_pixels: Option<bool>,
    seed: Option<u64>,
}

macro_rules! builder_setter {
    ($name:ident: $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.config.$name = Some(value);
            self
        }
    };
}

impl ConfigBuilder {
    builder_setter!(rel_lbsp_threshold: f32);
    builder_setter!(desc_dist_threshold_offset: u32);
    builder_setter!(min_color_dist_threshold: u32);
    builder_setter!(n_bg_samples: usize);
    builder_setter!(n_required_bg_samples: usize);
    builder_setter!(n_samples_for_moving_avgs: f32);
    builder_setter!(learning_rate_scaling_enabled: bool);
    builder_setter!(auto_model_reset_enabled: bool);
    builder_setter!(use_3x3_spread: bool);
    builder_setter!(median_blur_kernel_size: usize);
    builder_setter!(halve_mono_color_threshold: bool);
    builder_setter!(skip_zero_pixels: bool);
    builder_setter!(seed: u64);

    /// Resolve overrides against the default `Config`, then apply geometry-derived
    /// defaults for any field the caller didn't explicitly set.
    pub(crate) fn build(self, width: usize, height: usize, roi_pixels: usize) -> Result<Config> {
        let d = Config::default();
        let o = self.config;
        let derived = d.derive_from_geometry(width, height, roi_pixels);
        let config = Config {
            rel_lbsp_threshold: o.rel_lbsp_threshold.unwrap_or(d.rel_lbsp_threshold),
            desc_dist_threshold_offset: o.desc_dist_threshold_offset.unwrap_or(d.desc_dist_threshold_offset),
            min_color_dist_threshold: o.min_color_dist_threshold.unwrap_or(d.min_color_dist_threshold),
            n_bg_samples: o.n_bg_samples.unwrap_or(d.n_bg_samples),
            n_required_bg_samples: o.n_required_bg_samples.unwrap_or(d.n_required_bg_samples),
            n_samples_for_moving_avgs: o.n_samples_for_moving_avgs.unwrap_or(d.n_samples_for_moving_avgs),
            learning_rate_scaling_enabled: o.learning_rate_scaling_enabled.unwrap_or(derived.learning_rate_scaling_enabled),
            auto_model_reset_enabled: o.auto_model_reset_enabled.unwrap_or(derived.auto_model_reset_enabled),
            use_3x3_spread: o.use_3x3_spread.unwrap_or(derived.use_3x3_spread),
            median_blur_kernel_size: o.median_blur_kernel_size.unwrap_or(derived.median_blur_kernel_size),
            halve_mono_color_threshold: o.halve_mono_color_threshold.unwrap_or(d.halve_mono_color_threshold),
            skip_zero_pixels: o.skip_zero_pixels.unwrap_or(d.skip_zero_pixels),
            seed: o.seed.unwrap_or(d.seed),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.n_bg_samples, 50);
        assert_eq!(c.n_required_bg_samples, 2);
        assert_eq!(c.min_color_dist_threshold, 30);
        assert_eq!(c.stab_color_dist_offset(), 6);
    }

    #[test]
    fn rejects_required_above_total() {
        let err = ConfigBuilder::default().n_required_bg_samples(51).build(320, 240, 320 * 240);
        assert!(matches!(err, Err(Error::InvalidSampleCounts(51, 50))));
    }

    #[test]
    fn rejects_threshold_under_offset() {
        let err = ConfigBuilder::default().min_color_dist_threshold(2).build(320, 240, 320 * 240);
        assert!(err.is_err());
    }

    #[test]
    fn small_roi_derives_coarser_bounds() {
        let c = ConfigBuilder::default().build(320, 240, 10).unwrap();
        assert!(!c.learning_rate_scaling_enabled);
        let (lower, upper) = c.default_t_bounds(true);
        assert_eq!((lower, upper), (4.0, 512.0));
        assert_eq!(c.median_blur_kernel_size, 9);
    }

    #[test]
    fn qvga_frame_gets_the_default_odd_kernel_size() {
        let c = ConfigBuilder::default().build(320, 240, 320 * 240).unwrap();
        assert!(c.learning_rate_scaling_enabled);
        assert!(c.use_3x3_spread);
        assert_eq!(c.median_blur_kernel_size, 9);
    }

    #[test]
    fn large_frame_grows_the_kernel_and_drops_3x3_spread() {
        let w = 1920;
        let h = 1080;
        let c = ConfigBuilder::default().build(w, h, w * h).unwrap();
        assert!(c.learning_rate_scaling_enabled);
        assert!(!c.use_3x3_spread);
        assert!(c.median_blur_kernel_size % 2 == 1);
        assert!(c.median_blur_kernel_size <= 14);
    }
}
