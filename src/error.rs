use std::io;

quick_error! {
    /// Every fatal condition an engine entry point or the CLI harness can raise.
    ///
    /// Stochastic misses, warp-induced reinitialisation and pathological graph-cut
    /// input are *not* represented here: the design treats them as expected,
    /// locally-recovered conditions, never as errors.
    #[derive(Debug)]
    pub enum Error {
        /// `initialize` was called with a frame that has zero pixels.
        EmptyFrame {
            display("frame has zero pixels")
        }
        /// A channel count outside `{1, 3}` was requested.
        UnsupportedChannelCount(channels: usize) {
            display("unsupported channel count {} (only 1 or 3 are supported)", channels)
        }
        /// A frame or ROI passed to `initialize`/`process` does not match the
        /// engine's configured width/height/channel count.
        ShapeMismatch { expected_len: usize, actual_len: usize } {
            display("buffer length mismatch: expected {} bytes, got {}", expected_len, actual_len)
        }
        /// The ROI, after border dilation, contains zero relevant pixels.
        DegenerateRoi {
            display("region of interest is empty after border dilation")
        }
        /// `nRequiredBGSamples` was zero or exceeded `nBGSamples`.
        InvalidSampleCounts(required: usize, total: usize) {
            display("required background sample count {} must be in (0, {}]", required, total)
        }
        /// `minColorDistThreshold` was configured below its own stabilisation offset.
        ThresholdOffsetViolation(min_color_dist_threshold: u32, stab_offset: u32) {
            display("minColorDistThreshold ({}) must be >= stabColorDistOffset ({})", min_color_dist_threshold, stab_offset)
        }
        /// `refresh`/CLI was given a fraction outside `(0, 1]`.
        InvalidFraction(fraction: f32) {
            display("refresh fraction {} is not in (0, 1]", fraction)
        }
        /// `process`/`warp` called before `initialize`.
        NotInitialized {
            display("engine has not been initialized")
        }
        /// CLI-only: underlying file I/O failure.
        Io(err: io::Error) {
            display("I/O error: {}", err)
            from()
        }
        /// CLI-only: PNG decode/encode failure.
        #[cfg(feature = "png")]
        Png(err: lodepng::Error) {
            display("PNG error: {}", err)
            from()
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
