use std::fs;
use std::io::Stdout;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::{value_parser, Arg, Command};
use crossbeam_channel::Receiver;

use bgseg::progress::{NoProgress, ProgressReporter};
use bgseg::{ConfigBuilder, Engine};

pub type BinResult<T, E = Box<dyn std::error::Error + Send + Sync>> = Result<T, E>;

fn main() {
    if let Err(e) = bin_main() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn bin_main() -> BinResult<()> {
    let matches = Command::new("bgseg")
        .version(clap::crate_version!())
        .about("Per-pixel adaptive background/foreground video segmentation")
        .arg_required_else_help(true)
        .arg(Arg::new("frames-dir")
            .help("Directory of sequentially-named PNG frames")
            .value_parser(value_parser!(PathBuf))
            .required(true))
        .arg(Arg::new("out-dir")
            .long("out-dir")
            .short('o')
            .help("Directory to write mask PNGs into, one per input frame")
            .value_name("dir")
            .value_parser(value_parser!(PathBuf))
            .required(true))
        .arg(Arg::new("roi")
            .long("roi")
            .help("PNG mask (non-black = relevant) applied to every frame")
            .value_name("roi.png")
            .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new("quiet")
            .long("quiet")
            .short('q')
            .num_args(0)
            .action(clap::ArgAction::SetTrue)
            .help("Do not display a progress bar"))
        .arg(Arg::new("seed")
            .long("seed")
            .value_name("num")
            .value_parser(value_parser!(u64))
            .help("RNG seed; same seed + same frames reproduces the same mask sequence"))
        .arg(Arg::new("n-bg-samples")
            .long("n-bg-samples")
            .value_name("N")
            .value_parser(value_parser!(usize))
            .help("Background samples kept per pixel (default 50)"))
        .arg(Arg::new("n-required-bg-samples")
            .long("n-required-bg-samples")
            .value_name("M")
            .value_parser(value_parser!(usize))
            .help("Matches required for a background verdict (default 2)"))
        .arg(Arg::new("rel-lbsp-threshold")
            .long("rel-lbsp-threshold")
            .value_name("ratio")
            .value_parser(value_parser!(f32))
            .help("LBSP LUT slope (default 0.333)"))
        .arg(Arg::new("desc-dist-threshold-offset")
            .long("desc-dist-threshold-offset")
            .value_name("bits")
            .value_parser(value_parser!(u32))
            .help("Base Hamming threshold offset (default 3)"))
        .arg(Arg::new("min-color-dist-threshold")
            .long("min-color-dist-threshold")
            .value_name("L1")
            .value_parser(value_parser!(u32))
            .help("Base color distance threshold (default 30)"))
        .get_matches_from(wild::args_os());

    let frames_dir = matches.get_one::<PathBuf>("frames-dir").ok_or("?")?;
    let out_dir = matches.get_one::<PathBuf>("out-dir").ok_or("?")?;
    let roi_path = matches.get_one::<PathBuf>("roi");
    let quiet = matches.get_flag("quiet");

    let frames = list_png_frames(frames_dir)?;
    if frames.is_empty() {
        return Err(format!("no PNG frames found in {}", frames_dir.display()).into());
    }
    fs::create_dir_all(out_dir)?;

    let mut config = ConfigBuilder::default();
    if let Some(&seed) = matches.get_one::<u64>("seed") {
        config = config.seed(seed);
    }
    if let Some(&n) = matches.get_one::<usize>("n-bg-samples") {
        config = config.n_bg_samples(n);
    }
    if let Some(&m) = matches.get_one::<usize>("n-required-bg-samples") {
        config = config.n_required_bg_samples(m);
    }
    if let Some(&t) = matches.get_one::<f32>("rel-lbsp-threshold") {
        config = config.rel_lbsp_threshold(t);
    }
    if let Some(&o) = matches.get_one::<u32>("desc-dist-threshold-offset") {
        config = config.desc_dist_threshold_offset(o);
    }
    if let Some(&t) = matches.get_one::<u32>("min-color-dist-threshold") {
        config = config.min_color_dist_threshold(t);
    }

    let (width, height, first_pixels) = decode_rgb(&frames[0])?;
    let roi = roi_path.map(|p| decode_roi_mask(p, width, height)).transpose()?;

    let mut engine = Engine::initialize(config, &first_pixels, width, height, 3, roi.as_deref())?;

    let mut pb;
    let mut nopb = NoProgress {};
    let progress: &mut dyn ProgressReporter = if quiet {
        &mut nopb
    } else {
        pb = ProgressBar::new(frames.len() as u64);
        &mut pb
    };

    let out_paths: Vec<PathBuf> = frames.iter().map(|p| out_dir.join(mask_name(p))).collect();
    write_mask(&out_paths[0], width, height, &engine_mask(&mut engine, &first_pixels)?)?;
    progress.increase();

    let rest = frames[1..].to_vec();
    let decode_thread_rx = spawn_decode_thread(rest);
    for (out_path, decoded) in out_paths[1..].iter().zip(decode_thread_rx.iter()) {
        let (w, h, pixels) = decoded?;
        if w != width || h != height {
            return Err(format!("{}: frame size {w}x{h} does not match the first frame's {width}x{height}", out_path.display()).into());
        }
        let mask = engine_mask(&mut engine, &pixels)?;
        write_mask(out_path, width, height, &mask)?;
        if !progress.increase() {
            break;
        }
    }
    let out_dir_display = dunce::canonicalize(out_dir).unwrap_or_else(|_| out_dir.clone());
    progress.done(&format!("bgseg wrote {} masks to {}", out_paths.len(), out_dir_display.display()));

    Ok(())
}

fn engine_mask(engine: &mut Engine, pixels: &[u8]) -> BinResult<Vec<u8>> {
    Ok(engine.process(pixels)?)
}

fn mask_name(frame_path: &Path) -> String {
    let stem = frame_path.file_stem().and_then(|s| s.to_str()).unwrap_or("frame");
    format!("{stem}-mask.png")
}

fn list_png_frames(dir: &Path) -> BinResult<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()).map_or(false, |e| e.eq_ignore_ascii_case("png")))
        .collect();
    frames.sort_by(|a, b| natord::compare(&a.to_string_lossy(), &b.to_string_lossy()));
    Ok(frames)
}

/// Decodes a PNG as 8-bit RGB, dropping alpha.
fn decode_rgb(path: &Path) -> BinResult<(usize, usize, Vec<u8>)> {
    let image = lodepng::decode32_file(path).map_err(|e| format!("can't load {}: {e}", path.display()))?;
    let pixels: Vec<u8> = image.buffer.iter().flat_map(|p| [p.r, p.g, p.b]).collect();
    Ok((image.width, image.height, pixels))
}

/// Decodes a PNG as a relevance mask: any pixel above mid-grey is in the ROI.
fn decode_roi_mask(path: &Path, width: usize, height: usize) -> BinResult<Vec<bool>> {
    let image = lodepng::decode32_file(path).map_err(|e| format!("can't load {}: {e}", path.display()))?;
    if image.width != width || image.height != height {
        return Err(format!("{}: ROI size {}x{} does not match frame size {width}x{height}", path.display(), image.width, image.height).into());
    }
    Ok(image.buffer.iter().map(|p| u32::from(p.r) + u32::from(p.g) + u32::from(p.b) > 3 * 127).collect())
}

fn write_mask(path: &Path, width: usize, height: usize, mask: &[u8]) -> BinResult<()> {
    let pixels: Vec<rgb::RGB8> = mask.iter().map(|&v| rgb::RGB8::new(v, v, v)).collect();
    lodepng::encode24_file(path, &pixels, width, height).map_err(|e| format!("can't write {}: {e}", path.display()))?;
    Ok(())
}

/// Decodes the remaining frames on a background thread, so the main thread
/// is always processing one frame while the next is being read off disk.
fn spawn_decode_thread(frames: Vec<PathBuf>) -> Receiver<BinResult<(usize, usize, Vec<u8>)>> {
    let (tx, rx) = crossbeam_channel::bounded(4);
    thread::Builder::new()
        .name("decode".into())
        .spawn(move || {
            for path in frames {
                if tx.send(decode_rgb(&path)).is_err() {
                    break;
                }
            }
        })
        .expect("failed to spawn decode thread");
    rx
}

struct ProgressBar {
    pb: pbr::ProgressBar<Stdout>,
}

impl ProgressBar {
    fn new(total: u64) -> Self {
        let mut pb = pbr::ProgressBar::new(total);
        pb.show_speed = false;
        pb.format(" #_. ");
        pb.message("Frame ");
        pb.set_max_refresh_rate(Some(Duration::from_millis(250)));
        Self { pb }
    }
}

impl ProgressReporter for ProgressBar {
    fn increase(&mut self) -> bool {
        self.pb.inc();
        true
    }

    fn done(&mut self, msg: &str) {
        self.pb.finish_print(msg);
    }
}
