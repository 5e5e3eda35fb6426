//! Morphological completer (§4.I): turns the classifier's raw foreground
//! mask into the smoothed `lastFG` buffer fed back into the next frame, plus
//! the dilated companion mask used to suppress spurious blinks.
//!
//! Grounded on `BackgroundSubtractorSuBSENSE.cpp::complete()` (lines
//! 823-839): close, flood-fill the closed mask to find enclosed holes, erode
//! the closed mask three times, union the three, median-blur, then dilate
//! three times for blink suppression. Close/erode/dilate are hand-rolled
//! over raw `u8` buffers using the teacher's `loop9` dependency for 3×3
//! neighbourhood iteration; no `image`/`imageproc` dependency is introduced.

use imgref::{ImgRef, ImgVec};
use loop9::{loop9_img, Triple};

fn dilate_once(mask: ImgRef<'_, u8>) -> ImgVec<u8> {
    let (w, h) = (mask.width(), mask.height());
    let mut out = vec![0u8; w * h];
    loop9_img(mask, |x, y, top: Triple<u8>, mid: Triple<u8>, bot: Triple<u8>| {
        let v = top.left.max(top.middle).max(top.right).max(mid.left).max(mid.middle).max(mid.right).max(bot.left).max(
            bot.middle,
        ).max(bot.right);
        out[y * w + x] = v;
    });
    ImgVec::new(out, w, h)
}

fn erode_once(mask: ImgRef<'_, u8>) -> ImgVec<u8> {
    let (w, h) = (mask.width(), mask.height());
    let mut out = vec![0u8; w * h];
    loop9_img(mask, |x, y, top: Triple<u8>, mid: Triple<u8>, bot: Triple<u8>| {
        let v = top.left.min(top.middle).min(top.right).min(mid.left).min(mid.middle).min(mid.right).min(bot.left).min(
            bot.middle,
        ).min(bot.right);
        out[y * w + x] = v;
    });
    ImgVec::new(out, w, h)
}

fn dilate_n(mask: ImgVec<u8>, iterations: usize) -> ImgVec<u8> {
    let mut current = mask;
    for _ in 0..iterations {
        current = dilate_once(current.as_ref());
    }
    current
}

fn erode_n(mask: ImgVec<u8>, iterations: usize) -> ImgVec<u8> {
    let mut current = mask;
    for _ in 0..iterations {
        current = erode_once(current.as_ref());
    }
    current
}

/// Morphological close: dilate then erode, single 3×3 iteration each.
fn close(mask: ImgRef<'_, u8>) -> ImgVec<u8> {
    erode_once(dilate_once(mask).as_ref())
}

/// Marks background pixels (`closed[p] == 0`) not 4-connected to the
/// top-left corner, i.e. holes fully enclosed by foreground. Equivalent to
/// the original's `floodFill(closed, (0,0), 255); invert`: the flood fill
/// marks every border-reachable pixel (background or already-foreground)
/// 255, so after inverting, only the unreached background pixels survive.
fn flooded_holes(closed: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut reachable = vec![false; width * height];
    let mut stack = Vec::new();
    if closed[0] == 0 {
        reachable[0] = true;
        stack.push((0usize, 0usize));
    }
    while let Some((x, y)) = stack.pop() {
        let mut visit = |nx: i32, ny: i32, stack: &mut Vec<(usize, usize)>| {
            if nx < 0 || ny < 0 || nx as usize >= width || ny as usize >= height {
                return;
            }
            let (nx, ny) = (nx as usize, ny as usize);
            let p = ny * width + nx;
            if !reachable[p] && closed[p] == 0 {
                reachable[p] = true;
                stack.push((nx, ny));
            }
        };
        visit(x as i32 - 1, y as i32, &mut stack);
        visit(x as i32 + 1, y as i32, &mut stack);
        visit(x as i32, y as i32 - 1, &mut stack);
        visit(x as i32, y as i32 + 1, &mut stack);
    }
    (0..width * height).map(|p| if closed[p] == 0 && !reachable[p] { 255 } else { 0 }).collect()
}

fn median_blur(mask: ImgRef<'_, u8>, kernel: usize) -> ImgVec<u8> {
    debug_assert!(kernel % 2 == 1);
    let (w, h) = (mask.width(), mask.height());
    let r = (kernel / 2) as i32;
    let mut out = vec![0u8; w * h];
    let mut window = Vec::with_capacity(kernel * kernel);
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            window.clear();
            for dy in -r..=r {
                let sy = (y + dy).clamp(0, h as i32 - 1) as usize;
                for dx in -r..=r {
                    let sx = (x + dx).clamp(0, w as i32 - 1) as usize;
                    window.push(mask.buf()[sy * mask.stride() + sx]);
                }
            }
            window.sort_unstable();
            out[y as usize * w + x as usize] = window[window.len() / 2];
        }
    }
    ImgVec::new(out, w, h)
}

/// Output of a completion pass: the smoothed foreground mask fed back as
/// next frame's `lastFG`, and the dilated companion used to suppress blinks.
pub struct Completion {
    pub last_fg: ImgVec<u8>,
    pub dilated_fg: ImgVec<u8>,
}

/// §4.I steps 1-6. `raw` is the classifier's raw per-frame foreground mask.
pub fn complete(raw: ImgRef<'_, u8>, median_kernel: usize) -> Completion {
    let (w, h) = (raw.width(), raw.height());
    let closed = close(raw);
    let holes = flooded_holes(closed.buf(), w, h);
    let pre_flood = erode_n(closed, 3);

    let mut unioned = vec![0u8; w * h];
    for p in 0..w * h {
        unioned[p] = raw.buf()[p].max(holes[p]).max(pre_flood.buf()[p]);
    }
    let unioned = ImgVec::new(unioned, w, h);

    let last_fg = median_blur(unioned.as_ref(), median_kernel);
    let dilated_fg = dilate_n(last_fg.clone(), 3);
    Completion { last_fg, dilated_fg }
}

/// §4.I blink masking: `blinks := blinks ∧ ¬dilatedFG`. The original ANDs
/// against both the previous and the freshly-computed inverted-dilated mask
/// in sequence (reusing stale member state); this performs the single,
/// idempotent AND that produces the same result.
pub fn mask_blinks(blinks: &mut [u8], dilated_fg: &[u8]) {
    for (b, &d) in blinks.iter_mut().zip(dilated_fg) {
        if d != 0 {
            *b = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgref::Img;

    #[test]
    fn dilate_grows_a_single_pixel() {
        let mut data = vec![0u8; 9 * 9];
        data[4 * 9 + 4] = 255;
        let img = Img::new(data, 9, 9);
        let out = dilate_once(img.as_ref());
        assert_eq!(out.buf()[3 * 9 + 4], 255);
        assert_eq!(out.buf()[0], 0);
    }

    #[test]
    fn erode_shrinks_a_filled_block() {
        let mut data = vec![0u8; 9 * 9];
        for y in 3..6 {
            for x in 3..6 {
                data[y * 9 + x] = 255;
            }
        }
        let img = Img::new(data, 9, 9);
        let out = erode_once(img.as_ref());
        assert_eq!(out.buf()[4 * 9 + 4], 255);
        assert_eq!(out.buf()[3 * 9 + 3], 0, "corner of a 3x3 block has no full 3x3 neighbourhood of foreground");
    }

    #[test]
    fn flood_fill_finds_an_enclosed_hole() {
        let w = 10;
        let h = 10;
        let mut data = vec![255u8; w * h];
        for y in 0..h {
            for x in 0..w {
                if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                    data[y * w + x] = 0;
                }
            }
        }
        data[5 * w + 5] = 0; // an enclosed hole in the middle
        let holes = flooded_holes(&data, w, h);
        assert_eq!(holes[5 * w + 5], 255);
        assert_eq!(holes[0], 0, "the border itself is reachable, not a hole");
    }

    #[test]
    fn median_blur_removes_salt_and_pepper() {
        let mut data = vec![0u8; 11 * 11];
        data[5 * 11 + 5] = 255;
        let img = Img::new(data, 11, 11);
        let out = median_blur(img.as_ref(), 3);
        assert_eq!(out.buf()[5 * 11 + 5], 0);
    }

    #[test]
    fn blink_masking_clears_pixels_under_the_dilated_mask() {
        let mut blinks = vec![255u8, 255, 0, 255];
        let dilated = vec![255u8, 0, 0, 255];
        mask_blinks(&mut blinks, &dilated);
        assert_eq!(blinks, vec![0, 255, 0, 0]);
    }

    #[test]
    fn complete_produces_same_size_buffers() {
        let w = 32;
        let h = 32;
        let mut data = vec![0u8; w * h];
        for y in 10..20 {
            for x in 10..20 {
                data[y * w + x] = 255;
            }
        }
        let img = Img::new(data, w, h);
        let out = complete(img.as_ref(), 3);
        assert_eq!(out.last_fg.buf().len(), w * h);
        assert_eq!(out.dilated_fg.buf().len(), w * h);
    }
}
