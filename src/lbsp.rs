//! Local Binary Similarity Pattern descriptor (§4.A).
//!
//! Every ROI pixel compares 16 points on a 5×5 ring against a per-channel
//! reference value, using a per-intensity threshold drawn from an adaptive
//! LUT. The LUT starts from `desc_dist_threshold_offset + i * rel_lbsp_threshold`
//! (halved-by-3 for the grayscale path) and drifts toward looser/tighter
//! bounds depending on the global non-zero-bit ratio (see `Lut::drift`).

use imgref::ImgRef;
use rgb::RGB8;

/// Ring radius; the ring lives on the perimeter of a `PATCH_SIZE x PATCH_SIZE`
/// block centred on the pixel.
pub const PATCH_SIZE: usize = 5;
pub const PATCH_BORDER: usize = PATCH_SIZE / 2;

/// The 16 ring offsets, the full perimeter of the 5×5 block (5×5 minus its
/// inner 3×3), visited in row-major order.
///
/// The original ring table (`LBSP.h`) was not present in the retrieved
/// source; this is the documented stand-in from SPEC_FULL.md's Design Notes:
/// any fixed, deterministic 16-point traversal of the 5×5 perimeter satisfies
/// §4.A, since what matters is that bit `k` always refers to the same
/// relative offset across frames of one engine instance.
pub const RING_OFFSETS: [(i32, i32); 16] = [
    (-2, -2), (-1, -2), (0, -2), (1, -2), (2, -2),
    (-2, -1), (2, -1),
    (-2, 0), (2, 0),
    (-2, 1), (2, 1),
    (-2, 2), (-1, 2), (0, 2), (1, 2), (2, 2),
];

fn sat8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Per-intensity threshold LUT, one per channel kind (grayscale divides by 3).
#[derive(Debug, Clone)]
pub struct Lut {
    table: [u8; 256],
    offset: u32,
    rel_threshold: f32,
    grayscale: bool,
}

impl Lut {
    pub fn new(offset: u32, rel_threshold: f32, grayscale: bool) -> Self {
        let mut table = [0u8; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = Self::base_value(offset, rel_threshold, grayscale, i as f32);
        }
        Self { table, offset, rel_threshold, grayscale }
    }

    fn base_value(offset: u32, rel_threshold: f32, grayscale: bool, i: f32) -> u8 {
        let raw = offset as f32 + i * rel_threshold;
        if grayscale { sat8(raw / 3.0) } else { sat8(raw) }
    }

    #[inline]
    pub fn threshold(&self, intensity: u8) -> u8 {
        self.table[intensity as usize]
    }

    /// §4.A end-of-frame drift: tighten toward `offset + ceil(i*rel/4)` when the
    /// global non-zero-bit ratio has been low for two consecutive frames, or
    /// loosen toward `offset + 255*rel` when it has been high.
    pub fn drift(&mut self, loosen: bool, tighten: bool) {
        let divisor = if self.grayscale { 3.0 } else { 1.0 };
        for i in 0..256 {
            let t = i as f32;
            if tighten {
                let floor = sat8((self.offset as f32 + (t * self.rel_threshold / 4.0).ceil()) / divisor);
                if self.table[i] > floor {
                    self.table[i] -= 1;
                }
            } else if loosen {
                let ceiling = sat8((self.offset as f32 + 255.0 * self.rel_threshold) / divisor);
                if self.table[i] < ceiling {
                    self.table[i] += 1;
                }
            }
        }
    }
}

#[inline]
fn sample(plane: ImgRef<'_, u8>, x: i32, y: i32) -> u8 {
    let w = plane.width() as i32;
    let h = plane.height() as i32;
    let cx = x.clamp(0, w - 1) as usize;
    let cy = y.clamp(0, h - 1) as usize;
    plane.buf()[cy * plane.stride() + cx]
}

#[inline]
fn sample_channel(plane: ImgRef<'_, RGB8>, x: i32, y: i32, channel: usize) -> u8 {
    let w = plane.width() as i32;
    let h = plane.height() as i32;
    let cx = x.clamp(0, w - 1) as usize;
    let cy = y.clamp(0, h - 1) as usize;
    let px = plane.buf()[cy * plane.stride() + cx];
    match channel {
        0 => px.r,
        1 => px.g,
        _ => px.b,
    }
}

/// Computes the 16-bit grayscale descriptor at `(x, y)` against reference
/// intensity `reference` with threshold `threshold`.
pub fn compute_gray_descriptor(plane: ImgRef<'_, u8>, x: usize, y: usize, reference: u8, threshold: u8) -> u16 {
    let mut desc = 0u16;
    for (bit, &(dx, dy)) in RING_OFFSETS.iter().enumerate() {
        let neighbor = sample(plane, x as i32 + dx, y as i32 + dy);
        if neighbor.abs_diff(reference) > threshold {
            desc |= 1 << bit;
        }
    }
    desc
}

/// Computes the 16-bit descriptor for a single RGB channel at `(x, y)`.
pub fn compute_rgb_channel_descriptor(plane: ImgRef<'_, RGB8>, x: usize, y: usize, channel: usize, reference: u8, threshold: u8) -> u16 {
    let mut desc = 0u16;
    for (bit, &(dx, dy)) in RING_OFFSETS.iter().enumerate() {
        let neighbor = sample_channel(plane, x as i32 + dx, y as i32 + dy, channel);
        if neighbor.abs_diff(reference) > threshold {
            desc |= 1 << bit;
        }
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgref::Img;

    #[test]
    fn flat_image_has_zero_descriptor() {
        let img = Img::new(vec![100u8; 10 * 10], 10, 10);
        let d = compute_gray_descriptor(img.as_ref(), 5, 5, 100, 5);
        assert_eq!(d, 0);
    }

    #[test]
    fn bright_ring_sets_bits() {
        let mut data = vec![0u8; 10 * 10];
        // Set every ring-offset neighbour of (5,5) far above threshold.
        for &(dx, dy) in &RING_OFFSETS {
            let x = (5 + dx) as usize;
            let y = (5 + dy) as usize;
            data[y * 10 + x] = 255;
        }
        let img = Img::new(data, 10, 10);
        let d = compute_gray_descriptor(img.as_ref(), 5, 5, 0, 5);
        assert_eq!(d, 0xFFFF);
    }

    #[test]
    fn lut_drift_is_bounded() {
        let mut lut = Lut::new(3, 0.333, true);
        let before = lut.threshold(200);
        lut.drift(false, true);
        assert!(lut.threshold(200) <= before);
        let mut lut2 = Lut::new(3, 0.333, true);
        let before2 = lut2.threshold(50);
        lut2.drift(true, false);
        assert!(lut2.threshold(50) >= before2);
    }
}
