//! Sample model (§4.C): `N` parallel background sample buffers, each holding
//! a color plus its LBSP descriptor per ROI pixel.
//!
//! Generic over the pixel representation (`u8` for the 1-channel path,
//! `rgb::RGB8` for the 3-channel path) and its matching descriptor
//! representation (`u16` / `[u16; 3]`) — the storage and spread/refresh
//! logic below is identical in both cases; only the per-pixel comparison in
//! the hot loop (`classifier.rs`) is monomorphised separately per
//! SPEC_FULL.md's Design Notes on polymorphism.

use imgref::{ImgRef, ImgVec};

use crate::geometry::Roi;
use crate::lbsp::PATCH_BORDER;
use crate::rng::EngineRng;
use crate::sampler::{random_neighbor, RADIUS_5X5};

#[derive(Debug, Clone)]
pub struct SampleModel<P, D> {
    n: usize,
    width: usize,
    height: usize,
    colors: Vec<ImgVec<P>>,
    descriptors: Vec<ImgVec<D>>,
}

impl<P: Copy + Default, D: Copy + Default> SampleModel<P, D> {
    pub fn new(n: usize, width: usize, height: usize) -> Self {
        Self {
            n,
            width,
            height,
            colors: (0..n).map(|_| ImgVec::new(vec![P::default(); width * height], width, height)).collect(),
            descriptors: (0..n).map(|_| ImgVec::new(vec![D::default(); width * height], width, height)).collect(),
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn put(&mut self, slot: usize, px: usize, color: P, desc: D) {
        self.colors[slot].buf_mut()[px] = color;
        self.descriptors[slot].buf_mut()[px] = desc;
    }

    #[inline]
    pub fn read(&self, slot: usize, px: usize) -> (P, D) {
        (self.colors[slot].buf()[px], self.descriptors[slot].buf()[px])
    }

    pub fn color_plane(&self, slot: usize) -> ImgRef<'_, P> {
        self.colors[slot].as_ref()
    }

    pub fn desc_plane(&self, slot: usize) -> ImgRef<'_, D> {
        self.descriptors[slot].as_ref()
    }

    /// §4.C `refresh`: for each ROI pixel, if `force_fg` or the pixel isn't
    /// currently flagged foreground, overwrite `floor(fraction * N)` slots
    /// (starting from a random offset) with samples drawn from a random
    /// 5×5 neighbour, themselves gated on that neighbour not being foreground
    /// (unless forced). Samples are drawn from the last-seen color/descriptor
    /// caches, exactly as the hot loop leaves them after the previous frame.
    #[allow(clippy::too_many_arguments)]
    pub fn refresh(
        &mut self,
        roi: &Roi,
        fraction: f32,
        force_fg: bool,
        last_fg: ImgRef<'_, u8>,
        last_color: ImgRef<'_, P>,
        last_desc: ImgRef<'_, D>,
        rng: &mut EngineRng,
    ) {
        debug_assert!(fraction > 0.0 && fraction <= 1.0);
        let models_to_refresh = if fraction < 1.0 { ((fraction * self.n as f32) as usize).max(1) } else { self.n };
        let start = if fraction < 1.0 { rng.gen_below(self.n) } else { 0 };

        for &px in &roi.idx_of_model {
            let x = px % self.width;
            let y = px / self.width;
            if !force_fg && last_fg.buf()[px] != 0 {
                continue;
            }
            for i in 0..models_to_refresh {
                let slot = (start + i) % self.n;
                let (sx, sy) = random_neighbor(rng, x, y, RADIUS_5X5, PATCH_BORDER, self.width, self.height);
                let spx = sy * self.width + sx;
                if !force_fg && last_fg.buf()[spx] != 0 {
                    continue;
                }
                self.colors[slot].buf_mut()[px] = last_color.buf()[spx];
                self.descriptors[slot].buf_mut()[px] = last_desc.buf()[spx];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_read_round_trip() {
        let mut m = SampleModel::<u8, u16>::new(3, 4, 4);
        m.put(1, 5, 200, 0xABCD);
        assert_eq!(m.read(1, 5), (200, 0xABCD));
        assert_eq!(m.read(0, 5), (0, 0));
    }

    #[test]
    fn refresh_seeds_from_last_frame() {
        let roi = Roi::build(None, 10, 10).unwrap();
        let mut model = SampleModel::<u8, u16>::new(4, 10, 10);
        let last_fg = ImgVec::new(vec![0u8; 100], 10, 10);
        let last_color = ImgVec::new(vec![123u8; 100], 10, 10);
        let last_desc = ImgVec::new(vec![7u16; 100], 10, 10);
        let mut rng = EngineRng::new(0);
        model.refresh(&roi, 1.0, true, last_fg.as_ref(), last_color.as_ref(), last_desc.as_ref(), &mut rng);
        for &px in &roi.idx_of_model {
            for s in 0..model.n() {
                assert_eq!(model.read(s, px), (123, 7));
            }
        }
    }
}
