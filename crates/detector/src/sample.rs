//! Decoded media samples handed to the trigger channels.
//!
//! Frames are shared read-only between channels: the pixel buffer sits behind
//! an `Arc` and no channel can mutate it.

use std::sync::Arc;

use reelcast_common::config::RoiConfig;

/// 8-bit single-channel image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl GrayImage {
    /// Wrap a luma buffer. Returns `None` if the buffer size does not match.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width as usize * height as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// Crop a normalized region. The result is at least 1x1.
    pub fn crop_normalized(&self, roi: &RoiConfig) -> GrayImage {
        let scale = |v: f64, size: u32| (v.clamp(0.0, 1.0) * size as f64).round() as u32;
        let x0 = scale(roi.x0, self.width).min(self.width.saturating_sub(1));
        let y0 = scale(roi.y0, self.height).min(self.height.saturating_sub(1));
        let x1 = scale(roi.x1, self.width).clamp(x0 + 1, self.width.max(1));
        let y1 = scale(roi.y1, self.height).clamp(y0 + 1, self.height.max(1));

        let width = x1 - x0;
        let height = y1 - y0;
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in y0..y1 {
            let row = y as usize * self.width as usize;
            pixels.extend_from_slice(&self.pixels[row + x0 as usize..row + x1 as usize]);
        }
        GrayImage {
            width,
            height,
            pixels,
        }
    }

    /// Map every pixel to 0 or 255 around `threshold` (strictly greater is white).
    pub fn binarize(&mut self, threshold: u8) {
        for p in &mut self.pixels {
            *p = if *p > threshold { 255 } else { 0 };
        }
    }

    /// Box-filter downsample by `factor` in both axes.
    pub fn downsample(&self, factor: u32) -> GrayImage {
        let factor = factor.max(1);
        if factor == 1 {
            return self.clone();
        }
        let width = (self.width / factor).max(1);
        let height = (self.height / factor).max(1);
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for by in 0..height {
            for bx in 0..width {
                let mut sum = 0u32;
                let mut count = 0u32;
                for y in by * factor..((by + 1) * factor).min(self.height) {
                    for x in bx * factor..((bx + 1) * factor).min(self.width) {
                        sum += self.get(x, y) as u32;
                        count += 1;
                    }
                }
                pixels.push((sum / count.max(1)) as u8);
            }
        }
        GrayImage {
            width,
            height,
            pixels,
        }
    }

    /// Mean absolute per-pixel difference, or `None` if dimensions differ.
    pub fn mean_abs_diff(&self, other: &GrayImage) -> Option<f64> {
        if self.width != other.width || self.height != other.height || self.pixels.is_empty() {
            return None;
        }
        let total: u64 = self
            .pixels
            .iter()
            .zip(&other.pixels)
            .map(|(a, b)| a.abs_diff(*b) as u64)
            .sum();
        Some(total as f64 / self.pixels.len() as f64)
    }

    /// Binary PGM (P5) encoding, the input format handed to OCR tools.
    pub fn to_pgm(&self) -> Vec<u8> {
        let mut out = format!("P5\n{} {}\n255\n", self.width, self.height).into_bytes();
        out.extend_from_slice(&self.pixels);
        out
    }
}

/// One decoded video frame.
#[derive(Debug, Clone)]
pub struct FrameSample {
    /// Presentation timestamp in stream seconds.
    pub pts: f64,

    /// Monotonic index within the current ingestion run.
    pub frame_index: u64,

    /// Shared read-only luma buffer.
    pub image: Arc<GrayImage>,
}

impl FrameSample {
    pub fn new(pts: f64, frame_index: u64, image: GrayImage) -> Self {
        Self {
            pts,
            frame_index,
            image: Arc::new(image),
        }
    }

    /// Scorebar crop for text recognition.
    pub fn scorebar(&self, roi: &RoiConfig) -> GrayImage {
        self.image.crop_normalized(roi)
    }
}

/// One short audio buffer reduced to its energy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioSample {
    /// Timestamp of the first sample, in stream seconds.
    pub pts: f64,

    /// Buffer length in seconds.
    pub duration_secs: f64,

    /// Normalized RMS energy in `[0.0, 1.0]`.
    pub energy: f64,
}

impl AudioSample {
    /// Reduce signed 16-bit PCM to a normalized RMS energy.
    pub fn from_pcm(pts: f64, pcm: &[i16], sample_rate: u32, normalization: f64) -> Self {
        let duration_secs = pcm.len() as f64 / sample_rate.max(1) as f64;
        let energy = if pcm.is_empty() || normalization <= 0.0 {
            0.0
        } else {
            let sum_sq: f64 = pcm.iter().map(|s| (*s as f64) * (*s as f64)).sum();
            let rms = (sum_sq / pcm.len() as f64).sqrt();
            (rms / normalization).min(1.0)
        };
        Self {
            pts,
            duration_secs,
            energy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: u32, height: u32) -> GrayImage {
        let pixels = (0..width * height).map(|i| (i % 256) as u8).collect();
        GrayImage::new(width, height, pixels).unwrap()
    }

    #[test]
    fn test_new_rejects_mismatched_buffer() {
        assert!(GrayImage::new(4, 4, vec![0; 15]).is_none());
    }

    #[test]
    fn test_crop_scorebar_region() {
        let image = ramp(100, 40);
        let roi = RoiConfig {
            x0: 0.15,
            y0: 0.75,
            x1: 0.85,
            y1: 1.0,
        };
        let crop = image.crop_normalized(&roi);
        assert_eq!(crop.width, 70);
        assert_eq!(crop.height, 10);
        assert_eq!(crop.get(0, 0), image.get(15, 30));
    }

    #[test]
    fn test_binarize_threshold_is_exclusive() {
        let mut image = GrayImage::new(3, 1, vec![129, 130, 131]).unwrap();
        image.binarize(130);
        assert_eq!(image.pixels, vec![0, 0, 255]);
    }

    #[test]
    fn test_downsample_averages_blocks() {
        let image = GrayImage::new(2, 2, vec![0, 100, 100, 200]).unwrap();
        let small = image.downsample(2);
        assert_eq!(small.pixels, vec![100]);
    }

    #[test]
    fn test_mean_abs_diff() {
        let a = GrayImage::filled(4, 4, 10);
        let b = GrayImage::filled(4, 4, 40);
        assert_eq!(a.mean_abs_diff(&b), Some(30.0));
        assert_eq!(a.mean_abs_diff(&GrayImage::filled(2, 2, 0)), None);
    }

    #[test]
    fn test_pcm_energy_normalization() {
        let loud = vec![20_000i16; 4410];
        let sample = AudioSample::from_pcm(1.0, &loud, 44_100, 20_000.0);
        assert!((sample.energy - 1.0).abs() < 1e-9);
        assert!((sample.duration_secs - 0.1).abs() < 1e-9);

        let clipped = AudioSample::from_pcm(1.0, &[i16::MAX; 10], 44_100, 20_000.0);
        assert_eq!(clipped.energy, 1.0);

        let silent = AudioSample::from_pcm(1.0, &[], 44_100, 20_000.0);
        assert_eq!(silent.energy, 0.0);
    }

    #[test]
    fn test_pgm_header() {
        let pgm = GrayImage::filled(3, 2, 7).to_pgm();
        assert!(pgm.starts_with(b"P5\n3 2\n255\n"));
        assert_eq!(pgm.len(), 11 + 6);
    }
}
