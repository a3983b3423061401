use std::{fs::File, io::BufWriter, path::Path};

use anyhow::Context as _;
use image::{ImageFormat, RgbaImage, codecs::jpeg::JpegEncoder};

use crate::error::{SeqError, SeqResult};

/// One decoded frame as straight (non-premultiplied) RGBA8.
///
/// `has_alpha` remembers whether the source carried an alpha channel; frames without one
/// are written back without one.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pixels: RgbaImage,
    has_alpha: bool,
}

impl Frame {
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self {
            pixels,
            has_alpha: true,
        }
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::from_rgba(RgbaImage::from_pixel(width, height, image::Rgba(rgba)))
    }

    pub fn load(path: &Path) -> SeqResult<Self> {
        let img = image::open(path).with_context(|| format!("decode image '{}'", path.display()))?;
        Ok(Self {
            has_alpha: img.color().has_alpha(),
            pixels: img.to_rgba8(),
        })
    }

    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    /// Write the frame, choosing the format from the extension of `path`.
    ///
    /// JPEG output drops alpha and is written with `jpeg_quality` (1..=100). Other formats
    /// keep alpha only if the frame has it.
    pub fn save(&self, path: &Path, jpeg_quality: u8) -> SeqResult<()> {
        let format = ImageFormat::from_path(path).map_err(|_| {
            SeqError::validation(format!(
                "unsupported image extension for '{}'",
                path.display()
            ))
        })?;

        if format == ImageFormat::Jpeg {
            let rgb = self.to_rgb();
            let f = File::create(path)
                .with_context(|| format!("create image file '{}'", path.display()))?;
            let mut encoder =
                JpegEncoder::new_with_quality(BufWriter::new(f), jpeg_quality.clamp(1, 100));
            encoder
                .encode_image(&rgb)
                .with_context(|| format!("write jpeg '{}'", path.display()))?;
            return Ok(());
        }

        let written = if self.has_alpha {
            self.pixels.save_with_format(path, format)
        } else {
            self.to_rgb().save_with_format(path, format)
        };
        written.with_context(|| format!("write image '{}'", path.display()))?;
        Ok(())
    }

    fn to_rgb(&self) -> image::RgbImage {
        image::DynamicImage::ImageRgba8(self.pixels.clone()).to_rgb8()
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_rgba(self) -> RgbaImage {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.pixels.get_pixel_checked(x, y).map(|p| p.0)
    }

    /// Weighted blend of two frames.
    ///
    /// The mix factor towards `other` is `1 - weight_self / (weight_self + weight_other)`;
    /// each channel becomes `a + alpha * (b - a)`, truncated and clamped to `0..=255`.
    pub fn blend(&self, other: &Frame, weight_self: f32, weight_other: f32) -> SeqResult<Frame> {
        let total = weight_self + weight_other;
        if !total.is_finite() || total == 0.0 {
            return Err(SeqError::validation("blend weights must not sum to zero"));
        }
        self.mix(other, 1.0 - weight_self / total)
    }

    pub fn blend_even(&self, other: &Frame) -> SeqResult<Frame> {
        self.blend(other, 0.5, 0.5)
    }

    fn mix(&self, other: &Frame, alpha: f32) -> SeqResult<Frame> {
        if self.pixels.dimensions() != other.pixels.dimensions() {
            let (w, h) = self.pixels.dimensions();
            let (ow, oh) = other.pixels.dimensions();
            return Err(SeqError::validation(format!(
                "frame size mismatch: {w}x{h} vs {ow}x{oh}"
            )));
        }

        let (w, h) = self.pixels.dimensions();
        let mixed: Vec<u8> = self
            .pixels
            .as_raw()
            .iter()
            .zip(other.pixels.as_raw().iter())
            .map(|(&a, &b)| lerp_channel(a, b, alpha))
            .collect();
        let pixels = RgbaImage::from_raw(w, h, mixed)
            .ok_or_else(|| SeqError::processing("blend produced a buffer of the wrong size"))?;
        Ok(Frame {
            pixels,
            has_alpha: self.has_alpha || other.has_alpha,
        })
    }

    /// Separable gaussian blur; `radius` is the standard deviation in pixels.
    pub fn blur(&self, radius: f32) -> SeqResult<Frame> {
        if !radius.is_finite() || radius < 0.0 {
            return Err(SeqError::validation("blur radius must be >= 0"));
        }
        if radius == 0.0 {
            return Ok(self.clone());
        }

        let kernel = gaussian_kernel_q16((radius * 3.0).ceil() as u32, radius)?;
        let (w, h) = self.pixels.dimensions();
        let mut tmp = vec![0u8; self.pixels.as_raw().len()];
        let mut out = vec![0u8; tmp.len()];
        blur_pass(self.pixels.as_raw(), &mut tmp, w, h, &kernel, Axis::Horizontal);
        blur_pass(&tmp, &mut out, w, h, &kernel, Axis::Vertical);

        let pixels = RgbaImage::from_raw(w, h, out)
            .ok_or_else(|| SeqError::processing("blur produced a buffer of the wrong size"))?;
        Ok(Frame {
            pixels,
            has_alpha: self.has_alpha,
        })
    }

    /// Fill the rectangle at `(x, y)` with size `w`x`h`; parts outside the frame are ignored.
    pub fn color_area(&mut self, x: u32, y: u32, w: u32, h: u32, rgba: [u8; 4]) {
        let x_end = x.saturating_add(w).min(self.width());
        let y_end = y.saturating_add(h).min(self.height());
        for py in y..y_end {
            for px in x..x_end {
                self.pixels.put_pixel(px, py, image::Rgba(rgba));
            }
        }
    }
}

fn lerp_channel(a: u8, b: u8, alpha: f32) -> u8 {
    let v = f32::from(a) + alpha * (f32::from(b) - f32::from(a));
    v.clamp(0.0, 255.0) as u8
}

fn gaussian_kernel_q16(radius: u32, sigma: f32) -> SeqResult<Vec<u32>> {
    if radius == 0 {
        return Ok(vec![1 << 16]);
    }
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(SeqError::validation("blur sigma must be > 0"));
    }

    let r = radius as i32;
    let sigma = f64::from(sigma);
    let denom = 2.0 * sigma * sigma;
    let weights_f: Vec<f64> = (-r..=r)
        .map(|i| {
            let x = f64::from(i);
            (-x * x / denom).exp()
        })
        .collect();
    let sum: f64 = weights_f.iter().sum();
    if sum <= 0.0 {
        return Err(SeqError::processing("gaussian kernel sum is zero"));
    }

    let mut weights = Vec::with_capacity(weights_f.len());
    let mut acc: i64 = 0;
    for wf in &weights_f {
        let q = ((wf / sum) * 65536.0).round().clamp(0.0, 65536.0) as i64;
        weights.push(q as u32);
        acc += q;
    }
    // Push the rounding residue into the centre tap so the kernel sums to exactly 1.0.
    let delta = 65536 - acc;
    if delta != 0 {
        let mid = weights.len() / 2;
        weights[mid] = (i64::from(weights[mid]) + delta).clamp(0, 65536) as u32;
    }
    Ok(weights)
}

#[derive(Clone, Copy)]
enum Axis {
    Horizontal,
    Vertical,
}

fn blur_pass(src: &[u8], dst: &mut [u8], width: u32, height: u32, k: &[u32], axis: Axis) {
    let radius = (k.len() / 2) as i32;
    let w = width as i32;
    let h = height as i32;
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0u64; 4];
            for (ki, &kw) in k.iter().enumerate() {
                let d = ki as i32 - radius;
                let (sx, sy) = match axis {
                    Axis::Horizontal => ((x + d).clamp(0, w - 1), y),
                    Axis::Vertical => (x, (y + d).clamp(0, h - 1)),
                };
                let idx = ((sy * w + sx) as usize) * 4;
                for c in 0..4 {
                    acc[c] += u64::from(kw) * u64::from(src[idx + c]);
                }
            }
            let out_idx = ((y * w + x) as usize) * 4;
            for c in 0..4 {
                dst[out_idx + c] = (((acc[c] + 32768) >> 16).min(255)) as u8;
            }
        }
    }
}
