//! Grayscale frames and the float image pyramid used for motion estimation.

use crate::error::TrackError;

/// 8-bit single-channel image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayImage {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self, TrackError> {
        if width == 0 || height == 0 {
            return Err(TrackError::InvalidImage(format!(
                "image must be non-empty, got {}x{}",
                width, height
            )));
        }
        if data.len() != width * height {
            return Err(TrackError::InvalidImage(format!(
                "expected {} bytes for {}x{}, got {}",
                width * height,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build an image by evaluating `f(x, y)` at every pixel.
    pub fn from_fn<F>(width: usize, height: usize, mut f: F) -> Result<Self, TrackError>
    where
        F: FnMut(usize, usize) -> u8,
    {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self::new(width, height, data)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        (x < self.width && y < self.height).then(|| self.data[y * self.width + x])
    }

    pub(crate) fn to_float(&self) -> FloatImage {
        FloatImage {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|&v| v as f32).collect(),
        }
    }
}

/// f32 working copy of a frame.
#[derive(Debug, Clone)]
pub(crate) struct FloatImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl FloatImage {
    /// Bilinear sample with coordinates clamped to the border.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let w = self.width;
        let h = self.height;
        let x = x.clamp(0.0, (w - 1) as f32);
        let y = y.clamp(0.0, (h - 1) as f32);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);
        let wx = x - x0 as f32;
        let wy = y - y0 as f32;
        let p00 = self.data[y0 * w + x0];
        let p01 = self.data[y0 * w + x1];
        let p10 = self.data[y1 * w + x0];
        let p11 = self.data[y1 * w + x1];
        (1.0 - wy) * ((1.0 - wx) * p00 + wx * p01) + wy * ((1.0 - wx) * p10 + wx * p11)
    }

    pub fn resize_bilinear(&self, dst_w: usize, dst_h: usize) -> FloatImage {
        let (src_w, src_h) = (self.width, self.height);
        let mut out = vec![0.0f32; dst_w * dst_h];
        let scale_x = src_w as f32 / dst_w as f32;
        let scale_y = src_h as f32 / dst_h as f32;
        for dy in 0..dst_h {
            let sy = (dy as f32 + 0.5) * scale_y - 0.5;
            for dx in 0..dst_w {
                let sx = (dx as f32 + 0.5) * scale_x - 0.5;
                out[dy * dst_w + dx] = self.sample(sx, sy);
            }
        }
        FloatImage {
            width: dst_w,
            height: dst_h,
            data: out,
        }
    }

    /// Separable Gaussian blur with border replication.
    pub fn gaussian_blur(&self, ksize: usize) -> FloatImage {
        if ksize <= 1 {
            return self.clone();
        }
        let (w, h) = (self.width, self.height);
        let kernel = gaussian_kernel(ksize);
        let radius = (ksize / 2) as isize;
        let mut tmp = vec![0.0f32; w * h];
        let mut out = vec![0.0f32; w * h];

        for y in 0..h {
            for x in 0..w {
                let mut acc = 0.0f32;
                for (k, kv) in kernel.iter().enumerate() {
                    let xx = (x as isize + k as isize - radius).clamp(0, (w - 1) as isize) as usize;
                    acc += self.data[y * w + xx] * kv;
                }
                tmp[y * w + x] = acc;
            }
        }
        for y in 0..h {
            for x in 0..w {
                let mut acc = 0.0f32;
                for (k, kv) in kernel.iter().enumerate() {
                    let yy = (y as isize + k as isize - radius).clamp(0, (h - 1) as isize) as usize;
                    acc += tmp[yy * w + x] * kv;
                }
                out[y * w + x] = acc;
            }
        }
        FloatImage {
            width: w,
            height: h,
            data: out,
        }
    }

    /// Blur then halve each dimension.
    pub fn pyr_down(&self) -> FloatImage {
        let w = (self.width / 2).max(1);
        let h = (self.height / 2).max(1);
        self.gaussian_blur(5).resize_bilinear(w, h)
    }
}

fn gaussian_kernel(ksize: usize) -> Vec<f32> {
    let sigma = 0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let radius = (ksize / 2) as isize;
    let mut k: Vec<f32> = (0..ksize)
        .map(|i| {
            let x = i as isize - radius;
            (-((x * x) as f32) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = k.iter().sum();
    for v in &mut k {
        *v /= sum;
    }
    k
}

/// Coarse-to-fine stack; level 0 is full resolution.
#[derive(Debug, Clone)]
pub(crate) struct Pyramid {
    pub levels: Vec<FloatImage>,
}

impl Pyramid {
    /// Build up to `max_levels` levels above the base, stopping once a level
    /// would be narrower than `min_size`.
    pub fn build(base: FloatImage, max_levels: usize, min_size: usize) -> Pyramid {
        let mut levels = vec![base];
        for _ in 0..max_levels {
            let Some(last) = levels.last() else { break };
            if last.width / 2 < min_size || last.height / 2 < min_size {
                break;
            }
            let next = last.pyr_down();
            levels.push(next);
        }
        Pyramid { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}
