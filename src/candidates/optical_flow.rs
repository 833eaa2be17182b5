//! Sparse pyramidal Lucas-Kanade optical flow.
//!
//! Displacements are estimated only at the requested points: a window
//! around each point in the previous frame is aligned against the current
//! frame, coarse to fine.

use crate::error::TrackError;
use crate::image::{FloatImage, GrayImage, Pyramid};
use nalgebra::{Matrix2, Vector2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Full window width in pixels; must be odd.
    pub window_size: usize,
    /// Pyramid levels above full resolution.
    pub max_levels: usize,
    pub max_iterations: usize,
    /// Convergence threshold on the update step, in pixels.
    pub epsilon: f32,
    /// Scale applied to both frames before estimation.
    pub img_scale: f32,
    /// Minimum eigenvalue of the window structure tensor (per pixel) for
    /// a point to be trackable.
    pub min_eigen_threshold: f32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            window_size: 21,
            max_levels: 3,
            max_iterations: 30,
            epsilon: 0.01,
            img_scale: 1.0,
            min_eigen_threshold: 1e-3,
        }
    }
}

impl FlowConfig {
    pub fn validate(&self) -> Result<(), TrackError> {
        if self.window_size < 3 || self.window_size % 2 == 0 {
            return Err(TrackError::InvalidConfig(format!(
                "flow window_size must be odd and >= 3, got {}",
                self.window_size
            )));
        }
        if !(self.img_scale > 0.0 && self.img_scale <= 1.0) {
            return Err(TrackError::InvalidConfig(format!(
                "flow img_scale must be in (0, 1], got {}",
                self.img_scale
            )));
        }
        if self.max_iterations == 0 {
            return Err(TrackError::InvalidConfig(
                "flow max_iterations must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

enum LkResult {
    Converged(f32, f32),
    MaxIter(f32, f32),
    Singular,
}

#[derive(Debug, Clone)]
pub struct PyramidalLucasKanade {
    cfg: FlowConfig,
}

impl PyramidalLucasKanade {
    pub fn new(cfg: FlowConfig) -> Result<Self, TrackError> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &FlowConfig {
        &self.cfg
    }

    /// Displacement of every point from `prev` to `curr`. `None` marks a
    /// point that could not be tracked or left the frame.
    pub fn track_points(
        &self,
        prev: &GrayImage,
        curr: &GrayImage,
        points: &[(f32, f32)],
    ) -> Result<Vec<Option<(f32, f32)>>, TrackError> {
        if prev.width() != curr.width() || prev.height() != curr.height() {
            return Err(TrackError::ImageSizeMismatch(
                prev.width(),
                prev.height(),
                curr.width(),
                curr.height(),
            ));
        }

        let scale = self.cfg.img_scale;
        let prepare = |img: &GrayImage| -> FloatImage {
            let f = img.to_float();
            if scale < 1.0 {
                let w = ((img.width() as f32 * scale).round() as usize).max(1);
                let h = ((img.height() as f32 * scale).round() as usize).max(1);
                f.resize_bilinear(w, h)
            } else {
                f
            }
        };
        let min_size = self.cfg.window_size / 2 + 1;
        let prev_pyr = Pyramid::build(prepare(prev), self.cfg.max_levels, min_size);
        let curr_pyr = Pyramid::build(prepare(curr), self.cfg.max_levels, min_size);
        let num_levels = prev_pyr.num_levels().min(curr_pyr.num_levels());

        let (w, h) = (prev.width() as f32, prev.height() as f32);
        let shifts: Vec<Option<(f32, f32)>> = points
            .par_iter()
            .map(|&(x, y)| {
                let (dx, dy) =
                    self.track_single(&prev_pyr, &curr_pyr, x * scale, y * scale, num_levels)?;
                let (dx, dy) = (dx / scale, dy / scale);
                let (nx, ny) = (x + dx, y + dy);
                (nx >= 0.0 && ny >= 0.0 && nx < w && ny < h).then_some((dx, dy))
            })
            .collect();
        Ok(shifts)
    }

    /// Coarse-to-fine tracking of one point. A singular window at a coarse
    /// level is skipped; at full resolution it loses the point.
    fn track_single(
        &self,
        prev_pyr: &Pyramid,
        curr_pyr: &Pyramid,
        x: f32,
        y: f32,
        num_levels: usize,
    ) -> Option<(f32, f32)> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let mut dx = 0.0f32;
        let mut dy = 0.0f32;

        for level in (0..num_levels).rev() {
            let level_scale = 1.0 / (1u32 << level) as f32;
            let result = self.lk_level(
                &prev_pyr.levels[level],
                &curr_pyr.levels[level],
                x * level_scale,
                y * level_scale,
                dx,
                dy,
            );
            match result {
                LkResult::Converged(ndx, ndy) | LkResult::MaxIter(ndx, ndy) => {
                    dx = ndx;
                    dy = ndy;
                }
                LkResult::Singular if level == 0 => return None,
                LkResult::Singular => {}
            }
            if level > 0 {
                dx *= 2.0;
                dy *= 2.0;
            }
        }
        (dx.is_finite() && dy.is_finite()).then_some((dx, dy))
    }

    /// Iterative Lucas-Kanade at one level, using the template gradients so
    /// the structure tensor is built once.
    fn lk_level(
        &self,
        prev_img: &FloatImage,
        curr_img: &FloatImage,
        px: f32,
        py: f32,
        mut dx: f32,
        mut dy: f32,
    ) -> LkResult {
        let half = (self.cfg.window_size / 2) as isize;
        let area = (self.cfg.window_size * self.cfg.window_size) as f32;

        let mut template = Vec::with_capacity(area as usize);
        let mut grads = Vec::with_capacity(area as usize);
        let mut tensor = Matrix2::<f32>::zeros();
        for oy in -half..=half {
            for ox in -half..=half {
                let tx = px + ox as f32;
                let ty = py + oy as f32;
                let gx = 0.5 * (prev_img.sample(tx + 1.0, ty) - prev_img.sample(tx - 1.0, ty));
                let gy = 0.5 * (prev_img.sample(tx, ty + 1.0) - prev_img.sample(tx, ty - 1.0));
                tensor[(0, 0)] += gx * gx;
                tensor[(0, 1)] += gx * gy;
                tensor[(1, 1)] += gy * gy;
                template.push(prev_img.sample(tx, ty));
                grads.push((gx, gy));
            }
        }
        tensor[(1, 0)] = tensor[(0, 1)];

        let (a, b, c) = (tensor[(0, 0)], tensor[(0, 1)], tensor[(1, 1)]);
        let min_eig = 0.5 * (a + c) - (0.25 * (a - c) * (a - c) + b * b).sqrt();
        if min_eig / area < self.cfg.min_eigen_threshold {
            return LkResult::Singular;
        }
        let Some(inv) = tensor.try_inverse() else {
            return LkResult::Singular;
        };

        for _ in 0..self.cfg.max_iterations {
            let mut rhs = Vector2::<f32>::zeros();
            let mut idx = 0;
            for oy in -half..=half {
                for ox in -half..=half {
                    let i_val = curr_img.sample(px + dx + ox as f32, py + dy + oy as f32);
                    let e = template[idx] - i_val;
                    let (gx, gy) = grads[idx];
                    rhs[0] += gx * e;
                    rhs[1] += gy * e;
                    idx += 1;
                }
            }
            let delta = inv * rhs;
            dx += delta[0];
            dy += delta[1];
            if !dx.is_finite() || !dy.is_finite() {
                return LkResult::Singular;
            }
            if delta.norm_squared() < self.cfg.epsilon * self.cfg.epsilon {
                return LkResult::Converged(dx, dy);
            }
        }
        LkResult::MaxIter(dx, dy)
    }
}
