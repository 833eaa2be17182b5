use nalgebra::Matrix1x4;
use num::Float;
use std::fmt::Debug;

/* ------------------------------------------------------------------------------
 * Rect struct
 * ------------------------------------------------------------------------------ */

/// Axis-aligned box stored as `[x, y, width, height]`.
///
/// Unlike detector boxes, keypoint boxes are continuous: a box spanning a
/// single point has zero area.
#[derive(Debug, Clone, PartialEq)]
pub struct Rect<T>
where
    T: Debug + Float,
{
    tlwh: Matrix1x4<T>,
}

impl<T> Rect<T>
where
    T: Debug + Float + 'static,
{
    pub fn new(x: T, y: T, width: T, height: T) -> Self {
        Self {
            tlwh: Matrix1x4::new(x, y, width, height),
        }
    }

    /// Smallest box covering every point, `None` for an empty iterator.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (T, T)>,
    {
        let mut bounds: Option<[T; 4]> = None;
        for (x, y) in points {
            bounds = Some(match bounds {
                None => [x, y, x, y],
                Some([x1, y1, x2, y2]) => {
                    [x1.min(x), y1.min(y), x2.max(x), y2.max(y)]
                }
            });
        }
        bounds.map(|[x1, y1, x2, y2]| Self::from_xyxy(x1, y1, x2, y2))
    }

    /// Create Rect from [x1, y1, x2, y2] format
    pub fn from_xyxy(x1: T, y1: T, x2: T, y2: T) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    #[inline(always)]
    pub fn x(&self) -> T {
        self.tlwh[(0, 0)]
    }

    #[inline(always)]
    pub fn y(&self) -> T {
        self.tlwh[(0, 1)]
    }

    #[inline(always)]
    pub fn width(&self) -> T {
        self.tlwh[(0, 2)]
    }

    #[inline(always)]
    pub fn height(&self) -> T {
        self.tlwh[(0, 3)]
    }

    pub fn area(&self) -> T {
        self.width() * self.height()
    }

    /// Length of the box diagonal.
    pub fn diagonal(&self) -> T {
        self.width().hypot(self.height())
    }

    /// Get bounding box as [x1, y1, x2, y2] format
    pub fn get_xyxy(&self) -> [T; 4] {
        [
            self.x(),
            self.y(),
            self.x() + self.width(),
            self.y() + self.height(),
        ]
    }

    /// Intersection over union. Degenerate boxes score 0 rather than NaN.
    pub fn calc_iou(&self, other: &Rect<T>) -> T {
        let zero = T::zero();
        let [ax1, ay1, ax2, ay2] = self.get_xyxy();
        let [bx1, by1, bx2, by2] = other.get_xyxy();

        let iw = ax2.min(bx2) - ax1.max(bx1);
        let ih = ay2.min(by2) - ay1.max(by1);
        if iw <= zero || ih <= zero {
            return zero;
        }

        let inter = iw * ih;
        let union = self.area() + other.area() - inter;
        if union > zero { inter / union } else { zero }
    }
}
