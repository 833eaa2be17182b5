use crate::error::TrackError;
use crate::rect::Rect;
use std::sync::Arc;

/// Persistent identity of one tracked subject.
pub type TrackId = usize;

/*------------------------------------------------------------------------------
Skeleton struct
------------------------------------------------------------------------------*/

/// Keypoint topology shared by every instance of one subject type.
///
/// Node order fixes the point order of every [`Instance`] built on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skeleton {
    name: String,
    nodes: Vec<String>,
    /// Not read by the metrics; part of skeleton equality and kept for
    /// callers that draw or export poses.
    edges: Vec<(usize, usize)>,
}

impl Skeleton {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nodes.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Connect two nodes by name. Unknown names are rejected.
    pub fn add_edge(&mut self, src: &str, dst: &str) -> Result<(), TrackError> {
        let src_idx = self.node_index(src).ok_or_else(|| {
            TrackError::InvalidInstance(format!("unknown node {src:?}"))
        })?;
        let dst_idx = self.node_index(dst).ok_or_else(|| {
            TrackError::InvalidInstance(format!("unknown node {dst:?}"))
        })?;
        self.edges.push((src_idx, dst_idx));
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n == name)
    }
}

/*------------------------------------------------------------------------------
Point struct
------------------------------------------------------------------------------*/

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub score: Option<f32>,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, score: None }
    }

    pub fn with_score(x: f32, y: f32, score: f32) -> Self {
        Self {
            x,
            y,
            score: Some(score),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/*------------------------------------------------------------------------------
Instance struct
------------------------------------------------------------------------------*/

/// One detected subject in one frame: a fixed-order list of keypoints, each
/// present or absent, plus the track it has been assigned to (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    skeleton: Option<Arc<Skeleton>>,
    points: Vec<Option<Point>>,
    track: Option<TrackId>,
}

impl Instance {
    /// Create an empty instance (all points absent) on `skeleton`.
    pub fn new(skeleton: Arc<Skeleton>) -> Self {
        let n = skeleton.node_count();
        Self {
            skeleton: Some(skeleton),
            points: vec![None; n],
            track: None,
        }
    }

    /// Create an instance from points in skeleton order.
    pub fn from_points(
        skeleton: Arc<Skeleton>,
        points: Vec<Option<Point>>,
    ) -> Result<Self, TrackError> {
        if points.len() != skeleton.node_count() {
            return Err(TrackError::InvalidInstance(format!(
                "skeleton {:?} has {} nodes, but {} points were given",
                skeleton.name(),
                skeleton.node_count(),
                points.len()
            )));
        }
        Ok(Self {
            skeleton: Some(skeleton),
            points,
            track: None,
        })
    }

    /// Create an instance without topology. Metrics accept it, the tracker
    /// rejects it.
    pub fn without_skeleton(points: Vec<Option<Point>>) -> Self {
        Self {
            skeleton: None,
            points,
            track: None,
        }
    }

    pub fn with_track(self, track: TrackId) -> Self {
        Self {
            track: Some(track),
            ..self
        }
    }

    /// Set a point by node name.
    pub fn set_point(
        &mut self,
        node: &str,
        point: Point,
    ) -> Result<(), TrackError> {
        let idx = self
            .skeleton
            .as_ref()
            .and_then(|s| s.node_index(node))
            .ok_or_else(|| {
                TrackError::InvalidInstance(format!("unknown node {node:?}"))
            })?;
        self.points[idx] = Some(point);
        Ok(())
    }

    pub fn skeleton(&self) -> Option<&Arc<Skeleton>> {
        self.skeleton.as_ref()
    }

    pub fn points(&self) -> &[Option<Point>] {
        &self.points
    }

    pub fn point(&self, idx: usize) -> Option<Point> {
        self.points.get(idx).copied().flatten()
    }

    pub fn track(&self) -> Option<TrackId> {
        self.track
    }

    pub fn set_track(&mut self, track: TrackId) {
        self.track = Some(track);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Present points with finite coordinates, with their node index.
    pub fn present_points(&self) -> impl Iterator<Item = (usize, Point)> + '_ {
        self.points
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.filter(Point::is_finite).map(|p| (i, p)))
    }

    pub fn n_present(&self) -> usize {
        self.present_points().count()
    }

    /// Mean of the present points, `None` when nothing is present.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        let mut sx = 0.0f64;
        let mut sy = 0.0f64;
        let mut n = 0usize;
        for (_, p) in self.present_points() {
            sx += p.x as f64;
            sy += p.y as f64;
            n += 1;
        }
        if n == 0 {
            None
        } else {
            Some((sx / n as f64, sy / n as f64))
        }
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        Rect::from_points(
            self.present_points().map(|(_, p)| (p.x as f64, p.y as f64)),
        )
    }

    /// Fails with `InvalidInstance` unless the instance carries a skeleton
    /// matching its point count.
    pub fn validate(&self) -> Result<(), TrackError> {
        match &self.skeleton {
            None => Err(TrackError::InvalidInstance(
                "instance has no skeleton".to_string(),
            )),
            Some(s) if s.node_count() != self.points.len() => {
                Err(TrackError::InvalidInstance(format!(
                    "skeleton {:?} has {} nodes, instance has {} points",
                    s.name(),
                    s.node_count(),
                    self.points.len()
                )))
            }
            Some(_) => Ok(()),
        }
    }

    /// Same topology: equal point counts and, when both carry one, equal
    /// skeletons.
    pub fn shares_topology(&self, other: &Instance) -> bool {
        if self.points.len() != other.points.len() {
            return false;
        }
        match (&self.skeleton, &other.skeleton) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => true,
        }
    }

    /// Copy with every point moved by `shift`. `None` in `shift` drops the
    /// point.
    pub(crate) fn shifted(&self, shift: &[Option<(f32, f32)>]) -> Self {
        let points = self
            .points
            .iter()
            .zip(shift)
            .map(|(p, d)| match (p, d) {
                (Some(p), Some((dx, dy))) => Some(Point {
                    x: p.x + dx,
                    y: p.y + dy,
                    score: p.score,
                }),
                _ => None,
            })
            .collect();
        Self {
            skeleton: self.skeleton.clone(),
            points,
            track: self.track,
        }
    }
}
