//! Similarity metrics between pose instances.
//!
//! Every metric is symmetric and "larger is more alike", so the tracker can
//! negate any of them into a cost.

use crate::error::TrackError;
use crate::instance::Instance;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Weights of the combined [`instance_similarity`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinedWeights {
    pub centroid: f64,
    pub iou: f64,
    pub points: f64,
    /// Centroid distance (pixels) at which the centroid term drops to 1/e.
    pub centroid_scale: f64,
    /// Per-point Gaussian kernel width (pixels).
    pub point_sigma: f64,
}

impl Default for CombinedWeights {
    fn default() -> Self {
        Self {
            centroid: 1.0 / 3.0,
            iou: 1.0 / 3.0,
            points: 1.0 / 3.0,
            centroid_scale: 10.0,
            point_sigma: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    CentroidDistance,
    Iou,
    #[default]
    Combined,
    ObjectKeypoint,
}

impl SimilarityMetric {
    /// Whether the metric needs at least one present point per instance.
    pub fn requires_centroid(&self) -> bool {
        matches!(
            self,
            SimilarityMetric::CentroidDistance | SimilarityMetric::Combined
        )
    }
}

/// Metric plus its tunables, ready to score pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scorer {
    pub metric: SimilarityMetric,
    pub weights: CombinedWeights,
    pub oks_stddev: f64,
}

impl Scorer {
    pub fn new(metric: SimilarityMetric) -> Self {
        Self {
            metric,
            weights: CombinedWeights::default(),
            oks_stddev: 1.0,
        }
    }

    pub fn score(&self, a: &Instance, b: &Instance) -> Result<f64, TrackError> {
        match self.metric {
            SimilarityMetric::CentroidDistance => centroid_distance(a, b),
            SimilarityMetric::Iou => Ok(instance_iou(a, b)),
            SimilarityMetric::Combined => {
                weighted_instance_similarity(a, b, &self.weights)
            }
            SimilarityMetric::ObjectKeypoint => {
                Ok(object_keypoint_similarity(a, b, self.oks_stddev))
            }
        }
    }
}

fn centroid_of(inst: &Instance) -> Result<(f64, f64), TrackError> {
    inst.centroid().ok_or_else(|| {
        TrackError::InvalidInstance(
            "centroid of an instance with no present points".to_string(),
        )
    })
}

/// Negated Euclidean distance between the centroids of the present points.
///
/// 0 means coincident centroids; more negative means farther apart.
pub fn centroid_distance(a: &Instance, b: &Instance) -> Result<f64, TrackError> {
    let (ax, ay) = centroid_of(a)?;
    let (bx, by) = centroid_of(b)?;
    Ok(-(ax - bx).hypot(ay - by))
}

/// IoU of the bounding boxes of the present points. 0 when either box is
/// missing or has no area.
pub fn instance_iou(a: &Instance, b: &Instance) -> f64 {
    match (a.bounding_rect(), b.bounding_rect()) {
        (Some(ra), Some(rb)) => ra.calc_iou(&rb),
        _ => 0.0,
    }
}

/// Combined similarity with default weights.
pub fn instance_similarity(a: &Instance, b: &Instance) -> Result<f64, TrackError> {
    weighted_instance_similarity(a, b, &CombinedWeights::default())
}

pub fn weighted_instance_similarity(
    a: &Instance,
    b: &Instance,
    weights: &CombinedWeights,
) -> Result<f64, TrackError> {
    let dist = -centroid_distance(a, b)?;
    let centroid_term = (-dist / weights.centroid_scale).exp();
    let iou_term = instance_iou(a, b);

    let mut score = weights.centroid * centroid_term + weights.iou * iou_term;
    if a.shares_topology(b) {
        score += weights.points * point_kernel(a, b, weights.point_sigma);
    }
    Ok(score)
}

/// Mean Gaussian agreement of corresponding points, normalised by the larger
/// present count so that neither side is privileged.
fn point_kernel(a: &Instance, b: &Instance, sigma: f64) -> f64 {
    let denom = a.n_present().max(b.n_present());
    if denom == 0 {
        return 0.0;
    }
    let two_var = 2.0 * sigma * sigma;
    let sum: f64 = a
        .present_points()
        .filter_map(|(i, pa)| b.point(i).filter(|p| p.is_finite()).map(|pb| (pa, pb)))
        .map(|(pa, pb)| {
            let dx = (pa.x - pb.x) as f64;
            let dy = (pa.y - pb.y) as f64;
            (-(dx * dx + dy * dy) / two_var).exp()
        })
        .sum();
    sum / denom as f64
}

/// Object keypoint similarity, scaled by the mean bounding-box diagonal.
///
/// Points present on only one side count as zero agreement.
pub fn object_keypoint_similarity(a: &Instance, b: &Instance, stddev: f64) -> f64 {
    if !a.shares_topology(b) {
        return 0.0;
    }
    let diag = |inst: &Instance| inst.bounding_rect().map_or(0.0, |r| r.diagonal());
    let scale = 0.5 * (diag(a) + diag(b));
    let denom = 2.0 * (scale * stddev).powi(2);

    let mut total = 0.0;
    let mut n = 0usize;
    for i in 0..a.len() {
        let pa = a.point(i).filter(|p| p.is_finite());
        let pb = b.point(i).filter(|p| p.is_finite());
        match (pa, pb) {
            (Some(pa), Some(pb)) => {
                let dx = (pa.x - pb.x) as f64;
                let dy = (pa.y - pb.y) as f64;
                let d2 = dx * dx + dy * dy;
                total += if denom > 0.0 {
                    (-d2 / denom).exp()
                } else if d2 == 0.0 {
                    1.0
                } else {
                    0.0
                };
                n += 1;
            }
            (None, None) => {}
            _ => n += 1,
        }
    }
    if n == 0 { 0.0 } else { total / n as f64 }
}

/// Pairwise similarity, rows = `detections`, columns = `candidates`.
///
/// Rows are scored in parallel; the first failing pair aborts the whole
/// matrix.
pub fn similarity_matrix(
    detections: &[Instance],
    candidates: &[Instance],
    scorer: &Scorer,
) -> Result<DMatrix<f64>, TrackError> {
    let num_dets = detections.len();
    let num_cands = candidates.len();
    if num_dets == 0 || num_cands == 0 {
        return Ok(DMatrix::zeros(num_dets, num_cands));
    }

    let rows: Vec<Vec<f64>> = detections
        .par_iter()
        .map(|det| {
            candidates
                .iter()
                .map(|cand| scorer.score(det, cand))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<_, _>>()?;

    Ok(DMatrix::from_fn(num_dets, num_cands, |i, j| rows[i][j]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::fixtures::*;
    use crate::instance::{Instance, Point};
    use nearly_eq::assert_nearly_eq;
    use quickcheck::{Arbitrary, Gen};

    #[test]
    fn test_centroid_distance() {
        let s = skeleton();
        let a = inst_a(&s);
        let b = inst_b(&s);
        let sim_a = inst_sim_a(&s);
        let cent_a = inst_cent_a(&s);
        let rot_a = inst_rot_a(&s);

        let d = |x: &Instance, y: &Instance| centroid_distance(x, y).unwrap();

        assert_eq!(d(&a, &b), d(&b, &a));
        assert!(d(&a, &b) < d(&a, &sim_a));
        assert!(d(&a, &b) < d(&a, &cent_a));
        assert!(d(&a, &sim_a) < d(&a, &cent_a));
        assert_eq!(d(&a, &cent_a), 0.0);
        assert_eq!(d(&a, &rot_a), 0.0);
        assert_eq!(d(&a, &a), 0.0);
        assert_nearly_eq!(d(&a, &b), -(2.0f64 * 100.0 * 100.0).sqrt(), 1e-9);
    }

    #[test]
    fn test_centroid_distance_requires_points() {
        let s = skeleton();
        let empty = Instance::new(s.clone());
        let res = centroid_distance(&inst_a(&s), &empty);
        assert!(matches!(res, Err(TrackError::InvalidInstance(_))));
        let res = centroid_distance(&empty, &inst_a(&s));
        assert!(matches!(res, Err(TrackError::InvalidInstance(_))));
    }

    #[test]
    fn test_metric_default_and_names() {
        assert_eq!(SimilarityMetric::default(), SimilarityMetric::Combined);
        let metric: SimilarityMetric = serde_json::from_str(r#""object_keypoint""#).unwrap();
        assert_eq!(metric, SimilarityMetric::ObjectKeypoint);
        assert!(SimilarityMetric::default().requires_centroid());
        assert!(!SimilarityMetric::Iou.requires_centroid());
    }

    #[test]
    fn test_instance_iou() {
        let s = skeleton();
        let a = inst_a(&s);
        let b = inst_b(&s);
        let sim_a = inst_sim_a(&s);
        let rot_a = inst_rot_a(&s);

        assert_eq!(instance_iou(&a, &b), instance_iou(&b, &a));
        assert_eq!(instance_iou(&a, &b), 0.0);
        assert_eq!(instance_iou(&a, &a), instance_iou(&a, &rot_a));
        assert_nearly_eq!(instance_iou(&a, &a), 1.0);
        assert!(instance_iou(&a, &b) < instance_iou(&a, &sim_a));
        assert_nearly_eq!(instance_iou(&a, &sim_a), 0.75, 1e-9);
    }

    #[test]
    fn test_instance_iou_degenerate_is_zero() {
        let s = skeleton();
        let a = inst_a(&s);
        // two points on a horizontal line: zero-area box
        let piece = inst_a_piece(&s);
        let empty = Instance::new(s);
        assert_eq!(instance_iou(&a, &piece), 0.0);
        assert_eq!(instance_iou(&piece, &piece), 0.0);
        assert_eq!(instance_iou(&a, &empty), 0.0);
    }

    #[test]
    fn test_instance_similarity() {
        let s = skeleton();
        let a = inst_a(&s);
        let b = inst_b(&s);
        let sim_a = inst_sim_a(&s);
        let cent_a = inst_cent_a(&s);

        let sim = |x: &Instance, y: &Instance| instance_similarity(x, y).unwrap();

        assert_eq!(sim(&a, &b), sim(&b, &a));
        assert!(sim(&a, &b) < sim(&a, &sim_a));
        assert!(sim(&a, &cent_a) < sim(&a, &sim_a));
        assert_nearly_eq!(sim(&a, &a), 1.0, 1e-9);
    }

    #[test]
    fn test_instance_similarity_other_topology_skips_point_term() {
        let s = skeleton();
        let a = inst_a(&s);
        let three = Instance::without_skeleton(vec![
            Some(Point::new(0.0, 0.0)),
            Some(Point::new(10.0, 0.0)),
            Some(Point::new(0.0, 10.0)),
        ]);
        let w = CombinedWeights::default();
        let score = weighted_instance_similarity(&a, &three, &w).unwrap();
        assert!(score < w.centroid + w.iou + 1e-9);
        assert!(score > 0.0);
    }

    #[test]
    fn test_object_keypoint_similarity() {
        let s = skeleton();
        let a = inst_a(&s);
        let b = inst_b(&s);
        let sim_a = inst_sim_a(&s);
        let piece = inst_a_piece(&s);

        assert_nearly_eq!(object_keypoint_similarity(&a, &a, 1.0), 1.0);
        assert!(
            object_keypoint_similarity(&a, &b, 1.0)
                < object_keypoint_similarity(&a, &sim_a, 1.0)
        );
        // two of four points missing on one side
        assert_nearly_eq!(object_keypoint_similarity(&a, &piece, 1.0), 0.5, 1e-9);
        assert_eq!(
            object_keypoint_similarity(&a, &piece, 1.0),
            object_keypoint_similarity(&piece, &a, 1.0)
        );
    }

    #[test]
    fn test_similarity_matrix_shape_and_values() {
        let s = skeleton();
        let dets = vec![inst_a(&s), inst_b(&s)];
        let cands = vec![inst_b(&s), inst_sim_a(&s), inst_a(&s)];
        let scorer = Scorer::new(SimilarityMetric::Iou);
        let m = similarity_matrix(&dets, &cands, &scorer).unwrap();
        assert_eq!(m.nrows(), 2);
        assert_eq!(m.ncols(), 3);
        assert_eq!(m[(0, 0)], 0.0);
        assert_nearly_eq!(m[(0, 1)], 0.75, 1e-9);
        assert_nearly_eq!(m[(0, 2)], 1.0, 1e-9);
        assert_nearly_eq!(m[(1, 0)], 1.0, 1e-9);
    }

    #[test]
    fn test_similarity_matrix_empty() {
        let s = skeleton();
        let scorer = Scorer::new(SimilarityMetric::Combined);
        let m = similarity_matrix(&[], &[inst_a(&s)], &scorer).unwrap();
        assert_eq!((m.nrows(), m.ncols()), (0, 1));
    }

    #[test]
    fn test_similarity_matrix_propagates_invalid_instance() {
        let s = skeleton();
        let scorer = Scorer::new(SimilarityMetric::CentroidDistance);
        let res = similarity_matrix(&[Instance::new(s.clone())], &[inst_a(&s)], &scorer);
        assert!(matches!(res, Err(TrackError::InvalidInstance(_))));
    }

    #[derive(Debug, Clone)]
    struct Pose(Vec<Option<Point>>);

    impl Arbitrary for Pose {
        fn arbitrary(g: &mut Gen) -> Self {
            let coord = |g: &mut Gen| (u16::arbitrary(g) % 500) as f32;
            let mut pts: Vec<Option<Point>> = (0..4)
                .map(|_| {
                    if bool::arbitrary(g) {
                        Some(Point::new(coord(g), coord(g)))
                    } else {
                        None
                    }
                })
                .collect();
            pts[0] = Some(Point::new(coord(g), coord(g)));
            Pose(pts)
        }
    }

    #[test]
    fn test_quickcheck_metrics_symmetric() {
        fn prop(a: Pose, b: Pose) -> bool {
            let s = skeleton();
            let a = Instance::from_points(s.clone(), a.0).unwrap();
            let b = Instance::from_points(s, b.0).unwrap();
            centroid_distance(&a, &b).unwrap() == centroid_distance(&b, &a).unwrap()
                && instance_iou(&a, &b) == instance_iou(&b, &a)
                && instance_similarity(&a, &b).unwrap()
                    == instance_similarity(&b, &a).unwrap()
                && object_keypoint_similarity(&a, &b, 1.0)
                    == object_keypoint_similarity(&b, &a, 1.0)
        }
        quickcheck::quickcheck(prop as fn(Pose, Pose) -> bool);
    }
}
