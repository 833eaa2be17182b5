//! Per-frame identity assignment.
//!
//! `PoseTracker` owns the history of one video: for every frame it asks the
//! candidate maker for reference instances, scores them against the new
//! detections, solves the assignment and records the result in its
//! [`MatchQueue`].

use crate::candidates::CandidateMaker;
use crate::config::TrackerConfig;
use crate::error::TrackError;
use crate::image::GrayImage;
use crate::instance::{Instance, TrackId};
use crate::match_queue::{MatchQueue, MatchedInstance};
use crate::matching::AssignmentSolver;
use crate::similarity::{Scorer, similarity_matrix};
use nalgebra::DMatrix;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// No frame has been recorded yet.
    Init,
    Tracking,
}

/// A detection with the identity it was given.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedInstance {
    /// The detection, with its track set.
    pub instance: Instance,
    pub track_id: TrackId,
    /// Similarity to the matched track, `None` for a new track.
    pub similarity: Option<f64>,
    pub is_new_track: bool,
}

impl TrackedInstance {
    /// Cost the solver saw for this pairing.
    pub fn cost(&self) -> Option<f64> {
        self.similarity.map(|s| -s)
    }
}

/*-----------------------------------------------------------------------------
PoseTracker
-----------------------------------------------------------------------------*/

#[derive(Debug)]
pub struct PoseTracker {
    config: TrackerConfig,
    scorer: Scorer,
    candidate_maker: Box<dyn CandidateMaker>,
    solver: Box<dyn AssignmentSolver>,
    queue: MatchQueue,

    frame_count: usize,
    track_id_count: usize,
}

/// Scores of one frame reduced to one column per candidate track.
struct TrackScores {
    tracks: Vec<TrackId>,
    scores: DMatrix<f64>,
}

impl PoseTracker {
    pub fn new(config: TrackerConfig) -> Result<Self, TrackError> {
        config.validate()?;
        let candidate_maker = config
            .candidate_strategy
            .maker(config.min_present_points, config.flow)?;
        let solver = config.assignment_strategy.solver();
        let scorer = Scorer {
            metric: config.similarity_metric,
            weights: config.combined_weights,
            oks_stddev: config.oks_stddev,
        };
        Ok(Self {
            queue: MatchQueue::new(config.history_window_size)?,
            config,
            scorer,
            candidate_maker,
            solver,
            frame_count: 0,
            track_id_count: 0,
        })
    }

    /// Replace the candidate maker built from the config.
    pub fn with_candidate_maker(self, candidate_maker: Box<dyn CandidateMaker>) -> Self {
        Self {
            candidate_maker,
            ..self
        }
    }

    /// Replace the assignment solver built from the config.
    pub fn with_solver(self, solver: Box<dyn AssignmentSolver>) -> Self {
        Self { solver, ..self }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> TrackerState {
        if self.queue.is_empty() {
            TrackerState::Init
        } else {
            TrackerState::Tracking
        }
    }

    pub fn queue(&self) -> &MatchQueue {
        &self.queue
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Number of track identities minted so far.
    pub fn track_count(&self) -> usize {
        self.track_id_count
    }

    /// Forget the history; track ids keep counting up.
    pub fn reset_history(&mut self) {
        self.queue.clear();
    }

    /// Assign a track to every detection of frame `frame_idx`.
    ///
    /// On error neither the history nor the id counter change, so the caller
    /// may retry the frame or skip it.
    pub fn track(
        &mut self,
        frame_idx: usize,
        detections: Vec<Instance>,
        image: Option<GrayImage>,
    ) -> Result<Vec<TrackedInstance>, TrackError> {
        self.validate_detections(&detections)?;

        let assigned: Vec<Option<(TrackId, f64)>> = if self.queue.is_empty() {
            vec![None; detections.len()]
        } else {
            self.match_to_history(frame_idx, &detections, image.as_ref())?
        };

        let mut next_id = self.track_id_count;
        let mut results = Vec::with_capacity(detections.len());
        for (det_idx, (mut instance, assignment)) in
            detections.into_iter().zip(assigned).enumerate()
        {
            let (track_id, similarity) = match assignment {
                Some((track_id, score)) => (track_id, Some(score)),
                None => {
                    next_id += 1;
                    debug!(
                        "frame {}: detection {} starts new track {}",
                        frame_idx, det_idx, next_id
                    );
                    (next_id, None)
                }
            };
            instance.set_track(track_id);
            results.push(TrackedInstance {
                instance,
                track_id,
                similarity,
                is_new_track: similarity.is_none(),
            });
        }

        let n_new = next_id - self.track_id_count;
        debug!(
            "frame {}: {} detections, {} continued, {} new tracks",
            frame_idx,
            results.len(),
            results.len() - n_new,
            n_new
        );

        self.track_id_count = next_id;
        self.frame_count += 1;
        let instances = results.iter().map(|r| r.instance.clone()).collect();
        let image = image
            .filter(|_| self.candidate_maker.uses_images())
            .map(Arc::new);
        self.queue
            .push(MatchedInstance::new(frame_idx, instances, image));

        Ok(results)
    }

    fn validate_detections(&self, detections: &[Instance]) -> Result<(), TrackError> {
        for (i, det) in detections.iter().enumerate() {
            det.validate()
                .map_err(|e| TrackError::InvalidInstance(format!("detection {}: {}", i, e)))?;
            if self.scorer.metric.requires_centroid() && det.n_present() == 0 {
                return Err(TrackError::InvalidInstance(format!(
                    "detection {} has no present points",
                    i
                )));
            }
        }
        Ok(())
    }

    /// Track and similarity for every detection, `None` where no track
    /// matched.
    fn match_to_history(
        &self,
        frame_idx: usize,
        detections: &[Instance],
        image: Option<&GrayImage>,
    ) -> Result<Vec<Option<(TrackId, f64)>>, TrackError> {
        let candidates = self
            .candidate_maker
            .get_candidates(&self.queue, frame_idx, image)?;
        let TrackScores { tracks, scores } = self.track_scores(detections, &candidates)?;
        debug!(
            "frame {}: {} candidates over {} tracks",
            frame_idx,
            candidates.len(),
            tracks.len()
        );

        let threshold = self.config.min_similarity_threshold;
        let cost = scores.map(|s| match threshold {
            _ if !s.is_finite() => f64::INFINITY,
            Some(t) if s < t => f64::INFINITY,
            _ => -s,
        });

        let mut assigned = vec![None; detections.len()];
        for (row, col) in self.solver.solve(&cost)? {
            if cost[(row, col)].is_finite() {
                assigned[row] = Some((tracks[col], scores[(row, col)]));
            }
        }
        Ok(assigned)
    }

    /// Detection x track similarity. Each track's column is the robust
    /// quantile of its candidates' scores; candidates of another topology,
    /// without a track or without points are skipped.
    fn track_scores(
        &self,
        detections: &[Instance],
        candidates: &[Instance],
    ) -> Result<TrackScores, TrackError> {
        let usable: Vec<&Instance> = candidates
            .iter()
            .filter(|c| c.track().is_some() && c.n_present() > 0)
            .collect();

        let mut tracks: Vec<TrackId> = Vec::new();
        let mut members: Vec<Vec<usize>> = Vec::new();
        for (idx, cand) in usable.iter().enumerate() {
            let Some(track) = cand.track() else { continue };
            match tracks.iter().position(|&t| t == track) {
                Some(col) => members[col].push(idx),
                None => {
                    tracks.push(track);
                    members.push(vec![idx]);
                }
            }
        }

        let owned: Vec<Instance> = usable.into_iter().cloned().collect();
        let pairwise = similarity_matrix(detections, &owned, &self.scorer)?;

        let quantile = self.config.robust_quantile;
        let scores = DMatrix::from_fn(detections.len(), tracks.len(), |row, col| {
            let mut values: Vec<f64> = members[col]
                .iter()
                .filter(|&&c| detections[row].shares_topology(&owned[c]))
                .map(|&c| pairwise[(row, c)])
                .filter(|v| v.is_finite())
                .collect();
            robust_score(&mut values, quantile).unwrap_or(f64::NEG_INFINITY)
        });

        Ok(TrackScores { tracks, scores })
    }
}

/// Linear-interpolated quantile; `None` for no values.
fn robust_score(values: &mut [f64], quantile: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let pos = quantile * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(values[lo] + (values[hi] - values[lo]) * frac)
}
