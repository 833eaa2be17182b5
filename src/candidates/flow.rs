use super::CandidateMaker;
use super::optical_flow::{FlowConfig, PyramidalLucasKanade};
use crate::error::TrackError;
use crate::image::GrayImage;
use crate::instance::Instance;
use crate::match_queue::MatchQueue;
use tracing::{debug, warn};

/// Predicts where the newest frame's instances moved by shifting each
/// keypoint along the optical flow between the newest stored image and the
/// current one. Older history is not used.
#[derive(Debug, Clone)]
pub struct FlowCandidateMaker {
    min_points: usize,
    flow: PyramidalLucasKanade,
}

impl FlowCandidateMaker {
    pub fn new(min_points: usize, cfg: FlowConfig) -> Result<Self, TrackError> {
        Ok(Self {
            min_points,
            flow: PyramidalLucasKanade::new(cfg)?,
        })
    }

    pub fn flow_config(&self) -> &FlowConfig {
        self.flow.config()
    }
}

impl CandidateMaker for FlowCandidateMaker {
    fn get_candidates(
        &self,
        queue: &MatchQueue,
        frame_idx: usize,
        frame_image: Option<&GrayImage>,
    ) -> Result<Vec<Instance>, TrackError> {
        let Some(latest) = queue.newest() else {
            return Ok(Vec::new());
        };
        if latest.instances().is_empty() {
            return Ok(Vec::new());
        }
        let curr = frame_image.ok_or(TrackError::MissingImage(frame_idx))?;
        let prev = latest
            .image()
            .ok_or(TrackError::MissingImage(latest.frame_idx()))?;

        // flatten every present point so the pyramids are built once
        let mut owners = Vec::new();
        let mut points = Vec::new();
        for (inst_idx, inst) in latest.instances().iter().enumerate() {
            for (node_idx, p) in inst.present_points() {
                owners.push((inst_idx, node_idx));
                points.push((p.x, p.y));
            }
        }
        let shifts = self.flow.track_points(prev, curr, &points)?;

        let mut per_instance: Vec<Vec<Option<(f32, f32)>>> = latest
            .instances()
            .iter()
            .map(|inst| vec![None; inst.len()])
            .collect();
        let mut lost = 0usize;
        for (&(inst_idx, node_idx), shift) in owners.iter().zip(&shifts) {
            if shift.is_none() {
                lost += 1;
            }
            per_instance[inst_idx][node_idx] = *shift;
        }
        if lost > 0 {
            debug!(
                "flow lost {} of {} points from frame {} to frame {}",
                lost,
                points.len(),
                latest.frame_idx(),
                frame_idx
            );
        }

        let required = self.min_points.max(1);
        let mut candidates = Vec::with_capacity(latest.instances().len());
        for (inst, shift) in latest.instances().iter().zip(&per_instance) {
            let shifted = inst.shifted(shift);
            if shifted.n_present() >= required {
                candidates.push(shifted);
            } else {
                warn!(
                    "dropping flow candidate for track {:?}: {} points left, {} required",
                    inst.track(),
                    shifted.n_present(),
                    required
                );
            }
        }
        Ok(candidates)
    }

    fn uses_images(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::optical_flow::synthetic::blob_frame;
    use crate::instance::fixtures::*;
    use crate::instance::Point;
    use crate::match_queue::MatchedInstance;
    use std::sync::Arc;

    fn maker() -> FlowCandidateMaker {
        FlowCandidateMaker::new(0, FlowConfig::default()).unwrap()
    }

    #[test]
    fn test_empty_queue_yields_nothing() {
        let queue = MatchQueue::new(3).unwrap();
        let candidates = maker().get_candidates(&queue, 0, None).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_missing_images() {
        let s = skeleton();
        let frame = Arc::new(blob_frame(64, 64, 30.0, 30.0));
        let mut queue = MatchQueue::new(3).unwrap();
        queue.push(MatchedInstance::new(4, vec![inst_a(&s).with_track(1)], None));
        assert_eq!(
            maker().get_candidates(&queue, 5, Some(&*frame)),
            Err(TrackError::MissingImage(4))
        );

        queue.push(MatchedInstance::new(5, vec![inst_a(&s).with_track(1)], Some(frame)));
        assert_eq!(
            maker().get_candidates(&queue, 6, None),
            Err(TrackError::MissingImage(6))
        );
    }

    #[test]
    fn test_shift_follows_motion() {
        let s = skeleton();
        let prev = Arc::new(blob_frame(96, 96, 40.0, 40.0));
        let curr = blob_frame(96, 96, 40.0, 44.0);

        let mut inst = Instance::new(s.clone());
        inst.set_point("a", Point::new(40.0, 40.0)).unwrap();
        inst.set_point("b", Point::new(44.0, 38.0)).unwrap();
        inst.set_point("c", Point::new(37.0, 43.0)).unwrap();
        let inst = inst.with_track(9);

        let mut queue = MatchQueue::new(3).unwrap();
        queue.push(MatchedInstance::new(0, vec![inst.clone()], Some(prev)));

        let candidates = maker().get_candidates(&queue, 1, Some(&curr)).unwrap();
        assert_eq!(candidates.len(), 1);
        let cand = &candidates[0];
        assert_eq!(cand.track(), Some(9));
        assert_eq!(cand.point(3), None);
        for node in 0..3 {
            let before = inst.point(node).unwrap();
            let after = cand.point(node).unwrap();
            assert!(after.y > before.y, "node {} did not move down", node);
        }
    }

    #[test]
    fn test_untrackable_instance_dropped() {
        let s = skeleton();
        let flat = Arc::new(GrayImage::new(64, 64, vec![90; 64 * 64]).unwrap());
        let mut queue = MatchQueue::new(3).unwrap();
        queue.push(MatchedInstance::new(
            0,
            vec![inst_a(&s).with_track(1)],
            Some(flat.clone()),
        ));
        let candidates = maker().get_candidates(&queue, 1, Some(&*flat)).unwrap();
        assert!(candidates.is_empty());
    }
}
