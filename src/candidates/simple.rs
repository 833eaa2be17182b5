use super::CandidateMaker;
use crate::error::TrackError;
use crate::image::GrayImage;
use crate::instance::Instance;
use crate::match_queue::MatchQueue;

/// Pools every instance of every queued frame, newest frame first.
#[derive(Debug, Clone, Default)]
pub struct SimpleCandidateMaker {
    /// Instances with fewer present points are skipped.
    min_points: usize,
}

impl SimpleCandidateMaker {
    pub fn new(min_points: usize) -> Self {
        Self { min_points }
    }

    pub fn min_points(&self) -> usize {
        self.min_points
    }
}

impl CandidateMaker for SimpleCandidateMaker {
    fn get_candidates(
        &self,
        queue: &MatchQueue,
        _frame_idx: usize,
        _frame_image: Option<&GrayImage>,
    ) -> Result<Vec<Instance>, TrackError> {
        Ok(queue
            .iter_newest_first()
            .flat_map(|m| m.instances())
            .filter(|inst| inst.n_present() >= self.min_points)
            .cloned()
            .collect())
    }
}
