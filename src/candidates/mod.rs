//! Candidate makers propose the historical (or predicted) instances that
//! current detections are matched against.

mod flow;
pub mod optical_flow;
mod simple;

use crate::error::TrackError;
use crate::image::GrayImage;
use crate::instance::Instance;
use crate::match_queue::MatchQueue;
use serde::{Deserialize, Serialize};

pub use flow::FlowCandidateMaker;
pub use optical_flow::{FlowConfig, PyramidalLucasKanade};
pub use simple::SimpleCandidateMaker;

pub trait CandidateMaker: std::fmt::Debug + Send + Sync {
    /// Reference instances for frame `frame_idx`. An empty queue yields no
    /// candidates.
    fn get_candidates(
        &self,
        queue: &MatchQueue,
        frame_idx: usize,
        frame_image: Option<&GrayImage>,
    ) -> Result<Vec<Instance>, TrackError>;

    /// Whether the maker needs frame images stored in the queue.
    fn uses_images(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStrategy {
    #[default]
    Simple,
    Flow,
}

impl CandidateStrategy {
    pub fn maker(
        &self,
        min_points: usize,
        flow: FlowConfig,
    ) -> Result<Box<dyn CandidateMaker>, TrackError> {
        Ok(match self {
            CandidateStrategy::Simple => Box::new(SimpleCandidateMaker::new(min_points)),
            CandidateStrategy::Flow => Box::new(FlowCandidateMaker::new(min_points, flow)?),
        })
    }
}
