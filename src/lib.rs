pub mod candidates;
pub mod config;
pub mod error;
pub mod image;
pub mod instance;
pub mod match_queue;
pub mod matching;
pub mod rect;
pub mod similarity;
pub mod tracker;

mod lapjv;

pub use candidates::{CandidateMaker, CandidateStrategy, FlowConfig};
pub use config::TrackerConfig;
pub use error::TrackError;
pub use image::GrayImage;
pub use instance::{Instance, Point, Skeleton, TrackId};
pub use match_queue::{MatchQueue, MatchedInstance};
pub use matching::{AssignmentSolver, AssignmentStrategy};
pub use rect::Rect;
pub use similarity::SimilarityMetric;
pub use tracker::{PoseTracker, TrackedInstance, TrackerState};
