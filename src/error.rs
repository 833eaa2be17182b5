use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    #[error("invalid instance: {0}")]
    InvalidInstance(String),
    #[error("forced pairing ({row}, {col}) conflicts with another forced pairing")]
    InfeasibleMatch { row: usize, col: usize },
    #[error("no image available for frame {0}")]
    MissingImage(usize),
    #[error("image size mismatch: {0}x{1} vs {2}x{3}")]
    ImageSizeMismatch(usize, usize, usize, usize),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("Error: {0}")]
    Lapjv(String),
}
