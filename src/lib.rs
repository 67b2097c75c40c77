use thiserror::Error;

/// Stereo geometry: calibration, distortion, world transformation, triangulation and reprojection
pub mod geometry;

/// Per-frame correspondence solvers (pairwise and n-partite)
pub mod matching;

/// Frequently used types
pub mod prelude;

/// Detections, rod records and the rod table with its CSV representation
pub mod rods;

/// Synthetic stereo scenes used by tests and benches
pub mod test_stuff;

/// Frame sequence trackers and the multi-color assignment driver
pub mod trackers;

/// Assignment solvers, cost tensors and logging setup
pub mod utils;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Errors {
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Camera 1 has {cam1} entries while camera 2 has {cam2}, but correspondence is assumed")]
    ShapeMismatch { cam1: usize, cam2: usize },
    #[error("Invalid cost tensor: {0}")]
    InvalidTensor(String),
    #[error("Frame {current} received after frame {previous}, frames must be strictly increasing")]
    FrameOrder { previous: i64, current: i64 },
    #[error("Particle {particle} is assigned more than once in frame {frame}")]
    DuplicateParticle { frame: i64, particle: u64 },
    #[error("Processing was cancelled before frame {0}")]
    Cancelled(i64),
    #[error("Run for color `{0}` is already finished")]
    RunFinished(String),
}

pub(crate) const EPS: f64 = 0.00001;
