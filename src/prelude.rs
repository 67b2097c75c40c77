use crate::geometry;
use crate::matching;
use crate::rods;
use crate::trackers;
use crate::utils;

pub use geometry::calibration::StereoCalibration;
pub use geometry::distortion::Distortion;
pub use geometry::world::WorldTransformation;
pub use geometry::{project_points, reproject_points, StereoRig};

pub use matching::candidates::{Candidate, CandidateSet};
pub use matching::npartite::{
    create_weights, npartite_matching, npartite_matching_with_order, NPartiteOptions,
    WeightCombination,
};
pub use matching::pairwise::{MissingRodPolicy, PairingMode, PairwiseOptions};
pub use matching::FrameMatch;

pub use rods::csv_io::{read_detections, read_rod_csv, RodCsvWriter, RodFile};
pub use rods::table::RodTable;
pub use rods::{Detection, FrameDetections, Orientation, RodRecord};

pub use trackers::batch::{assign, AssignOptions, ColorReport};
pub use trackers::session::{ColorRun, FrameSummary, RunState, Session};
pub use trackers::tracker_api::FrameTracker;
pub use trackers::TrackerKind;

pub use utils::configure_logging;
pub use utils::cost_tensor::CostTensor;
pub use utils::linear_sum_assignment::{linear_sum_assignment, Assignment};
