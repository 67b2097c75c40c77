use crate::matching::npartite::NPartiteOptions;
use crate::matching::pairwise::PairwiseOptions;
use crate::trackers::global_assignment::{GlobalAssignmentOptions, GlobalAssignmentTracker};
use crate::trackers::nearest_velocity::{NearestVelocityOptions, NearestVelocityTracker};
use crate::trackers::stereo::{NPartiteTracker, PairwiseTracker};
use crate::trackers::tracker_api::FrameTracker;
use serde::{Deserialize, Serialize};

/// Per-color worker pool running whole datasets
pub mod batch;

/// Frame-to-frame assignment on endpoint displacement
pub mod global_assignment;

/// Velocity predicting nearest-neighbour linker with memory
pub mod nearest_velocity;

/// Run state of a single color
pub mod session;

/// Trackers built directly on the stereo matchers
pub mod stereo;

/// Common tracker interface
pub mod tracker_api;

/// Tracking strategy and its options, selected by configuration
///
/// ```json
/// {"kind": "npartite", "max_displacement": 5.0}
/// ```
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackerKind {
    Pairwise(PairwiseOptions),
    #[serde(rename = "npartite")]
    NPartite(NPartiteOptions),
    NearestVelocity(NearestVelocityOptions),
    GlobalAssignment(GlobalAssignmentOptions),
}

impl Default for TrackerKind {
    fn default() -> Self {
        TrackerKind::NPartite(NPartiteOptions::default())
    }
}

impl TrackerKind {
    pub fn build(&self) -> Box<dyn FrameTracker> {
        match self {
            TrackerKind::Pairwise(opts) => Box::new(PairwiseTracker::new(*opts)),
            TrackerKind::NPartite(opts) => Box::new(NPartiteTracker::new(*opts)),
            TrackerKind::NearestVelocity(opts) => Box::new(NearestVelocityTracker::new(*opts)),
            TrackerKind::GlobalAssignment(opts) => Box::new(GlobalAssignmentTracker::new(*opts)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::matching::npartite::WeightCombination;
    use crate::trackers::TrackerKind;

    #[test]
    fn kind_from_json() {
        let kind: TrackerKind = serde_json::from_str(r#"{"kind": "npartite"}"#).unwrap();
        assert_eq!(kind, TrackerKind::default());
        assert_eq!(kind.build().name(), "npartite");

        let kind: TrackerKind = serde_json::from_str(
            r#"{"kind": "npartite", "combination": "product", "max_displacement": 5.0}"#,
        )
        .unwrap();
        match kind {
            TrackerKind::NPartite(opts) => {
                assert_eq!(opts.combination, WeightCombination::Product);
                assert_eq!(opts.max_displacement, Some(5.0));
                assert!(opts.pairwise.renumber);
            }
            other => panic!("unexpected {:?}", other),
        }

        let kind: TrackerKind =
            serde_json::from_str(r#"{"kind": "nearest_velocity", "search_range": 2.5}"#).unwrap();
        assert_eq!(kind.build().name(), "nearest_velocity");

        let kind: TrackerKind = serde_json::from_str(
            r#"{"kind": "pairwise", "renumber": false, "pairing": "known", "missing": "insert"}"#,
        )
        .unwrap();
        assert_eq!(kind.build().name(), "pairwise");

        assert!(serde_json::from_str::<TrackerKind>(r#"{"kind": "kalman"}"#).is_err());
    }
}
