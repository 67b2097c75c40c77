use crate::geometry::StereoRig;
use crate::matching::candidates::{Candidate, CandidateSet};
use crate::matching::FrameMatch;
use crate::rods::{Detection, FrameDetections, Orientation, RodRecord};
use crate::utils::linear_sum_assignment::{
    linear_sum_assignment, linear_sum_assignment_with_threshold,
};
use crate::Errors;
use anyhow::Result;
use log::debug;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// How camera-1 detections are paired with camera-2 detections
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingMode {
    /// Pairs are found by optimal assignment on the reprojection error
    #[default]
    Free,
    /// Detection `i` of camera 1 belongs to detection `i` of camera 2, only the endpoint
    /// order is resolved
    Known,
}

/// What happens to detections that find no partner in the other camera
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingRodPolicy {
    /// Unpaired detections are dropped for the frame
    #[default]
    Skip,
    /// Unpaired detections become rods seen by a single camera
    Insert,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairwiseOptions {
    /// Number matched rods `0..n` instead of re-identifying them against the previous frame
    pub renumber: bool,
    pub pairing: PairingMode,
    pub missing: MissingRodPolicy,
    /// Largest 2D distance accepted when re-identifying a rod; `None` accepts any
    pub reidentification_gate: Option<f64>,
}

impl Default for PairwiseOptions {
    fn default() -> Self {
        Self {
            renumber: true,
            pairing: PairingMode::Free,
            missing: MissingRodPolicy::Skip,
            reidentification_gate: None,
        }
    }
}

impl PairwiseOptions {
    pub fn renumber(mut self, renumber: bool) -> Self {
        self.renumber = renumber;
        self
    }

    pub fn pairing(mut self, pairing: PairingMode) -> Self {
        self.pairing = pairing;
        self
    }

    pub fn missing(mut self, missing: MissingRodPolicy) -> Self {
        self.missing = missing;
        self
    }

    pub fn reidentification_gate(mut self, gate: Option<f64>) -> Self {
        self.reidentification_gate = gate;
        self
    }
}

/// Optimal pairs among the given camera-1 rows and camera-2 columns of `candidates`
///
pub(crate) fn assign_subset(
    candidates: &CandidateSet,
    rows: &[usize],
    cols: &[usize],
) -> Vec<(usize, usize)> {
    let costs = DMatrix::from_fn(rows.len(), cols.len(), |r, c| {
        candidates.best(rows[r], cols[c]).cost
    });
    linear_sum_assignment(&costs)
        .pairs()
        .map(|(r, c)| (rows[r], cols[c]))
        .collect()
}

pub(crate) fn single_camera_rod(det: &Detection, first_camera: bool) -> RodRecord {
    let mut rod = RodRecord::unseen(0, "", 0);
    if first_camera {
        rod.cam1 = *det;
        rod.seen1 = true;
    } else {
        rod.cam2 = *det;
        rod.seen2 = true;
    }
    rod
}

/// 2D distance between two rods over the cameras both have seen, minimized over the
/// endpoint order per camera. NaN when no camera is shared.
///
fn image_distance(a: &RodRecord, b: &RodRecord) -> f64 {
    let mut total = 0.0;
    let mut shared = false;
    for (seen_a, seen_b, da, db) in [
        (a.seen1, b.seen1, &a.cam1, &b.cam1),
        (a.seen2, b.seen2, &a.cam2, &b.cam2),
    ] {
        if seen_a && seen_b {
            shared = true;
            total += Orientation::ALL
                .iter()
                .map(|o| da.endpoint_distance(db, *o))
                .fold(f64::NAN, f64::min);
        }
    }
    if shared {
        total
    } else {
        f64::NAN
    }
}

/// Gives the rods of `matched` the ids of their nearest previous rods.
///
/// Rods without a partner (or beyond `gate`) receive fresh ids starting at `next_id`.
///
fn reidentify(
    matched: &mut FrameMatch,
    previous: &[RodRecord],
    next_id: u64,
    gate: Option<f64>,
) {
    let costs = DMatrix::from_fn(matched.rods.len(), previous.len(), |i, k| {
        image_distance(&matched.rods[i], &previous[k])
    });
    let assignment =
        linear_sum_assignment_with_threshold(&costs, gate.unwrap_or(f64::INFINITY));

    let mut fresh = next_id;
    for (i, rod) in matched.rods.iter_mut().enumerate() {
        match assignment.col_of(i) {
            Some(k) => rod.particle = previous[k].particle,
            None => {
                rod.particle = fresh;
                fresh += 1;
            }
        }
    }
}

/// Matches the detections of one frame between both cameras.
///
/// # Parameters
/// * `rig` - stereo setup used for triangulation;
/// * `frame` - detections of the frame, empty detections are ignored;
/// * `previous` - rows of the previous frame, used for re-identification when `renumber` is off;
/// * `next_id` - first fresh particle id for rods that cannot be re-identified;
/// * `options` - matching options.
///
/// Fails with [`Errors::ShapeMismatch`] when pairs are known but the cameras hold different
/// numbers of detections and missing rods are not inserted.
///
pub fn match_frame(
    rig: &StereoRig,
    frame: &FrameDetections,
    previous: Option<&[RodRecord]>,
    next_id: u64,
    options: &PairwiseOptions,
) -> Result<FrameMatch> {
    let mut matched = FrameMatch::default();
    let mut singles = Vec::new();
    let dets = frame.without_empty();

    match (options.pairing, options.missing) {
        (PairingMode::Free, missing) => {
            let candidates = CandidateSet::build(rig, &dets.cam1, &dets.cam2);
            let assignment = linear_sum_assignment(&candidates.cost_matrix());
            let mut paired1 = vec![false; dets.cam1.len()];
            let mut paired2 = vec![false; dets.cam2.len()];
            for (i, j) in assignment.pairs() {
                let best = candidates.best(i, j);
                // unmatchable pairs are only forced by the assignment
                if !best.cost.is_finite() {
                    continue;
                }
                paired1[i] = true;
                paired2[j] = true;
                matched.push(candidates.rod(i, j, best.orientation), best.cost);
            }
            if missing == MissingRodPolicy::Insert {
                singles.extend(
                    (0..dets.cam1.len())
                        .filter(|i| !paired1[*i])
                        .map(|i| single_camera_rod(&dets.cam1[i], true)),
                );
                singles.extend(
                    (0..dets.cam2.len())
                        .filter(|j| !paired2[*j])
                        .map(|j| single_camera_rod(&dets.cam2[j], false)),
                );
            }
        }
        (PairingMode::Known, MissingRodPolicy::Skip) => {
            if dets.cam1.len() != dets.cam2.len() {
                return Err(Errors::ShapeMismatch {
                    cam1: dets.cam1.len(),
                    cam2: dets.cam2.len(),
                }
                .into());
            }
            for (d1, d2) in dets.cam1.iter().zip(dets.cam2.iter()) {
                let best = Candidate::best(rig, d1, d2);
                matched.push(best.rod(d1, d2), best.cost);
            }
        }
        (PairingMode::Known, MissingRodPolicy::Insert) => {
            let rows = frame.cam1.len().max(frame.cam2.len());
            for row in 0..rows {
                let d1 = frame.cam1.get(row).filter(|d| !d.is_empty());
                let d2 = frame.cam2.get(row).filter(|d| !d.is_empty());
                match (d1, d2) {
                    (Some(d1), Some(d2)) => {
                        let best = Candidate::best(rig, d1, d2);
                        matched.push(best.rod(d1, d2), best.cost);
                    }
                    (Some(d1), None) => singles.push(single_camera_rod(d1, true)),
                    (None, Some(d2)) => singles.push(single_camera_rod(d2, false)),
                    (None, None) => {}
                }
            }
        }
    }

    for rod in singles {
        matched.push(rod, f64::NAN);
    }

    match previous {
        Some(previous) if !options.renumber && !previous.is_empty() => {
            reidentify(&mut matched, previous, next_id, options.reidentification_gate)
        }
        _ => {
            for (id, rod) in matched.rods.iter_mut().enumerate() {
                rod.particle = id as u64;
            }
        }
    }
    matched.sort_by_particle();

    debug!(
        "Frame {}: {} x {} detections, {} rods matched",
        frame.frame,
        frame.cam1.len(),
        frame.cam2.len(),
        matched.len()
    );
    Ok(matched)
}
