use crate::geometry::StereoRig;
use crate::matching::candidates::CandidateSet;
use crate::matching::pairwise::{
    self, assign_subset, single_camera_rod, MissingRodPolicy, PairwiseOptions,
};
use crate::matching::FrameMatch;
use crate::rods::table::RodTable;
use crate::rods::{FrameDetections, Orientation, RodRecord};
use crate::utils::cost_tensor::CostTensor;
use crate::utils::linear_sum_assignment::linear_sum_assignment;
use crate::Errors;
use anyhow::Result;
use log::debug;
use nalgebra::Point3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// How the temporal (3D displacement) and geometric (reprojection error) weights of a
/// candidate are merged into one assignment cost
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightCombination {
    /// `temporal * t + geometric * g`
    Sum { temporal: f64, geometric: f64 },
    /// `t * g`
    Product,
}

impl Default for WeightCombination {
    fn default() -> Self {
        WeightCombination::Sum {
            temporal: 1.0,
            geometric: 1.0,
        }
    }
}

impl WeightCombination {
    pub fn combine(&self, temporal: f64, geometric: f64) -> f64 {
        match self {
            WeightCombination::Sum {
                temporal: wt,
                geometric: wg,
            } => wt * temporal + wg * geometric,
            WeightCombination::Product => temporal * geometric,
        }
    }
}

/// Endpoint handling chosen for a `(previous, cam1, cam2)` triple
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointChoice {
    /// Orientation of the camera-2 detection
    pub orientation: Orientation,
    /// The triangulated segment has to be reversed to line up with the previous rod
    pub flip: bool,
}

/// Weights of every `(previous, cam1, cam2)` triple
///
#[derive(Debug, Clone)]
pub struct CandidateWeights {
    pub temporal: CostTensor,
    pub geometric: CostTensor,
    pub combined: CostTensor,
    choices: Vec<EndpointChoice>,
    shape: [usize; 3],
}

impl CandidateWeights {
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn choice(&self, k: usize, i: usize, j: usize) -> EndpointChoice {
        let [_, n1, n2] = self.shape;
        self.choices[(k * n1 + i) * n2 + j]
    }
}

struct Weight {
    temporal: f64,
    geometric: f64,
    combined: f64,
    choice: EndpointChoice,
}

fn segment_distance(a1: &Point3<f64>, a2: &Point3<f64>, prev: &RodRecord) -> (f64, bool) {
    let same = (a1 - prev.p1).norm() + (a2 - prev.p2).norm();
    let swapped = (a1 - prev.p2).norm() + (a2 - prev.p1).norm();
    if swapped < same {
        (swapped, true)
    } else {
        (same, false)
    }
}

fn lower(a: f64, b: f64) -> bool {
    !a.is_nan() && (b.is_nan() || a <= b)
}

/// Builds the weight tensors of shape `(previous, cam1, cam2)`.
///
/// The temporal weight is the summed 3D endpoint distance between a candidate and a
/// previous rod, minimized over both endpoint orders. The geometric weight is the
/// candidate's reprojection error. Per triple the camera-2 orientation with the lower
/// combined weight is kept.
///
pub fn create_weights(
    candidates: &CandidateSet,
    previous: &[RodRecord],
    combination: WeightCombination,
) -> Result<CandidateWeights> {
    let (n1, n2) = candidates.shape();
    let shape = [previous.len(), n1, n2];

    let weights = (0..previous.len() * n1 * n2)
        .into_par_iter()
        .map(|flat| {
            let (k, i, j) = (flat / (n1 * n2), (flat / n2) % n1, flat % n2);
            let prev = &previous[k];
            Orientation::ALL
                .iter()
                .map(|o| {
                    let c = candidates.get(i, j, *o);
                    let (temporal, flip) = segment_distance(&c.p1, &c.p2, prev);
                    Weight {
                        temporal,
                        geometric: c.cost,
                        combined: combination.combine(temporal, c.cost),
                        choice: EndpointChoice {
                            orientation: *o,
                            flip,
                        },
                    }
                })
                .reduce(|a, b| if lower(a.combined, b.combined) { a } else { b })
                .unwrap_or(Weight {
                    temporal: f64::NAN,
                    geometric: f64::NAN,
                    combined: f64::NAN,
                    choice: EndpointChoice {
                        orientation: Orientation::Straight,
                        flip: false,
                    },
                })
        })
        .collect::<Vec<_>>();

    let tensor =
        |f: fn(&Weight) -> f64| CostTensor::new(shape.to_vec(), weights.iter().map(f).collect());
    Ok(CandidateWeights {
        temporal: tensor(|w| w.temporal)?,
        geometric: tensor(|w| w.geometric)?,
        combined: tensor(|w| w.combined)?,
        choices: weights.iter().map(|w| w.choice).collect(),
        shape,
    })
}

/// Matches the axes of `weights` jointly.
///
/// Axis 0 is paired with axis 1 by a 2D assignment on the costs minimized over all
/// remaining axes. The matched pairs form a new leading axis that is paired with axis 2
/// the same way, and so on. Returns one index array per axis, each of length
/// `min(shape)`; entry `m` of every array belongs to the same matched tuple.
///
pub fn npartite_matching(weights: &CostTensor) -> Result<Vec<Vec<usize>>> {
    if weights.ndim() < 2 {
        return Err(Errors::InvalidTensor(format!(
            "matching requires at least 2 axes, got shape {:?}",
            weights.shape()
        ))
        .into());
    }

    let mut tuples = (0..weights.shape()[0]).map(|i| vec![i]).collect::<Vec<_>>();
    let mut current = weights.clone();
    loop {
        let assignment = linear_sum_assignment(&current.min_over_trailing()?);
        tuples = assignment
            .pairs()
            .map(|(r, c)| {
                let mut t = tuples[r].clone();
                t.push(c);
                t
            })
            .collect();
        if current.ndim() == 2 {
            break;
        }
        current = current.collapse_leading(&assignment.pairs().collect::<Vec<_>>())?;
    }

    Ok((0..weights.ndim())
        .map(|axis| tuples.iter().map(|t| t[axis]).collect())
        .collect())
}

/// Same as [`npartite_matching`] but axes are collapsed in the given order
///
pub fn npartite_matching_with_order(
    weights: &CostTensor,
    order: &[usize],
) -> Result<Vec<Vec<usize>>> {
    let matched = npartite_matching(&weights.permuted(order)?)?;
    let mut result = vec![Vec::new(); order.len()];
    for (k, axis) in order.iter().enumerate() {
        result[*axis] = matched[k].clone();
    }
    Ok(result)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NPartiteOptions {
    pub combination: WeightCombination,
    /// Matches with a larger temporal weight are rejected; the rod is treated as lost
    pub max_displacement: Option<f64>,
    /// Used for frames without reference rods and for surplus detections
    pub pairwise: PairwiseOptions,
}

impl NPartiteOptions {
    pub fn combination(mut self, combination: WeightCombination) -> Self {
        self.combination = combination;
        self
    }

    pub fn max_displacement(mut self, limit: Option<f64>) -> Self {
        self.max_displacement = limit;
        self
    }

    pub fn pairwise(mut self, options: PairwiseOptions) -> Self {
        self.pairwise = options;
        self
    }
}

/// Matches one frame against the last known rods of `table`.
///
/// Matched rods inherit the particle id of their reference rod and are oriented like it.
/// Detections left over are paired between the cameras and receive fresh ids. Reference
/// rods without a match are not part of the result.
///
pub fn match_frame(
    rig: &StereoRig,
    frame: &FrameDetections,
    table: &RodTable,
    options: &NPartiteOptions,
) -> Result<FrameMatch> {
    let previous = table.reference_rods();
    let mut next_id = table.next_particle_id();

    if previous.is_empty() {
        let pairwise_options = options.pairwise.renumber(true);
        let mut matched = pairwise::match_frame(rig, frame, None, 0, &pairwise_options)?;
        for rod in matched.rods.iter_mut() {
            rod.particle += next_id;
        }
        return Ok(matched);
    }

    let dets = frame.without_empty();
    let candidates = CandidateSet::build(rig, &dets.cam1, &dets.cam2);
    let weights = create_weights(&candidates, &previous, options.combination)?;
    let tuples = npartite_matching(&weights.combined)?;

    let mut result = FrameMatch::default();
    let mut used1 = vec![false; dets.cam1.len()];
    let mut used2 = vec![false; dets.cam2.len()];
    for m in 0..tuples[0].len() {
        let (k, i, j) = (tuples[0][m], tuples[1][m], tuples[2][m]);
        let idx = [k, i, j];
        let combined = weights.combined.get(&idx).unwrap_or(f64::NAN);
        let temporal = weights.temporal.get(&idx).unwrap_or(f64::NAN);
        if !combined.is_finite() {
            continue;
        }
        if let Some(limit) = options.max_displacement {
            if temporal > limit {
                debug!(
                    "Frame {}: particle {} moved {:.3} > {:.3}, match rejected",
                    frame.frame, previous[k].particle, temporal, limit
                );
                continue;
            }
        }

        let choice = weights.choice(k, i, j);
        let candidate = candidates.get(i, j, choice.orientation);
        let mut rod = candidates.rod(i, j, choice.orientation);
        if choice.flip {
            rod = rod.flipped();
        }
        rod.particle = previous[k].particle;
        result.push(rod, candidate.cost);
        used1[i] = true;
        used2[j] = true;
    }

    let rows = (0..used1.len()).filter(|i| !used1[*i]).collect::<Vec<_>>();
    let cols = (0..used2.len()).filter(|j| !used2[*j]).collect::<Vec<_>>();
    for (i, j) in assign_subset(&candidates, &rows, &cols) {
        let best = candidates.best(i, j);
        if !best.cost.is_finite() {
            continue;
        }
        let mut rod = candidates.rod(i, j, best.orientation);
        rod.particle = next_id;
        next_id += 1;
        result.push(rod, best.cost);
        used1[i] = true;
        used2[j] = true;
    }

    if options.pairwise.missing == MissingRodPolicy::Insert {
        let singles = rows
            .iter()
            .filter(|i| !used1[**i])
            .map(|i| single_camera_rod(&dets.cam1[*i], true))
            .chain(
                cols.iter()
                    .filter(|j| !used2[**j])
                    .map(|j| single_camera_rod(&dets.cam2[*j], false)),
            )
            .collect::<Vec<_>>();
        for mut rod in singles {
            rod.particle = next_id;
            next_id += 1;
            result.push(rod, f64::NAN);
        }
    }

    result.sort_by_particle();
    debug!(
        "Frame {}: {} reference rods, {} x {} detections, {} rods matched",
        frame.frame,
        previous.len(),
        dets.cam1.len(),
        dets.cam2.len(),
        result.len()
    );
    Ok(result)
}
