use crate::rods::RodRecord;

/// Triangulated candidate segments for every camera-1 x camera-2 detection pair
pub mod candidates;

/// Joint matching of previous identities and both cameras
pub mod npartite;

/// Camera-1 to camera-2 matching by reprojection error
pub mod pairwise;

/// Rods matched in one frame of one color.
///
/// `costs[k]` is the summed endpoint reprojection error of `rods[k]`, NaN for rods seen
/// by a single camera.
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameMatch {
    pub rods: Vec<RodRecord>,
    pub costs: Vec<f64>,
}

impl FrameMatch {
    pub fn len(&self) -> usize {
        self.rods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rods.is_empty()
    }

    pub fn lengths(&self) -> Vec<f64> {
        self.rods.iter().map(|r| r.length()).collect()
    }

    /// Sum of the finite assignment costs
    pub fn total_cost(&self) -> f64 {
        self.costs.iter().filter(|c| c.is_finite()).sum()
    }

    pub(crate) fn push(&mut self, rod: RodRecord, cost: f64) {
        self.rods.push(rod);
        self.costs.push(cost);
    }

    pub(crate) fn sort_by_particle(&mut self) {
        let mut pairs = self
            .rods
            .drain(..)
            .zip(self.costs.drain(..))
            .collect::<Vec<_>>();
        pairs.sort_by_key(|(r, _)| r.particle);
        let (rods, costs) = pairs.into_iter().unzip();
        self.rods = rods;
        self.costs = costs;
    }
}
