use crate::geometry::StereoRig;
use crate::matching::FrameMatch;
use crate::rods::table::RodTable;
use crate::rods::{FrameDetections, RodRecord};
use crate::utils::linear_sum_assignment::linear_sum_assignment_with_threshold;
use anyhow::Result;
use nalgebra::DMatrix;

/// Frame-by-frame identity resolution for a single color.
///
/// `track` receives the frames in strictly increasing order together with the table
/// holding every row produced so far. It returns the rods found in the frame with their
/// particle ids set; the caller stores them in the table.
///
pub trait FrameTracker: Send {
    fn name(&self) -> &'static str;

    fn track(
        &mut self,
        rig: &StereoRig,
        table: &RodTable,
        frame: &FrameDetections,
    ) -> Result<FrameMatch>;

    /// Called once after the last frame. May remove particles from `table`, returns the
    /// number of removed particles.
    ///
    fn finish(&mut self, _table: &mut RodTable) -> Result<usize> {
        Ok(0)
    }
}

/// Gives the rods of `current` the ids of `references` by optimal assignment on `costs`
/// (`current x references`).
///
/// Pairs above `threshold` are not linked. Linked rods are flipped when `flip(rod, reference)`
/// says so, unlinked rods get fresh ids starting at `next_id`. Returns the summed cost of
/// the linked pairs alongside the result.
///
pub(crate) fn link_to_references<F>(
    current: FrameMatch,
    references: &[RodRecord],
    costs: &DMatrix<f64>,
    threshold: f64,
    next_id: u64,
    flip: F,
) -> (FrameMatch, f64)
where
    F: Fn(&RodRecord, &RodRecord) -> bool,
{
    let assignment = linear_sum_assignment_with_threshold(costs, threshold);
    let mut fresh = next_id;
    let mut result = FrameMatch::default();
    for (i, (mut rod, cost)) in current.rods.into_iter().zip(current.costs).enumerate() {
        match assignment.col_of(i) {
            Some(k) => {
                if flip(&rod, &references[k]) {
                    rod = rod.flipped();
                }
                rod.particle = references[k].particle;
            }
            None => {
                rod.particle = fresh;
                fresh += 1;
            }
        }
        result.push(rod, cost);
    }
    result.sort_by_particle();
    (result, assignment.total_cost())
}
