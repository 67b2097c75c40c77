use crate::geometry::StereoRig;
use crate::matching::pairwise::{self, PairwiseOptions};
use crate::matching::FrameMatch;
use crate::rods::table::RodTable;
use crate::rods::FrameDetections;
use crate::trackers::tracker_api::{link_to_references, FrameTracker};
use anyhow::Result;
use log::info;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalAssignmentOptions {
    /// Transitions with a larger endpoint displacement are not linked
    pub max_displacement: Option<f64>,
    pub pairwise: PairwiseOptions,
}

/// One optimal assignment per frame transition on the endpoint displacement between the
/// rods of consecutive frames.
///
#[derive(Debug, Clone, Default)]
pub struct GlobalAssignmentTracker {
    opts: GlobalAssignmentOptions,
    total_cost: f64,
    transitions: usize,
}

impl GlobalAssignmentTracker {
    pub fn new(opts: GlobalAssignmentOptions) -> Self {
        Self {
            opts,
            ..Default::default()
        }
    }

    /// Summed displacement of all linked rods so far
    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }
}

impl FrameTracker for GlobalAssignmentTracker {
    fn name(&self) -> &'static str {
        "global_assignment"
    }

    fn track(
        &mut self,
        rig: &StereoRig,
        table: &RodTable,
        frame: &FrameDetections,
    ) -> Result<FrameMatch> {
        let pairing = self.opts.pairwise.renumber(true);
        let current = pairwise::match_frame(rig, frame, None, 0, &pairing)?;
        let previous = table
            .last_frame_rows()
            .iter()
            .filter(|r| r.has_position())
            .cloned()
            .collect::<Vec<_>>();

        let costs = DMatrix::from_fn(current.len(), previous.len(), |i, k| {
            current.rods[i].endpoint_displacement(&previous[k]).0
        });
        let (linked, cost) = link_to_references(
            current,
            &previous,
            &costs,
            self.opts.max_displacement.unwrap_or(f64::INFINITY),
            table.next_particle_id(),
            |rod, reference| reference.endpoint_displacement(rod).1,
        );
        if !previous.is_empty() {
            self.total_cost += cost;
            self.transitions += 1;
        }
        Ok(linked)
    }

    fn finish(&mut self, table: &mut RodTable) -> Result<usize> {
        info!(
            "Color {}: total assignment cost {:.3} over {} transitions",
            table.color(),
            self.total_cost,
            self.transitions
        );
        Ok(0)
    }
}
