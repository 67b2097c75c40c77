use crate::geometry::StereoRig;
use crate::matching::npartite::{self, NPartiteOptions};
use crate::matching::pairwise::{self, PairwiseOptions};
use crate::matching::FrameMatch;
use crate::rods::table::RodTable;
use crate::rods::FrameDetections;
use crate::trackers::tracker_api::FrameTracker;
use anyhow::Result;

/// Pairs the cameras frame by frame; identities come from 2D re-identification against
/// the previous frame unless the options ask for renumbering
///
#[derive(Debug, Clone, Default)]
pub struct PairwiseTracker {
    opts: PairwiseOptions,
}

impl PairwiseTracker {
    pub fn new(opts: PairwiseOptions) -> Self {
        Self { opts }
    }
}

impl FrameTracker for PairwiseTracker {
    fn name(&self) -> &'static str {
        "pairwise"
    }

    fn track(
        &mut self,
        rig: &StereoRig,
        table: &RodTable,
        frame: &FrameDetections,
    ) -> Result<FrameMatch> {
        let previous = table.last_frame_rows();
        pairwise::match_frame(
            rig,
            frame,
            (!previous.is_empty()).then_some(previous),
            table.next_particle_id(),
            &self.opts,
        )
    }
}

/// Matches the last known rods, camera 1 and camera 2 jointly
///
#[derive(Debug, Clone, Default)]
pub struct NPartiteTracker {
    opts: NPartiteOptions,
}

impl NPartiteTracker {
    pub fn new(opts: NPartiteOptions) -> Self {
        Self { opts }
    }
}

impl FrameTracker for NPartiteTracker {
    fn name(&self) -> &'static str {
        "npartite"
    }

    fn track(
        &mut self,
        rig: &StereoRig,
        table: &RodTable,
        frame: &FrameDetections,
    ) -> Result<FrameMatch> {
        npartite::match_frame(rig, frame, table, &self.opts)
    }
}

#[cfg(test)]
mod tests {
    use crate::geometry::StereoRig;
    use crate::matching::pairwise::PairwiseOptions;
    use crate::rods::table::RodTable;
    use crate::test_stuff::{synthetic_calibration, SyntheticScene};
    use crate::trackers::stereo::{NPartiteTracker, PairwiseTracker};
    use crate::trackers::tracker_api::FrameTracker;

    fn run(tracker: &mut dyn FrameTracker, frames: usize) -> RodTable {
        let rig = StereoRig::new(synthetic_calibration(), None).unwrap();
        let scene = SyntheticScene::new(4);
        let mut table = RodTable::new("red");
        for f in 0..frames {
            let frame = scene
                .moved(0.4 * f as f64)
                .noisy_frame(&rig, f as i64, 0.05, f as u64);
            let m = tracker.track(&rig, &table, &frame).unwrap();
            assert_eq!(m.len(), 4);
            table.push_frame(f as i64, m.rods).unwrap();
        }
        table
    }

    fn assert_consistent(table: &RodTable) {
        for p in table.particles() {
            let xs = table.track(p).map(|r| r.center().y).collect::<Vec<_>>();
            assert!(xs.iter().all(|y| (y - xs[0]).abs() < 1.0), "particle {} jumps", p);
        }
    }

    #[test]
    fn npartite_keeps_identities() {
        let mut tracker = NPartiteTracker::default();
        assert_eq!(tracker.name(), "npartite");
        let table = run(&mut tracker, 5);
        assert_eq!(table.particles().count(), 4);
        assert_eq!(table.len(), 20);
        assert_consistent(&table);
    }

    #[test]
    fn pairwise_reidentifies() {
        let mut tracker = PairwiseTracker::new(PairwiseOptions::default().renumber(false));
        let table = run(&mut tracker, 5);
        assert_eq!(table.particles().count(), 4);
        assert_consistent(&table);
    }
}
