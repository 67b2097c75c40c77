use crate::geometry::StereoRig;
use crate::matching::pairwise::{self, PairwiseOptions};
use crate::matching::FrameMatch;
use crate::rods::table::RodTable;
use crate::rods::{FrameDetections, RodRecord};
use crate::trackers::tracker_api::{link_to_references, FrameTracker};
use anyhow::Result;
use log::{debug, info};
use nalgebra::{DMatrix, Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub const DEFAULT_SEARCH_RANGE: f64 = 1.0;
pub const DEFAULT_MEMORY: usize = 3;
pub const DEFAULT_MIN_TRACK_LENGTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearestVelocityOptions {
    /// Largest distance between a rod center and the predicted center of a track
    pub search_range: f64,
    /// Number of frames a track may stay unobserved and still be continued
    pub memory: usize,
    /// Tracks observed in fewer frames are removed when the run finishes
    pub min_track_length: usize,
    /// Stereo pairing of every frame
    pub pairwise: PairwiseOptions,
}

impl Default for NearestVelocityOptions {
    fn default() -> Self {
        Self {
            search_range: DEFAULT_SEARCH_RANGE,
            memory: DEFAULT_MEMORY,
            min_track_length: DEFAULT_MIN_TRACK_LENGTH,
            pairwise: PairwiseOptions::default(),
        }
    }
}

impl NearestVelocityOptions {
    pub fn search_range(mut self, search_range: f64) -> Self {
        self.search_range = search_range;
        self
    }

    pub fn memory(mut self, memory: usize) -> Self {
        self.memory = memory;
        self
    }

    pub fn min_track_length(mut self, min_track_length: usize) -> Self {
        self.min_track_length = min_track_length;
        self
    }
}

#[derive(Debug, Clone)]
struct Motion {
    center: Point3<f64>,
    velocity: Vector3<f64>,
    frame: i64,
    rod: RodRecord,
}

/// Links rod centers to the nearest predicted track position.
///
/// The prediction is the last center moved by the last velocity for every frame since the
/// track was observed. Tracks unobserved for more than `memory` frames are not continued.
///
#[derive(Debug, Clone, Default)]
pub struct NearestVelocityTracker {
    opts: NearestVelocityOptions,
    tracks: HashMap<u64, Motion>,
    next_id: u64,
}

impl NearestVelocityTracker {
    pub fn new(opts: NearestVelocityOptions) -> Self {
        Self {
            opts,
            tracks: HashMap::default(),
            next_id: 0,
        }
    }

    fn is_alive(&self, motion: &Motion, frame: i64) -> bool {
        frame - motion.frame <= self.opts.memory as i64 + 1
    }

    /// Predicted centers and last rods of the tracks that may continue in `frame`
    fn active(&self, frame: i64) -> (Vec<Point3<f64>>, Vec<RodRecord>) {
        let mut active = self
            .tracks
            .iter()
            .filter(|(_, m)| self.is_alive(m, frame))
            .collect::<Vec<_>>();
        active.sort_by_key(|(id, _)| **id);
        active
            .into_iter()
            .map(|(_, m)| {
                let gap = (frame - m.frame) as f64;
                (m.center + m.velocity * gap, m.rod.clone())
            })
            .unzip()
    }

    /// Drops tracks that can no longer be continued after `frame`
    fn evict(&mut self, frame: i64) {
        let memory = self.opts.memory as i64;
        self.tracks.retain(|_, m| frame + 1 - m.frame <= memory + 1);
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }
}

impl FrameTracker for NearestVelocityTracker {
    fn name(&self) -> &'static str {
        "nearest_velocity"
    }

    fn track(
        &mut self,
        rig: &StereoRig,
        table: &RodTable,
        frame: &FrameDetections,
    ) -> Result<FrameMatch> {
        let pairing = self.opts.pairwise.renumber(true);
        let paired = pairwise::match_frame(rig, frame, None, 0, &pairing)?;
        let mut stereo = FrameMatch::default();
        for (rod, cost) in paired.rods.into_iter().zip(paired.costs) {
            if rod.has_position() {
                stereo.push(rod, cost);
            }
        }

        let (predicted, references) = self.active(frame.frame);
        let costs = DMatrix::from_fn(stereo.rods.len(), predicted.len(), |i, k| {
            (stereo.rods[i].center() - predicted[k]).norm()
        });
        let next_id = table
            .next_particle_id()
            .max(self.next_id);
        let (linked, _) = link_to_references(
            stereo,
            &references,
            &costs,
            self.opts.search_range,
            next_id,
            |rod, reference| reference.endpoint_displacement(rod).1,
        );

        for rod in &linked.rods {
            let center = rod.center();
            let motion = match self.tracks.get(&rod.particle) {
                Some(m) => Motion {
                    center,
                    velocity: (center - m.center) / (frame.frame - m.frame) as f64,
                    frame: frame.frame,
                    rod: rod.clone(),
                },
                None => Motion {
                    center,
                    velocity: Vector3::zeros(),
                    frame: frame.frame,
                    rod: rod.clone(),
                },
            };
            self.next_id = self.next_id.max(rod.particle + 1);
            self.tracks.insert(rod.particle, motion);
        }
        self.evict(frame.frame);
        debug!(
            "Frame {}: {} rods linked against {} active tracks",
            frame.frame,
            linked.len(),
            references.len()
        );
        Ok(linked)
    }

    fn finish(&mut self, table: &mut RodTable) -> Result<usize> {
        let mut observed: HashMap<u64, usize> = HashMap::new();
        for r in table.rows().iter().filter(|r| r.is_seen()) {
            *observed.entry(r.particle).or_default() += 1;
        }
        let short = table
            .particles()
            .filter(|p| observed.get(p).copied().unwrap_or(0) < self.opts.min_track_length)
            .collect::<BTreeSet<_>>();
        let removed = table.retain_particles(|p| !short.contains(&p));
        info!(
            "Color {}: {} tracks shorter than {} frames removed",
            table.color(),
            removed,
            self.opts.min_track_length
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use crate::geometry::StereoRig;
    use crate::rods::table::RodTable;
    use crate::test_stuff::{synthetic_calibration, SyntheticScene};
    use crate::trackers::nearest_velocity::{NearestVelocityOptions, NearestVelocityTracker};
    use crate::trackers::tracker_api::FrameTracker;
    use nalgebra::Vector3;

    #[test]
    fn follows_moving_rods_through_occlusion() {
        let rig = StereoRig::new(synthetic_calibration(), None).unwrap();
        let scene = SyntheticScene::new(3);
        let velocity = Vector3::new(3.0, 0.5, 0.0);
        let opts = NearestVelocityOptions::default()
            .search_range(4.0)
            .min_track_length(4);
        let mut tracker = NearestVelocityTracker::new(opts);
        let mut table = RodTable::new("blue");

        for f in 0..8i64 {
            let mut frame = scene
                .translated(&(velocity * f as f64))
                .noisy_frame(&rig, f, 0.0, f as u64);
            if f == 4 {
                // rod seen by camera 1 only: no stereo match for one frame
                frame.cam2.pop();
            }
            let m = tracker.track(&rig, &table, &frame).unwrap();
            table.push_frame(f, m.rods).unwrap();
        }
        assert_eq!(table.particles().count(), 3);
        assert_eq!(table.len(), 24);
        assert_eq!(table.rows().iter().filter(|r| !r.is_seen()).count(), 1);
        for p in table.particles().collect::<Vec<_>>() {
            let ys = table
                .track(p)
                .filter(|r| r.is_seen())
                .map(|r| r.center().y - 0.5 * r.frame as f64)
                .collect::<Vec<_>>();
            assert!(ys.iter().all(|y| (y - ys[0]).abs() < 1e-3));
        }
        assert_eq!(tracker.finish(&mut table).unwrap(), 0);
        assert_eq!(table.particles().count(), 3);
    }

    #[test]
    fn short_tracks_are_removed() {
        let rig = StereoRig::new(synthetic_calibration(), None).unwrap();
        let opts = NearestVelocityOptions::default().search_range(2.0);
        let mut tracker = NearestVelocityTracker::new(opts);
        let mut table = RodTable::new("blue");
        for f in 0..6i64 {
            let n = if f < 2 { 2 } else { 1 };
            let frame = SyntheticScene::new(n)
                .moved(0.2 * f as f64)
                .noisy_frame(&rig, f, 0.0, 0);
            let m = tracker.track(&rig, &table, &frame).unwrap();
            table.push_frame(f, m.rods).unwrap();
            // the second rod was last seen in frame 1 and stays linkable up to frame 5
            let live = if f < 5 { 2 } else { 1 };
            assert_eq!(tracker.live_tracks(), live, "frame {}", f);
        }
        assert_eq!(table.particles().count(), 2);
        assert_eq!(tracker.finish(&mut table).unwrap(), 1);
        let kept = table.particles().collect::<Vec<_>>();
        assert_eq!(kept.len(), 1);
        assert_eq!(table.track(kept[0]).filter(|r| r.is_seen()).count(), 6);
        assert_eq!(table.len(), 6);
    }
}
