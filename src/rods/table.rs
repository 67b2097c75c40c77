use crate::rods::RodRecord;
use crate::Errors;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

/// Rod records of a single color, appended frame by frame.
///
/// Once a particle id is present, every following frame holds exactly one row for it:
/// either its measured values or an unseen placeholder.
///
#[derive(Debug, Clone, Default)]
pub struct RodTable {
    color: String,
    rows: Vec<RodRecord>,
    last_frame: Option<i64>,
    last_frame_start: usize,
    particles: BTreeSet<u64>,
    last_positions: BTreeMap<u64, RodRecord>,
}

impl RodTable {
    pub fn new(color: &str) -> Self {
        Self {
            color: color.to_string(),
            ..Default::default()
        }
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn rows(&self) -> &[RodRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last_frame(&self) -> Option<i64> {
        self.last_frame
    }

    pub fn particles(&self) -> impl Iterator<Item = u64> + '_ {
        self.particles.iter().copied()
    }

    /// Appends the rods found in `frame`.
    ///
    /// Frames must be strictly increasing. Known particles missing from `rods` get an
    /// unseen row. Returns the rows stored for the frame, sorted by particle id.
    ///
    pub fn push_frame(&mut self, frame: i64, rods: Vec<RodRecord>) -> Result<&[RodRecord]> {
        if let Some(previous) = self.last_frame {
            if frame <= previous {
                return Err(Errors::FrameOrder {
                    previous,
                    current: frame,
                }
                .into());
            }
        }

        let mut seen = BTreeSet::new();
        for r in &rods {
            if !seen.insert(r.particle) {
                return Err(Errors::DuplicateParticle {
                    frame,
                    particle: r.particle,
                }
                .into());
            }
        }

        let mut frame_rows = rods
            .into_iter()
            .map(|mut r| {
                r.frame = frame;
                r.color = self.color.clone();
                r
            })
            .collect::<Vec<_>>();

        frame_rows.extend(
            self.particles
                .difference(&seen)
                .map(|p| RodRecord::unseen(frame, &self.color, *p)),
        );
        frame_rows.sort_by_key(|r| r.particle);

        for r in frame_rows.iter().filter(|r| r.has_position()) {
            self.last_positions.insert(r.particle, r.clone());
        }
        self.particles.extend(seen);
        self.last_frame = Some(frame);
        self.last_frame_start = self.rows.len();
        self.rows.extend(frame_rows);
        Ok(&self.rows[self.last_frame_start..])
    }

    /// Rows of the most recently pushed frame
    pub fn last_frame_rows(&self) -> &[RodRecord] {
        &self.rows[self.last_frame_start..]
    }

    /// Last known position of every particle, sorted by particle id.
    ///
    /// Particles never seen with a valid 3D position are left out.
    ///
    pub fn reference_rods(&self) -> Vec<RodRecord> {
        self.last_positions.values().cloned().collect()
    }

    /// Smallest particle id larger than every id in use
    ///
    pub fn next_particle_id(&self) -> u64 {
        self.particles.iter().next_back().map(|p| p + 1).unwrap_or(0)
    }

    pub fn frame_rows(&self, frame: i64) -> impl Iterator<Item = &RodRecord> + '_ {
        self.rows.iter().filter(move |r| r.frame == frame)
    }

    /// All rows of `particle` in frame order
    pub fn track(&self, particle: u64) -> impl Iterator<Item = &RodRecord> + '_ {
        self.rows.iter().filter(move |r| r.particle == particle)
    }

    /// Removes every row of the particles for which `keep` is false
    ///
    pub fn retain_particles<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(u64) -> bool,
    {
        let removed = self
            .particles
            .iter()
            .copied()
            .filter(|p| !keep(*p))
            .collect::<BTreeSet<_>>();
        if removed.is_empty() {
            return 0;
        }

        let last_frame = self.last_frame;
        self.rows.retain(|r| !removed.contains(&r.particle));
        self.particles.retain(|p| !removed.contains(p));
        self.last_positions.retain(|p, _| !removed.contains(p));
        self.last_frame_start = self
            .rows
            .iter()
            .position(|r| Some(r.frame) == last_frame)
            .unwrap_or(self.rows.len());
        removed.len()
    }
}
