use crate::geometry::calibration::StereoCalibration;
use crate::geometry::world::WorldTransformation;
use crate::geometry::StereoRig;
use crate::matching::FrameMatch;
use crate::rods::csv_io::{RodCsvWriter, RodFile};
use crate::rods::table::RodTable;
use crate::rods::FrameDetections;
use crate::trackers::tracker_api::FrameTracker;
use crate::trackers::TrackerKind;
use crate::Errors;
use anyhow::Result;
use log::{debug, info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_CAMERAS: (&str, &str) = ("gp1", "gp2");

/// Run state of a color: `Idle -> Running -> Done`
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running { frame: i64 },
    Done,
}

/// Diagnostics of one processed frame
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameSummary {
    pub frame: i64,
    /// Rows stored for the frame, unseen placeholders included
    pub rows: usize,
    /// Rods found in the frame
    pub matched: usize,
    /// Reprojection error per matched rod
    pub costs: Vec<f64>,
    pub lengths: Vec<f64>,
    /// The frame was dropped because the detections could not be paired
    pub skipped: bool,
}

/// Read-only inputs shared by every color of a dataset.
///
/// Replaces any notion of a global "current dataset": everything a color run needs is
/// handed over explicitly.
///
#[derive(Debug, Clone)]
pub struct Session {
    rig: Arc<StereoRig>,
    tracker: TrackerKind,
    cam1: String,
    cam2: String,
}

impl Session {
    pub fn new(rig: StereoRig, tracker: TrackerKind) -> Self {
        Self {
            rig: Arc::new(rig),
            tracker,
            cam1: DEFAULT_CAMERAS.0.to_string(),
            cam2: DEFAULT_CAMERAS.1.to_string(),
        }
    }

    /// Loads the calibration and the optional world transformation
    ///
    pub fn from_files(
        calibration: &Path,
        transformation: Option<&Path>,
        tracker: TrackerKind,
    ) -> Result<Self> {
        let calibration = StereoCalibration::from_json_file(calibration)?;
        let world = transformation
            .map(WorldTransformation::from_json_file)
            .transpose()?;
        Ok(Self::new(StereoRig::new(calibration, world)?, tracker))
    }

    pub fn cameras(mut self, cam1: &str, cam2: &str) -> Self {
        self.cam1 = cam1.to_string();
        self.cam2 = cam2.to_string();
        self
    }

    pub fn rig(&self) -> &StereoRig {
        &self.rig
    }

    pub fn tracker(&self) -> &TrackerKind {
        &self.tracker
    }

    pub fn cam1(&self) -> &str {
        &self.cam1
    }

    pub fn cam2(&self) -> &str {
        &self.cam2
    }

    /// Starts tracking `color`; rows are appended to `output` after every frame when given
    ///
    pub fn start_color(&self, color: &str, output: Option<&Path>) -> Result<ColorRun> {
        let writer = output
            .map(|path| RodCsvWriter::create(path, &self.cam1, &self.cam2))
            .transpose()?;
        Ok(ColorRun {
            color: color.to_string(),
            state: RunState::Idle,
            table: RodTable::new(color),
            tracker: self.tracker.build(),
            rig: self.rig.clone(),
            cam1: self.cam1.clone(),
            cam2: self.cam2.clone(),
            output: output.map(Path::to_path_buf),
            writer,
        })
    }
}

/// Tracking state of a single color
///
pub struct ColorRun {
    color: String,
    state: RunState,
    table: RodTable,
    tracker: Box<dyn FrameTracker>,
    rig: Arc<StereoRig>,
    cam1: String,
    cam2: String,
    output: Option<PathBuf>,
    writer: Option<RodCsvWriter<File>>,
}

impl ColorRun {
    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn table(&self) -> &RodTable {
        &self.table
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    /// Tracks one frame and appends its rows to the table and the output file.
    ///
    /// Frames must arrive in strictly increasing order. A frame whose detections cannot
    /// be paired is skipped with a warning.
    ///
    pub fn process(&mut self, frame: &FrameDetections) -> Result<FrameSummary> {
        match self.state {
            RunState::Done => return Err(Errors::RunFinished(self.color.clone()).into()),
            RunState::Running { frame: previous } if frame.frame <= previous => {
                return Err(Errors::FrameOrder {
                    previous,
                    current: frame.frame,
                }
                .into())
            }
            _ => {}
        }
        self.state = RunState::Running { frame: frame.frame };

        let matched = match self.tracker.track(&self.rig, &self.table, frame) {
            Ok(m) => m,
            Err(e) => match e.downcast_ref::<Errors>() {
                Some(Errors::ShapeMismatch { .. }) => {
                    warn!(
                        "Color {}, frame {}: {}; frame skipped",
                        self.color, frame.frame, e
                    );
                    return Ok(FrameSummary {
                        frame: frame.frame,
                        skipped: true,
                        ..Default::default()
                    });
                }
                _ => return Err(e),
            },
        };

        let lengths = matched.lengths();
        let FrameMatch { rods, costs } = matched;
        let matched = rods.len();
        let rows = self.table.push_frame(frame.frame, rods)?;
        if let Some(writer) = self.writer.as_mut() {
            writer.write_frame(rows)?;
        }
        debug!(
            "Color {}, frame {}: {} rods, {} rows",
            self.color,
            frame.frame,
            matched,
            rows.len()
        );
        Ok(FrameSummary {
            frame: frame.frame,
            rows: rows.len(),
            matched,
            costs,
            lengths,
            skipped: false,
        })
    }

    /// Ends the run. Returns the number of particles the tracker removed afterwards; the
    /// output file is rewritten when that number is not zero.
    ///
    pub fn finish(&mut self) -> Result<usize> {
        if self.state == RunState::Done {
            return Err(Errors::RunFinished(self.color.clone()).into());
        }
        let removed = self.tracker.finish(&mut self.table)?;
        if let Some(writer) = self.writer.take() {
            drop(writer.into_inner()?);
        }
        match self.output.as_ref() {
            Some(path) if removed > 0 => {
                let file = RodFile {
                    cam1: self.cam1.clone(),
                    cam2: self.cam2.clone(),
                    rows: self.table.rows().to_vec(),
                };
                file.write(path)?;
                info!(
                    "Color {}: {} rows rewritten to {}",
                    self.color,
                    file.rows.len(),
                    path.display()
                );
            }
            _ => {}
        }
        self.state = RunState::Done;
        Ok(removed)
    }

    pub fn into_table(self) -> RodTable {
        self.table
    }
}

#[cfg(test)]
mod tests {
    use crate::geometry::StereoRig;
    use crate::matching::pairwise::{PairingMode, PairwiseOptions};
    use crate::rods::csv_io::read_rod_csv;
    use crate::rods::FrameDetections;
    use crate::test_stuff::{synthetic_calibration, SyntheticScene};
    use crate::trackers::nearest_velocity::NearestVelocityOptions;
    use crate::trackers::session::{RunState, Session};
    use crate::trackers::TrackerKind;
    use crate::Errors;

    fn session(kind: TrackerKind) -> Session {
        Session::new(StereoRig::new(synthetic_calibration(), None).unwrap(), kind)
    }

    #[test]
    fn state_machine() {
        let s = session(TrackerKind::default());
        let scene = SyntheticScene::new(3);
        let mut run = s.start_color("red", None).unwrap();
        assert_eq!(run.state(), RunState::Idle);

        let summary = run.process(&scene.noisy_frame(s.rig(), 10, 0.0, 1)).unwrap();
        assert_eq!(summary.matched, 3);
        assert_eq!(summary.costs.len(), 3);
        assert_eq!(run.state(), RunState::Running { frame: 10 });

        let err = run.process(&scene.noisy_frame(s.rig(), 10, 0.0, 2)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Errors>(),
            Some(&Errors::FrameOrder {
                previous: 10,
                current: 10
            })
        );
        assert_eq!(run.state(), RunState::Running { frame: 10 });

        let summary = run.process(&FrameDetections::new(12, vec![], vec![])).unwrap();
        assert_eq!(summary.matched, 0);
        assert_eq!(summary.rows, 3);

        assert_eq!(run.finish().unwrap(), 0);
        assert_eq!(run.state(), RunState::Done);
        let err = run.process(&FrameDetections::new(13, vec![], vec![])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::RunFinished(_))
        ));
        assert!(run.finish().is_err());
        assert_eq!(run.into_table().len(), 6);
    }

    #[test]
    fn unpaired_frame_is_skipped() {
        let kind = TrackerKind::Pairwise(PairwiseOptions::default().pairing(PairingMode::Known));
        let s = session(kind);
        let (cam1, cam2) = SyntheticScene::new(3).detections(s.rig());
        let mut run = s.start_color("red", None).unwrap();
        run.process(&FrameDetections::new(1, cam1.clone(), cam2.clone()))
            .unwrap();
        let summary = run
            .process(&FrameDetections::new(2, cam1, cam2[..1].to_vec()))
            .unwrap();
        assert!(summary.skipped);
        assert_eq!(summary.rows, 0);
        assert_eq!(run.table().len(), 3);
        assert_eq!(run.state(), RunState::Running { frame: 2 });
    }

    #[test]
    fn output_is_flushed_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rods_df_red.csv");
        let opts = NearestVelocityOptions::default()
            .search_range(5.0)
            .min_track_length(3);
        let s = session(TrackerKind::NearestVelocity(opts));
        let mut run = s.start_color("red", Some(&path)).unwrap();
        for f in 0..4i64 {
            let n = if f == 0 { 3 } else { 2 };
            let frame = SyntheticScene::new(n)
                .moved(f as f64)
                .noisy_frame(s.rig(), f, 0.0, 3);
            run.process(&frame).unwrap();
            let written = read_rod_csv(&path).unwrap();
            assert_eq!(written.rows.len(), 3 * (f as usize + 1));
        }
        assert_eq!(run.finish().unwrap(), 1);
        let written = read_rod_csv(&path).unwrap();
        assert_eq!(written.rows.len(), 8);
        assert_eq!(written.cam1, "gp1");
        assert!(written.rows.iter().all(|r| r.color == "red"));
    }
}
