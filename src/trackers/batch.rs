use crate::rods::csv_io::read_detections;
use crate::trackers::session::{FrameSummary, Session, DEFAULT_CAMERAS};
use crate::trackers::TrackerKind;
use crate::Errors;
use anyhow::{anyhow, Result};
use crossbeam::channel::{Receiver, Sender};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{spawn, JoinHandle};

/// Input and output file name of a color
pub fn rods_file_name(color: &str) -> String {
    format!("rods_df_{}.csv", color)
}

/// Options of an [`assign`] run
///
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignOptions {
    /// Folder holding `rods_df_<color>.csv` detection files
    pub data_folder: PathBuf,
    /// Folder receiving one `rods_df_<color>.csv` rod table per color
    pub output_folder: PathBuf,
    pub colors: Vec<String>,
    pub cam1: String,
    pub cam2: String,
    /// Inclusive frame range; all frames of the input when absent
    pub frames: Option<RangeInclusive<i64>>,
    pub calibration: PathBuf,
    pub transformation: Option<PathBuf>,
    pub tracker: TrackerKind,
    /// Worker threads, `0` uses one per CPU
    pub workers: usize,
    /// Checked between frames, a set flag stops all colors
    #[serde(skip)]
    pub cancel: Arc<AtomicBool>,
}

impl AssignOptions {
    pub fn new(data_folder: &Path, output_folder: &Path, calibration: &Path) -> Self {
        Self {
            data_folder: data_folder.to_path_buf(),
            output_folder: output_folder.to_path_buf(),
            calibration: calibration.to_path_buf(),
            cam1: DEFAULT_CAMERAS.0.to_string(),
            cam2: DEFAULT_CAMERAS.1.to_string(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut opts: AssignOptions = serde_json::from_str(json)
            .map_err(|e| Errors::Configuration(format!("malformed assign options: {}", e)))?;
        if opts.cam1.is_empty() {
            opts.cam1 = DEFAULT_CAMERAS.0.to_string();
        }
        if opts.cam2.is_empty() {
            opts.cam2 = DEFAULT_CAMERAS.1.to_string();
        }
        Ok(opts)
    }

    pub fn colors<S: AsRef<str>>(mut self, colors: &[S]) -> Self {
        self.colors = colors.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    pub fn cameras(mut self, cam1: &str, cam2: &str) -> Self {
        self.cam1 = cam1.to_string();
        self.cam2 = cam2.to_string();
        self
    }

    pub fn frames(mut self, frames: RangeInclusive<i64>) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn transformation(mut self, path: &Path) -> Self {
        self.transformation = Some(path.to_path_buf());
        self
    }

    pub fn tracker(mut self, tracker: TrackerKind) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }
}

/// Result of one color
///
#[derive(Debug, Clone, Default)]
pub struct ColorReport {
    pub color: String,
    pub output: PathBuf,
    pub frames: Vec<FrameSummary>,
    /// Particles removed by the tracker after the last frame
    pub removed: usize,
}

impl ColorReport {
    /// Mean reprojection error of all rods seen by both cameras
    pub fn mean_cost(&self) -> f64 {
        let costs = self
            .frames
            .iter()
            .flat_map(|f| f.costs.iter())
            .filter(|c| c.is_finite())
            .collect::<Vec<_>>();
        costs.iter().copied().sum::<f64>() / costs.len() as f64
    }
}

struct ColorJob {
    session: Session,
    data_folder: PathBuf,
    output_folder: PathBuf,
    frames: Option<RangeInclusive<i64>>,
    cancel: Arc<AtomicBool>,
}

enum ColorCommands {
    Track { index: usize, color: String },
    Exit,
}

type ColorResult = (usize, Result<ColorReport>);

fn track_color(job: &ColorJob, color: &str) -> Result<ColorReport> {
    let input = job.data_folder.join(rods_file_name(color));
    let output = job.output_folder.join(rods_file_name(color));
    let detections = read_detections(&input, job.session.cam1(), job.session.cam2())?;

    let mut run = job.session.start_color(color, Some(&output))?;
    let mut frames = Vec::new();
    for (frame, dets) in detections
        .iter()
        .filter(|(f, _)| job.frames.as_ref().map_or(true, |r| r.contains(*f)))
    {
        if job.cancel.load(Ordering::Relaxed) {
            warn!("Color {}: cancelled before frame {}", color, frame);
            return Err(Errors::Cancelled(*frame).into());
        }
        frames.push(run.process(dets)?);
    }
    let removed = run.finish()?;
    info!(
        "Color {}: {} frames, {} rows written to {}",
        color,
        frames.len(),
        run.table().len(),
        output.display()
    );
    Ok(ColorReport {
        color: color.to_string(),
        output,
        frames,
        removed,
    })
}

fn color_worker(job: Arc<ColorJob>, rx: Receiver<ColorCommands>, results: Sender<ColorResult>) {
    while let Ok(command) = rx.recv() {
        match command {
            ColorCommands::Track { index, color } => {
                let res = track_color(&job, &color);
                if let Err(e) = &res {
                    error!("Color {} failed: {:?}", color, e);
                }
                if let Err(e) = results.send((index, res)) {
                    warn!("Unable to send the result of color {}: {:?}", color, e);
                }
            }
            ColorCommands::Exit => break,
        }
    }
}

/// Tracks every color of a dataset and writes one rod table per color.
///
/// Colors run in parallel on a pool of worker threads; the frames of one color are
/// processed in increasing order. Frames finished before a failure stay on disk. The
/// first failing color (in the order of `opts.colors`) determines the returned error.
///
pub fn assign(opts: &AssignOptions) -> Result<Vec<ColorReport>> {
    let session = Session::from_files(
        &opts.calibration,
        opts.transformation.as_deref(),
        opts.tracker,
    )?
    .cameras(&opts.cam1, &opts.cam2);
    if opts.colors.is_empty() {
        return Ok(Vec::new());
    }
    fs::create_dir_all(&opts.output_folder).map_err(|e| {
        Errors::Configuration(format!(
            "unable to create output folder {}: {}",
            opts.output_folder.display(),
            e
        ))
    })?;

    let job = Arc::new(ColorJob {
        session,
        data_folder: opts.data_folder.clone(),
        output_folder: opts.output_folder.clone(),
        frames: opts.frames.clone(),
        cancel: opts.cancel.clone(),
    });

    let workers = match opts.workers {
        0 => num_cpus::get(),
        n => n,
    }
    .clamp(1, opts.colors.len());

    let (results_tx, results_rx) = crossbeam::channel::unbounded();
    let pool = (0..workers)
        .map(|_| {
            let (tx, rx) = crossbeam::channel::unbounded();
            let thread_job = job.clone();
            let thread_results = results_tx.clone();
            (tx, spawn(move || color_worker(thread_job, rx, thread_results)))
        })
        .collect::<Vec<(Sender<ColorCommands>, JoinHandle<()>)>>();
    drop(results_tx);

    for (index, color) in opts.colors.iter().enumerate() {
        pool[index % workers]
            .0
            .send(ColorCommands::Track {
                index,
                color: color.clone(),
            })
            .map_err(|e| anyhow!("Color worker is gone: {:?}", e))?;
    }
    for (tx, _) in &pool {
        if tx.send(ColorCommands::Exit).is_err() {
            warn!("Color worker exited early");
        }
    }

    let mut reports = (0..opts.colors.len()).map(|_| None).collect::<Vec<_>>();
    for (index, res) in results_rx.iter() {
        reports[index] = Some(res);
    }
    for (_, handle) in pool {
        if handle.join().is_err() {
            error!("Color worker panicked");
        }
    }

    reports
        .into_iter()
        .zip(opts.colors.iter())
        .map(|(res, color)| {
            res.unwrap_or_else(|| Err(anyhow!("Color {} was not processed", color)))
        })
        .collect()
}
