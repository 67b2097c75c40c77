use crate::geometry::calibration::StereoCalibration;
use crate::geometry::distortion::Distortion;
use crate::geometry::StereoRig;
use crate::rods::csv_io::RodCsvWriter;
use crate::rods::{Detection, FrameDetections, RodRecord};
use anyhow::Result;
use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::Path;

/// Two 1000 px focal length cameras with principal point `(640, 480)`, 150 units apart
/// along x and slightly rotated about y, without lens distortion.
///
pub fn synthetic_calibration() -> StereoCalibration {
    let cm = Matrix3::new(1000.0, 0.0, 640.0, 0.0, 1000.0, 480.0, 0.0, 0.0, 1.0);
    let r = Rotation3::from_euler_angles(0.0, 0.05, 0.0);
    StereoCalibration::new(
        cm,
        Distortion::default(),
        cm,
        Distortion::default(),
        *r.matrix(),
        Vector3::new(-150.0, 0.0, 0.0),
    )
}

/// Rods in front of the synthetic rig, one per horizontal band so that every rod is
/// unambiguous for the epipolar geometry.
///
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    rods: Vec<(Point3<f64>, Point3<f64>)>,
}

impl SyntheticScene {
    pub fn new(n: usize) -> Self {
        let rods = (0..n)
            .map(|k| {
                let k = k as f64;
                let center = Point3::new(-40.0 + 20.0 * k, -120.0 + 60.0 * k, 600.0 + 10.0 * k);
                let half = Vector3::new(6.0 + k, 20.0, 4.0 - k);
                (center - half, center + half)
            })
            .collect();
        Self { rods }
    }

    pub fn rods(&self) -> &[(Point3<f64>, Point3<f64>)] {
        &self.rods
    }

    /// Scene translated by `dx` along x
    pub fn moved(&self, dx: f64) -> Self {
        self.translated(&Vector3::new(dx, 0.0, 0.0))
    }

    pub fn translated(&self, offset: &Vector3<f64>) -> Self {
        Self {
            rods: self
                .rods
                .iter()
                .map(|(a, b)| (a + offset, b + offset))
                .collect(),
        }
    }

    /// Exact detections of all rods, in rod order for both cameras
    ///
    pub fn detections(&self, rig: &StereoRig) -> (Vec<Detection>, Vec<Detection>) {
        self.rods
            .iter()
            .map(|(a, b)| {
                let (a1, a2) = rig.reproject(a);
                let (b1, b2) = rig.reproject(b);
                (Detection { p1: a1, p2: b1 }, Detection { p1: a2, p2: b2 })
            })
            .unzip()
    }

    /// Detections with uniform pixel noise, shuffled per camera with a fixed seed
    ///
    pub fn noisy_frame(&self, rig: &StereoRig, frame: i64, noise: f64, seed: u64) -> FrameDetections {
        let mut gen = StdRng::seed_from_u64(seed);
        let dist = Uniform::new_inclusive(-noise, noise);
        let (mut cam1, mut cam2) = self.detections(rig);
        for d in cam1.iter_mut().chain(cam2.iter_mut()) {
            d.p1.x += gen.sample(dist);
            d.p1.y += gen.sample(dist);
            d.p2.x += gen.sample(dist);
            d.p2.y += gen.sample(dist);
        }
        cam1.shuffle(&mut gen);
        cam2.shuffle(&mut gen);
        FrameDetections::new(frame, cam1, cam2)
    }
}

/// Writes detections in the rod table layout; rows of the shorter camera are left unseen
///
pub fn write_detection_csv<P: AsRef<Path>>(
    path: P,
    color: &str,
    frames: &[FrameDetections],
) -> Result<()> {
    let mut writer = RodCsvWriter::create(path, "gp1", "gp2")?;
    for f in frames {
        let rows = (0..f.cam1.len().max(f.cam2.len()))
            .map(|row| {
                let mut rod = RodRecord::unseen(f.frame, color, row as u64);
                if let Some(d) = f.cam1.get(row) {
                    rod.cam1 = *d;
                    rod.seen1 = true;
                }
                if let Some(d) = f.cam2.get(row) {
                    rod.cam2 = *d;
                    rod.seen2 = true;
                }
                rod
            })
            .collect::<Vec<_>>();
        writer.write_frame(&rows)?;
    }
    Ok(())
}
