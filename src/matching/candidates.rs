use crate::geometry::StereoRig;
use crate::rods::{Detection, Orientation, RodRecord};
use nalgebra::{DMatrix, Point3};
use rayon::prelude::*;

/// Rod segment triangulated from a camera-1 detection and one orientation of a camera-2
/// detection
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub p1: Point3<f64>,
    pub p2: Point3<f64>,
    pub orientation: Orientation,
    /// Reprojection error of both endpoints in both cameras
    pub cost: f64,
}

impl Candidate {
    pub fn triangulate(
        rig: &StereoRig,
        cam1: &Detection,
        cam2: &Detection,
        orientation: Orientation,
    ) -> Self {
        let cam2 = cam2.oriented(orientation);
        let p1 = rig.triangulate(&cam1.p1, &cam2.p1);
        let p2 = rig.triangulate(&cam1.p2, &cam2.p2);
        let cost = rig.reprojection_error(&p1, &cam1.p1, &cam2.p1)
            + rig.reprojection_error(&p2, &cam1.p2, &cam2.p2);
        Self {
            p1,
            p2,
            orientation,
            cost,
        }
    }

    /// Cheaper orientation of the pair `(cam1, cam2)`
    ///
    pub fn best(rig: &StereoRig, cam1: &Detection, cam2: &Detection) -> Self {
        let [straight, swapped] =
            Orientation::ALL.map(|o| Candidate::triangulate(rig, cam1, cam2, o));
        if cheaper(&straight, &swapped) {
            straight
        } else {
            swapped
        }
    }

    /// Rod record seen by both cameras; frame, color and particle are left for the caller
    ///
    pub fn rod(&self, cam1: &Detection, cam2: &Detection) -> RodRecord {
        let mut rod = RodRecord::unseen(0, "", 0);
        rod.p1 = self.p1;
        rod.p2 = self.p2;
        rod.cam1 = *cam1;
        rod.cam2 = cam2.oriented(self.orientation);
        rod.seen1 = true;
        rod.seen2 = true;
        rod
    }
}

fn cheaper(a: &Candidate, b: &Candidate) -> bool {
    match (a.cost.is_nan(), b.cost.is_nan()) {
        (false, true) => true,
        (true, _) => false,
        (false, false) => a.cost <= b.cost,
    }
}

/// Both orientations of every detection pair of a frame, stored row-major over
/// `(cam1, cam2)`.
///
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    cam1: Vec<Detection>,
    cam2: Vec<Detection>,
    candidates: Vec<[Candidate; 2]>,
}

impl CandidateSet {
    /// Triangulates all pairs; rows are processed in parallel
    ///
    pub fn build(rig: &StereoRig, cam1: &[Detection], cam2: &[Detection]) -> Self {
        let n2 = cam2.len();
        let candidates = (0..cam1.len() * n2)
            .into_par_iter()
            .map(|k| {
                let (i, j) = (k / n2, k % n2);
                Orientation::ALL.map(|o| Candidate::triangulate(rig, &cam1[i], &cam2[j], o))
            })
            .collect();
        Self {
            cam1: cam1.to_vec(),
            cam2: cam2.to_vec(),
            candidates,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.cam1.len(), self.cam2.len())
    }

    pub fn cam1(&self) -> &[Detection] {
        &self.cam1
    }

    pub fn cam2(&self) -> &[Detection] {
        &self.cam2
    }

    pub fn get(&self, i: usize, j: usize, orientation: Orientation) -> &Candidate {
        let pair = &self.candidates[i * self.cam2.len() + j];
        match orientation {
            Orientation::Straight => &pair[0],
            Orientation::Swapped => &pair[1],
        }
    }

    /// Orientation with the lower reprojection error
    pub fn best(&self, i: usize, j: usize) -> &Candidate {
        let pair = &self.candidates[i * self.cam2.len() + j];
        if cheaper(&pair[0], &pair[1]) {
            &pair[0]
        } else {
            &pair[1]
        }
    }

    /// `cam1 x cam2` matrix of the best orientation's cost
    pub fn cost_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.cam1.len(), self.cam2.len(), |i, j| {
            self.best(i, j).cost
        })
    }

    /// Rod record of the pair `(i, j)` in the given orientation
    pub fn rod(&self, i: usize, j: usize, orientation: Orientation) -> RodRecord {
        self.get(i, j, orientation).rod(&self.cam1[i], &self.cam2[j])
    }
}
