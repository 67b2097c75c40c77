use crate::geometry::calibration::StereoCalibration;
use crate::geometry::distortion::Distortion;
use crate::geometry::world::WorldTransformation;
use crate::Errors;
use anyhow::Result;
use nalgebra::{
    Matrix2xX, Matrix3, Matrix3x4, Matrix3xX, Matrix4, MatrixXx2, MatrixXx3, Point2, Point3,
    Vector2, Vector3,
};

/// Stereo calibration parameters and their JSON representation
pub mod calibration;
/// Lens distortion model
pub mod distortion;
/// Camera to world coordinate transformation
pub mod world;

const W_EPS: f64 = 1e-12;

/// Prepared stereo setup: calibration, derived projection matrices and the optional
/// world transformation. Built once per session and shared read-only afterwards.
///
#[derive(Debug, Clone)]
pub struct StereoRig {
    calibration: StereoCalibration,
    world: Option<WorldTransformation>,
    p1: Matrix3x4<f64>,
    p2: Matrix3x4<f64>,
    cm1_inv: Matrix3<f64>,
    cm2_inv: Matrix3<f64>,
}

fn undistort_pixel(
    cm: &Matrix3<f64>,
    cm_inv: &Matrix3<f64>,
    dist: &Distortion,
    pix: &Point2<f64>,
) -> Point2<f64> {
    if dist.is_identity() {
        return *pix;
    }
    let n = cm_inv * pix.to_homogeneous();
    let n = dist.undistort(&Vector2::new(n.x / n.z, n.y / n.z));
    let u = cm * Vector3::new(n.x, n.y, 1.0);
    Point2::new(u.x / u.z, u.y / u.z)
}

fn project_camera(cm: &Matrix3<f64>, dist: &Distortion, x: &Vector3<f64>) -> Point2<f64> {
    let n = dist.distort(&Vector2::new(x.x / x.z, x.y / x.z));
    let u = cm * Vector3::new(n.x, n.y, 1.0);
    Point2::new(u.x / u.z, u.y / u.z)
}

impl StereoRig {
    pub fn new(calibration: StereoCalibration, world: Option<WorldTransformation>) -> Result<Self> {
        calibration.validate()?;
        let (p1, p2) = calibration.projection_matrices();
        let cm1_inv = calibration
            .cm1
            .try_inverse()
            .ok_or_else(|| Errors::Configuration("camera matrix `CM1` is not invertible".into()))?;
        let cm2_inv = calibration
            .cm2
            .try_inverse()
            .ok_or_else(|| Errors::Configuration("camera matrix `CM2` is not invertible".into()))?;
        Ok(Self {
            calibration,
            world,
            p1,
            p2,
            cm1_inv,
            cm2_inv,
        })
    }

    pub fn calibration(&self) -> &StereoCalibration {
        &self.calibration
    }

    pub fn world(&self) -> Option<&WorldTransformation> {
        self.world.as_ref()
    }

    pub fn projection_matrices(&self) -> (&Matrix3x4<f64>, &Matrix3x4<f64>) {
        (&self.p1, &self.p2)
    }

    /// Triangulates one pair of corresponding (distorted) pixels into world coordinates.
    ///
    /// Linear least squares over the four DLT equations. Non-finite input or a
    /// point at infinity yields a NaN point.
    ///
    pub fn triangulate(&self, pix1: &Point2<f64>, pix2: &Point2<f64>) -> Point3<f64> {
        let nan = Point3::new(f64::NAN, f64::NAN, f64::NAN);
        if !(pix1.coords.iter().chain(pix2.coords.iter())).all(|v| v.is_finite()) {
            return nan;
        }

        let u1 = undistort_pixel(
            &self.calibration.cm1,
            &self.cm1_inv,
            &self.calibration.dist1,
            pix1,
        );
        let u2 = undistort_pixel(
            &self.calibration.cm2,
            &self.cm2_inv,
            &self.calibration.dist2,
            pix2,
        );

        let mut a = Matrix4::zeros();
        for (row, (u, p)) in [(u1, &self.p1), (u2, &self.p2)].into_iter().enumerate() {
            a.set_row(2 * row, &(p.row(2) * u.x - p.row(0)));
            a.set_row(2 * row + 1, &(p.row(2) * u.y - p.row(1)));
        }

        let svd = a.svd(false, true);
        let v_t = match svd.v_t {
            Some(v_t) => v_t,
            None => return nan,
        };
        let smallest = svd.singular_values.imin();
        let h = v_t.row(smallest);
        if h[3].abs() < W_EPS {
            return nan;
        }
        let x = Point3::new(h[0] / h[3], h[1] / h[3], h[2] / h[3]);
        match &self.world {
            Some(w) => w.apply(&x),
            None => x,
        }
    }

    /// Projects a world point into both cameras, distortion applied
    ///
    pub fn reproject(&self, point: &Point3<f64>) -> (Point2<f64>, Point2<f64>) {
        let x1 = match &self.world {
            Some(w) => w.inverse_apply(point),
            None => *point,
        }
        .coords;
        let x2 = self.calibration.r * x1 + self.calibration.t;
        (
            project_camera(&self.calibration.cm1, &self.calibration.dist1, &x1),
            project_camera(&self.calibration.cm2, &self.calibration.dist2, &x2),
        )
    }

    /// Sum of pixel distances between the reprojections of `point` and the observed pixels
    ///
    pub fn reprojection_error(
        &self,
        point: &Point3<f64>,
        pix1: &Point2<f64>,
        pix2: &Point2<f64>,
    ) -> f64 {
        let (r1, r2) = self.reproject(point);
        (r1 - pix1).norm() + (r2 - pix2).norm()
    }
}

/// Triangulates column-wise corresponding pixels of both cameras.
///
/// # Parameters
/// * `cam1`, `cam2` - `2xN` pixel coordinates, column `i` of both matrices shows the same point;
/// * `calibration` - stereo calibration;
/// * `world` - optional transformation into world coordinates.
///
/// Returns `3xN` points. Fails with [`Errors::ShapeMismatch`] when the column counts differ and
/// with [`Errors::Configuration`] when the calibration is unusable.
///
pub fn project_points(
    cam1: &Matrix2xX<f64>,
    cam2: &Matrix2xX<f64>,
    calibration: &StereoCalibration,
    world: Option<&WorldTransformation>,
) -> Result<Matrix3xX<f64>> {
    if cam1.ncols() != cam2.ncols() {
        return Err(Errors::ShapeMismatch {
            cam1: cam1.ncols(),
            cam2: cam2.ncols(),
        }
        .into());
    }
    let rig = StereoRig::new(calibration.clone(), world.cloned())?;
    let mut points = Matrix3xX::zeros(cam1.ncols());
    for (i, (a, b)) in cam1.column_iter().zip(cam2.column_iter()).enumerate() {
        let p = rig.triangulate(&Point2::new(a[0], a[1]), &Point2::new(b[0], b[1]));
        points.set_column(i, &p.coords);
    }
    Ok(points)
}

/// Projects `Nx3` points into both cameras, returning `Nx2` pixel coordinates per camera
///
pub fn reproject_points(
    points: &MatrixXx3<f64>,
    calibration: &StereoCalibration,
    world: Option<&WorldTransformation>,
) -> Result<(MatrixXx2<f64>, MatrixXx2<f64>)> {
    let rig = StereoRig::new(calibration.clone(), world.cloned())?;
    let mut cam1 = MatrixXx2::zeros(points.nrows());
    let mut cam2 = MatrixXx2::zeros(points.nrows());
    for (i, row) in points.row_iter().enumerate() {
        let (r1, r2) = rig.reproject(&Point3::new(row[0], row[1], row[2]));
        cam1[(i, 0)] = r1.x;
        cam1[(i, 1)] = r1.y;
        cam2[(i, 0)] = r2.x;
        cam2[(i, 1)] = r2.y;
    }
    Ok((cam1, cam2))
}

#[cfg(test)]
mod tests {
    use crate::geometry::distortion::Distortion;
    use crate::geometry::world::WorldTransformation;
    use crate::geometry::{project_points, reproject_points, StereoRig};
    use crate::test_stuff::synthetic_calibration;
    use crate::Errors;
    use nalgebra::{Matrix2xX, MatrixXx3, Point2, Point3, Rotation3, Vector3};

    fn points() -> MatrixXx3<f64> {
        MatrixXx3::from_row_slice(&[
            0.0, 0.0, 600.0, //
            25.0, -40.0, 580.0, //
            -60.0, 35.0, 640.0, //
            12.5, 70.0, 610.0,
        ])
    }

    fn world() -> WorldTransformation {
        let rot = Rotation3::from_euler_angles(0.1, -0.4, 1.3);
        WorldTransformation::new(*rot.matrix(), Vector3::new(-30.0, 12.0, 250.0))
    }

    #[test]
    fn round_trip_without_world() {
        let c = synthetic_calibration();
        let x = points();
        let (a, b) = reproject_points(&x, &c, None).unwrap();
        let back = project_points(&a.transpose(), &b.transpose(), &c, None).unwrap();
        assert!((back.transpose() - x).norm() < 1e-6);

        let (a2, b2) = reproject_points(&back.transpose(), &c, None).unwrap();
        assert!((a2 - a).norm() < 1e-6);
        assert!((b2 - b).norm() < 1e-6);
    }

    #[test]
    fn round_trip_with_world() {
        let c = synthetic_calibration();
        let w = world();
        let mut x = points();
        for mut row in x.row_iter_mut() {
            let p = w.apply(&Point3::new(row[0], row[1], row[2]));
            row.copy_from(&p.coords.transpose());
        }
        let (a, b) = reproject_points(&x, &c, Some(&w)).unwrap();
        let (a0, b0) = reproject_points(&points(), &c, None).unwrap();
        assert!((&a - &a0).norm() < 1e-6 && (&b - &b0).norm() < 1e-6);
        let back = project_points(&a.transpose(), &b.transpose(), &c, Some(&w)).unwrap();
        assert!((back.transpose() - x).norm() < 1e-6);
    }

    #[test]
    fn round_trip_with_distortion() {
        let mut c = synthetic_calibration();
        c.dist1 = Distortion::from_coefficients(&[-0.12, 0.03, 0.0005, -0.0003, 0.0]).unwrap();
        c.dist2 = Distortion::from_coefficients(&[-0.09, 0.01, 0.0, 0.0]).unwrap();
        let rig = StereoRig::new(c, None).unwrap();
        let x = Point3::new(40.0, -25.0, 620.0);
        let (a, b) = rig.reproject(&x);
        let back = rig.triangulate(&a, &b);
        assert!((back - x).norm() < 1e-5, "{:?}", back);
        assert!(rig.reprojection_error(&back, &a, &b) < 1e-6);
    }

    #[test]
    fn shape_mismatch() {
        let c = synthetic_calibration();
        let a = Matrix2xX::from_column_slice(&[1.0, 2.0, 3.0, 4.0]);
        let b = Matrix2xX::from_column_slice(&[1.0, 2.0]);
        let err = project_points(&a, &b, &c, None).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Errors>(),
            Some(&Errors::ShapeMismatch { cam1: 2, cam2: 1 })
        );
    }

    #[test]
    fn singular_camera_matrix() {
        let mut c = synthetic_calibration();
        c.cm2[(2, 2)] = 0.0;
        c.cm2[(1, 1)] = 0.0;
        let err = StereoRig::new(c, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::Configuration(_))
        ));
    }

    #[test]
    fn non_finite_pixels() {
        let rig = StereoRig::new(synthetic_calibration(), None).unwrap();
        let p = rig.triangulate(&Point2::new(f64::NAN, 1.0), &Point2::new(3.0, 4.0));
        assert!(p.x.is_nan() && p.y.is_nan() && p.z.is_nan());
    }
}
