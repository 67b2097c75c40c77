use crate::geometry::distortion::Distortion;
use crate::Errors;
use anyhow::Result;
use nalgebra::{Matrix3, Matrix3x4, Vector3};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Arbitrarily nested numeric JSON array, e.g. `[[1, 0], [0, 1]]`, `[[0.1, 0.2]]` or `[3.0]`
///
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum NumericArray {
    Scalar(f64),
    Nested(Vec<NumericArray>),
}

impl NumericArray {
    /// Values in row-major order
    pub(crate) fn flatten(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<f64>) {
        match self {
            NumericArray::Scalar(v) => out.push(*v),
            NumericArray::Nested(items) => items.iter().for_each(|i| i.flatten_into(out)),
        }
    }
}

pub(crate) fn required_values(field: &str, value: Option<&NumericArray>) -> Result<Vec<f64>> {
    let values = value
        .ok_or_else(|| Errors::Configuration(format!("missing field `{}`", field)))?
        .flatten();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(Errors::Configuration(format!("field `{}` holds non-finite values", field)).into());
    }
    Ok(values)
}

pub(crate) fn matrix3(field: &str, value: Option<&NumericArray>) -> Result<Matrix3<f64>> {
    let values = required_values(field, value)?;
    if values.len() != 9 {
        return Err(Errors::Configuration(format!(
            "field `{}` must be a 3x3 matrix, got {} values",
            field,
            values.len()
        ))
        .into());
    }
    Ok(Matrix3::from_row_slice(&values))
}

pub(crate) fn vector3(field: &str, value: Option<&NumericArray>) -> Result<Vector3<f64>> {
    let values = required_values(field, value)?;
    if values.len() != 3 {
        return Err(Errors::Configuration(format!(
            "field `{}` must be a 3-vector (3, 1x3 or 3x1), got {} values",
            field,
            values.len()
        ))
        .into());
    }
    Ok(Vector3::from_column_slice(&values))
}

pub(crate) fn read_config_file(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        Errors::Configuration(format!(
            "unable to read {} file {}: {}",
            what,
            path.display(),
            e
        ))
        .into()
    })
}

#[derive(Debug, Deserialize)]
struct CalibrationFile {
    #[serde(rename = "CM1")]
    cm1: Option<NumericArray>,
    dist1: Option<NumericArray>,
    #[serde(rename = "CM2")]
    cm2: Option<NumericArray>,
    dist2: Option<NumericArray>,
    #[serde(rename = "R")]
    r: Option<NumericArray>,
    #[serde(rename = "T")]
    t: Option<NumericArray>,
    #[serde(rename = "E")]
    e: Option<NumericArray>,
    #[serde(rename = "F")]
    f: Option<NumericArray>,
}

/// Stereo camera calibration.
///
/// `r` and `t` bring points from the first camera's coordinate system into the
/// second camera's one: `X2 = R * X1 + T`.
///
#[derive(Debug, Clone, PartialEq)]
pub struct StereoCalibration {
    pub cm1: Matrix3<f64>,
    pub dist1: Distortion,
    pub cm2: Matrix3<f64>,
    pub dist2: Distortion,
    pub r: Matrix3<f64>,
    pub t: Vector3<f64>,
    pub e: Option<Matrix3<f64>>,
    pub f: Option<Matrix3<f64>>,
}

impl StereoCalibration {
    pub fn new(
        cm1: Matrix3<f64>,
        dist1: Distortion,
        cm2: Matrix3<f64>,
        dist2: Distortion,
        r: Matrix3<f64>,
        t: Vector3<f64>,
    ) -> Self {
        Self {
            cm1,
            dist1,
            cm2,
            dist2,
            r,
            t,
            e: None,
            f: None,
        }
    }

    /// Parses the calibration from a JSON document `{CM1, dist1, CM2, dist2, R, T, E, F}`.
    ///
    /// `E` and `F` are optional and derived from `R`, `T` and the camera matrices when absent.
    ///
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: CalibrationFile = serde_json::from_str(json).map_err(|e| {
            Errors::Configuration(format!("malformed calibration document: {}", e))
        })?;

        let calibration = Self {
            cm1: matrix3("CM1", raw.cm1.as_ref())?,
            dist1: Distortion::from_coefficients(&required_values("dist1", raw.dist1.as_ref())?)?,
            cm2: matrix3("CM2", raw.cm2.as_ref())?,
            dist2: Distortion::from_coefficients(&required_values("dist2", raw.dist2.as_ref())?)?,
            r: matrix3("R", raw.r.as_ref())?,
            t: vector3("T", raw.t.as_ref())?,
            e: raw.e.as_ref().map(|e| matrix3("E", Some(e))).transpose()?,
            f: raw.f.as_ref().map(|f| matrix3("F", Some(f))).transpose()?,
        };
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = read_config_file(path.as_ref(), "calibration")?;
        Self::from_json_str(&json)
    }

    /// Checks that both camera matrices are usable for projection
    ///
    pub fn validate(&self) -> Result<()> {
        for (name, cm) in [("CM1", &self.cm1), ("CM2", &self.cm2)] {
            if cm.iter().any(|v| !v.is_finite()) || cm.try_inverse().is_none() {
                return Err(Errors::Configuration(format!(
                    "camera matrix `{}` is not invertible",
                    name
                ))
                .into());
            }
        }
        if self.r.iter().chain(self.t.iter()).any(|v| !v.is_finite()) {
            return Err(Errors::Configuration("`R` and `T` must be finite".into()).into());
        }
        Ok(())
    }

    /// Projection matrices `P1 = CM1 * [I|0]` and `P2 = CM2 * [R|T]`
    ///
    pub fn projection_matrices(&self) -> (Matrix3x4<f64>, Matrix3x4<f64>) {
        let mut ext1 = Matrix3x4::zeros();
        ext1.fixed_view_mut::<3, 3>(0, 0).copy_from(&Matrix3::identity());

        let mut ext2 = Matrix3x4::zeros();
        ext2.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.r);
        ext2.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.t);

        (self.cm1 * ext1, self.cm2 * ext2)
    }

    /// Essential matrix, stored or derived as `[T]x * R`
    ///
    pub fn essential(&self) -> Matrix3<f64> {
        self.e.unwrap_or_else(|| self.t.cross_matrix() * self.r)
    }

    /// Fundamental matrix, stored or derived as `CM2^-T * E * CM1^-1`.
    ///
    /// The result maps pixels of camera 1 to epipolar lines of camera 2: `x2^T * F * x1 = 0`.
    ///
    pub fn fundamental(&self) -> Option<Matrix3<f64>> {
        if let Some(f) = self.f {
            return Some(f);
        }
        let k1_inv = self.cm1.try_inverse()?;
        let k2_inv = self.cm2.try_inverse()?;
        Some(k2_inv.transpose() * self.essential() * k1_inv)
    }
}

#[cfg(test)]
mod tests {
    use crate::geometry::calibration::StereoCalibration;
    use crate::test_stuff::synthetic_calibration;
    use crate::Errors;
    use nalgebra::{Point3, Vector3};

    const CALIBRATION: &str = r#"{
        "CM1": [[1000.0, 0.0, 640.0], [0.0, 1000.0, 480.0], [0.0, 0.0, 1.0]],
        "dist1": [[-0.1, 0.01, 0.0, 0.0, 0.0]],
        "CM2": [[1010.0, 0.0, 630.0], [0.0, 1010.0, 470.0], [0.0, 0.0, 1.0]],
        "dist2": [-0.12, 0.02, 0.0, 0.0],
        "R": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        "T": [[-150.0], [0.0], [0.0]],
        "comment": "ignored"
    }"#;

    #[test]
    fn load_nested_arrays() {
        let c = StereoCalibration::from_json_str(CALIBRATION).unwrap();
        assert_eq!(c.cm1[(0, 2)], 640.0);
        assert_eq!(c.cm2[(1, 1)], 1010.0);
        assert_eq!(c.dist1.k1, -0.1);
        assert_eq!(c.dist2.k2, 0.02);
        assert_eq!(c.t, Vector3::new(-150.0, 0.0, 0.0));
        assert!(c.e.is_none());
    }

    #[test]
    fn missing_field_is_configuration_error() {
        let json = CALIBRATION.replace("\"R\"", "\"R_missing\"");
        let err = StereoCalibration::from_json_str(&json).unwrap_err();
        match err.downcast_ref::<Errors>() {
            Some(Errors::Configuration(msg)) => assert!(msg.contains("`R`")),
            e => panic!("unexpected error {:?}", e),
        }
    }

    #[test]
    fn malformed_and_unreadable() {
        let err = StereoCalibration::from_json_str("{\"CM1\": \"abc\"}").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::Configuration(_))
        ));

        let err = StereoCalibration::from_json_file("/nonexistent/calibration.json").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::Configuration(_))
        ));

        let json = CALIBRATION.replace("[0.0, 0.0, 1.0]], \"dist1\"", "[0.0, 0.0, 0.0]], \"dist1\"");
        let json = json.replace("640.0], [0.0, 1000.0, 480.0]", "640.0], [1000.0, 0.0, 640.0]");
        assert!(StereoCalibration::from_json_str(&json).is_err());
    }

    #[test]
    fn projection_matrices_follow_extrinsics() {
        let c = synthetic_calibration();
        let (p1, p2) = c.projection_matrices();
        let x = Point3::new(10.0, -20.0, 600.0);
        let h = x.to_homogeneous();
        let u1 = p1 * h;
        let u2 = p2 * h;
        let x2 = c.r * x.coords + c.t;
        let expected2 = c.cm2 * x2;
        assert!((u1 / u1.z - c.cm1 * x.coords / x.z).norm() < 1e-9);
        assert!((u2 / u2.z - expected2 / expected2.z).norm() < 1e-9);
    }

    #[test]
    fn derived_fundamental_satisfies_epipolar_constraint() {
        let c = synthetic_calibration();
        let f = c.fundamental().unwrap();
        let (p1, p2) = c.projection_matrices();
        for x in [
            Point3::new(10.0, -20.0, 600.0),
            Point3::new(-50.0, 35.0, 550.0),
        ] {
            let u1 = p1 * x.to_homogeneous();
            let u2 = p2 * x.to_homogeneous();
            let u1 = u1 / u1.z;
            let u2 = u2 / u2.z;
            let residual = (u2.transpose() * f * u1)[(0, 0)];
            assert!(residual.abs() < 1e-6, "residual {}", residual);
        }
    }
}
