use crate::geometry::calibration::{matrix3, read_config_file, vector3, NumericArray};
use crate::Errors;
use anyhow::Result;
use nalgebra::{Matrix3, Point3, Vector3};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct LegacyTransformations {
    #[serde(rename = "M_rotate_x")]
    rotate_x: Option<NumericArray>,
    #[serde(rename = "M_rotate_y")]
    rotate_y: Option<NumericArray>,
    #[serde(rename = "M_rotate_z")]
    rotate_z: Option<NumericArray>,
    #[serde(rename = "M_trans")]
    trans: Option<NumericArray>,
    #[serde(rename = "M_trans2")]
    trans2: Option<NumericArray>,
}

#[derive(Debug, Deserialize)]
struct WorldFile {
    rotation: Option<NumericArray>,
    translation: Option<NumericArray>,
    transformations: Option<LegacyTransformations>,
}

/// Homogeneous 3x4 or 4x4 matrix split into its rotation block and translation column
///
fn homogeneous(field: &str, value: Option<&NumericArray>) -> Result<(Matrix3<f64>, Vector3<f64>)> {
    let values = value
        .ok_or_else(|| Errors::Configuration(format!("missing field `{}`", field)))?
        .flatten();
    if !matches!(values.len(), 12 | 16) {
        return Err(Errors::Configuration(format!(
            "field `{}` must be a 3x4 or 4x4 matrix, got {} values",
            field,
            values.len()
        ))
        .into());
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(
            Errors::Configuration(format!("field `{}` holds non-finite values", field)).into(),
        );
    }
    let at = |r: usize, c: usize| values[r * 4 + c];
    let rotation = Matrix3::from_fn(at);
    let translation = Vector3::new(at(0, 3), at(1, 3), at(2, 3));
    Ok((rotation, translation))
}

/// Rigid transformation from the first camera's coordinate system into world
/// coordinates: `X_w = rotation * X_c + translation`.
///
#[derive(Debug, Clone, PartialEq)]
pub struct WorldTransformation {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl Default for WorldTransformation {
    fn default() -> Self {
        Self::identity()
    }
}

impl WorldTransformation {
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity(), Vector3::zeros())
    }

    /// Builds the transformation from the legacy set of homogeneous matrices.
    ///
    /// The rotations are applied in x, y, z order, `M_trans` is rotated along and
    /// `M_trans2` is added afterwards.
    ///
    pub fn from_legacy(
        rotate_x: &Matrix3<f64>,
        rotate_y: &Matrix3<f64>,
        rotate_z: &Matrix3<f64>,
        trans: &Vector3<f64>,
        trans2: &Vector3<f64>,
    ) -> Self {
        let rotation = rotate_z * rotate_y * rotate_x;
        let translation = rotation * trans + trans2;
        Self::new(rotation, translation)
    }

    /// Parses either `{"rotation", "translation"}` or the legacy
    /// `{"transformations": {"M_rotate_x", "M_rotate_y", "M_rotate_z", "M_trans", "M_trans2"}}`.
    ///
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: WorldFile = serde_json::from_str(json).map_err(|e| {
            Errors::Configuration(format!("malformed world transformation document: {}", e))
        })?;

        if raw.translation.is_some() || raw.rotation.is_some() {
            return Ok(Self::new(
                matrix3("rotation", raw.rotation.as_ref())?,
                vector3("translation", raw.translation.as_ref())?,
            ));
        }

        let legacy = raw.transformations.ok_or_else(|| {
            Errors::Configuration(
                "world transformation needs `rotation`/`translation` or `transformations`".into(),
            )
        })?;

        let (rx, _) = homogeneous("M_rotate_x", legacy.rotate_x.as_ref())?;
        let (ry, _) = homogeneous("M_rotate_y", legacy.rotate_y.as_ref())?;
        let (rz, _) = homogeneous("M_rotate_z", legacy.rotate_z.as_ref())?;
        let (_, t1) = homogeneous("M_trans", legacy.trans.as_ref())?;
        let (_, t2) = homogeneous("M_trans2", legacy.trans2.as_ref())?;
        Ok(Self::from_legacy(&rx, &ry, &rz, &t1, &t2))
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = read_config_file(path.as_ref(), "world transformation")?;
        Self::from_json_str(&json)
    }

    /// Camera-1 coordinates to world coordinates
    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * p.coords + self.translation)
    }

    /// World coordinates to camera-1 coordinates.
    ///
    /// Rotation matrices are orthonormal, so the transpose is used as the inverse.
    ///
    pub fn inverse_apply(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation.transpose() * (p.coords - self.translation))
    }
}

#[cfg(test)]
mod tests {
    use crate::geometry::world::WorldTransformation;
    use crate::Errors;
    use nalgebra::{Point3, Rotation3, Vector3};

    #[test]
    fn rotation_translation_form() {
        let json = r#"{
            "rotation": [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
            "translation": [[1.0, 2.0, 3.0]]
        }"#;
        let w = WorldTransformation::from_json_str(json).unwrap();
        let p = w.apply(&Point3::new(1.0, 0.0, 0.0));
        assert!((p - Point3::new(1.0, 3.0, 3.0)).norm() < 1e-12);
        let back = w.inverse_apply(&p);
        assert!((back - Point3::new(1.0, 0.0, 0.0)).norm() < 1e-12);

        let column = r#"{
            "rotation": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            "translation": [[1.0], [2.0], [3.0]]
        }"#;
        let w = WorldTransformation::from_json_str(column).unwrap();
        assert_eq!(w.translation, Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn legacy_form() {
        let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), 0.3);
        let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), -0.2);
        let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), 1.1);
        let m = |r: &Rotation3<f64>, t: [f64; 3]| {
            let r = r.matrix();
            (0..4)
                .map(|row| {
                    (0..4)
                        .map(|col| match (row, col) {
                            (3, 3) => 1.0,
                            (3, _) => 0.0,
                            (_, 3) => t[row],
                            _ => r[(row, col)],
                        })
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        };
        let id = Rotation3::identity();
        let json = serde_json::json!({
            "transformations": {
                "M_rotate_x": m(&rx, [0.0; 3]),
                "M_rotate_y": m(&ry, [0.0; 3]),
                "M_rotate_z": m(&rz, [0.0; 3]),
                "M_trans": m(&id, [10.0, 0.0, -5.0]),
                "M_trans2": m(&id, [0.0, 1.0, 0.0]),
            }
        })
        .to_string();

        let w = WorldTransformation::from_json_str(&json).unwrap();
        let rot = rz * ry * rx;
        let expected_t = rot * Vector3::new(10.0, 0.0, -5.0) + Vector3::new(0.0, 1.0, 0.0);
        assert!((w.rotation - rot.matrix()).norm() < 1e-12);
        assert!((w.translation - expected_t).norm() < 1e-12);

        let p = Point3::new(3.0, -4.0, 100.0);
        assert!((w.inverse_apply(&w.apply(&p)) - p).norm() < 1e-9);
    }

    #[test]
    fn malformed_documents() {
        for json in [
            r#"{}"#,
            r#"{"rotation": [[1.0, 0.0], [0.0, 1.0]], "translation": [0, 0, 0]}"#,
            r#"{"rotation": [[1, 0, 0], [0, 1, 0], [0, 0, 1]]}"#,
            r#"{"transformations": {"M_rotate_x": [[1, 0, 0, 0]]}}"#,
            r#"not json"#,
        ] {
            let err = WorldTransformation::from_json_str(json).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<Errors>(), Some(Errors::Configuration(_))),
                "{}",
                json
            );
        }
    }
}
