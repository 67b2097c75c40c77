use nalgebra::{Point2, Point3};

/// CSV reader and per-frame flushing writer for rod tables
pub mod csv_io;

/// File level dataset utilities: splitting, combining, filling and randomizing
pub mod dataset;

/// Per-color identity table that keeps every known particle present in every frame
pub mod table;

/// Pixel value written for endpoints a camera did not see
pub const UNSEEN_PIXEL: f64 = -1.0;

/// Endpoint order of a detection
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    /// `(p1, p2)` as detected
    Straight,
    /// `(p2, p1)`
    Swapped,
}

impl Orientation {
    pub const ALL: [Orientation; 2] = [Orientation::Straight, Orientation::Swapped];

    pub fn flipped(self) -> Self {
        match self {
            Orientation::Straight => Orientation::Swapped,
            Orientation::Swapped => Orientation::Straight,
        }
    }
}

/// Rod detected in one camera image: an unordered pair of pixel endpoints
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub p1: Point2<f64>,
    pub p2: Point2<f64>,
}

impl Detection {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            p1: Point2::new(x1, y1),
            p2: Point2::new(x2, y2),
        }
    }

    pub fn from_array(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.p1.x, self.p1.y, self.p2.x, self.p2.y]
    }

    /// Sentinel used for a camera that did not see the rod
    pub fn unseen() -> Self {
        Self::from_array([UNSEEN_PIXEL; 4])
    }

    /// A detection is empty when all values are zero, all are NaN or all carry the
    /// unseen sentinel. Empty detections never take part in matching.
    ///
    pub fn is_empty(&self) -> bool {
        let v = self.to_array();
        v.iter().all(|x| *x == 0.0)
            || v.iter().all(|x| x.is_nan())
            || v.iter().all(|x| *x == UNSEEN_PIXEL)
    }

    pub fn oriented(&self, orientation: Orientation) -> Self {
        match orientation {
            Orientation::Straight => *self,
            Orientation::Swapped => Self {
                p1: self.p2,
                p2: self.p1,
            },
        }
    }

    pub fn center(&self) -> Point2<f64> {
        nalgebra::center(&self.p1, &self.p2)
    }

    pub fn length(&self) -> f64 {
        (self.p2 - self.p1).norm()
    }

    /// Summed endpoint distance to `other` for the given endpoint order of `other`
    ///
    pub fn endpoint_distance(&self, other: &Detection, orientation: Orientation) -> f64 {
        let other = other.oriented(orientation);
        (self.p1 - other.p1).norm() + (self.p2 - other.p2).norm()
    }
}

/// Detections of one color in both cameras for a single frame
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameDetections {
    pub frame: i64,
    pub cam1: Vec<Detection>,
    pub cam2: Vec<Detection>,
}

impl FrameDetections {
    pub fn new(frame: i64, cam1: Vec<Detection>, cam2: Vec<Detection>) -> Self {
        Self { frame, cam1, cam2 }
    }

    /// Same frame with empty detections removed from both cameras
    ///
    pub fn without_empty(&self) -> Self {
        let keep = |d: &Vec<Detection>| -> Vec<Detection> {
            d.iter().filter(|d| !d.is_empty()).copied().collect()
        };
        Self {
            frame: self.frame,
            cam1: keep(&self.cam1),
            cam2: keep(&self.cam2),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cam1.is_empty() && self.cam2.is_empty()
    }
}

/// One row of a rod table: a particle of a color in a frame.
///
/// A camera's `seen` flag is false when the rod was not visible in that camera; the
/// corresponding pixel endpoints then hold [`UNSEEN_PIXEL`]. Rods not seen at all have
/// NaN 3D endpoints.
///
#[derive(Debug, Clone, PartialEq)]
pub struct RodRecord {
    pub frame: i64,
    pub color: String,
    pub particle: u64,
    pub p1: Point3<f64>,
    pub p2: Point3<f64>,
    pub cam1: Detection,
    pub cam2: Detection,
    pub seen1: bool,
    pub seen2: bool,
}

impl RodRecord {
    /// Placeholder for a known particle that was not found in `frame`
    ///
    pub fn unseen(frame: i64, color: &str, particle: u64) -> Self {
        let nan = Point3::new(f64::NAN, f64::NAN, f64::NAN);
        Self {
            frame,
            color: color.to_string(),
            particle,
            p1: nan,
            p2: nan,
            cam1: Detection::unseen(),
            cam2: Detection::unseen(),
            seen1: false,
            seen2: false,
        }
    }

    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.p1, &self.p2)
    }

    pub fn length(&self) -> f64 {
        (self.p2 - self.p1).norm()
    }

    pub fn is_seen(&self) -> bool {
        self.seen1 || self.seen2
    }

    pub fn has_position(&self) -> bool {
        self.p1.iter().chain(self.p2.iter()).all(|v| v.is_finite())
    }

    /// Same rod with both 3D and both 2D endpoint pairs swapped
    ///
    pub fn flipped(&self) -> Self {
        Self {
            p1: self.p2,
            p2: self.p1,
            cam1: self.cam1.oriented(Orientation::Swapped),
            cam2: self.cam2.oriented(Orientation::Swapped),
            color: self.color.clone(),
            ..*self
        }
    }

    /// Summed 3D endpoint displacement to `other`, minimized over both endpoint orders.
    ///
    /// Returns the distance and whether `other` has to be flipped to achieve it.
    ///
    pub fn endpoint_displacement(&self, other: &RodRecord) -> (f64, bool) {
        let same = (self.p1 - other.p1).norm() + (self.p2 - other.p2).norm();
        let swapped = (self.p1 - other.p2).norm() + (self.p2 - other.p1).norm();
        if swapped < same {
            (swapped, true)
        } else {
            (same, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::rods::{Detection, FrameDetections, Orientation, RodRecord};
    use crate::EPS;
    use nalgebra::Point3;

    #[test]
    fn empty_detections() {
        assert!(Detection::new(0.0, 0.0, 0.0, 0.0).is_empty());
        assert!(Detection::from_array([f64::NAN; 4]).is_empty());
        assert!(Detection::unseen().is_empty());
        assert!(!Detection::new(0.0, 0.0, 1.0, 0.0).is_empty());
        assert!(!Detection::new(f64::NAN, 0.0, 1.0, 0.0).is_empty());

        let frame = FrameDetections::new(
            3,
            vec![Detection::new(1.0, 2.0, 3.0, 4.0), Detection::new(0.0, 0.0, 0.0, 0.0)],
            vec![Detection::from_array([f64::NAN; 4])],
        );
        let cleaned = frame.without_empty();
        assert_eq!(cleaned.cam1.len(), 1);
        assert!(cleaned.cam2.is_empty());
        assert!(!cleaned.is_empty());
    }

    #[test]
    fn orientation() {
        let d = Detection::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(d.oriented(Orientation::Straight), d);
        assert_eq!(
            d.oriented(Orientation::Swapped),
            Detection::new(3.0, 4.0, 1.0, 2.0)
        );
        assert_eq!(Orientation::Swapped.flipped(), Orientation::Straight);
        assert!(d.endpoint_distance(&d.oriented(Orientation::Swapped), Orientation::Swapped) < EPS);
    }

    #[test]
    fn records() {
        let r = RodRecord::unseen(5, "red", 3);
        assert!(!r.is_seen());
        assert!(!r.has_position());
        assert!(r.length().is_nan());

        let mut a = r.clone();
        a.p1 = Point3::new(0.0, 0.0, 0.0);
        a.p2 = Point3::new(3.0, 4.0, 0.0);
        assert!((a.length() - 5.0).abs() < EPS);
        assert_eq!(a.center(), Point3::new(1.5, 2.0, 0.0));
        let b = a.flipped();
        assert_eq!(b.p1, a.p2);
        let (d, flip) = a.endpoint_displacement(&b);
        assert!(d < EPS && flip);
    }
}
