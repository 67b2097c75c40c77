use crate::rods::{Detection, FrameDetections, RodRecord};
use crate::Errors;
use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, Writer, WriterBuilder};
use nalgebra::Point3;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Column names of a rod table for the cameras `cam1` and `cam2`
///
pub fn rod_header(cam1: &str, cam2: &str) -> Vec<String> {
    let mut header = ["x1", "y1", "z1", "x2", "y2", "z2", "x", "y", "z", "l"]
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>();
    for cam in [cam1, cam2] {
        header.extend(["x1", "y1", "x2", "y2"].iter().map(|c| format!("{}_{}", c, cam)));
    }
    header.push("frame".into());
    header.push(format!("seen_{}", cam1));
    header.push(format!("seen_{}", cam2));
    header.push("color".into());
    header.push("particle".into());
    header
}

pub(crate) fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else {
        v.to_string()
    }
}

pub(crate) fn parse_float(field: &str) -> Result<f64> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(f64::NAN);
    }
    field
        .parse::<f64>()
        .with_context(|| format!("`{}` is not a number", field))
}

pub(crate) fn parse_int(field: &str) -> Result<i64> {
    let field = field.trim();
    match field.parse::<i64>() {
        Ok(v) => Ok(v),
        Err(_) => {
            let v = parse_float(field)?;
            if v.is_finite() && v.fract() == 0.0 {
                Ok(v as i64)
            } else {
                Err(anyhow::anyhow!("`{}` is not an integer", field))
            }
        }
    }
}

fn parse_flag(field: &str) -> Result<bool> {
    match field.trim() {
        "True" | "true" => Ok(true),
        "False" | "false" | "" => Ok(false),
        other => Ok(parse_float(other)? != 0.0),
    }
}

/// Column positions of a CSV header, looked up by name
///
pub(crate) struct Columns {
    index: HashMap<String, usize>,
    names: Vec<String>,
}

impl Columns {
    pub(crate) fn new(header: &StringRecord) -> Self {
        let names = header.iter().map(|h| h.trim().to_string()).collect::<Vec<_>>();
        let index = names
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.is_empty())
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self { index, names }
    }

    pub(crate) fn get(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(crate) fn require(&self, name: &str) -> Result<usize> {
        self.get(name)
            .ok_or_else(|| Errors::Configuration(format!("missing column `{}`", name)).into())
    }

    /// Camera ids in order of appearance, taken from the `x1_<cam>` columns
    ///
    pub(crate) fn cameras(&self) -> Vec<String> {
        let mut cams = Vec::new();
        for n in &self.names {
            if let Some(cam) = n.strip_prefix("x1_") {
                if !cams.iter().any(|c| c == cam) {
                    cams.push(cam.to_string());
                }
            }
        }
        cams
    }

    fn detection(&self, cam: &str) -> Result<[usize; 4]> {
        Ok([
            self.require(&format!("x1_{}", cam))?,
            self.require(&format!("y1_{}", cam))?,
            self.require(&format!("x2_{}", cam))?,
            self.require(&format!("y2_{}", cam))?,
        ])
    }
}

fn field<'a>(record: &'a StringRecord, idx: usize) -> &'a str {
    record.get(idx).unwrap_or("")
}

fn read_detection(record: &StringRecord, cols: &[usize; 4]) -> Result<Detection> {
    let mut v = [0.0; 4];
    for (value, idx) in v.iter_mut().zip(cols.iter()) {
        *value = parse_float(field(record, *idx))?;
    }
    Ok(Detection::from_array(v))
}

/// Writes rod tables, one frame at a time. The underlying writer is flushed after every
/// frame, so completed frames survive a failure later in the run.
///
pub struct RodCsvWriter<W: Write> {
    writer: Writer<W>,
    rows_written: usize,
}

impl RodCsvWriter<File> {
    pub fn create<P: AsRef<Path>>(path: P, cam1: &str, cam2: &str) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        Self::from_writer(file, cam1, cam2)
    }
}

impl<W: Write> RodCsvWriter<W> {
    pub fn from_writer(inner: W, cam1: &str, cam2: &str) -> Result<Self> {
        let mut writer = WriterBuilder::new().from_writer(inner);
        writer.write_record(rod_header(cam1, cam2))?;
        writer.flush()?;
        Ok(Self {
            writer,
            rows_written: 0,
        })
    }

    pub fn write_frame(&mut self, rows: &[RodRecord]) -> Result<()> {
        for r in rows {
            let center = r.center();
            let mut record = Vec::with_capacity(23);
            record.extend(
                r.p1.iter()
                    .chain(r.p2.iter())
                    .chain(center.iter())
                    .copied()
                    .chain(std::iter::once(r.length()))
                    .chain(r.cam1.to_array())
                    .chain(r.cam2.to_array())
                    .map(format_float),
            );
            record.push(r.frame.to_string());
            record.push(u8::from(r.seen1).to_string());
            record.push(u8::from(r.seen2).to_string());
            record.push(r.color.clone());
            record.push(r.particle.to_string());
            self.writer.write_record(&record)?;
        }
        self.writer.flush()?;
        self.rows_written += rows.len();
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush rod table: {}", e))
    }
}

/// Rod table read back from CSV together with its camera ids
///
#[derive(Debug, Clone, Default)]
pub struct RodFile {
    pub cam1: String,
    pub cam2: String,
    pub rows: Vec<RodRecord>,
}

impl RodFile {
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = RodCsvWriter::create(path, &self.cam1, &self.cam2)?;
        writer.write_frame(&self.rows)
    }
}

pub(crate) fn open_reader(path: &Path) -> Result<csv::Reader<File>> {
    ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

/// Reads a rod table written by [`RodCsvWriter`] or by earlier tools using the same columns.
///
/// A leading unnamed index column is ignored, empty values are read as NaN and missing
/// `seen_<cam>` columns default to "seen" where the camera's endpoints are present.
///
pub fn read_rod_csv<P: AsRef<Path>>(path: P) -> Result<RodFile> {
    let path = path.as_ref();
    let mut reader = open_reader(path)?;
    let cols = Columns::new(reader.headers()?);
    let cams = cols.cameras();
    if cams.len() < 2 {
        return Err(Errors::Configuration(format!(
            "{} must contain endpoint columns of two cameras, found {:?}",
            path.display(),
            cams
        ))
        .into());
    }
    let (cam1, cam2) = (cams[0].clone(), cams[1].clone());

    let coords = ["x1", "y1", "z1", "x2", "y2", "z2"]
        .iter()
        .map(|c| cols.require(c))
        .collect::<Result<Vec<_>>>()?;
    let det1 = cols.detection(&cam1)?;
    let det2 = cols.detection(&cam2)?;
    let frame = cols.require("frame")?;
    let particle = cols.require("particle")?;
    let color = cols.get("color");
    let seen1 = cols.get(&format!("seen_{}", cam1));
    let seen2 = cols.get(&format!("seen_{}", cam2));

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("{}: bad record {}", path.display(), line))?;
        let mut p = [0.0; 6];
        for (v, idx) in p.iter_mut().zip(coords.iter()) {
            *v = parse_float(field(&record, *idx))?;
        }
        let cam1_det = read_detection(&record, &det1)?;
        let cam2_det = read_detection(&record, &det2)?;
        let particle_id = parse_int(field(&record, particle))?;
        rows.push(RodRecord {
            frame: parse_int(field(&record, frame))
                .with_context(|| format!("{}: bad frame in record {}", path.display(), line))?,
            color: color.map(|c| field(&record, c).to_string()).unwrap_or_default(),
            particle: u64::try_from(particle_id)
                .with_context(|| format!("{}: negative particle id", path.display()))?,
            p1: Point3::new(p[0], p[1], p[2]),
            p2: Point3::new(p[3], p[4], p[5]),
            seen1: match seen1 {
                Some(idx) => parse_flag(field(&record, idx))?,
                None => !cam1_det.is_empty(),
            },
            seen2: match seen2 {
                Some(idx) => parse_flag(field(&record, idx))?,
                None => !cam2_det.is_empty(),
            },
            cam1: cam1_det,
            cam2: cam2_det,
        });
    }
    Ok(RodFile { cam1, cam2, rows })
}

/// Reads per-frame detections of both cameras from a CSV file.
///
/// Every row contributes its `x1_<cam>, y1_<cam>, x2_<cam>, y2_<cam>` values to the
/// detections of its `frame`. Rows empty in both cameras are skipped, rows seen by one
/// camera only keep an empty detection for the other one, so the row pairing stays
/// available. Frames whose rows are all empty are still reported.
///
pub fn read_detections<P: AsRef<Path>>(
    path: P,
    cam1: &str,
    cam2: &str,
) -> Result<BTreeMap<i64, FrameDetections>> {
    let path = path.as_ref();
    let mut reader = open_reader(path)?;
    let cols = Columns::new(reader.headers()?);
    let frame = cols.require("frame")?;
    let det1 = cols.detection(cam1)?;
    let det2 = cols.detection(cam2)?;

    let mut frames: BTreeMap<i64, FrameDetections> = BTreeMap::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("{}: bad record {}", path.display(), line))?;
        let f = parse_int(field(&record, frame))
            .with_context(|| format!("{}: bad frame in record {}", path.display(), line))?;
        let entry = frames.entry(f).or_insert_with(|| FrameDetections {
            frame: f,
            ..Default::default()
        });
        let d1 = read_detection(&record, &det1)?;
        let d2 = read_detection(&record, &det2)?;
        if d1.is_empty() && d2.is_empty() {
            continue;
        }
        entry.cam1.push(d1);
        entry.cam2.push(d2);
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use crate::rods::csv_io::{read_detections, read_rod_csv, rod_header, RodCsvWriter};
    use crate::rods::{Detection, RodRecord};
    use crate::Errors;
    use nalgebra::Point3;
    use std::io::Write;

    #[test]
    fn header_layout() {
        let h = rod_header("gp1", "gp2");
        assert_eq!(h.len(), 23);
        assert_eq!(h[10], "x1_gp1");
        assert_eq!(h[17], "y2_gp2");
        assert_eq!(h[18], "frame");
        assert_eq!(h[22], "particle");
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rods_df_red.csv");
        let mut rod = RodRecord::unseen(7, "red", 2);
        rod.p1 = Point3::new(1.0, 2.0, 3.0);
        rod.p2 = Point3::new(1.0, 2.0, 5.5);
        rod.cam1 = Detection::new(10.0, 11.0, 12.0, 13.0);
        rod.seen1 = true;
        let missing = RodRecord::unseen(7, "red", 3);

        let mut w = RodCsvWriter::create(&path, "gp1", "gp2").unwrap();
        w.write_frame(&[rod.clone(), missing]).unwrap();
        assert_eq!(w.rows_written(), 2);
        drop(w);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.lines().nth(2).unwrap().starts_with("NaN,NaN,NaN"));

        let file = read_rod_csv(&path).unwrap();
        assert_eq!(file.cam1, "gp1");
        assert_eq!(file.cam2, "gp2");
        assert_eq!(file.rows.len(), 2);
        assert_eq!(file.rows[0], rod);
        assert!(!file.rows[1].is_seen());
        assert!(file.rows[1].p1.x.is_nan());
    }

    #[test]
    fn detections_with_index_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rods_df_blue.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, ",frame,x1_gp1,y1_gp1,x2_gp1,y2_gp1,x1_gp2,y1_gp2,x2_gp2,y2_gp2,color").unwrap();
        writeln!(f, "0,505,1,2,3,4,5,6,7,8,blue").unwrap();
        writeln!(f, "1,505,1.5,2,3,4,,,,,blue").unwrap();
        writeln!(f, "2,506.0,0,0,0,0,0,0,0,0,blue").unwrap();
        drop(f);

        let frames = read_detections(&path, "gp1", "gp2").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[&505].cam1.len(), 2);
        assert_eq!(frames[&505].cam2.len(), 2);
        assert_eq!(frames[&505].cam2[0], Detection::new(5.0, 6.0, 7.0, 8.0));
        assert!(frames[&505].cam2[1].is_empty());
        assert_eq!(frames[&505].without_empty().cam2.len(), 1);
        assert!(frames[&506].is_empty());

        let err = read_detections(&path, "gp1", "gp3").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::Configuration(_))
        ));
    }
}
