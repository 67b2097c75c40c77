use crate::rods::csv_io::{open_reader, parse_int, read_rod_csv, Columns};
use crate::rods::{Detection, Orientation, RodRecord, UNSEEN_PIXEL};
use crate::Errors;
use anyhow::{Context, Result};
use csv::{StringRecord, WriterBuilder};
use itertools::Itertools;
use log::{info, warn};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Seed of every randomization utility, so repeated runs produce identical files
pub const RNG_SEED: u64 = 1;

/// CSV file kept as raw records: values are copied verbatim, only a leading unnamed
/// index column is dropped.
///
struct RawTable {
    header: StringRecord,
    rows: Vec<StringRecord>,
}

impl RawTable {
    fn read(path: &Path) -> Result<Self> {
        let mut reader = open_reader(path)?;
        let header = reader.headers()?.clone();
        let skip_index = header.get(0).map(|h| h.trim().is_empty()).unwrap_or(false);
        let strip = |r: &StringRecord| -> StringRecord {
            if skip_index {
                r.iter().skip(1).collect()
            } else {
                r.clone()
            }
        };
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("Failed to read {}", path.display()))?;
            rows.push(strip(&record));
        }
        Ok(Self {
            header: strip(&header),
            rows,
        })
    }

    fn column(&self, name: &str) -> Result<usize> {
        Columns::new(&self.header).require(name)
    }

    fn write<'a, I>(&self, path: &Path, rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a StringRecord>,
    {
        let mut writer = WriterBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writer.write_record(&self.header)?;
        let mut written = 0;
        for r in rows {
            writer.write_record(r)?;
            written += 1;
        }
        writer.flush()?;
        Ok(written)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{}_{}.csv", stem, suffix))
}

fn with_prefix(path: &Path, prefix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}", prefix, name))
}

/// Splits a rod table at the given frames.
///
/// Part `k` holds the frames in `[cut_frames[k - 1], cut_frames[k])`, the first part
/// starts at the smallest frame and the last one ends after the largest frame. Parts are
/// written next to `input` as `<stem>_<first>_<last>.csv`; empty parts are skipped.
///
pub fn split_by_frames<P: AsRef<Path>>(input: P, cut_frames: &[i64]) -> Result<Vec<PathBuf>> {
    let input = input.as_ref();
    let table = RawTable::read(input)?;
    let frame_col = table.column("frame")?;
    let frames = table
        .rows
        .iter()
        .map(|r| parse_int(r.get(frame_col).unwrap_or("")))
        .collect::<Result<Vec<_>>>()?;
    let (min, max) = match frames.iter().minmax().into_option() {
        Some((min, max)) => (*min, *max),
        None => return Ok(Vec::new()),
    };

    let mut cuts = cut_frames.to_vec();
    cuts.sort_unstable();
    cuts.dedup();
    let lower = std::iter::once(min).chain(cuts.iter().copied());
    let upper = cuts.iter().copied().chain(std::iter::once(max + 1));

    let mut written = Vec::new();
    for (lo, hi) in lower.zip(upper) {
        let part = table
            .rows
            .iter()
            .zip(frames.iter())
            .filter(|(_, f)| **f >= lo && **f < hi)
            .map(|(r, _)| r)
            .collect::<Vec<_>>();
        if part.is_empty() {
            continue;
        }
        let path = with_suffix(input, &format!("{}_{}", lo, hi - 1));
        let rows = table.write(&path, part)?;
        info!("Written {} rows of frames {}..{} to {}", rows, lo, hi, path.display());
        written.push(path);
    }
    Ok(written)
}

/// Writes one file per color found in the `color` column, named `<stem>_<color>.csv`
///
pub fn extract_colors<P: AsRef<Path>>(input: P) -> Result<Vec<PathBuf>> {
    let input = input.as_ref();
    let table = RawTable::read(input)?;
    let color_col = table.column("color")?;
    let colors = table
        .rows
        .iter()
        .map(|r| r.get(color_col).unwrap_or("").to_string())
        .unique()
        .collect::<Vec<_>>();

    let mut written = Vec::new();
    for color in colors {
        let path = with_suffix(input, &color);
        table.write(
            &path,
            table
                .rows
                .iter()
                .filter(|r| r.get(color_col).unwrap_or("") == color),
        )?;
        written.push(path);
    }
    Ok(written)
}

/// Concatenates rod tables. Missing inputs are skipped with a warning.
///
/// A bare file name as `output` is placed in the directory of the first input. Returns
/// `None` when no rows were found.
///
pub fn combine<P: AsRef<Path>>(inputs: &[P], output: &Path) -> Result<Option<PathBuf>> {
    let mut combined: Option<RawTable> = None;
    for input in inputs {
        let input = input.as_ref();
        if !input.exists() {
            warn!("The file {} does not exist", input.display());
            continue;
        }
        let table = RawTable::read(input)?;
        match combined.as_mut() {
            None => combined = Some(table),
            Some(c) => {
                if c.header != table.header {
                    return Err(Errors::Configuration(format!(
                        "columns of {} differ from the previous files",
                        input.display()
                    ))
                    .into());
                }
                c.rows.extend(table.rows);
            }
        }
    }

    let combined = match combined {
        Some(c) if !c.rows.is_empty() => c,
        _ => return Ok(None),
    };

    let output = match (output.parent(), inputs.first()) {
        (Some(parent), Some(first)) if parent.as_os_str().is_empty() => first
            .as_ref()
            .parent()
            .map(|p| p.join(output))
            .unwrap_or_else(|| output.to_path_buf()),
        _ => output.to_path_buf(),
    };
    combined.write(&output, combined.rows.iter())?;
    Ok(Some(output))
}

/// Adds unseen rows until every (color, frame) holds `expected` rods.
///
/// New rows take the smallest particle ids unused in their frame. Frames with more rods
/// than expected are kept as they are.
///
pub fn insert_missing_rods(rows: &mut Vec<RodRecord>, expected: usize) {
    let groups = rows
        .iter()
        .map(|r| ((r.color.clone(), r.frame), r.particle))
        .into_group_map();

    let mut inserted = Vec::new();
    for ((color, frame), particles) in groups.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
        if particles.len() > expected {
            warn!(
                "More rods than expected for frame #{} of color '{}'",
                frame, color
            );
            continue;
        }
        let used = particles.into_iter().collect::<BTreeSet<_>>();
        let missing = expected - used.len();
        inserted.extend(
            (0u64..)
                .filter(|p| !used.contains(p))
                .take(missing)
                .map(|p| RodRecord::unseen(frame, &color, p)),
        );
    }
    rows.extend(inserted);
}

/// Replaces NaN pixel values with the unseen sentinel and clears the `seen` flag of
/// cameras without a usable detection
///
pub fn replace_missing(rows: &mut [RodRecord]) {
    for r in rows.iter_mut() {
        for (det, seen) in [(&mut r.cam1, &mut r.seen1), (&mut r.cam2, &mut r.seen2)] {
            let values = det.to_array().map(|v| if v.is_nan() { UNSEEN_PIXEL } else { v });
            *det = Detection::from_array(values);
            if det.is_empty() {
                *seen = false;
            }
        }
    }
}

/// Minimal endpoint displacements found by [`reorder_endpoints`]: one row per particle,
/// one column per frame transition. Entries without both positions are NaN.
///
#[derive(Debug, Clone)]
pub struct ReorderCosts {
    pub particles: Vec<u64>,
    pub frames: Vec<i64>,
    pub costs: DMatrix<f64>,
}

/// Flips rod endpoints so that the 3D displacement between consecutive frames is minimal.
///
/// Identities are not changed. Each rod is compared with the last known position of the
/// same particle; flipping swaps both 3D and 2D endpoints.
///
pub fn reorder_endpoints(rows: &mut [RodRecord]) -> ReorderCosts {
    rows.sort_by(|a, b| (a.frame, a.particle).cmp(&(b.frame, b.particle)));
    let particles = rows.iter().map(|r| r.particle).sorted().dedup().collect::<Vec<_>>();
    let frames = rows.iter().map(|r| r.frame).dedup().collect::<Vec<_>>();
    let particle_idx = particles
        .iter()
        .enumerate()
        .map(|(i, p)| (*p, i))
        .collect::<HashMap<_, _>>();
    let frame_idx = frames
        .iter()
        .enumerate()
        .map(|(i, f)| (*f, i))
        .collect::<HashMap<_, _>>();

    let mut costs = DMatrix::from_element(
        particles.len(),
        frames.len().saturating_sub(1),
        f64::NAN,
    );
    let mut last: HashMap<u64, RodRecord> = HashMap::new();
    for r in rows.iter_mut() {
        if !r.has_position() {
            continue;
        }
        if let Some(previous) = last.get(&r.particle) {
            let (cost, flip) = previous.endpoint_displacement(r);
            if flip {
                *r = r.flipped();
            }
            let col = frame_idx[&r.frame];
            if col > 0 {
                costs[(particle_idx[&r.particle], col - 1)] = cost;
            }
        }
        last.insert(r.particle, r.clone());
    }
    ReorderCosts {
        particles,
        frames,
        costs,
    }
}

/// Shuffles the row order within every frame
///
pub fn randomize_particles(rows: &mut [RodRecord], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    rows.sort_by_key(|r| r.frame);
    let mut start = 0;
    while start < rows.len() {
        let frame = rows[start].frame;
        let end = start + rows[start..].iter().take_while(|r| r.frame == frame).count();
        rows[start..end].shuffle(&mut rng);
        start = end;
    }
}

/// Swaps the 2D endpoints of every detection with probability one half, independently
/// per camera
///
pub fn randomize_endpoints(rows: &mut [RodRecord], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for r in rows.iter_mut() {
        if rng.gen_bool(0.5) {
            r.cam1 = r.cam1.oriented(Orientation::Swapped);
        }
        if rng.gen_bool(0.5) {
            r.cam2 = r.cam2.oriented(Orientation::Swapped);
        }
    }
}

/// Writes `rand_particles_<name>` next to `input` with [`randomize_particles`] applied
///
pub fn randomize_particles_file<P: AsRef<Path>>(input: P) -> Result<PathBuf> {
    let input = input.as_ref();
    let mut file = read_rod_csv(input)?;
    randomize_particles(&mut file.rows, RNG_SEED);
    let out = with_prefix(input, "rand_particles_");
    file.write(&out)?;
    Ok(out)
}

/// Writes `rand_endpoints_<name>` next to `input` with [`randomize_endpoints`] applied
///
pub fn randomize_endpoints_file<P: AsRef<Path>>(input: P) -> Result<PathBuf> {
    let input = input.as_ref();
    let mut file = read_rod_csv(input)?;
    randomize_endpoints(&mut file.rows, RNG_SEED);
    let out = with_prefix(input, "rand_endpoints_");
    file.write(&out)?;
    Ok(out)
}
