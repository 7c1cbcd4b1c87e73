#![warn(clippy::pedantic)]

//! Recorded scans on disk, one `detuning,intensity` row per sample, so a live run can be
//! replayed later without the bench.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

use crate::scan::{Sample, Scan};

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed recording {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("no recordings found in {}", .0.display())]
    Empty(PathBuf),
}

fn csv_err(path: &Path) -> impl FnOnce(csv::Error) -> RecordingError {
    let path = path.to_path_buf();
    move |source| RecordingError::Csv { path, source }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> RecordingError {
    let path = path.to_path_buf();
    move |source| RecordingError::Io { path, source }
}

/// Write `scan` to `path`, replacing any existing file.
/// # Errors
/// Propagates file and serialization errors.
pub fn save_scan(path: &Path, scan: &Scan) -> Result<(), RecordingError> {
    let mut wtr = csv::Writer::from_path(path).map_err(csv_err(path))?;
    for sample in scan.samples() {
        wtr.serialize(sample).map_err(csv_err(path))?;
    }
    wtr.flush().map_err(io_err(path))
}

/// Save `scan` under a fresh timestamped name in `dir`, creating `dir` if needed.
/// # Errors
/// Propagates file and serialization errors.
pub fn save_timestamped(dir: &Path, scan: &Scan) -> Result<PathBuf, RecordingError> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    let path = dir.join(format!(
        "mock_run_{}.csv",
        Local::now().format("%Y-%m-%d_%H-%M-%S%.6f")
    ));
    save_scan(&path, scan)?;
    Ok(path)
}

/// # Errors
/// Fails if the file is missing or a row does not parse.
pub fn load_scan(path: &Path) -> Result<Scan, RecordingError> {
    let mut rdr = csv::Reader::from_path(path).map_err(csv_err(path))?;
    rdr.deserialize::<Sample>()
        .collect::<Result<Scan, _>>()
        .map_err(csv_err(path))
}

/// All `*.csv` files in `dir`, sorted by name.
/// # Errors
/// Propagates directory read errors.
pub fn list_recordings(dir: &Path) -> Result<Vec<PathBuf>, RecordingError> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "csv") {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Pick one recording in `dir` uniformly at random.
/// # Errors
/// `Empty` if `dir` holds no recordings.
pub fn random_recording<R: Rng + ?Sized>(
    dir: &Path,
    rng: &mut R,
) -> Result<PathBuf, RecordingError> {
    list_recordings(dir)?
        .choose(rng)
        .cloned()
        .ok_or_else(|| RecordingError::Empty(dir.to_path_buf()))
}
