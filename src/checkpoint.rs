//! Checkpoint persistence.
//!
//! A checkpoint is one file `ckpt_{step:06}.bin` holding the magic bytes
//! `HVMC`, a little-endian format version and a bincode-encoded
//! [`CheckpointRecord`]. Files are written to a temporary file in the target
//! directory and renamed into place, so a reader never sees a torn record.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::Log;
use crate::error::{Error, Result};
use crate::parallel::Devices;
use crate::train::{Snapshot, TrainState};

const MAGIC: &[u8; 4] = b"HVMC";
const FORMAT_VERSION: u32 = 1;

/// One persisted step: the index of the last completed iteration and the
/// state right after it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub step: usize,
    pub state: Snapshot,
}

/// File name of the checkpoint for `step`.
pub fn checkpoint_name(step: usize) -> String {
    format!("ckpt_{step:06}.bin")
}

fn parse_step(name: &str) -> Option<usize> {
    name.strip_prefix("ckpt_")?.strip_suffix(".bin")?.parse().ok()
}

/// Checkpoint with the highest step in `dir`.
pub fn latest_checkpoint(dir: &Path) -> Result<Option<PathBuf>> {
    let mut best: Option<(usize, PathBuf)> = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(step) = name.to_str().and_then(parse_step) else {
            continue;
        };
        if best.as_ref().map_or(true, |(s, _)| step > *s) {
            best = Some((step, entry.path()));
        }
    }
    Ok(best.map(|(_, path)| path))
}

/// Write `record` to `path` atomically.
pub fn write_checkpoint(path: &Path, record: &CheckpointRecord) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        bincode::serialize_into(&mut writer, record).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, format!("failed to encode checkpoint: {e}"))
        })?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read and fully decode the checkpoint at `path`.
pub fn read_checkpoint(path: &Path) -> Result<CheckpointRecord> {
    let corrupt = |reason: String| Error::CorruptCheckpoint {
        path: path.to_path_buf(),
        reason,
    };
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| corrupt(format!("missing header: {e}")))?;
    if &magic != MAGIC {
        return Err(corrupt("not a checkpoint file".to_string()));
    }
    let mut version = [0u8; 4];
    reader
        .read_exact(&mut version)
        .map_err(|e| corrupt(format!("missing version: {e}")))?;
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "format version {version}, expected {FORMAT_VERSION}"
        )));
    }
    bincode::deserialize_from(&mut reader).map_err(|e| corrupt(format!("failed to decode: {e}")))
}

/// Decides when to persist the training state and restores it at startup.
#[derive(Debug)]
pub struct CheckpointManager {
    save_dir: Option<PathBuf>,
    restore_from: Option<PathBuf>,
    min_interval: Duration,
    step_multiple: usize,
    last_save: Instant,
}

impl CheckpointManager {
    /// The save clock starts at `now`.
    pub fn new(log: &Log, now: Instant) -> Self {
        Self {
            save_dir: log.save_path.clone(),
            restore_from: log.restore_location().map(Path::to_path_buf),
            min_interval: Duration::from_secs(log.save_time_interval),
            step_multiple: log.save_step_interval.max(1),
            last_save: now,
        }
    }

    pub fn save_dir(&self) -> Option<&Path> {
        self.save_dir.as_deref()
    }

    /// Load the most recent checkpoint from the restore location, laid out
    /// over `devices`.
    ///
    /// A directory restores its highest-step checkpoint; a file restores
    /// itself; a missing location restores nothing.
    pub fn restore(&self, devices: &Devices) -> Result<Option<(usize, TrainState)>> {
        let Some(location) = self.restore_from.as_deref() else {
            return Ok(None);
        };
        let path = if location.is_dir() {
            match latest_checkpoint(location)? {
                Some(path) => path,
                None => return Ok(None),
            }
        } else if location.is_file() {
            location.to_path_buf()
        } else {
            debug!("no checkpoint at {}", location.display());
            return Ok(None);
        };

        let record = read_checkpoint(&path)?;
        if record.step == usize::MAX {
            return Err(Error::CorruptCheckpoint {
                path,
                reason: format!("step {} cannot be resumed", record.step),
            });
        }
        info!("restoring step {} from {}", record.step, path.display());
        let state = TrainState::from_snapshot(record.state, devices.count())?;
        Ok(Some((record.step, state)))
    }

    /// Periodic policy: enough time since the last save and `step + 1` is a
    /// multiple of the step interval.
    pub fn is_due(&self, step: usize, now: Instant) -> bool {
        now.saturating_duration_since(self.last_save) >= self.min_interval
            && (step + 1) % self.step_multiple == 0
    }

    /// Save if the periodic policy says so, or unconditionally when `force`
    /// is set. Nothing is written without a save directory.
    pub fn maybe_save(&mut self, step: usize, state: &TrainState, now: Instant, force: bool) -> Result<bool> {
        if self.save_dir.is_none() || !(force || self.is_due(step, now)) {
            return Ok(false);
        }
        self.save(step, state, now)?;
        Ok(true)
    }

    fn save(&mut self, step: usize, state: &TrainState, now: Instant) -> Result<()> {
        let Some(dir) = self.save_dir.as_deref() else {
            return Ok(());
        };
        let path = dir.join(checkpoint_name(step));
        let record = CheckpointRecord {
            step,
            state: state.snapshot(),
        };
        write_checkpoint(&path, &record)?;
        info!("saved checkpoint {}", path.display());
        self.last_save = now;
        Ok(())
    }
}
