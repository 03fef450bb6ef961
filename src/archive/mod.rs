//! Time-indexed snapshot lookup in a sharded archive.
//!
//! Shards live under `root/yyyy/mm/dd/` and are named
//! `{BEAMPATH}_{yyyymmdd}_{hhmmss}.<ext>`, where the embedded UTC time is the **end** of
//! the shard's period. A timestamp therefore belongs to the earliest shard whose end time
//! is strictly greater than it; a timestamp equal to an end time belongs to the next
//! shard.
//!
//! Inside a shard the record at the insertion point of the target time is returned
//! together with its own exact timestamp, which may trail the request by up to one
//! sampling interval.

pub mod shard;

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{LiveError, LiveResult};
use crate::snapshot::{PvValue, Snapshot};

pub use shard::{
    is_readable_extension, open_shard, readable_extensions, record_times, JsonShard, ShardReader,
};
#[cfg(feature = "storage_hdf5")]
pub use shard::Hdf5Shard;

/// Default archive roots, searched in order.
pub const DEFAULT_SEARCH_PATHS: &[&str] = &[
    "/gpfs/slac/staas/fs1/g/bsd/BSAService/data/",
    "/nfs/slac/g/bsd/BSAService/data/",
];

/// Default shard file extension: HDF5 when a reader for it is compiled in.
#[cfg(feature = "storage_hdf5")]
pub const DEFAULT_EXTENSION: &str = "h5";
/// Default shard file extension: HDF5 when a reader for it is compiled in.
#[cfg(not(feature = "storage_hdf5"))]
pub const DEFAULT_EXTENSION: &str = "json";

const SHARD_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// End time embedded in a shard file name, e.g. `CU_SXR_20211210_140742.h5`.
pub fn shard_end_time(file_name: &str) -> LiveResult<DateTime<Utc>> {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| LiveError::InvalidShardName(file_name.to_string()))?;
    let time_str = stem
        .len()
        .checked_sub(15)
        .and_then(|start| stem.get(start..))
        .ok_or_else(|| LiveError::InvalidShardName(file_name.to_string()))?;
    let naive = NaiveDateTime::parse_from_str(time_str, SHARD_TIME_FORMAT)
        .map_err(|_| LiveError::InvalidShardName(file_name.to_string()))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Directory holding the shards of the UTC day of `timestamp`.
pub fn day_directory(root: &Path, timestamp: DateTime<Utc>) -> PathBuf {
    root.join(format!("{:04}", timestamp.year()))
        .join(format!("{:02}", timestamp.month()))
        .join(format!("{:02}", timestamp.day()))
}

/// File name of the shard for `beampath` ending at `end`.
pub fn shard_file_name(beampath: &str, end: DateTime<Utc>, extension: &str) -> String {
    format!(
        "{}_{}.{}",
        beampath.to_uppercase(),
        end.format(SHARD_TIME_FORMAT),
        extension
    )
}

/// Find the shard containing `timestamp` for `beampath`.
///
/// Only the day directory of the UTC timestamp is searched. Fails with
/// [`LiveError::NotFound`] when no shard there ends after the timestamp; the caller may
/// retry with the next day.
pub fn locate_shard<Tz: TimeZone>(
    root: &Path,
    timestamp: DateTime<Tz>,
    beampath: &str,
    extension: &str,
) -> LiveResult<PathBuf> {
    let timestamp = timestamp.with_timezone(&Utc);
    let prefix = beampath.to_uppercase();
    let dir = day_directory(root, timestamp);
    let not_found = || LiveError::NotFound {
        beampath: prefix.clone(),
        timestamp,
        path: dir.clone(),
    };

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(e.into()),
    };

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let path = entry.path();
        if !is_shard_of(name, &prefix, extension) {
            continue;
        }
        match shard_end_time(name) {
            Ok(end) => candidates.push((end, path)),
            Err(e) => warn!(file = name, error = %e, "Skipping shard with unparsable name"),
        }
    }
    candidates.sort();
    debug!(dir = %dir.display(), shards = candidates.len(), "Scanned day directory");

    candidates
        .into_iter()
        .find(|(end, _)| *end > timestamp)
        .map(|(_, path)| path)
        .ok_or_else(not_found)
}

/// `{prefix}_{yyyymmdd}_{hhmmss}.{extension}` exactly, so `CU` never matches `CU_HXR_*`.
fn is_shard_of(file_name: &str, prefix: &str, extension: &str) -> bool {
    let Some(stem) = file_name
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.strip_suffix(extension))
        .and_then(|rest| rest.strip_suffix('.'))
    else {
        return false;
    };
    stem.len() == 15 && stem.as_bytes()[8] == b'_'
}

/// Insertion point of `target` in ascending `times`.
///
/// Targets before the first or after the last record are [`LiveError::OutOfRange`];
/// the index is never clamped.
pub fn nearest_index(times: &[DateTime<Utc>], target: DateTime<Utc>) -> LiveResult<usize> {
    let (Some(&first), Some(&last)) = (times.first(), times.last()) else {
        return Err(LiveError::Shard("shard has no records".to_string()));
    };
    if target < first || target > last {
        return Err(LiveError::OutOfRange {
            timestamp: target,
            first,
            last,
        });
    }
    Ok(times.partition_point(|t| *t < target))
}

/// Snapshot of the record at or after `timestamp`, with that record's exact time.
///
/// Without `pv_names` every column is extracted. Requested PVs the shard lacks come back
/// absent.
pub fn extract<Tz: TimeZone>(
    reader: &dyn ShardReader,
    timestamp: DateTime<Tz>,
    pv_names: Option<&[String]>,
) -> LiveResult<(Snapshot, DateTime<Utc>)> {
    let timestamp = timestamp.with_timezone(&Utc);
    let times = reader.record_times()?;
    let index = nearest_index(&times, timestamp)?;
    let found = times[index];

    let names = match pv_names {
        Some(names) => names.to_vec(),
        None => reader.pv_names()?,
    };
    let snapshot = names
        .into_iter()
        .map(|name| -> LiveResult<(String, Option<PvValue>)> {
            let value = reader.read_value(&name, index)?;
            Ok((name, value))
        })
        .collect::<LiveResult<Snapshot>>()?;
    Ok((snapshot, found))
}

/// Snapshot taken from the archive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivedSnapshot {
    /// PV values of the record.
    pub snapshot: Snapshot,
    /// Exact time of the record.
    pub timestamp: DateTime<Utc>,
    /// Shard file the record came from.
    pub source: PathBuf,
}

/// Archive lookup over a list of candidate roots.
#[derive(Debug, Clone)]
pub struct ShardLocator {
    search_paths: Vec<PathBuf>,
    extension: String,
}

impl Default for ShardLocator {
    fn default() -> Self {
        Self::new(
            DEFAULT_SEARCH_PATHS.iter().map(PathBuf::from).collect(),
            DEFAULT_EXTENSION,
        )
    }
}

impl ShardLocator {
    /// Locator over `search_paths` for shards with `extension`.
    pub fn new(search_paths: Vec<PathBuf>, extension: &str) -> Self {
        Self {
            search_paths,
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    /// Locator configured by the archive settings.
    pub fn from_settings(settings: &crate::config::ArchiveSettings) -> Self {
        Self::new(settings.search_paths.clone(), &settings.extension)
    }

    /// First search path that exists.
    pub fn root(&self) -> LiveResult<&Path> {
        self.search_paths
            .iter()
            .find(|p| p.is_dir())
            .map(PathBuf::as_path)
            .ok_or_else(|| LiveError::NoArchiveRoot(self.search_paths.clone()))
    }

    /// Shard file containing `timestamp`.
    pub fn locate<Tz: TimeZone>(&self, timestamp: DateTime<Tz>, beampath: &str) -> LiveResult<PathBuf> {
        locate_shard(self.root()?, timestamp, beampath, &self.extension)
    }

    /// Locate the shard and extract the record at or after `timestamp`.
    pub fn snapshot_at<Tz: TimeZone>(
        &self,
        timestamp: DateTime<Tz>,
        beampath: &str,
        pv_names: Option<&[String]>,
    ) -> LiveResult<ArchivedSnapshot> {
        let timestamp = timestamp.with_timezone(&Utc);
        let source = self.locate(timestamp, beampath)?;
        let reader = open_shard(&source)?;
        let (snapshot, found) = extract(reader.as_ref(), timestamp, pv_names)?;
        info!(
            source = %source.display(),
            requested = %timestamp,
            found = %found,
            pvs = snapshot.len(),
            "Extracted archived snapshot"
        );
        Ok(ArchivedSnapshot {
            snapshot,
            timestamp: found,
            source,
        })
    }
}
