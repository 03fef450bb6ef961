//! Explicitly owned PV cache.
//!
//! Live readings come from an external collaborator (a control-system client, an archiver
//! query, a JSON dump). That collaborator is modelled by [`SnapshotSource`]. A [`PvCache`]
//! owns one source, remembers which PVs it tracks, and only talks to the source when
//! [`PvCache::refresh`] is called. Reads never fetch behind the caller's back.
//!
//! The cache is a plain value. Callers that share one across threads wrap it in their own
//! lock; one writer at a time, readers see the last completed refresh.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::LiveResult;
use crate::snapshot::Snapshot;

/// Anything that can produce a snapshot for a list of PV names.
pub trait SnapshotSource {
    /// Fetch the requested PVs. PVs the source cannot deliver come back absent.
    fn fetch(&self, pv_names: &[String]) -> LiveResult<Snapshot>;

    /// Short description for logs.
    fn describe(&self) -> String {
        "snapshot source".to_string()
    }
}

/// A fixed snapshot serves as its own source.
impl SnapshotSource for Snapshot {
    fn fetch(&self, pv_names: &[String]) -> LiveResult<Snapshot> {
        Ok(self.select(pv_names))
    }

    fn describe(&self) -> String {
        format!("in-memory snapshot with {} PVs", self.len())
    }
}

/// Source backed by a JSON file of `{ "PV": value }`, re-read on every fetch.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    /// Source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotSource for JsonFileSource {
    fn fetch(&self, pv_names: &[String]) -> LiveResult<Snapshot> {
        let all = Snapshot::load(&self.path)?;
        debug!(path = %self.path.display(), pvs = all.len(), "Loaded snapshot file");
        if pv_names.is_empty() {
            return Ok(all);
        }
        Ok(all.select(pv_names))
    }

    fn describe(&self) -> String {
        format!("JSON file {}", self.path.display())
    }
}

/// Owned cache of the latest snapshot fetched from a source.
pub struct PvCache<S: SnapshotSource> {
    source: S,
    tracked: Vec<String>,
    current: Snapshot,
    refreshed_at: Option<DateTime<Utc>>,
}

impl<S: SnapshotSource> PvCache<S> {
    /// Empty cache over `source`. Nothing is fetched until [`PvCache::refresh`].
    pub fn new(source: S) -> Self {
        Self {
            source,
            tracked: Vec::new(),
            current: Snapshot::new(),
            refreshed_at: None,
        }
    }

    /// Add PV names to the tracked set, keeping first-seen order and skipping duplicates.
    pub fn track<I, T>(&mut self, names: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.tracked.contains(&name) {
                self.tracked.push(name);
            }
        }
    }

    /// Tracked PV names.
    pub fn tracked(&self) -> &[String] {
        &self.tracked
    }

    /// Fetch all tracked PVs and replace the cached snapshot.
    ///
    /// On error the previous snapshot is kept.
    pub fn refresh(&mut self) -> LiveResult<&Snapshot> {
        let fresh = self.source.fetch(&self.tracked)?;
        let missing = fresh.missing();
        if !missing.is_empty() {
            warn!(
                source = %self.source.describe(),
                count = missing.len(),
                "Missing PVs after refresh: {}",
                missing.join(", ")
            );
        }
        info!(
            source = %self.source.describe(),
            pvs = fresh.len(),
            fingerprint = %fresh.fingerprint(),
            "Refreshed PV cache"
        );
        self.current = fresh;
        self.refreshed_at = Some(Utc::now());
        Ok(&self.current)
    }

    /// Latest snapshot (empty before the first refresh).
    pub fn snapshot(&self) -> &Snapshot {
        &self.current
    }

    /// When the last successful refresh happened.
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    /// Persist the cached snapshot as JSON.
    pub fn save(&self, path: &Path) -> LiveResult<()> {
        self.current.save(path)?;
        info!(path = %path.display(), "Saved PV cache");
        Ok(())
    }
}
