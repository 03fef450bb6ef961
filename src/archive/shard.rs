//! Shard file readers.
//!
//! A shard stores, in time order, one `(seconds, nanoseconds)` pair per record plus one
//! column per PV. Readers only need random access by record index.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{LiveError, LiveResult};
use crate::snapshot::PvValue;

/// Column holding whole seconds since the Unix epoch.
pub const SECONDS_COLUMN: &str = "secondsPastEpoch";
/// Column holding the sub-second part in nanoseconds.
pub const NANOSECONDS_COLUMN: &str = "nanoseconds";

/// Random access to the records of one shard.
pub trait ShardReader {
    /// Record timestamps, ascending.
    fn record_times(&self) -> LiveResult<Vec<DateTime<Utc>>>;

    /// Every PV column in the shard.
    fn pv_names(&self) -> LiveResult<Vec<String>>;

    /// Value of `pv` at record `index`; `None` for unknown PVs and missing cells.
    fn read_value(&self, pv: &str, index: usize) -> LiveResult<Option<PvValue>>;
}

/// Combine per-record second and nanosecond columns into timestamps.
pub fn record_times(seconds: &[i64], nanoseconds: &[u32]) -> LiveResult<Vec<DateTime<Utc>>> {
    if seconds.len() != nanoseconds.len() {
        return Err(LiveError::Shard(format!(
            "{} second stamps but {} nanosecond stamps",
            seconds.len(),
            nanoseconds.len()
        )));
    }
    seconds
        .iter()
        .zip(nanoseconds)
        .map(|(&s, &ns)| {
            Utc.timestamp_opt(s, ns)
                .single()
                .ok_or_else(|| LiveError::Shard(format!("invalid record time {s}.{ns:09}")))
        })
        .collect()
}

/// Columnar shard stored as one JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonShard {
    #[serde(rename = "secondsPastEpoch")]
    seconds: Vec<i64>,
    nanoseconds: Vec<u32>,
    #[serde(flatten)]
    columns: BTreeMap<String, Vec<Option<PvValue>>>,
}

impl JsonShard {
    /// Empty shard with the given record times.
    pub fn new(times: &[DateTime<Utc>]) -> Self {
        Self {
            seconds: times.iter().map(DateTime::timestamp).collect(),
            nanoseconds: times.iter().map(DateTime::timestamp_subsec_nanos).collect(),
            columns: BTreeMap::new(),
        }
    }

    /// Add a PV column; it must have one cell per record.
    pub fn with_column(mut self, pv: &str, values: Vec<Option<PvValue>>) -> LiveResult<Self> {
        if values.len() != self.seconds.len() {
            return Err(LiveError::Shard(format!(
                "column {pv} has {} cells for {} records",
                values.len(),
                self.seconds.len()
            )));
        }
        self.columns.insert(pv.to_string(), values);
        Ok(self)
    }

    /// Read a shard file.
    pub fn open(path: &Path) -> LiveResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write the shard file.
    pub fn save(&self, path: &Path) -> LiveResult<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}

impl ShardReader for JsonShard {
    fn record_times(&self) -> LiveResult<Vec<DateTime<Utc>>> {
        record_times(&self.seconds, &self.nanoseconds)
    }

    fn pv_names(&self) -> LiveResult<Vec<String>> {
        Ok(self.columns.keys().cloned().collect())
    }

    fn read_value(&self, pv: &str, index: usize) -> LiveResult<Option<PvValue>> {
        Ok(self
            .columns
            .get(pv)
            .and_then(|column| column.get(index))
            .cloned()
            .flatten())
    }
}

/// Shard stored as an HDF5 file with one dataset per PV.
#[cfg(feature = "storage_hdf5")]
pub struct Hdf5Shard {
    file: hdf5::File,
}

#[cfg(feature = "storage_hdf5")]
impl Hdf5Shard {
    /// Open a shard file read-only.
    pub fn open(path: &Path) -> LiveResult<Self> {
        Ok(Self {
            file: hdf5::File::open(path)?,
        })
    }

    /// First element of every row of a record-major dataset.
    fn first_column(&self, name: &str) -> LiveResult<Vec<f64>> {
        let dataset = self.file.dataset(name)?;
        if dataset.ndim() < 2 {
            return Ok(dataset.read_raw::<f64>()?);
        }
        Ok(dataset.read_slice_1d::<f64, _>((.., 0))?.to_vec())
    }
}

#[cfg(feature = "storage_hdf5")]
impl ShardReader for Hdf5Shard {
    fn record_times(&self) -> LiveResult<Vec<DateTime<Utc>>> {
        let seconds: Vec<i64> = self
            .first_column(SECONDS_COLUMN)?
            .into_iter()
            .map(|s| s as i64)
            .collect();
        let nanoseconds: Vec<u32> = self
            .first_column(NANOSECONDS_COLUMN)?
            .into_iter()
            .map(|ns| ns as u32)
            .collect();
        record_times(&seconds, &nanoseconds)
    }

    fn pv_names(&self) -> LiveResult<Vec<String>> {
        Ok(self
            .file
            .member_names()?
            .into_iter()
            .filter(|name| name != SECONDS_COLUMN && name != NANOSECONDS_COLUMN)
            .collect())
    }

    fn read_value(&self, pv: &str, index: usize) -> LiveResult<Option<PvValue>> {
        if !self.file.link_exists(pv) {
            return Ok(None);
        }
        let dataset = self.file.dataset(pv)?;
        if index >= dataset.shape().first().copied().unwrap_or(0) {
            return Ok(None);
        }
        // one record only, never the whole column
        let row = if dataset.ndim() < 2 {
            dataset.read_slice_1d::<f64, _>(index..index + 1)?
        } else {
            dataset.read_slice_1d::<f64, _>((index, ..))?
        };
        Ok(match row.to_vec().as_slice() {
            [value] if value.is_nan() => None,
            [value] => Some(PvValue::Float(*value)),
            [] => None,
            words => Some(PvValue::Bits(words.iter().map(|w| *w as i64).collect())),
        })
    }
}

/// Shard file extensions a reader is compiled in for.
pub fn readable_extensions() -> &'static [&'static str] {
    #[cfg(feature = "storage_hdf5")]
    {
        &["json", "h5", "hdf5"]
    }
    #[cfg(not(feature = "storage_hdf5"))]
    {
        &["json"]
    }
}

/// Whether [`open_shard`] can read files with `extension` (leading dot ignored).
pub fn is_readable_extension(extension: &str) -> bool {
    readable_extensions().contains(&extension.trim_start_matches('.'))
}

/// Open a shard with the reader matching its extension.
pub fn open_shard(path: &Path) -> LiveResult<Box<dyn ShardReader>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(Box::new(JsonShard::open(path)?)),
        #[cfg(feature = "storage_hdf5")]
        Some("h5") | Some("hdf5") => Ok(Box::new(Hdf5Shard::open(path)?)),
        _ => Err(LiveError::Shard(format!(
            "no reader for shard file {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_times_combine_columns() {
        let times = record_times(&[1_639_144_062, 1_639_144_063], &[500_000_000, 0]).unwrap();
        assert_eq!(times[0].timestamp_subsec_nanos(), 500_000_000);
        assert!(times[0] < times[1]);
        assert!(record_times(&[1], &[]).is_err());
    }

    #[test]
    fn json_shard_reads_cells() {
        let times = record_times(&[100, 101], &[0, 0]).unwrap();
        let shard = JsonShard::new(&times)
            .with_column("A", vec![Some(PvValue::Float(1.5)), None])
            .unwrap();
        assert_eq!(shard.read_value("A", 0).unwrap(), Some(PvValue::Float(1.5)));
        assert_eq!(shard.read_value("A", 1).unwrap(), None);
        assert_eq!(shard.read_value("B", 0).unwrap(), None);
        assert_eq!(shard.pv_names().unwrap(), vec!["A"]);
        assert!(JsonShard::new(&times).with_column("C", vec![None]).is_err());
    }

    #[test]
    fn json_shard_document_layout() {
        let shard: JsonShard = serde_json::from_str(
            r#"{"secondsPastEpoch": [10, 11], "nanoseconds": [0, 5], "X:Y": [1, [2, 3]]}"#,
        )
        .unwrap();
        assert_eq!(shard.record_times().unwrap().len(), 2);
        assert_eq!(shard.read_value("X:Y", 1).unwrap(), Some(PvValue::Bits(vec![2, 3])));
    }

    #[test]
    fn unknown_extension_has_no_reader() {
        assert!(open_shard(Path::new("CU_HXR_20211210_140742.parquet")).is_err());
    }

    #[test]
    fn json_is_always_readable() {
        assert!(is_readable_extension("json"));
        assert!(is_readable_extension(".json"));
        assert!(!is_readable_extension("parquet"));
        assert_eq!(is_readable_extension("h5"), cfg!(feature = "storage_hdf5"));
    }

    #[cfg(feature = "storage_hdf5")]
    #[test]
    fn hdf5_shard_reads_single_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CU_HXR_20211210_000003.h5");
        {
            let file = hdf5::File::create(&path).unwrap();
            file.new_dataset::<f64>()
                .create(SECONDS_COLUMN, 3)
                .unwrap()
                .write(&vec![100.0, 101.0, 102.0])
                .unwrap();
            file.new_dataset::<f64>()
                .create(NANOSECONDS_COLUMN, 3)
                .unwrap()
                .write(&vec![0.0, 0.0, 500_000_000.0])
                .unwrap();
            file.new_dataset::<f64>()
                .create("KLYS:LI22:11:ENLD", 3)
                .unwrap()
                .write(&vec![210.0, f64::NAN, 212.5])
                .unwrap();
            file.new_dataset::<f64>()
                .create("KLYS:LI22:11:DSTA", (3, 2))
                .unwrap()
                .write_raw(&vec![0.0, 0.0, 4.0, 1.0, 0.0, 2.0])
                .unwrap();
        }

        let shard = open_shard(&path).unwrap();
        let times = shard.record_times().unwrap();
        assert_eq!(times.len(), 3);
        assert_eq!(times[2].timestamp_subsec_nanos(), 500_000_000);
        assert_eq!(
            shard.read_value("KLYS:LI22:11:ENLD", 2).unwrap(),
            Some(PvValue::Float(212.5))
        );
        assert_eq!(shard.read_value("KLYS:LI22:11:ENLD", 1).unwrap(), None);
        assert_eq!(
            shard.read_value("KLYS:LI22:11:DSTA", 1).unwrap(),
            Some(PvValue::Bits(vec![4, 1]))
        );
        assert_eq!(shard.read_value("KLYS:LI22:11:ENLD", 3).unwrap(), None);
        assert_eq!(shard.read_value("NOT:THERE", 0).unwrap(), None);
        assert_eq!(shard.pv_names().unwrap().len(), 2);
    }
}
