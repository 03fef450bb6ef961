//! Named collections of datamaps.
//!
//! A master document groups datamap lists by configuration name:
//!
//! ```json
//! { "cu_hxr": [ { "name": "quad", "class": "tabular", "data": { ... } },
//!               { "name": "K21_3", "class": "klystron", "data": "{...}" } ] }
//! ```
//!
//! `data` is either the datamap document itself or that document as a JSON string.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use super::{DataMap, Dialect, KlystronMap, TabularDataMap};
use crate::error::{LiveError, LiveResult};
use crate::snapshot::Snapshot;

/// Either kind of datamap.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyDataMap {
    /// Row driven map.
    Tabular(TabularDataMap),
    /// Single klystron station.
    Klystron(KlystronMap),
}

impl AnyDataMap {
    /// Class tag used in master documents.
    pub fn class(&self) -> &'static str {
        match self {
            AnyDataMap::Tabular(_) => "tabular",
            AnyDataMap::Klystron(_) => "klystron",
        }
    }

    fn inner(&self) -> &dyn DataMap {
        match self {
            AnyDataMap::Tabular(map) => map,
            AnyDataMap::Klystron(map) => map,
        }
    }

    fn to_value(&self) -> LiveResult<Value> {
        Ok(match self {
            AnyDataMap::Tabular(map) => serde_json::to_value(map)?,
            AnyDataMap::Klystron(map) => serde_json::to_value(map)?,
        })
    }
}

impl DataMap for AnyDataMap {
    fn pv_list(&self) -> Vec<String> {
        self.inner().pv_list()
    }

    fn format(&self, snapshot: &Snapshot, dialect: &Dialect) -> LiveResult<Vec<String>> {
        self.inner().format(snapshot, dialect)
    }

    fn set_use_des(&mut self, use_des: bool) {
        match self {
            AnyDataMap::Tabular(map) => map.set_use_des(use_des),
            AnyDataMap::Klystron(map) => map.set_use_des(use_des),
        }
    }
}

impl From<TabularDataMap> for AnyDataMap {
    fn from(map: TabularDataMap) -> Self {
        AnyDataMap::Tabular(map)
    }
}

impl From<KlystronMap> for AnyDataMap {
    fn from(map: KlystronMap) -> Self {
        AnyDataMap::Klystron(map)
    }
}

/// Which maps of a set read design values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UseDes {
    /// Readbacks everywhere.
    #[default]
    Never,
    /// Design values everywhere.
    Always,
    /// Design values for the named maps. The name `klystron` selects every klystron map.
    Only(Vec<String>),
}

impl UseDes {
    /// Whether the named map of the given class reads design values.
    pub fn applies_to(&self, name: &str, class: &str) -> bool {
        match self {
            UseDes::Never => false,
            UseDes::Always => true,
            UseDes::Only(names) => names
                .iter()
                .any(|n| n == name || (class == "klystron" && n == "klystron")),
        }
    }
}

impl FromStr for UseDes {
    type Err = LiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "false" | "no" => Ok(UseDes::Never),
            "all" | "true" | "yes" => Ok(UseDes::Always),
            _ => Ok(UseDes::Only(
                s.split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
        }
    }
}

impl From<bool> for UseDes {
    fn from(use_des: bool) -> Self {
        if use_des {
            UseDes::Always
        } else {
            UseDes::Never
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MasterEntry {
    name: String,
    class: String,
    data: Value,
}

/// Ordered, named datamaps for one machine configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataMapSet {
    maps: Vec<(String, AnyDataMap)>,
}

impl DataMapSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a map. A later map with the same name replaces the earlier one in place.
    pub fn push(&mut self, name: &str, map: impl Into<AnyDataMap>) {
        let map = map.into();
        match self.maps.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = map,
            None => self.maps.push((name.to_string(), map)),
        }
    }

    /// Maps in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AnyDataMap)> {
        self.maps.iter().map(|(n, m)| (n.as_str(), m))
    }

    /// Map by name.
    pub fn get(&self, name: &str) -> Option<&AnyDataMap> {
        self.maps.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    /// Names in order.
    pub fn names(&self) -> Vec<&str> {
        self.maps.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Number of maps.
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// True without maps.
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Apply a design-value selection to every map.
    pub fn apply_use_des(&mut self, use_des: &UseDes) {
        for (name, map) in &mut self.maps {
            let enabled = use_des.applies_to(name, map.class());
            map.set_use_des(enabled);
        }
    }

    /// Union of all PV lists, first occurrence order.
    pub fn pv_list(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.maps
            .iter()
            .flat_map(|(_, m)| m.pv_list())
            .filter(|pv| seen.insert(pv.clone()))
            .collect()
    }

    /// Statements of every map, in map order.
    pub fn format(&self, snapshot: &Snapshot, dialect: &Dialect) -> LiveResult<Vec<String>> {
        let mut lines = Vec::new();
        for (name, map) in &self.maps {
            let out = map.format(snapshot, dialect)?;
            debug!(datamap = %name, lines = out.len(), "Rendered datamap");
            lines.extend(out);
        }
        Ok(lines)
    }

    /// Load the maps of one configuration from a master document.
    ///
    /// `use_des` decides for every map, the same way [`DataMapSet::apply_use_des`] does.
    pub fn from_master_json(json: &str, config_name: &str, use_des: &UseDes) -> LiveResult<Self> {
        let mut master: BTreeMap<String, Vec<MasterEntry>> = serde_json::from_str(json)?;
        let entries = master.remove(config_name).ok_or_else(|| {
            LiveError::InvalidDataMap(format!(
                "configuration '{config_name}' not found, available: {:?}",
                master.keys().collect::<Vec<_>>()
            ))
        })?;

        let mut set = Self::new();
        for entry in entries {
            let data = match entry.data {
                Value::String(s) => serde_json::from_str(&s)?,
                other => other,
            };
            let mut map = match entry.class.as_str() {
                "tabular" => AnyDataMap::Tabular(serde_json::from_value(data)?),
                "klystron" => AnyDataMap::Klystron(serde_json::from_value(data)?),
                other => {
                    return Err(LiveError::InvalidDataMap(format!(
                        "unknown datamap class '{other}' for '{}'",
                        entry.name
                    )))
                }
            };
            // the selection wins over a flag persisted in the document
            map.set_use_des(use_des.applies_to(&entry.name, map.class()));
            set.push(&entry.name, map);
        }
        Ok(set)
    }

    /// Load one configuration from a master document file.
    pub fn load_master(path: &Path, config_name: &str, use_des: &UseDes) -> LiveResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let set = Self::from_master_json(&json, config_name, use_des)?;
        info!(
            path = %path.display(),
            config = config_name,
            datamaps = set.len(),
            "Loaded datamaps"
        );
        Ok(set)
    }

    /// Master document holding this set under `config_name`.
    pub fn to_master_json(&self, config_name: &str) -> LiveResult<String> {
        let entries = self
            .maps
            .iter()
            .map(|(name, map)| -> LiveResult<MasterEntry> {
                Ok(MasterEntry {
                    name: name.clone(),
                    class: map.class().to_string(),
                    data: map.to_value()?,
                })
            })
            .collect::<LiveResult<Vec<_>>>()?;
        let mut master = BTreeMap::new();
        master.insert(config_name.to_string(), entries);
        Ok(serde_json::to_string_pretty(&master)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamap::MappingRow;

    fn sample_set() -> DataMapSet {
        let mut set = DataMapSet::new();
        set.push(
            "quad",
            TabularDataMap::new(vec![
                MappingRow::new("Q1:BACT", "Q1", "B1").with_des_pv("Q1:BDES"),
                MappingRow::new("SHARED", "Q2", "B1"),
            ]),
        );
        set.push(
            "K1",
            KlystronMap::new("K1", 25, 1, "AMP", "PHASE").with_design_pvs("ADES", "PDES"),
        );
        set.push(
            "other",
            TabularDataMap::new(vec![MappingRow::new("SHARED", "X", "Y")]),
        );
        set
    }

    #[test]
    fn use_des_selection() {
        assert_eq!("all".parse::<UseDes>().unwrap(), UseDes::Always);
        assert_eq!("".parse::<UseDes>().unwrap(), UseDes::Never);
        let only: UseDes = "quad, klystron".parse().unwrap();
        assert!(only.applies_to("quad", "tabular"));
        assert!(only.applies_to("K25_1", "klystron"));
        assert!(!only.applies_to("other", "tabular"));
    }

    #[test]
    fn pv_list_is_deduplicated() {
        let set = sample_set();
        assert_eq!(
            set.pv_list(),
            vec!["Q1:BACT", "SHARED", "AMP", "PHASE"]
        );
    }

    #[test]
    fn format_concatenates_in_order() {
        let snap = Snapshot::builder()
            .value("Q1:BACT", 1.5)
            .value("SHARED", 2)
            .value("AMP", 10.5)
            .value("PHASE", 42.0)
            .build();
        let lines = sample_set().format(&snap, &Dialect::Bmad).unwrap();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "Q1[B1] = 1.5");
        assert_eq!(lines[2], "K1[ENLD_MeV] = 10.5");
        assert_eq!(lines[5], "X[Y] = 2");
    }

    #[test]
    fn master_round_trip_with_use_des() {
        let set = sample_set();
        let json = set.to_master_json("cu_hxr").unwrap();

        let plain = DataMapSet::from_master_json(&json, "cu_hxr", &UseDes::Never).unwrap();
        assert_eq!(plain.names(), vec!["quad", "K1", "other"]);
        assert_eq!(plain.pv_list(), set.pv_list());

        let des = DataMapSet::from_master_json(
            &json,
            "cu_hxr",
            &UseDes::Only(vec!["klystron".into()]),
        )
        .unwrap();
        assert_eq!(des.get("K1").unwrap().pv_list(), vec!["ADES", "PDES"]);
        assert_eq!(des.get("quad").unwrap().pv_list()[0], "Q1:BACT");
    }

    #[test]
    fn data_may_be_an_embedded_string() {
        let inner = KlystronMap::new("K2", 25, 2, "A", "P").to_json().unwrap();
        let master = serde_json::json!({
            "cfg": [{"name": "K2", "class": "klystron", "data": inner}]
        })
        .to_string();
        let set = DataMapSet::from_master_json(&master, "cfg", &UseDes::Always).unwrap();
        assert_eq!(set.get("K2").unwrap().pv_list(), vec!["A", "P"]);
    }

    #[test]
    fn unknown_class_and_config_fail() {
        let master = r#"{"cfg": [{"name": "x", "class": "magic", "data": {}}]}"#;
        assert!(matches!(
            DataMapSet::from_master_json(master, "cfg", &UseDes::Never),
            Err(LiveError::InvalidDataMap(_))
        ));
        assert!(DataMapSet::from_master_json(master, "nope", &UseDes::Never).is_err());
    }

    #[test]
    fn load_selection_overrides_persisted_flag() {
        let mut set = DataMapSet::new();
        set.push(
            "quad",
            TabularDataMap::new(vec![MappingRow::new("Q1:BACT", "Q1", "B1").with_des_pv("Q1:BDES")])
                .with_use_des(true),
        );
        let json = set.to_master_json("cfg").unwrap();
        assert!(json.contains("\"use_des\": true"));

        let loaded = DataMapSet::from_master_json(&json, "cfg", &UseDes::Never).unwrap();
        assert_eq!(loaded.pv_list(), vec!["Q1:BACT"]);

        let mut applied = set.clone();
        applied.apply_use_des(&UseDes::Never);
        assert_eq!(applied.pv_list(), loaded.pv_list());

        let des = DataMapSet::from_master_json(&json, "cfg", &"quad".parse().unwrap()).unwrap();
        assert_eq!(des.pv_list(), vec!["Q1:BDES"]);
    }
}
