//! Status-gated datamap for one klystron station.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{render, DataMap, Dialect, Templates};
use crate::device::{DeviceReading, DeviceStatus};
use crate::error::{LiveError, LiveResult};
use crate::klystron::{is_decommissioned, klystron_pv_info, KlystronPvInfo, StatusPvNames};
use crate::snapshot::{format_float, Snapshot};
use crate::status::{StatusWords, STATUS_PATCHES};

/// Attribute names written for every station.
const ATTRIBUTES: [&str; 3] = ["ENLD_MeV", "phase_deg", "in_use"];

/// Datamap for one klystron.
///
/// Produces exactly three statements per evaluation: energy gain, phase and the in-use
/// flag. The in-use verdict gates on the beam code trigger and on the decoded status
/// words; see [`DeviceStatus::from_reading`].
///
/// `use_des` is not part of the persisted document and has to be supplied on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "KlystronDocument", into = "KlystronDocument")]
pub struct KlystronMap {
    name: String,
    sector: u32,
    station: u32,
    description: String,
    ampl_act: String,
    ampl_des: String,
    phase_act: String,
    phase_des: String,
    accelerate: Option<String>,
    status: Option<StatusPvNames>,
    use_des: bool,
}

impl KlystronMap {
    /// Station with readback PVs only; design PVs default to the readbacks.
    pub fn new(name: &str, sector: u32, station: u32, ampl_pv: &str, phase_pv: &str) -> Self {
        Self {
            name: name.to_string(),
            sector,
            station,
            description: String::new(),
            ampl_act: ampl_pv.to_string(),
            ampl_des: ampl_pv.to_string(),
            phase_act: phase_pv.to_string(),
            phase_des: phase_pv.to_string(),
            accelerate: None,
            status: None,
            use_des: false,
        }
    }

    /// Map with PV names derived from the station naming rules.
    pub fn for_station(sector: u32, station: u32, beamcode: u32) -> Self {
        Self::from_pv_info(klystron_pv_info(sector, station, beamcode))
    }

    /// Map from already derived PV names.
    pub fn from_pv_info(info: KlystronPvInfo) -> Self {
        Self {
            name: info.name,
            sector: info.sector,
            station: info.station,
            description: info.description,
            ampl_act: info.ampl_act,
            ampl_des: info.ampl_des,
            phase_act: info.phase_act,
            phase_des: info.phase_des,
            accelerate: info.accelerate,
            status: info.status,
            use_des: false,
        }
    }

    /// Gate on a trigger PV (`1` = accelerating).
    pub fn with_active_pv(mut self, pv: &str) -> Self {
        self.accelerate = Some(pv.to_string());
        self
    }

    /// Gate on the four status words.
    pub fn with_status_pvs(mut self, status: StatusPvNames) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the design PVs.
    pub fn with_design_pvs(mut self, ampl_des: &str, phase_des: &str) -> Self {
        self.ampl_des = ampl_des.to_string();
        self.phase_des = phase_des.to_string();
        self
    }

    /// Read design values instead of readbacks.
    pub fn with_use_des(mut self, use_des: bool) -> Self {
        self.use_des = use_des;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Model element name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sector number.
    pub fn sector(&self) -> u32 {
        self.sector
    }

    /// Station number.
    pub fn station(&self) -> u32 {
        self.station
    }

    /// Free text.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Trigger PV, if any.
    pub fn active_pv(&self) -> Option<&str> {
        self.accelerate.as_deref()
    }

    /// Status PVs, if any.
    pub fn status_pvs(&self) -> Option<&StatusPvNames> {
        self.status.as_ref()
    }

    /// Whether design values are read.
    pub fn use_des(&self) -> bool {
        self.use_des
    }

    /// Amplitude PV currently read.
    pub fn amplitude_pv(&self) -> &str {
        if self.use_des {
            &self.ampl_des
        } else {
            &self.ampl_act
        }
    }

    /// Phase PV currently read.
    pub fn phase_pv(&self) -> &str {
        if self.use_des {
            &self.phase_des
        } else {
            &self.phase_act
        }
    }

    /// Raw inputs for this station from a snapshot, status patches applied.
    pub fn reading(&self, snapshot: &Snapshot) -> DeviceReading {
        let is_accelerating = !is_decommissioned(self.sector, self.station)
            && self
                .accelerate
                .as_deref()
                .map_or(true, |pv| snapshot.number(pv) == Some(1.0));

        let status = self.status.as_ref().map(|pvs| {
            StatusWords {
                swrd: snapshot.word(&pvs.swrd),
                stat: snapshot.word(&pvs.stat),
                hdsc: snapshot.word(&pvs.hdsc),
                dsta: snapshot.word_pair(&pvs.dsta),
            }
            .patched(STATUS_PATCHES, self.sector, self.station)
        });
        if let Some(words) = status.filter(|w| !w.is_complete()) {
            warn!(
                klystron = %self.name,
                ?words,
                "Status words undetermined, station treated as not usable"
            );
        }

        DeviceReading {
            amplitude: snapshot.number(self.amplitude_pv()),
            phase: snapshot.number(self.phase_pv()),
            is_accelerating,
            status,
        }
    }

    /// Effective state of the station.
    pub fn evaluate(&self, snapshot: &Snapshot) -> DeviceStatus {
        DeviceStatus::from_reading(&self.reading(snapshot))
    }

    /// Serialize to a JSON document.
    pub fn to_json(&self) -> LiveResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Build from a JSON document.
    pub fn from_json(s: &str, use_des: bool) -> LiveResult<Self> {
        let map: Self = serde_json::from_str(s)?;
        Ok(map.with_use_des(use_des))
    }
}

impl DataMap for KlystronMap {
    fn pv_list(&self) -> Vec<String> {
        let mut names = vec![self.amplitude_pv().to_string(), self.phase_pv().to_string()];
        names.extend(self.accelerate.iter().cloned());
        if let Some(status) = &self.status {
            names.extend(status.to_vec());
        }
        names
    }

    fn format(&self, snapshot: &Snapshot, dialect: &Dialect) -> LiveResult<Vec<String>> {
        let templates = Templates::default();
        let template = templates.for_dialect(dialect);
        let status = self.evaluate(snapshot);
        let values = [
            format_float(status.amplitude),
            format_float(status.phase),
            status.in_use_flag().to_string(),
        ];
        ATTRIBUTES
            .iter()
            .zip(values.iter())
            .map(|(attribute, value)| render(template, &self.name, attribute, value))
            .collect()
    }

    fn set_use_des(&mut self, use_des: bool) {
        self.use_des = use_des;
    }
}

/// Persisted form; absent optional PVs are written as empty strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KlystronDocument {
    name: String,
    sector: u32,
    station: u32,
    #[serde(default)]
    description: String,
    ampl_act_pvname: String,
    ampl_des_pvname: String,
    phase_act_pvname: String,
    phase_des_pvname: String,
    #[serde(default)]
    accelerate_pvname: String,
    #[serde(default)]
    swrd_pvname: String,
    #[serde(default)]
    stat_pvname: String,
    #[serde(default)]
    hdsc_pvname: String,
    #[serde(default)]
    dsta_pvname: String,
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

impl TryFrom<KlystronDocument> for KlystronMap {
    type Error = LiveError;

    fn try_from(doc: KlystronDocument) -> Result<Self, Self::Error> {
        let status_fields = [
            &doc.swrd_pvname,
            &doc.stat_pvname,
            &doc.hdsc_pvname,
            &doc.dsta_pvname,
        ];
        let present = status_fields.iter().filter(|s| !s.is_empty()).count();
        let status = match present {
            0 => None,
            4 => Some(StatusPvNames {
                swrd: doc.swrd_pvname,
                stat: doc.stat_pvname,
                hdsc: doc.hdsc_pvname,
                dsta: doc.dsta_pvname,
            }),
            _ => {
                return Err(LiveError::InvalidDataMap(format!(
                    "klystron {}: status PVs must be given all together or not at all",
                    doc.name
                )))
            }
        };

        Ok(Self {
            name: doc.name,
            sector: doc.sector,
            station: doc.station,
            description: doc.description,
            ampl_act: doc.ampl_act_pvname,
            ampl_des: doc.ampl_des_pvname,
            phase_act: doc.phase_act_pvname,
            phase_des: doc.phase_des_pvname,
            accelerate: non_empty(doc.accelerate_pvname),
            status,
            use_des: false,
        })
    }
}

impl From<KlystronMap> for KlystronDocument {
    fn from(map: KlystronMap) -> Self {
        let status = map.status.unwrap_or_else(|| StatusPvNames {
            swrd: String::new(),
            stat: String::new(),
            hdsc: String::new(),
            dsta: String::new(),
        });
        Self {
            name: map.name,
            sector: map.sector,
            station: map.station,
            description: map.description,
            ampl_act_pvname: map.ampl_act,
            ampl_des_pvname: map.ampl_des,
            phase_act_pvname: map.phase_act,
            phase_des_pvname: map.phase_des,
            accelerate_pvname: map.accelerate.unwrap_or_default(),
            swrd_pvname: status.swrd,
            stat_pvname: status.stat,
            hdsc_pvname: status.hdsc,
            dsta_pvname: status.dsta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn station() -> KlystronMap {
        KlystronMap::new("K1", 25, 1, "AMP", "PHASE")
    }

    #[test]
    fn ungated_station_example() {
        let snap = Snapshot::builder().value("AMP", 10.5).value("PHASE", 42.0).build();
        let map = station();
        assert_eq!(
            map.as_bmad(&snap).unwrap(),
            vec!["K1[ENLD_MeV] = 10.5", "K1[phase_deg] = 42.0", "K1[in_use] = 1"]
        );
        assert_eq!(
            map.as_tao(&snap).unwrap(),
            vec![
                "set ele K1 ENLD_MeV = 10.5",
                "set ele K1 phase_deg = 42.0",
                "set ele K1 in_use = 1"
            ]
        );
    }

    #[test]
    fn inactive_station_zeroes_phase() {
        let map = station().with_active_pv("ACT");
        let snap = Snapshot::builder()
            .value("AMP", 10.5)
            .value("PHASE", 42.0)
            .value("ACT", 0)
            .build();
        let status = map.evaluate(&snap);
        assert!(!status.in_use);
        assert_eq!(status.phase, 0.0);
        assert_eq!(map.as_bmad(&snap).unwrap()[2], "K1[in_use] = 0");
    }

    #[test]
    fn missing_trigger_value_is_not_accelerating() {
        let map = station().with_active_pv("ACT");
        let snap = Snapshot::builder().value("AMP", 10.5).value("PHASE", 42.0).build();
        assert!(!map.evaluate(&snap).is_accelerating);
    }

    #[test]
    fn missing_readings_render_zero() {
        let lines = station().as_bmad(&Snapshot::new()).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "K1[ENLD_MeV] = 0.0");
        assert_eq!(lines[1], "K1[phase_deg] = 0.0");
    }

    #[test]
    fn status_gating() {
        let map = KlystronMap::for_station(25, 4, 1);
        let healthy = Snapshot::builder()
            .value("KLYS:LI25:41:ENLD", 230.0)
            .value("KLYS:LI25:41:PHAS", -5.0)
            .value("KLYS:LI25:41:BEAMCODE1_STAT", 1)
            .value("KLYS:LI25:41:SWRD", 0)
            .value("KLYS:LI25:41:STAT", 0)
            .value("KLYS:LI25:41:HDSC", 0)
            .value("KLYS:LI25:41:DSTA", vec![0, 0])
            .build();
        assert!(map.evaluate(&healthy).in_use);

        // STAT bit 2 is "Offline"
        let offline = Snapshot::builder()
            .value("KLYS:LI25:41:ENLD", 230.0)
            .value("KLYS:LI25:41:PHAS", -5.0)
            .value("KLYS:LI25:41:BEAMCODE1_STAT", 1)
            .value("KLYS:LI25:41:SWRD", 0)
            .value("KLYS:LI25:41:STAT", 4)
            .value("KLYS:LI25:41:HDSC", 0)
            .value("KLYS:LI25:41:DSTA", vec![0, 0])
            .build();
        let status = map.evaluate(&offline);
        assert!(!status.is_usable);
        assert_eq!(status.phase, 0.0);

        let undetermined = healthy.select(&[
            "KLYS:LI25:41:ENLD",
            "KLYS:LI25:41:PHAS",
            "KLYS:LI25:41:BEAMCODE1_STAT",
        ]);
        assert!(!map.evaluate(&undetermined).in_use);
    }

    #[test]
    fn decommissioned_station_never_in_use() {
        let map = KlystronMap::for_station(26, 3, 1);
        let snap = Snapshot::builder()
            .value("KLYS:LI26:31:ENLD", 200.0)
            .value("KLYS:LI26:31:PHAS", 3.0)
            .build();
        let status = map.evaluate(&snap);
        assert!(!status.in_use);
        assert_eq!(status.amplitude, 200.0);
        assert_eq!(status.phase, 0.0);
    }

    #[test]
    fn pv_list_follows_use_des() {
        let mut map = KlystronMap::for_station(22, 5, 1);
        assert_eq!(
            map.pv_list(),
            vec![
                "KLYS:LI22:51:ENLD",
                "KLYS:LI22:51:PHAS",
                "KLYS:LI22:51:BEAMCODE1_STAT",
                "KLYS:LI22:51:SWRD",
                "KLYS:LI22:51:STAT",
                "KLYS:LI22:51:HDSC",
                "KLYS:LI22:51:DSTA",
            ]
        );
        map.set_use_des(true);
        assert_eq!(map.pv_list()[1], "KLYS:LI22:51:PDES");
        assert_eq!(station().pv_list(), vec!["AMP", "PHASE"]);
    }

    #[test]
    fn document_round_trip_drops_use_des() {
        let map = KlystronMap::for_station(21, 2, 2).with_use_des(true);
        let json = map.to_json().unwrap();
        assert!(json.contains(r#""swrd_pvname":"""#));
        assert!(!json.contains("use_des"));

        let back = KlystronMap::from_json(&json, false).unwrap();
        assert!(!back.use_des());
        assert_eq!(back, map.clone().with_use_des(false));
        assert!(back.status_pvs().is_none());
        assert!(back.active_pv().is_none());
    }

    #[test]
    fn partial_status_pvs_are_rejected() {
        let json = r#"{"name": "K", "sector": 25, "station": 1,
            "ampl_act_pvname": "A", "ampl_des_pvname": "A",
            "phase_act_pvname": "P", "phase_des_pvname": "P",
            "swrd_pvname": "S"}"#;
        assert!(KlystronMap::from_json(json, false).is_err());
    }

    #[traced_test]
    #[test]
    fn undetermined_status_is_logged() {
        let map = KlystronMap::for_station(22, 3, 1);
        let snap = Snapshot::builder()
            .value("KLYS:LI22:31:ENLD", 210.0)
            .value("KLYS:LI22:31:PHAS", 0.5)
            .value("KLYS:LI22:31:BEAMCODE1_STAT", 1)
            .value("KLYS:LI22:31:SWRD", 0)
            .build();
        let status = map.evaluate(&snap);
        assert!(!status.is_usable);
        assert!(!status.in_use);
        assert!(logs_contain("Status words undetermined"));
    }
}
