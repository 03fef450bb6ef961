//! Klystron and subbooster PV naming.
//!
//! A station is identified by `(sector, station)`. Regular stations follow
//! `KLYS:LI{sector}:{station}1` with fixed suffixes; the injector, L1 and special
//! feedback stations use their LLRF names instead. The exceptions below are the complete
//! list, anything not listed is a regular station.

use serde::{Deserialize, Serialize};

/// Every installed klystron as `(sector, station)`.
pub const EXISTING_KLYSTRONS: &[(u32, u32)] = &[
    // GUN, L0A, L0B
    (20, 6), (20, 7), (20, 8),
    // L1S, L1X
    (21, 1), (21, 2),
    // L2
    (21, 3), (21, 4), (21, 5), (21, 6), (21, 7), (21, 8),
    (22, 1), (22, 2), (22, 3), (22, 4), (22, 5), (22, 6), (22, 7), (22, 8),
    (23, 1), (23, 2), (23, 3), (23, 4), (23, 5), (23, 6), (23, 7), (23, 8),
    (24, 1), (24, 2), (24, 3), (24, 4), (24, 5), (24, 6),
    // L3
    (25, 1), (25, 2), (25, 3), (25, 4), (25, 5), (25, 6), (25, 7), (25, 8),
    (26, 1), (26, 2), (26, 3), (26, 4), (26, 5), (26, 6), (26, 7), (26, 8),
    (27, 1), (27, 2), (27, 3), (27, 4), (27, 5), (27, 6), (27, 7), (27, 8),
    (28, 1), (28, 2), (28, 3), (28, 4), (28, 5), (28, 6), (28, 7), (28, 8),
    (29, 1), (29, 2), (29, 3), (29, 4), (29, 5), (29, 6), (29, 7), (29, 8),
    (30, 1), (30, 2), (30, 3), (30, 4), (30, 5), (30, 6), (30, 7), (30, 8),
];

/// Stations that never accelerate, whatever their trigger PV says.
pub const DECOMMISSIONED_KLYSTRONS: &[(u32, u32)] = &[
    // electronics upgrade test bed
    (26, 3),
];

/// Sectors with a subbooster.
pub const SUBBOOSTER_SECTORS: std::ops::RangeInclusive<u32> = 21..=30;

/// Whether a station is hardwired off.
pub fn is_decommissioned(sector: u32, station: u32) -> bool {
    DECOMMISSIONED_KLYSTRONS.contains(&(sector, station))
}

/// Model element name, e.g. `K21_3`.
pub fn klystron_name(sector: u32, station: u32) -> String {
    format!("K{sector}_{station}")
}

/// Control-system device name; station 0 is the sector's subbooster.
pub fn device_name(sector: u32, station: u32) -> String {
    if station == 0 {
        format!("SBST:LI{sector}:1")
    } else {
        format!("KLYS:LI{sector}:{station}1")
    }
}

/// Beam code a station usually runs on.
pub fn typical_beam_code(sector: u32, station: u32) -> u32 {
    match (sector, station) {
        (s, _) if s > 20 => 1,
        (20, st) if st >= 5 => 1,
        (s, _) if s >= 2 => 10,
        _ => 11,
    }
}

/// Status PV names of a station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPvNames {
    /// Primary status word.
    pub swrd: String,
    /// Secondary status word.
    pub stat: String,
    /// Auxiliary status word.
    pub hdsc: String,
    /// Two-word diagnostic status.
    pub dsta: String,
}

impl StatusPvNames {
    /// Status PVs under a device base name.
    pub fn for_base(base: &str) -> Self {
        Self {
            swrd: format!("{base}:SWRD"),
            stat: format!("{base}:STAT"),
            hdsc: format!("{base}:HDSC"),
            dsta: format!("{base}:DSTA"),
        }
    }

    /// Names in `SWRD, STAT, HDSC, DSTA` order.
    pub fn to_vec(&self) -> Vec<String> {
        vec![
            self.swrd.clone(),
            self.stat.clone(),
            self.hdsc.clone(),
            self.dsta.clone(),
        ]
    }
}

/// Every PV name a klystron datamap needs, derived from `(sector, station, beamcode)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlystronPvInfo {
    /// Model element name.
    pub name: String,
    /// Sector number.
    pub sector: u32,
    /// Station number.
    pub station: u32,
    /// Free text.
    pub description: String,
    /// Amplitude readback.
    pub ampl_act: String,
    /// Amplitude setpoint.
    pub ampl_des: String,
    /// Phase readback.
    pub phase_act: String,
    /// Phase setpoint.
    pub phase_des: String,
    /// Beam code trigger status, `1` when accelerating.
    pub accelerate: Option<String>,
    /// Status words, when the station publishes them.
    pub status: Option<StatusPvNames>,
}

/// Derive the PV names of a station.
///
/// `beamcode` is 1 for the hard x-ray line and 2 for the soft x-ray line. It selects the
/// trigger status PV and the LLRF datastore suffix (`_DS0`, `_DS1`).
pub fn klystron_pv_info(sector: u32, station: u32, beamcode: u32) -> KlystronPvInfo {
    let mut description = format!("Klystron in sector {sector}, station {station}, beamcode {beamcode}");
    let ds = format!("_DS{}", beamcode.saturating_sub(1));

    let mut has_beamcode = false;
    let mut has_fault_pvs = false;

    let (base, ampl_des, phase_des, ampl_act, phase_act) = match (sector, station) {
        (20, 6) => {
            description.push_str(" for the GUN");
            let base = "GUN:IN20:1".to_string();
            (
                base.clone(),
                format!("{base}:GN1_ADES"),
                format!("{base}:GN1_PDES"),
                format!("{base}:GN1_AAVG"),
                format!("{base}:GN1_PAVG"),
            )
        }
        (20, 7) => {
            description.push_str(" for L0A");
            llrf_names("ACCL:IN20:300", "L0A", &ds)
        }
        (20, 8) => {
            description.push_str(" for L0B");
            llrf_names("ACCL:IN20:400", "L0B", &ds)
        }
        (21, 1) => {
            description.push_str(" for L1S");
            llrf_names("ACCL:LI21:1", "L1S", &ds)
        }
        (21, 2) => {
            description.push_str(" for L1X");
            llrf_names("ACCL:LI21:180", "L1X", &ds)
        }
        (24, 1..=3) => {
            description.push_str(" for special feedback");
            has_fault_pvs = true;
            has_beamcode = true;
            let base = device_name(sector, station);
            // no readback exists, the setpoint serves for both
            let phase = format!("ACCL:LI24:{station}00:KLY_PDES:SETDATA_{beamcode}");
            (
                base.clone(),
                format!("{base}:ENLD"),
                phase.clone(),
                format!("{base}:ENLD"),
                phase,
            )
        }
        _ => {
            has_fault_pvs = true;
            has_beamcode = true;
            let base = device_name(sector, station);
            (
                base.clone(),
                format!("{base}:ENLD"),
                format!("{base}:PDES"),
                format!("{base}:ENLD"),
                format!("{base}:PHAS"),
            )
        }
    };

    if is_decommissioned(sector, station) {
        has_beamcode = false;
        has_fault_pvs = false;
    }

    KlystronPvInfo {
        name: klystron_name(sector, station),
        sector,
        station,
        description,
        ampl_act,
        ampl_des,
        phase_act,
        phase_des,
        accelerate: has_beamcode.then(|| format!("{base}:BEAMCODE{beamcode}_STAT")),
        status: has_fault_pvs.then(|| StatusPvNames::for_base(&base)),
    }
}

fn llrf_names(base: &str, tag: &str, ds: &str) -> (String, String, String, String, String) {
    (
        base.to_string(),
        format!("{base}:{tag}_ADES{ds}"),
        format!("{base}:{tag}_PDES{ds}"),
        format!("{base}:{tag}_AACT{ds}"),
        format!("{base}:{tag}_PACT{ds}"),
    )
}

/// Phase PV names of a subbooster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubboosterPvInfo {
    /// Model element name, `SBST_{sector}`.
    pub name: String,
    /// Sector number.
    pub sector: u32,
    /// Free text.
    pub description: String,
    /// Phase readback.
    pub phase_act: String,
    /// Phase setpoint.
    pub phase_des: String,
}

/// Derive the subbooster PV names for a sector, or `None` if the sector has none.
pub fn subbooster_pv_info(sector: u32, beamcode: u32) -> Option<SubboosterPvInfo> {
    let name = format!("SBST_{sector}");
    match sector {
        21..=28 => Some(SubboosterPvInfo {
            name,
            sector,
            description: "Normal subbooster".to_string(),
            phase_act: format!("SBST:LI{sector}:1:PHAS"),
            phase_des: format!("SBST:LI{sector}:1:PDES"),
        }),
        29 | 30 => {
            let mut phase = format!("ACCL:LI{sector}:0:KLY_PDES");
            if beamcode == 2 {
                phase.push_str(":SETDATA_1");
            }
            Some(SubboosterPvInfo {
                name,
                sector,
                description: format!("Special feedback subbooster, beamcode {beamcode}"),
                phase_act: phase.clone(),
                phase_des: phase,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_station_names() {
        let info = klystron_pv_info(22, 4, 1);
        assert_eq!(info.name, "K22_4");
        assert_eq!(info.ampl_act, "KLYS:LI22:41:ENLD");
        assert_eq!(info.phase_act, "KLYS:LI22:41:PHAS");
        assert_eq!(info.phase_des, "KLYS:LI22:41:PDES");
        assert_eq!(info.accelerate.as_deref(), Some("KLYS:LI22:41:BEAMCODE1_STAT"));
        assert_eq!(info.status.unwrap().dsta, "KLYS:LI22:41:DSTA");
    }

    #[test]
    fn front_end_stations_use_llrf_names() {
        let l0a = klystron_pv_info(20, 7, 2);
        assert_eq!(l0a.ampl_des, "ACCL:IN20:300:L0A_ADES_DS1");
        assert_eq!(l0a.phase_act, "ACCL:IN20:300:L0A_PACT_DS1");
        assert!(l0a.accelerate.is_none());
        assert!(l0a.status.is_none());

        let gun = klystron_pv_info(20, 6, 1);
        assert_eq!(gun.phase_act, "GUN:IN20:1:GN1_PAVG");
        assert!(gun.description.ends_with("for the GUN"));
    }

    #[test]
    fn feedback_stations_share_phase_setpoint() {
        let info = klystron_pv_info(24, 2, 1);
        assert_eq!(info.phase_act, "ACCL:LI24:200:KLY_PDES:SETDATA_1");
        assert_eq!(info.phase_des, info.phase_act);
        assert_eq!(info.ampl_act, "KLYS:LI24:21:ENLD");
        assert!(info.status.is_some());
    }

    #[test]
    fn decommissioned_station_has_no_gating_pvs() {
        let info = klystron_pv_info(26, 3, 1);
        assert!(info.accelerate.is_none());
        assert!(info.status.is_none());
        assert!(is_decommissioned(26, 3));
        assert!(!is_decommissioned(26, 4));
    }

    #[test]
    fn subboosters() {
        assert_eq!(subbooster_pv_info(22, 1).unwrap().phase_act, "SBST:LI22:1:PHAS");
        assert_eq!(
            subbooster_pv_info(29, 2).unwrap().phase_act,
            "ACCL:LI29:0:KLY_PDES:SETDATA_1"
        );
        assert_eq!(
            subbooster_pv_info(30, 1).unwrap().phase_des,
            "ACCL:LI30:0:KLY_PDES"
        );
        assert!(subbooster_pv_info(20, 1).is_none());
    }

    #[test]
    fn beam_codes() {
        assert_eq!(typical_beam_code(25, 1), 1);
        assert_eq!(typical_beam_code(20, 6), 1);
        assert_eq!(typical_beam_code(20, 2), 10);
        assert_eq!(typical_beam_code(1, 1), 11);
        assert_eq!(device_name(25, 0), "SBST:LI25:1");
    }
}
