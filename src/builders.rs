//! Built-in datamaps for the copper linac beam paths.
//!
//! These cover the parts of the machine whose PVs are fixed by convention and need no
//! lattice lookup: linac phases and chicane offsets, energy measurements, subboosters,
//! every installed klystron, and measured beginning Twiss parameters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::datamap::{DataMapSet, KlystronMap, MappingRow, TabularDataMap, TAO_MEAS_FORMAT};
use crate::error::LiveError;
use crate::klystron::{subbooster_pv_info, EXISTING_KLYSTRONS, SUBBOOSTER_SECTORS};

/// Bmad has no counterpart of a Tao measurement datum; the statement is kept as a comment.
pub const BMAD_NO_MEAS_FORMAT: &str = "! No equivalent Bmad format for: set data {element}|meas  = {value}";

/// GeV to eV.
const GEV: f64 = 1e9;

/// Beam path of the copper linac.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Beampath {
    /// Hard x-ray line.
    CuHxr,
    /// Soft x-ray line.
    CuSxr,
}

impl Beampath {
    /// Beam code selecting trigger and datastore PVs.
    pub fn beamcode(self) -> u32 {
        match self {
            Beampath::CuHxr => 1,
            Beampath::CuSxr => 2,
        }
    }

    /// Upper-case prefix used in archive shard names.
    pub fn prefix(self) -> &'static str {
        match self {
            Beampath::CuHxr => "CU_HXR",
            Beampath::CuSxr => "CU_SXR",
        }
    }
}

impl fmt::Display for Beampath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Beampath::CuHxr => f.write_str("cu_hxr"),
            Beampath::CuSxr => f.write_str("cu_sxr"),
        }
    }
}

impl FromStr for Beampath {
    type Err = LiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cu_hxr" => Ok(Beampath::CuHxr),
            "cu_sxr" => Ok(Beampath::CuSxr),
            _ => Err(LiveError::Configuration(format!(
                "Unknown beam path '{s}'. Use cu_hxr or cu_sxr"
            ))),
        }
    }
}

/// Chicane offsets and linac phases.
pub fn linac_datamap(beampath: Beampath) -> TabularDataMap {
    let mut rows = vec![
        MappingRow::new("BMLN:LI21:235:MOTR", "O_BC1_OFFSET", "offset")
            .with_name("BC1_offset")
            .with_factor(0.001)
            .with_unit("m"),
        MappingRow::new("BMLN:LI24:805:MOTR", "O_BC2_OFFSET", "offset")
            .with_name("BC2_offset")
            .with_factor(0.001)
            .with_unit("m"),
        // L1 is a single station, its klystron map sets the phase
        MappingRow::new("ACCL:LI21:1:L1S_S_PV", "O_L1", "phase_deg")
            .with_name("L1_phase")
            .with_factor(0),
    ];
    let suffix = match beampath {
        Beampath::CuHxr => "",
        Beampath::CuSxr => ":SETDATA_1",
    };
    rows.push(
        MappingRow::new(&format!("ACCL:LI22:1:PDES{suffix}"), "O_L2", "phase_deg")
            .with_name("L2_phase"),
    );
    rows.push(
        MappingRow::new(&format!("ACCL:LI25:1:PDES{suffix}"), "O_L3", "phase_deg")
            .with_name("L3_phase"),
    );
    TabularDataMap::new(rows)
}

/// Bend energy setpoints as Tao measurement data, in eV.
pub fn energy_datamap(beampath: Beampath) -> TabularDataMap {
    let l3_bend = match beampath {
        Beampath::CuHxr => ("L3_HXR_energy", "BEND:DMPH:400:EDES"),
        Beampath::CuSxr => ("L3_SXR_energy", "BEND:DMPS:400:EDES"),
    };
    let rows = [
        ("L1_energy", "BEND:LI21:231:EDES", "BC1.energy[1]"),
        ("L2_energy", "BEND:LI24:790:EDES", "BC2.energy[1]"),
        (l3_bend.0, l3_bend.1, "L3.energy[2]"),
    ]
    .into_iter()
    .map(|(name, pv, datum)| {
        MappingRow::new(pv, datum, "")
            .with_name(name)
            .with_factor(GEV)
            .with_unit("eV")
    })
    .collect();
    TabularDataMap::new(rows).with_templates(BMAD_NO_MEAS_FORMAT, TAO_MEAS_FORMAT)
}

/// Subbooster phases of sectors 21 through 30.
pub fn subbooster_datamap(beampath: Beampath) -> TabularDataMap {
    let rows = SUBBOOSTER_SECTORS
        .filter_map(|sector| subbooster_pv_info(sector, beampath.beamcode()))
        .map(|info| {
            MappingRow::new(&info.phase_act, &info.name, "phase_deg")
                .with_des_pv(&info.phase_des)
                .with_name(&info.name)
                .with_unit("deg")
        })
        .collect();
    TabularDataMap::new(rows)
}

/// One map per installed klystron, in sector/station order.
pub fn klystron_datamaps(beampath: Beampath) -> Vec<KlystronMap> {
    EXISTING_KLYSTRONS
        .iter()
        .map(|&(sector, station)| KlystronMap::for_station(sector, station, beampath.beamcode()))
        .collect()
}

/// Measured Twiss parameters at the lattice beginning, from a matching-screen prefix.
pub fn beginning_twiss_datamap(name: &str, pvprefix: &str) -> TabularDataMap {
    let rows = [
        ("beta_x", "BETA_X", "beta_a"),
        ("beta_y", "BETA_Y", "beta_b"),
        ("alpha_x", "ALPHA_X", "alpha_a"),
        ("alpha_y", "ALPHA_Y", "alpha_b"),
    ]
    .into_iter()
    .map(|(label, suffix, attribute)| {
        MappingRow::new(&format!("{pvprefix}:{suffix}"), "beginning", attribute)
            .with_name(&format!("{name}_{label}_meas"))
    })
    .collect();
    TabularDataMap::new(rows)
}

/// Every built-in map for a beam path, keyed like a master document.
pub fn default_datamaps(beampath: Beampath) -> DataMapSet {
    let mut set = DataMapSet::new();
    set.push("linac", linac_datamap(beampath));
    set.push("energy", energy_datamap(beampath));
    set.push("subboosters", subbooster_datamap(beampath));
    for map in klystron_datamaps(beampath) {
        let name = map.name().to_string();
        set.push(&name, map);
    }
    set
}
