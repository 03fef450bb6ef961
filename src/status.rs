//! Klystron status word decoding.
//!
//! Each klystron publishes four status PVs:
//!
//! | PV     | Category   | Width       |
//! |--------|------------|-------------|
//! | `SWRD` | primary    | one word    |
//! | `STAT` | secondary  | one word    |
//! | `HDSC` | auxiliary  | one word    |
//! | `DSTA` | diagnostic | two words   |
//!
//! Every meaningful bit maps to a named fault with a priority, lower being more severe.
//! Decoding is pure: a word and a table in, a priority-ordered fault list out. Whether a
//! reading can be trusted is decided against a fixed denylist ([`UNUSABLE_FAULTS`]);
//! informational faults such as "Out of Tolerance" do not disqualify a station.
//!
//! Known false positives on specific stations are handled by [`StatusPatch`] entries that
//! clear bits before decoding, instead of special cases inside the decoder.

use serde::Serialize;
use std::fmt;

/// A decoded fault condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Fault {
    /// Human readable fault name.
    pub name: &'static str,
    /// Severity, lower is more severe.
    pub priority: u8,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// One table entry: bit position to fault.
#[derive(Debug, Clone, Copy)]
pub struct FaultBit {
    /// Bit position, 0 is the least significant bit.
    pub bit: u8,
    /// Fault raised when the bit is set.
    pub fault: Fault,
}

const fn fb(bit: u8, name: &'static str, priority: u8) -> FaultBit {
    FaultBit {
        bit,
        fault: Fault { name, priority },
    }
}

/// Status word category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusCategory {
    /// `SWRD`
    Primary,
    /// `STAT`
    Secondary,
    /// `HDSC`
    Auxiliary,
    /// `DSTA`, first word
    DiagnosticA,
    /// `DSTA`, second word
    DiagnosticB,
}

/// Fixed bit-to-fault table for one status word category.
#[derive(Debug, Clone, Copy)]
pub struct FaultMap {
    /// Which word the table decodes.
    pub category: StatusCategory,
    /// Entries in ascending bit order.
    pub bits: &'static [FaultBit],
}

impl FaultMap {
    /// Fault for a bit, if the bit is meaningful.
    pub fn get(&self, bit: u8) -> Option<Fault> {
        self.bits.iter().find(|b| b.bit == bit).map(|b| b.fault)
    }

    /// Number of meaningful bits.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// True when no bit is meaningful.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}

/// `SWRD` table.
pub const SWRD_FAULTS: FaultMap = FaultMap {
    category: StatusCategory::Primary,
    bits: &[
        fb(0, "Bad Cable Status", 55),
        fb(1, "MKSU Protect", 80),
        fb(2, "No Triggers", 68),
        fb(3, "Modulator Fault", 67),
        fb(5, "Low RF Power", 80),
        fb(6, "Amplitude Mean", 70),
        fb(7, "Amplitude Jitter", 75),
        fb(8, "Lost Phase", 90),
        fb(10, "Phase Jitter", 75),
        fb(14, "No Sample Rate", 69),
    ],
};

/// `STAT` table.
pub const STAT_FAULTS: FaultMap = FaultMap {
    category: StatusCategory::Secondary,
    bits: &[
        fb(1, "Maintenance Mode", 10),
        fb(2, "Offline", 1),
        fb(3, "Out of Tolerance", 100),
        fb(4, "Bad CAMAC Status", 40),
        fb(6, "Dead Man Timeout", 50),
        fb(7, "Fox Phase Home Error", 57),
        fb(9, "Phase Mean", 75),
        fb(12, "IPL Required", 20),
        fb(14, "Update Required", 30),
    ],
};

/// `HDSC` table.
pub const HDSC_FAULTS: FaultMap = FaultMap {
    category: StatusCategory::Auxiliary,
    bits: &[
        fb(2, "To Be Replaced", 5),
        fb(3, "Awaiting Run Up", 5),
        fb(6, "Check Phase", 5),
    ],
};

/// `DSTA` first word table.
pub const DSTA1_FAULTS: FaultMap = FaultMap {
    category: StatusCategory::DiagnosticA,
    bits: &[
        fb(2, "SLED Motor Not At Limit", 65),
        fb(3, "SLED Upper Needle Fault", 65),
        fb(4, "SLED Lower Needle Fault", 65),
        fb(5, "Electromagnet Current Out of Tolerance", 65),
        fb(6, "Klystron Temperature", 65),
        fb(8, "Reflected Energy", 65),
        fb(9, "Over Voltage", 65),
        fb(10, "Over Current", 65),
        fb(11, "PPYY Resync", 67),
        fb(12, "ADC Read Error", 50),
        fb(13, "ADC Out of Tolerance", 72),
        fb(16, "Water Summary Fault", 61),
        fb(17, "Acc Flowswitch #1", 60),
        fb(18, "Acc Flowswitch #2", 60),
        fb(19, "Waveguide Flowswitch #1", 60),
        fb(20, "Waveguide Flowswitch #2", 60),
        fb(21, "Klystron Water Flowswitch", 60),
        fb(22, "24 Volt Battery", 60),
        fb(23, "Waveguide Vacuum", 60),
        fb(25, "Klystron Vacuum", 60),
        fb(26, "Electromagnet Current", 60),
        fb(27, "Electromagnet Breaker", 60),
        fb(28, "MKSU Trigger Enable", 60),
    ],
};

/// `DSTA` second word table.
pub const DSTA2_FAULTS: FaultMap = FaultMap {
    category: StatusCategory::DiagnosticB,
    bits: &[
        fb(4, "EVOC", 65),
        fb(6, "End of Line Clipper", 65),
        fb(7, "Mod Trigger Overcurrent", 65),
        fb(9, "External Fault", 65),
        fb(10, "Fault Lockout", 65),
        fb(11, "HV Ready", 65),
        fb(13, "Klystron Heater Delay", 65),
        fb(14, "VVS Voltage", 65),
        fb(15, "Control Power", 65),
    ],
};

/// Faults that make a station's readings untrustworthy.
pub const UNUSABLE_FAULTS: &[&str] = &[
    "Bad Cable Status",
    "MKSU Protect",
    "Modulator Fault",
    "Maintenance Mode",
    "Offline",
    "To Be Replaced",
    "Awaiting Run Up",
    "Check Phase",
    "SLED Motor Not At Limit",
    "SLED Upper Needle Fault",
    "SLED Lower Needle Fault",
    "Water Summary Fault",
    "Acc Flowswitch #1",
    "Acc Flowswitch #2",
    "Waveguide Flowswitch #1",
    "Waveguide Flowswitch #2",
    "Klystron Water Flowswitch",
    "24 Volt Battery",
    "Waveguide Vacuum",
    "Klystron Vacuum",
    "Electromagnet Current",
    "Electromagnet Breaker",
    "MKSU Trigger Enable",
    "EVOC",
    "End of Line Clipper",
    "Mod Trigger Overcurrent",
    "External Fault",
    "Fault Lockout",
    "HV Ready",
    "Klystron Heater Delay",
    "VVS Voltage",
    "Control Power",
];

fn bit_is_set(word: u64, bit: u8) -> bool {
    bit < 64 && (word >> bit) & 1 == 1
}

/// Decode one word against one table, ordered by priority.
///
/// Bits without a table entry are ignored. Equal priorities keep ascending bit order.
pub fn decode(word: u64, fault_map: &FaultMap) -> Vec<Fault> {
    let mut faults: Vec<Fault> = fault_map
        .bits
        .iter()
        .filter(|b| bit_is_set(word, b.bit))
        .map(|b| b.fault)
        .collect();
    faults.sort_by_key(|f| f.priority);
    faults
}

/// Decode a two-word diagnostic status; first-word faults come first.
pub fn decode_diagnostic(word_pair: [u64; 2], map_a: &FaultMap, map_b: &FaultMap) -> Vec<Fault> {
    let mut faults = decode(word_pair[0], map_a);
    faults.extend(decode(word_pair[1], map_b));
    faults
}

/// All faults from all four categories, sorted ascending by priority.
///
/// The sort is stable: ties keep category order (primary, secondary, auxiliary,
/// diagnostic).
pub fn all_faults(primary: u64, secondary: u64, auxiliary: u64, diagnostic: [u64; 2]) -> Vec<Fault> {
    let mut faults = decode(primary, &SWRD_FAULTS);
    faults.extend(decode(secondary, &STAT_FAULTS));
    faults.extend(decode(auxiliary, &HDSC_FAULTS));
    faults.extend(decode_diagnostic(diagnostic, &DSTA1_FAULTS, &DSTA2_FAULTS));
    faults.sort_by_key(|f| f.priority);
    faults
}

/// Whether readings can be trusted.
///
/// Any unavailable word means the status cannot be determined, which is never treated as
/// "no faults".
pub fn is_usable(
    primary: Option<u64>,
    secondary: Option<u64>,
    auxiliary: Option<u64>,
    diagnostic: Option<[u64; 2]>,
    unusable_fault_names: &[&str],
) -> bool {
    let (Some(primary), Some(secondary), Some(auxiliary), Some(diagnostic)) =
        (primary, secondary, auxiliary, diagnostic)
    else {
        return false;
    };
    all_faults(primary, secondary, auxiliary, diagnostic)
        .iter()
        .all(|f| !unusable_fault_names.contains(&f.name))
}

/// Fault names in order.
pub fn fault_names(faults: &[Fault]) -> Vec<&'static str> {
    faults.iter().map(|f| f.name).collect()
}

/// Raw status words of one station as read from a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusWords {
    /// `SWRD`
    pub swrd: Option<u64>,
    /// `STAT`
    pub stat: Option<u64>,
    /// `HDSC`
    pub hdsc: Option<u64>,
    /// `DSTA`
    pub dsta: Option<[u64; 2]>,
}

impl StatusWords {
    /// Words with every value present.
    pub fn new(swrd: u64, stat: u64, hdsc: u64, dsta: [u64; 2]) -> Self {
        Self {
            swrd: Some(swrd),
            stat: Some(stat),
            hdsc: Some(hdsc),
            dsta: Some(dsta),
        }
    }

    /// True when every word is available.
    pub fn is_complete(&self) -> bool {
        self.swrd.is_some() && self.stat.is_some() && self.hdsc.is_some() && self.dsta.is_some()
    }

    /// Decoded faults, or `None` when the status cannot be determined.
    pub fn faults(&self) -> Option<Vec<Fault>> {
        Some(all_faults(self.swrd?, self.stat?, self.hdsc?, self.dsta?))
    }

    /// Usability against [`UNUSABLE_FAULTS`].
    pub fn is_usable(&self) -> bool {
        is_usable(self.swrd, self.stat, self.hdsc, self.dsta, UNUSABLE_FAULTS)
    }

    /// Copy with every patch that applies to `(sector, station)` applied.
    pub fn patched(mut self, patches: &[StatusPatch], sector: u32, station: u32) -> Self {
        for patch in patches.iter().filter(|p| (p.applies_to)(sector, station)) {
            match patch.category {
                StatusCategory::Primary => self.swrd = self.swrd.map(|w| w & !patch.clear_mask),
                StatusCategory::Secondary => self.stat = self.stat.map(|w| w & !patch.clear_mask),
                StatusCategory::Auxiliary => self.hdsc = self.hdsc.map(|w| w & !patch.clear_mask),
                StatusCategory::DiagnosticA => {
                    self.dsta = self.dsta.map(|[a, b]| [a & !patch.clear_mask, b])
                }
                StatusCategory::DiagnosticB => {
                    self.dsta = self.dsta.map(|[a, b]| [a, b & !patch.clear_mask])
                }
            }
        }
        self
    }
}

/// Per-station bit mask correction applied before decoding.
#[derive(Debug, Clone, Copy)]
pub struct StatusPatch {
    /// What the patch works around.
    pub description: &'static str,
    /// Scope predicate on `(sector, station)`.
    pub applies_to: fn(u32, u32) -> bool,
    /// Word the mask applies to.
    pub category: StatusCategory,
    /// Bits cleared from the word.
    pub clear_mask: u64,
}

fn is_front_end_station(sector: u32, station: u32) -> bool {
    matches!((sector, station), (20, 7) | (21, 1) | (21, 2))
}

/// Known false positives.
pub const STATUS_PATCHES: &[StatusPatch] = &[StatusPatch {
    description: "Low RF Power is always raised on the injector and L1 front-end stations",
    applies_to: is_front_end_station,
    category: StatusCategory::Primary,
    clear_mask: 1 << 5,
}];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_only_reports_table_bits() {
        // bits 0, 4 and 5; bit 4 has no SWRD entry
        let faults = decode(0b11_0001, &SWRD_FAULTS);
        assert_eq!(fault_names(&faults), vec!["Bad Cable Status", "Low RF Power"]);
    }

    #[test]
    fn decode_matches_bit_tests_for_every_word_pattern() {
        for word in [0u64, 1, 0xFFFF, 0x4000, 0x1234_5678, u64::MAX] {
            let faults = decode(word, &DSTA1_FAULTS);
            assert!(faults.len() <= DSTA1_FAULTS.len());
            for entry in DSTA1_FAULTS.bits {
                let set = (word >> entry.bit) & 1 == 1;
                assert_eq!(faults.contains(&entry.fault), set, "word {word:#x} bit {}", entry.bit);
            }
        }
    }

    #[test]
    fn decode_sorts_by_priority() {
        // Offline (1) outranks Maintenance Mode (10) and Out of Tolerance (100)
        let faults = decode((1 << 1) | (1 << 2) | (1 << 3), &STAT_FAULTS);
        assert_eq!(
            fault_names(&faults),
            vec!["Offline", "Maintenance Mode", "Out of Tolerance"]
        );
    }

    #[test]
    fn diagnostic_concatenates_words() {
        let faults = decode_diagnostic([1 << 2, 1 << 4], &DSTA1_FAULTS, &DSTA2_FAULTS);
        assert_eq!(fault_names(&faults), vec!["SLED Motor Not At Limit", "EVOC"]);
    }

    #[test]
    fn all_faults_sorted_with_stable_ties() {
        // MKSU Protect (80, primary) and Low RF Power (80, primary), Phase Mean (75, secondary),
        // Phase Jitter (75, primary), To Be Replaced (5), Over Voltage (65)
        let faults = all_faults(
            (1 << 1) | (1 << 5) | (1 << 10),
            1 << 9,
            1 << 2,
            [1 << 9, 0],
        );
        let priorities: Vec<u8> = faults.iter().map(|f| f.priority).collect();
        assert!(priorities.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            fault_names(&faults),
            vec![
                "To Be Replaced",
                "Over Voltage",
                "Phase Jitter",
                "Phase Mean",
                "MKSU Protect",
                "Low RF Power",
            ]
        );
    }

    #[test]
    fn missing_word_is_never_usable() {
        let none = UNUSABLE_FAULTS;
        assert!(is_usable(Some(0), Some(0), Some(0), Some([0, 0]), none));
        assert!(!is_usable(None, Some(0), Some(0), Some([0, 0]), none));
        assert!(!is_usable(Some(0), None, Some(0), Some([0, 0]), none));
        assert!(!is_usable(Some(0), Some(0), None, Some([0, 0]), none));
        assert!(!is_usable(Some(0), Some(0), Some(0), None, none));
        // even an empty denylist cannot rescue an undetermined status
        assert!(!is_usable(None, None, None, None, &[]));
    }

    #[test]
    fn informational_faults_keep_usable() {
        // Out of Tolerance and Lost Phase are not on the denylist
        let words = StatusWords::new(1 << 8, 1 << 3, 0, [0, 0]);
        assert_eq!(words.faults().unwrap().len(), 2);
        assert!(words.is_usable());

        let offline = StatusWords::new(0, 1 << 2, 0, [0, 0]);
        assert!(!offline.is_usable());
    }

    #[test]
    fn front_end_patch_clears_low_rf_power() {
        let words = StatusWords::new(1 << 5 | 1, 0, 0, [0, 0]);
        let patched = words.patched(STATUS_PATCHES, 21, 1);
        assert_eq!(patched.swrd, Some(1));
        let untouched = words.patched(STATUS_PATCHES, 22, 1);
        assert_eq!(untouched, words);
    }

    #[test]
    fn patch_keeps_missing_words_missing() {
        let words = StatusWords {
            swrd: None,
            ..StatusWords::new(0, 0, 0, [0, 0])
        };
        assert_eq!(words.patched(STATUS_PATCHES, 20, 7).swrd, None);
        assert!(words.faults().is_none());
        assert!(!words.is_complete());
    }
}
