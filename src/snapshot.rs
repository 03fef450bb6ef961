//! Point-in-time PV snapshots.
//!
//! A [`Snapshot`] is the common input of every datamap: an immutable mapping from PV name
//! to a raw value, or to nothing when the source could not deliver the PV. Snapshots are
//! produced by an external source (live client, archiver, archive shard), consumed by
//! reference during one evaluation, and then dropped or replaced by a fresh one.
//!
//! Values keep the shape they had at the source. Integers stay integers so that status
//! words can be decoded bit-exactly, and so that generated statements print `5` and not
//! `5.0` for an integral reading.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::LiveResult;

/// A raw value as delivered by the control system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PvValue {
    /// Integer reading (status words, enums, flags).
    Int(i64),
    /// Unsigned reading above `i64::MAX`, typically a status word with bit 63 set.
    UInt(u64),
    /// Floating point reading.
    Float(f64),
    /// Multi-word reading, e.g. a two-word diagnostic status.
    Bits(Vec<i64>),
    /// Text reading. Numeric accessors try to parse it.
    Text(String),
}

impl PvValue {
    /// Numeric view of the value. `NaN` counts as no value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PvValue::Int(v) => Some(*v as f64),
            PvValue::UInt(v) => Some(*v as f64),
            PvValue::Float(v) if v.is_nan() => None,
            PvValue::Float(v) => Some(*v),
            PvValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| !v.is_nan()),
            PvValue::Bits(_) => None,
        }
    }

    /// Numeric view that keeps integer-ness, used for rendering.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            PvValue::Int(v) => Some(Scalar::Int(*v)),
            PvValue::UInt(v) => Some(i64::try_from(*v).map_or(Scalar::Float(*v as f64), Scalar::Int)),
            PvValue::Float(v) if v.is_nan() => None,
            PvValue::Float(v) => Some(Scalar::Float(*v)),
            PvValue::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Scalar::Int)
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|v| !v.is_nan()).map(Scalar::Float))
            }
            PvValue::Bits(_) => None,
        }
    }

    /// Interpret the value as an unsigned status word.
    ///
    /// Floats are truncated and negative integers are reinterpreted as their two's
    /// complement bit pattern, which is what the hardware put on the wire. Words above
    /// `i64::MAX` keep every bit.
    pub fn as_word(&self) -> Option<u64> {
        match self {
            PvValue::Int(v) => Some(*v as u64),
            PvValue::UInt(v) => Some(*v),
            PvValue::Float(v) => float_word(*v),
            PvValue::Text(s) => {
                let s = s.trim();
                s.parse::<u64>()
                    .ok()
                    .or_else(|| s.parse::<i64>().map(|v| v as u64).ok())
                    .or_else(|| s.parse::<f64>().ok().and_then(float_word))
            }
            PvValue::Bits(words) => words.first().map(|v| *v as u64),
        }
    }

    /// Interpret the value as a two-word status pair.
    pub fn as_word_pair(&self) -> Option<[u64; 2]> {
        match self {
            PvValue::Bits(words) if words.len() >= 2 => Some([words[0] as u64, words[1] as u64]),
            _ => None,
        }
    }
}

fn float_word(v: f64) -> Option<u64> {
    match v {
        v if !v.is_finite() => None,
        v if v >= 0.0 => Some(v as u64),
        v => Some(v as i64 as u64),
    }
}

impl fmt::Display for PvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PvValue::Int(v) => write!(f, "{v}"),
            PvValue::UInt(v) => write!(f, "{v}"),
            PvValue::Float(v) => f.write_str(&format_float(*v)),
            PvValue::Bits(words) => {
                let parts: Vec<String> = words.iter().map(|w| w.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            PvValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for PvValue {
    fn from(v: i64) -> Self {
        PvValue::Int(v)
    }
}

impl From<i32> for PvValue {
    fn from(v: i32) -> Self {
        PvValue::Int(i64::from(v))
    }
}

impl From<f64> for PvValue {
    fn from(v: f64) -> Self {
        PvValue::Float(v)
    }
}

impl From<&str> for PvValue {
    fn from(v: &str) -> Self {
        PvValue::Text(v.to_string())
    }
}

impl From<Vec<i64>> for PvValue {
    fn from(v: Vec<i64>) -> Self {
        PvValue::Bits(v)
    }
}

/// A numeric constant that remembers whether it was written as an integer.
///
/// Factors and offsets are printed verbatim into generated statements, so `2` has to
/// stay `2` and not become `2.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Integral constant.
    Int(i64),
    /// Floating point constant.
    Float(f64),
}

impl Scalar {
    /// Value as `f64`.
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }

    /// True for exactly one (integer or float).
    pub fn is_one(self) -> bool {
        self.as_f64() == 1.0
    }

    /// True for exactly zero (integer or float).
    pub fn is_zero(self) -> bool {
        self.as_f64() == 0.0
    }
}

impl Default for Scalar {
    fn default() -> Self {
        Scalar::Int(0)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => f.write_str(&format_float(*v)),
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(i64::from(v))
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

/// Shortest round-trip representation; integral values keep a trailing `.0`.
pub(crate) fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        v.to_string()
    }
}

/// Immutable mapping from PV name to raw value.
///
/// A name mapped to `None` means the source was asked for the PV and had nothing; a name
/// that is not present at all was never requested. Both read back as "absent".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    values: BTreeMap<String, Option<PvValue>>,
}

impl Snapshot {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a snapshot.
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    /// Parse a snapshot from a JSON object of `{ "PV": value | null }`.
    pub fn from_json(s: &str) -> LiveResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load a snapshot JSON file.
    pub fn load(path: &Path) -> LiveResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> LiveResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the snapshot to a JSON file.
    pub fn save(&self, path: &Path) -> LiveResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Raw value of a PV, if present.
    pub fn get(&self, name: &str) -> Option<&PvValue> {
        self.values.get(name).and_then(Option::as_ref)
    }

    /// Whether the PV has a value.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Numeric value of a PV. Absent, `NaN` and non-numeric values read as `None`.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(PvValue::as_f64)
    }

    /// Integer value of a PV; floats must be integral.
    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name)?.as_scalar()? {
            Scalar::Int(v) => Some(v),
            Scalar::Float(v) if v.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(&v) => {
                Some(v as i64)
            }
            Scalar::Float(_) => None,
        }
    }

    /// Status word of a PV.
    pub fn word(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(PvValue::as_word)
    }

    /// Two-word status pair of a PV.
    pub fn word_pair(&self, name: &str) -> Option<[u64; 2]> {
        self.get(name).and_then(PvValue::as_word_pair)
    }

    /// Number of entries, including absent ones.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when there are no entries at all.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&PvValue>)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Names whose value is absent.
    pub fn missing(&self) -> Vec<&str> {
        self.values
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Sub-snapshot restricted to `names`. Names unknown here come back as absent.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Snapshot {
        names
            .iter()
            .map(|n| (n.as_ref().to_string(), self.get(n.as_ref()).cloned()))
            .collect()
    }

    /// Content fingerprint: SHA-256 over every name and the JSON encoding of its value, in
    /// key order, each length-prefixed.
    ///
    /// Two snapshots with identical entries hash identically regardless of how they were
    /// assembled.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in &self.values {
            let encoded = serde_json::to_string(value).unwrap_or_default();
            for field in [name.as_bytes(), encoded.as_bytes()] {
                hasher.update((field.len() as u64).to_le_bytes());
                hasher.update(field);
            }
        }
        format!("{:x}", hasher.finalize())[..32].to_string()
    }
}

impl FromIterator<(String, Option<PvValue>)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, Option<PvValue>)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Builder for [`Snapshot`].
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    values: BTreeMap<String, Option<PvValue>>,
}

impl SnapshotBuilder {
    /// Add a present value.
    pub fn value(mut self, name: &str, value: impl Into<PvValue>) -> Self {
        self.values.insert(name.to_string(), Some(value.into()));
        self
    }

    /// Record a PV the source could not deliver.
    pub fn missing(mut self, name: &str) -> Self {
        self.values.insert(name.to_string(), None);
        self
    }

    /// Finish.
    pub fn build(self) -> Snapshot {
        Snapshot {
            values: self.values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_json() {
        let snap = Snapshot::from_json(
            r#"{"A": 5, "B": 1.5, "C": null, "D": [3, 4], "E": "12"}"#,
        )
        .unwrap();
        assert_eq!(snap.get("A"), Some(&PvValue::Int(5)));
        assert_eq!(snap.number("B"), Some(1.5));
        assert!(!snap.contains("C"));
        assert_eq!(snap.word_pair("D"), Some([3, 4]));
        assert_eq!(snap.word("E"), Some(12));
        assert_eq!(snap.integer("E"), Some(12));
        assert_eq!(snap.integer("B"), None);
        assert_eq!(snap.missing(), vec!["C"]);
    }

    #[test]
    fn nan_is_not_a_number() {
        let snap = Snapshot::builder().value("X", f64::NAN).build();
        assert_eq!(snap.number("X"), None);
        assert!(snap.get("X").unwrap().as_scalar().is_none());
    }

    #[test]
    fn float_words_truncate() {
        assert_eq!(PvValue::Float(33.0).as_word(), Some(33));
        assert_eq!(PvValue::Text("7.0".into()).as_word(), Some(7));
        assert_eq!(PvValue::Float(f64::INFINITY).as_word(), None);
    }

    #[test]
    fn display_keeps_integer_shape() {
        assert_eq!(PvValue::Int(5).to_string(), "5");
        assert_eq!(PvValue::Float(42.0).to_string(), "42.0");
        assert_eq!(PvValue::Float(10.5).to_string(), "10.5");
        assert_eq!(Scalar::Float(-0.001).to_string(), "-0.001");
        assert_eq!(Scalar::Int(2).to_string(), "2");
    }

    #[test]
    fn select_marks_unknown_names_absent() {
        let snap = Snapshot::builder().value("A", 1).value("B", 2).build();
        let sub = snap.select(&["A", "Z"]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.number("A"), Some(1.0));
        assert_eq!(sub.missing(), vec!["Z"]);
    }

    #[test]
    fn fingerprint_ignores_construction_order() {
        let a = Snapshot::builder().value("A", 1).value("B", 2.5).build();
        let b = Snapshot::builder().value("B", 2.5).value("A", 1).build();
        let c = Snapshot::builder().value("A", 1).value("B", 2.6).build();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 32);
    }

    #[test]
    fn fingerprint_covers_names_and_value_boundaries() {
        let x = Snapshot::builder().value("X", 1).build();
        let y = Snapshot::builder().value("Y", 1).build();
        assert_ne!(x.fingerprint(), y.fingerprint());

        let split = Snapshot::from_json(r#"{"A": 1, "B": 23}"#).unwrap();
        let shifted = Snapshot::from_json(r#"{"A": 12, "B": 3}"#).unwrap();
        assert_ne!(split.fingerprint(), shifted.fingerprint());

        let missing = Snapshot::builder().missing("A").build();
        assert_ne!(missing.fingerprint(), Snapshot::new().fingerprint());
    }

    #[test]
    fn words_above_i64_max_keep_every_bit() {
        let snap = Snapshot::from_json(
            r#"{"W": 18446744073709551615, "H": 9223372036854775808, "T": "18446744073709551614"}"#,
        )
        .unwrap();
        assert_eq!(snap.get("W"), Some(&PvValue::UInt(u64::MAX)));
        assert_eq!(snap.word("W"), Some(u64::MAX));
        assert_eq!(snap.word("H"), Some(1 << 63));
        assert_eq!(snap.word("T"), Some(u64::MAX - 1));
        assert_eq!(PvValue::Int(-1).as_word(), Some(u64::MAX));
        assert_eq!(PvValue::Float(-2.0).as_word(), Some(u64::MAX - 1));
        assert_eq!(PvValue::UInt(u64::MAX).to_string(), "18446744073709551615");
        assert_eq!(snap.integer("W"), None);
    }

    #[test]
    fn json_round_trip() {
        let snap = Snapshot::builder()
            .value("A", 3)
            .value("B", 0.25)
            .missing("C")
            .build();
        let back = Snapshot::from_json(&snap.to_json().unwrap()).unwrap();
        assert_eq!(snap, back);
    }
}
