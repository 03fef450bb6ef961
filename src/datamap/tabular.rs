//! Row-driven datamap.
//!
//! Each [`MappingRow`] maps one PV onto one model attribute with an optional linear
//! conversion `factor * value + offset`. The conversion is written into the statement as
//! an expression (`-0.1 * 4.2 + 0.5`) rather than pre-multiplied, so the raw reading stays
//! visible in the generated file.
//!
//! Rows whose PV is missing never abort a batch. They are flagged invalid by
//! [`TabularDataMap::evaluate`] and rendered as a `!` comment naming the element and
//! attribute by [`TabularDataMap::format`], so a model parser never sees a malformed
//! number.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::debug;

use super::{render, DataMap, Dialect, Templates};
use crate::error::{LiveError, LiveResult};
use crate::snapshot::{PvValue, Scalar, Snapshot};

/// One PV to one model attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRow {
    /// Optional row label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Readback PV.
    pub pv_name: String,
    /// Design (setpoint) PV, used when the map reads design values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub des_pv_name: Option<String>,
    /// Model element.
    pub element: String,
    /// Model attribute, may be empty for measurement data.
    #[serde(default)]
    pub attribute: String,
    /// Multiplicative conversion.
    #[serde(default = "one", deserialize_with = "factor_or_one")]
    pub factor: Scalar,
    /// Additive conversion.
    #[serde(default, deserialize_with = "offset_or_zero")]
    pub offset: Scalar,
    /// Unit of the converted value, informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

fn one() -> Scalar {
    Scalar::Int(1)
}

fn factor_or_one<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Scalar, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?.unwrap_or_else(one))
}

fn offset_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Scalar, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?.unwrap_or_default())
}

impl MappingRow {
    /// Row with factor 1 and offset 0.
    pub fn new(pv_name: &str, element: &str, attribute: &str) -> Self {
        Self {
            name: None,
            pv_name: pv_name.to_string(),
            des_pv_name: None,
            element: element.to_string(),
            attribute: attribute.to_string(),
            factor: one(),
            offset: Scalar::default(),
            unit: None,
        }
    }

    /// Set the factor.
    pub fn with_factor(mut self, factor: impl Into<Scalar>) -> Self {
        self.factor = factor.into();
        self
    }

    /// Set the offset.
    pub fn with_offset(mut self, offset: impl Into<Scalar>) -> Self {
        self.offset = offset.into();
        self
    }

    /// Set the design PV.
    pub fn with_des_pv(mut self, des_pv_name: &str) -> Self {
        self.des_pv_name = Some(des_pv_name.to_string());
        self
    }

    /// Set the row label.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    /// PV read for this row. Rows without a design PV always read the readback.
    pub fn source_pv(&self, use_des: bool) -> &str {
        match (&self.des_pv_name, use_des) {
            (Some(des), true) => des,
            _ => &self.pv_name,
        }
    }
}

/// Result of evaluating one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRecord {
    /// Model element.
    pub element: String,
    /// Model attribute.
    pub attribute: String,
    /// PV that was read.
    pub pv_name: String,
    /// Raw value as found in the snapshot.
    pub raw: Option<PvValue>,
    /// Multiplicative conversion.
    pub factor: Scalar,
    /// Additive conversion.
    pub offset: Scalar,
    /// Raw value present and numeric.
    pub valid: bool,
}

impl RowRecord {
    /// Converted value, `None` for invalid rows.
    pub fn value(&self) -> Option<f64> {
        if !self.valid {
            return None;
        }
        let mut value = self.raw.as_ref()?.as_f64()?;
        if !self.factor.is_one() {
            value *= self.factor.as_f64();
        }
        if !self.offset.is_zero() {
            value += self.offset.as_f64();
        }
        Some(value)
    }

    /// Statement value expression, e.g. `-0.1 * 4.2 + 0.5`; `None` for invalid rows.
    pub fn expression(&self) -> Option<String> {
        if !self.valid {
            return None;
        }
        let mut val = self.raw.as_ref()?.as_scalar()?.to_string();
        if !self.factor.is_one() {
            val = format!("{} * {}", self.factor, val);
        }
        if !self.offset.is_zero() {
            val = format!("{} + {}", val, self.offset);
        }
        Some(val)
    }

    /// Comment line standing in for an invalid row.
    pub fn diagnostic(&self) -> String {
        let raw = self
            .raw
            .as_ref()
            .map_or_else(|| "None".to_string(), ToString::to_string);
        format!("! Bad value for {}[{}]: {}", self.element, self.attribute, raw)
    }

    /// Render through `template`, or as a diagnostic comment when invalid.
    pub fn render(&self, template: &str) -> LiveResult<String> {
        match self.expression() {
            Some(expression) => render(template, &self.element, &self.attribute, &expression),
            None => Ok(self.diagnostic()),
        }
    }
}

/// Ordered table of mapping rows plus dialect templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularDataMap {
    rows: Vec<MappingRow>,
    #[serde(default)]
    use_des: bool,
    #[serde(flatten)]
    templates: Templates,
}

impl TabularDataMap {
    /// Map over `rows` with the default templates, reading readbacks.
    pub fn new(rows: Vec<MappingRow>) -> Self {
        Self {
            rows,
            use_des: false,
            templates: Templates::default(),
        }
    }

    /// Replace the dialect templates.
    pub fn with_templates(mut self, bmad_format: &str, tao_format: &str) -> Self {
        self.templates = Templates {
            bmad_format: bmad_format.to_string(),
            tao_format: tao_format.to_string(),
        };
        self
    }

    /// Read design values instead of readbacks.
    pub fn with_use_des(mut self, use_des: bool) -> Self {
        self.use_des = use_des;
        self
    }

    /// Rows in order.
    pub fn rows(&self) -> &[MappingRow] {
        &self.rows
    }

    /// Append rows from another map (templates of `self` are kept).
    pub fn extend(&mut self, rows: impl IntoIterator<Item = MappingRow>) {
        self.rows.extend(rows);
    }

    /// Whether design values are read.
    pub fn use_des(&self) -> bool {
        self.use_des
    }

    /// Dialect templates.
    pub fn templates(&self) -> &Templates {
        &self.templates
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True without rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// One record per row; missing PVs produce invalid records.
    pub fn evaluate(&self, snapshot: &Snapshot) -> Vec<RowRecord> {
        self.rows
            .iter()
            .map(|row| {
                let pv_name = row.source_pv(self.use_des);
                let raw = snapshot.get(pv_name).cloned();
                let valid = raw.as_ref().and_then(PvValue::as_scalar).is_some();
                if !valid {
                    debug!(
                        pv = pv_name,
                        element = %row.element,
                        attribute = %row.attribute,
                        "Missing or non-numeric PV value"
                    );
                }
                RowRecord {
                    element: row.element.clone(),
                    attribute: row.attribute.clone(),
                    pv_name: pv_name.to_string(),
                    raw,
                    factor: row.factor,
                    offset: row.offset,
                    valid,
                }
            })
            .collect()
    }

    /// Serialize to a JSON document.
    pub fn to_json(&self) -> LiveResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Build from a JSON document.
    pub fn from_json(s: &str) -> LiveResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Write the JSON document to a file.
    pub fn save(&self, path: &Path) -> LiveResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load a JSON document from a file.
    pub fn load(path: &Path) -> LiveResult<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

impl DataMap for TabularDataMap {
    fn pv_list(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|row| row.source_pv(self.use_des).to_string())
            .collect()
    }

    fn format(&self, snapshot: &Snapshot, dialect: &Dialect) -> LiveResult<Vec<String>> {
        let template = self.templates.for_dialect(dialect);
        self.evaluate(snapshot)
            .iter()
            .map(|record| record.render(template))
            .collect()
    }

    fn set_use_des(&mut self, use_des: bool) {
        self.use_des = use_des;
    }
}

/// Column names of a row table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvColumns {
    /// Readback PV column (required).
    pub pv_name: String,
    /// Design PV column.
    pub des_pv_name: Option<String>,
    /// Element column (required).
    pub element: String,
    /// Attribute column.
    pub attribute: Option<String>,
    /// Factor column.
    pub factor: Option<String>,
    /// Offset column.
    pub offset: Option<String>,
}

impl Default for CsvColumns {
    fn default() -> Self {
        Self {
            pv_name: "pvname_rbv".to_string(),
            des_pv_name: Some("pvname".to_string()),
            element: "bmad_name".to_string(),
            attribute: Some("bmad_attribute".to_string()),
            factor: Some("bmad_factor".to_string()),
            offset: Some("bmad_offset".to_string()),
        }
    }
}

#[cfg(feature = "storage_csv")]
impl TabularDataMap {
    /// Build rows from a header-keyed CSV table.
    ///
    /// Optional columns missing from the header, and empty cells, fall back to the row
    /// defaults (no design PV, empty attribute, factor 1, offset 0).
    pub fn from_csv_reader<R: std::io::Read>(reader: R, columns: &CsvColumns) -> LiveResult<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let headers = reader.headers()?.clone();
        let position = |name: &str| headers.iter().position(|h| h.trim() == name);
        let optional = |name: &Option<String>| name.as_deref().and_then(|n| position(n));

        let pv_idx = position(&columns.pv_name).ok_or_else(|| {
            LiveError::InvalidDataMap(format!("missing column '{}'", columns.pv_name))
        })?;
        let element_idx = position(&columns.element).ok_or_else(|| {
            LiveError::InvalidDataMap(format!("missing column '{}'", columns.element))
        })?;
        let des_idx = optional(&columns.des_pv_name);
        let attribute_idx = optional(&columns.attribute);
        let factor_idx = optional(&columns.factor);
        let offset_idx = optional(&columns.offset);

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let cell = |idx: Option<usize>| {
                idx.and_then(|i| record.get(i))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            };
            let mut row = MappingRow::new(
                cell(Some(pv_idx)).unwrap_or_default(),
                cell(Some(element_idx)).unwrap_or_default(),
                cell(attribute_idx).unwrap_or_default(),
            );
            row.des_pv_name = cell(des_idx).map(str::to_string);
            if let Some(factor) = cell(factor_idx) {
                row.factor = parse_scalar(factor, line)?;
            }
            if let Some(offset) = cell(offset_idx) {
                row.offset = parse_scalar(offset, line)?;
            }
            rows.push(row);
        }
        Ok(Self::new(rows))
    }

    /// Build rows from a CSV file.
    pub fn from_csv_path(path: &Path, columns: &CsvColumns) -> LiveResult<Self> {
        Self::from_csv_reader(std::fs::File::open(path)?, columns)
    }
}

#[cfg(feature = "storage_csv")]
fn parse_scalar(cell: &str, line: usize) -> LiveResult<Scalar> {
    cell.parse::<i64>()
        .map(Scalar::Int)
        .or_else(|_| cell.parse::<f64>().map(Scalar::Float))
        .map_err(|_| LiveError::InvalidDataMap(format!("row {}: '{cell}' is not a number", line + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamap::{BMAD_FORMAT, TAO_MEAS_FORMAT};

    fn quad_map() -> TabularDataMap {
        TabularDataMap::new(vec![
            MappingRow::new("X", "QUAD1", "GRAD").with_factor(2),
            MappingRow::new("Y", "QUAD2", "GRAD"),
            MappingRow::new("Z", "QUAD3", "K1")
                .with_factor(-0.1)
                .with_offset(0.5),
        ])
    }

    #[test]
    fn unit_conversion_is_identity_by_default() {
        let map = TabularDataMap::new(vec![MappingRow::new("V", "E", "A")]);
        for v in [0.0, -1.25, 3.0e-9, 12345.678] {
            let snap = Snapshot::builder().value("V", v).build();
            let records = map.evaluate(&snap);
            assert!(records[0].valid);
            assert_eq!(records[0].value(), Some(v));
        }
    }

    #[test]
    fn factor_is_written_as_expression() {
        let snap = Snapshot::builder().value("X", 5).build();
        let map = TabularDataMap::new(vec![MappingRow::new("X", "QUAD1", "GRAD").with_factor(2)]);
        assert_eq!(
            map.format(&snap, &Dialect::Custom(BMAD_FORMAT.into())).unwrap(),
            vec!["QUAD1[GRAD] = 2 * 5"]
        );
        assert_eq!(map.evaluate(&snap)[0].value(), Some(10.0));
    }

    #[test]
    fn missing_pv_becomes_comment() {
        let snap = Snapshot::builder().value("X", 5).missing("Y").value("Z", 4.2).build();
        let map = quad_map();
        let records = map.evaluate(&snap);
        assert_eq!(records.len(), 3);
        assert!(!records[1].valid);
        assert_eq!(records[1].value(), None);

        let lines = map.as_tao(&snap).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "set ele QUAD1 GRAD = 2 * 5");
        assert_eq!(lines[1], "! Bad value for QUAD2[GRAD]: None");
        assert!(!lines[1].contains('='));
        assert_eq!(lines[2], "set ele QUAD3 K1 = -0.1 * 4.2 + 0.5");
    }

    #[test]
    fn non_numeric_value_is_invalid() {
        let snap = Snapshot::builder()
            .value("X", "OFF")
            .value("Y", f64::NAN)
            .value("Z", "1.5")
            .build();
        let lines = quad_map().as_bmad(&snap).unwrap();
        assert_eq!(lines[0], "! Bad value for QUAD1[GRAD]: OFF");
        assert_eq!(lines[1], "! Bad value for QUAD2[GRAD]: NaN");
        assert_eq!(lines[2], "QUAD3[K1] = -0.1 * 1.5 + 0.5");
    }

    #[test]
    fn use_des_switches_source_pv() {
        let mut map = TabularDataMap::new(vec![
            MappingRow::new("Q:BACT", "Q", "B1").with_des_pv("Q:BDES"),
            MappingRow::new("M:MOTR", "M", "OFFSET"),
        ]);
        assert_eq!(map.pv_list(), vec!["Q:BACT", "M:MOTR"]);
        map.set_use_des(true);
        assert_eq!(map.pv_list(), vec!["Q:BDES", "M:MOTR"]);

        let snap = Snapshot::builder()
            .value("Q:BACT", 1.0)
            .value("Q:BDES", 2.0)
            .value("M:MOTR", 3)
            .build();
        assert_eq!(map.as_bmad(&snap).unwrap(), vec!["Q[B1] = 2.0", "M[OFFSET] = 3"]);
    }

    #[test]
    fn measurement_template_without_attribute() {
        let map = TabularDataMap::new(vec![
            MappingRow::new("BEND:LI21:231:EDES", "BC1.energy[1]", "").with_factor(1_000_000_000),
        ])
        .with_templates("! no bmad equivalent: {element} = {value}", TAO_MEAS_FORMAT);
        let snap = Snapshot::builder().value("BEND:LI21:231:EDES", 0.25).build();
        assert_eq!(
            map.as_tao(&snap).unwrap(),
            vec!["set data BC1.energy[1]|meas  = 1000000000 * 0.25"]
        );
    }

    #[test]
    fn json_round_trip_renders_identically() {
        let map = quad_map().with_use_des(true);
        let back = TabularDataMap::from_json(&map.to_json().unwrap()).unwrap();
        assert_eq!(map, back);

        let snap = Snapshot::builder().value("X", 5).value("Z", 1.0).build();
        assert_eq!(map.as_bmad(&snap).unwrap(), back.as_bmad(&snap).unwrap());
        assert_eq!(map.as_tao(&snap).unwrap(), back.as_tao(&snap).unwrap());
    }

    #[test]
    fn malformed_rows_use_defaults() {
        let map = TabularDataMap::from_json(
            r#"{"rows": [
                {"pv_name": "A", "element": "E1", "attribute": "k1"},
                {"pv_name": "B", "element": "E2", "attribute": "k1", "factor": null, "offset": null}
            ]}"#,
        )
        .unwrap();
        assert!(!map.use_des());
        assert_eq!(map.templates(), &Templates::default());
        for row in map.rows() {
            assert!(row.factor.is_one());
            assert!(row.offset.is_zero());
        }
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn rows_from_csv() {
        let table = "\
bmad_name,pvname_rbv,pvname,bmad_factor,bmad_attribute
QE01,QUAD:IN20:361:BACT,QUAD:IN20:361:BDES,-0.9,b1_gradient
SOL1,SOLN:IN20:121:BACT,,,bs_field
";
        let map = TabularDataMap::from_csv_reader(table.as_bytes(), &CsvColumns::default()).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.rows()[0].des_pv_name.as_deref(), Some("QUAD:IN20:361:BDES"));
        assert_eq!(map.rows()[0].factor, Scalar::Float(-0.9));
        assert_eq!(map.rows()[1].des_pv_name, None);
        assert!(map.rows()[1].factor.is_one());
        assert!(map.rows()[1].offset.is_zero());
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn csv_requires_pv_column() {
        let table = "bmad_name,bmad_attribute\nQE01,k1\n";
        let err = TabularDataMap::from_csv_reader(table.as_bytes(), &CsvColumns::default()).unwrap_err();
        assert!(err.to_string().contains("pvname_rbv"));
    }
}
