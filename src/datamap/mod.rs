//! Datamaps: PV snapshots in, model statements out.
//!
//! A datamap knows which PVs it needs ([`DataMap::pv_list`]) and how to turn a
//! [`Snapshot`] holding them into statements for the model ([`DataMap::format`]).
//! Statements are rendered through a template per output [`Dialect`]:
//!
//! - **Bmad** lattice syntax: `{element}[{attribute}] = {value}`
//! - **Tao** command syntax: `set ele {element} {attribute} = {value}`
//! - **Custom**: any template using the same placeholders, e.g. the Tao measurement
//!   form [`TAO_MEAS_FORMAT`] which has no `{attribute}`.
//!
//! Two datamap kinds exist: [`TabularDataMap`] (row driven) and [`KlystronMap`]
//! (status gated, one station). [`AnyDataMap`] holds either, [`DataMapSet`] a named
//! collection loaded from a master document.

pub mod klystron;
pub mod set;
pub mod tabular;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use strfmt::strfmt;

use crate::error::{LiveError, LiveResult};
use crate::snapshot::Snapshot;

pub use klystron::KlystronMap;
pub use set::{AnyDataMap, DataMapSet, UseDes};
pub use tabular::{MappingRow, RowRecord, TabularDataMap};

/// Bmad lattice statement template.
pub const BMAD_FORMAT: &str = "{element}[{attribute}] = {value}";
/// Tao command template.
pub const TAO_FORMAT: &str = "set ele {element} {attribute} = {value}";
/// Tao measurement datum template.
pub const TAO_MEAS_FORMAT: &str = "set data {element}|meas  = {value}";

/// Output dialect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Bmad lattice syntax.
    Bmad,
    /// Tao command syntax.
    #[default]
    Tao,
    /// Caller supplied template.
    Custom(String),
}

impl FromStr for Dialect {
    type Err = LiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bmad" => Ok(Dialect::Bmad),
            "tao" => Ok(Dialect::Tao),
            _ if s.contains("{value}") => Ok(Dialect::Custom(s.to_string())),
            _ => Err(LiveError::Configuration(format!(
                "Unknown dialect '{s}'. Use bmad, tao, or a template containing {{value}}"
            ))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Bmad => f.write_str("bmad"),
            Dialect::Tao => f.write_str("tao"),
            Dialect::Custom(template) => f.write_str(template),
        }
    }
}

/// Per-map templates for the built-in dialects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Templates {
    /// Template used for [`Dialect::Bmad`].
    #[serde(default = "default_bmad_format")]
    pub bmad_format: String,
    /// Template used for [`Dialect::Tao`].
    #[serde(default = "default_tao_format")]
    pub tao_format: String,
}

fn default_bmad_format() -> String {
    BMAD_FORMAT.to_string()
}

fn default_tao_format() -> String {
    TAO_FORMAT.to_string()
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            bmad_format: default_bmad_format(),
            tao_format: default_tao_format(),
        }
    }
}

impl Templates {
    /// Template for a dialect.
    pub fn for_dialect<'a>(&'a self, dialect: &'a Dialect) -> &'a str {
        match dialect {
            Dialect::Bmad => &self.bmad_format,
            Dialect::Tao => &self.tao_format,
            Dialect::Custom(template) => template,
        }
    }
}

/// Fill `{element}`, `{attribute}` and `{value}` in a template.
pub fn render(template: &str, element: &str, attribute: &str, value: &str) -> LiveResult<String> {
    let mut fmt_context = HashMap::new();
    fmt_context.insert("element".to_string(), element.to_string());
    fmt_context.insert("attribute".to_string(), attribute.to_string());
    fmt_context.insert("value".to_string(), value.to_string());

    strfmt(template, &fmt_context).map_err(|e| LiveError::Template {
        template: template.to_string(),
        message: e.to_string(),
    })
}

/// Common interface of all datamaps.
pub trait DataMap {
    /// PVs needed by [`DataMap::format`], in evaluation order.
    fn pv_list(&self) -> Vec<String>;

    /// Render statements for `snapshot` in `dialect`.
    ///
    /// The number of lines depends only on the map, never on which PVs are present.
    fn format(&self, snapshot: &Snapshot, dialect: &Dialect) -> LiveResult<Vec<String>>;

    /// Read design values instead of readbacks.
    fn set_use_des(&mut self, use_des: bool);

    /// Shorthand for [`Dialect::Bmad`].
    fn as_bmad(&self, snapshot: &Snapshot) -> LiveResult<Vec<String>> {
        self.format(snapshot, &Dialect::Bmad)
    }

    /// Shorthand for [`Dialect::Tao`].
    fn as_tao(&self, snapshot: &Snapshot) -> LiveResult<Vec<String>> {
        self.format(snapshot, &Dialect::Tao)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dialects() {
        assert_eq!("bmad".parse::<Dialect>().unwrap(), Dialect::Bmad);
        assert_eq!("TAO".parse::<Dialect>().unwrap(), Dialect::Tao);
        assert_eq!(
            TAO_MEAS_FORMAT.parse::<Dialect>().unwrap(),
            Dialect::Custom(TAO_MEAS_FORMAT.to_string())
        );
        assert!("elegant".parse::<Dialect>().is_err());
    }

    #[test]
    fn render_templates() {
        assert_eq!(
            render(BMAD_FORMAT, "QUAD1", "GRAD", "2 * 5").unwrap(),
            "QUAD1[GRAD] = 2 * 5"
        );
        assert_eq!(
            render(TAO_MEAS_FORMAT, "BC1.energy[1]", "", "1000000000 * 0.25").unwrap(),
            "set data BC1.energy[1]|meas  = 1000000000 * 0.25"
        );
    }

    #[test]
    fn render_rejects_unknown_placeholder() {
        let err = render("{element} {unit}", "Q", "A", "1").unwrap_err();
        assert!(matches!(err, LiveError::Template { .. }));
    }

    #[test]
    fn templates_select_by_dialect() {
        let templates = Templates::default();
        assert_eq!(templates.for_dialect(&Dialect::Bmad), BMAD_FORMAT);
        assert_eq!(templates.for_dialect(&Dialect::Tao), TAO_FORMAT);
        let custom = Dialect::Custom("{element}={value}".into());
        assert_eq!(templates.for_dialect(&custom), "{element}={value}");
    }
}
