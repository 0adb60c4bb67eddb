//! Hashrate display units keyed by miner model family

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Display unit for a hashrate value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashrateUnit {
    #[serde(rename = "TH/s")]
    Ths,
    #[serde(rename = "GH/s")]
    Ghs,
    #[serde(rename = "MH/s")]
    Mhs,
}

impl HashrateUnit {
    /// The unit stats fields report in
    pub const BASE: HashrateUnit = HashrateUnit::Ghs;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ths => "TH/s",
            Self::Ghs => "GH/s",
            Self::Mhs => "MH/s",
        }
    }

    /// Convert a value expressed in GH/s into this unit
    pub fn from_ghs(&self, ghs: f64) -> f64 {
        match self {
            Self::Ths => ghs / 1000.0,
            Self::Ghs => ghs,
            Self::Mhs => ghs * 1000.0,
        }
    }
}

impl std::fmt::Display for HashrateUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preferred units, keyed by lowercase family + number
const UNIT_MAP: &[(&str, HashrateUnit)] = &[
    ("s21", HashrateUnit::Ths),
    ("l7", HashrateUnit::Ghs),
    ("l9", HashrateUnit::Ghs),
    ("s19", HashrateUnit::Ths),
    ("s9", HashrateUnit::Ths),
    ("t17", HashrateUnit::Ths),
    ("t19", HashrateUnit::Ths),
    ("s17", HashrateUnit::Ths),
    ("s17e", HashrateUnit::Ths),
    ("s17pro", HashrateUnit::Ths),
    ("s9k", HashrateUnit::Ths),
    ("s9se", HashrateUnit::Ths),
];

/// L7 firmware reports in MH/s rather than GH/s once values grow large
const MAGNITUDE_CORRECTED: &str = "l7";

static MODEL_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([a-z])\s*-?\s*(\d+)").expect("model key pattern is valid")
});

/// Normalize a model string to its family key.
///
/// `"Antminer L9"` → `l9`, `"S19j Pro"` → `s19`, `"s19j-pro"` → `s19`.
/// Strings without a letter+digits run are lowercased and trimmed.
pub fn model_key(model: Option<&str>) -> Option<String> {
    let model = model.filter(|m| !m.is_empty())?;
    match MODEL_KEY_RE.captures(model) {
        Some(caps) => Some(format!(
            "{}{}",
            caps[1].to_ascii_lowercase(),
            &caps[2]
        )),
        None => Some(model.trim().to_lowercase()),
    }
}

/// Preferred display unit for a model; unknown models stay in the base unit
pub fn preferred_unit(model: Option<&str>) -> HashrateUnit {
    model_key(model)
        .and_then(|key| {
            UNIT_MAP
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, unit)| *unit)
        })
        .unwrap_or(HashrateUnit::BASE)
}

/// Convert a base-unit (GH/s) hashrate into the model's preferred unit
pub fn convert_hashrate(ghs: f64, model: Option<&str>) -> (f64, HashrateUnit) {
    let ghs = if model_key(model).as_deref() == Some(MAGNITUDE_CORRECTED) && ghs > 1000.0 {
        ghs / 1000.0
    } else {
        ghs
    };
    let unit = preferred_unit(model);
    (unit.from_ghs(ghs), unit)
}

/// Convert and render as `"{value:.2} {unit}"`
pub fn format_hashrate(ghs: f64, model: Option<&str>) -> String {
    let (value, unit) = convert_hashrate(ghs, model);
    format!("{:.2} {}", value, unit)
}
