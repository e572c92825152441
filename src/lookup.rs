//! Postal code -> region resolver
//!
//! A `ZipLookup` is an immutable snapshot of the postal code table. It is
//! loaded once, wrapped in an `Arc`, and handed to every stage that needs it.

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use tracing::warn;

use crate::error::{GeoError, GeoResult};
use crate::region_names::{county_key, normalize_state};

/// One row of the postal lookup table as shipped in JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ZipRow {
    #[serde(
        rename = "Zipcode",
        alias = "zipcode",
        alias = "zip",
        deserialize_with = "deserialize_postal_code"
    )]
    pub zipcode: String,
    #[serde(rename = "State", alias = "state")]
    pub state: String,
    #[serde(rename = "County", alias = "county", default)]
    pub county: Option<String>,
}

/// Postal codes may arrive as numbers with their leading zeros lost;
/// those are padded back to five digits.
fn deserialize_postal_code<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(u64),
    }

    match StringOrInt::deserialize(deserializer)? {
        StringOrInt::String(s) => Ok(s),
        StringOrInt::Int(n) => Ok(format!("{:05}", n)),
    }
}

#[derive(Debug, Deserialize)]
struct ZipTable {
    result: Vec<ZipRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RegionEntry {
    state: String,
    county: Option<String>,
}

/// Table format of the postal lookup input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Json,
    Csv,
}

impl TableFormat {
    /// Guess from a file name or URL path; anything not ending in `.csv` is JSON.
    pub fn from_location(location: &str) -> Self {
        let path = location.split(['?', '#']).next().unwrap_or(location);
        if path.to_ascii_lowercase().ends_with(".csv") {
            TableFormat::Csv
        } else {
            TableFormat::Json
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ZipLookup {
    entries: HashMap<String, RegionEntry>,
}

impl ZipLookup {
    pub fn from_rows(rows: impl IntoIterator<Item = ZipRow>) -> Self {
        let mut entries = HashMap::new();
        for row in rows {
            let code = row.zipcode.trim();
            if code.is_empty() || row.state.trim().is_empty() {
                continue;
            }
            let entry = RegionEntry {
                state: normalize_state(&row.state),
                county: row
                    .county
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .map(|c| county_key(&row.state, c)),
            };
            if let Some(previous) = entries.insert(code.to_string(), entry) {
                warn!(postal_code = code, ?previous, "duplicate postal code in lookup table, last row wins");
            }
        }
        Self { entries }
    }

    /// Parse `{"result": [{"Zipcode", "State", "County"}, ...]}`
    pub fn from_json(bytes: &[u8]) -> GeoResult<Self> {
        let table: ZipTable = serde_json::from_slice(bytes).map_err(|source| GeoError::Parse {
            what: "postal lookup table".to_string(),
            source,
        })?;
        Ok(Self::from_rows(table.result))
    }

    /// Parse a CSV with a `zipcode,state,county` or `Zipcode,State,County` header.
    pub fn from_csv(bytes: &[u8]) -> GeoResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);
        let rows = reader
            .deserialize::<ZipRow>()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_rows(rows))
    }

    pub fn parse(bytes: &[u8], format: TableFormat) -> GeoResult<Self> {
        match format {
            TableFormat::Json => Self::from_json(bytes),
            TableFormat::Csv => Self::from_csv(bytes),
        }
    }

    /// State name for a postal code, or `None` when the code is not in the table.
    pub fn resolve_state(&self, postal_code: &str) -> Option<&str> {
        self.entries.get(postal_code.trim()).map(|e| e.state.as_str())
    }

    /// `"State, County"` for a postal code, or `None` when unknown.
    pub fn resolve_county(&self, postal_code: &str) -> Option<&str> {
        self.entries
            .get(postal_code.trim())
            .and_then(|e| e.county.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn postal_codes(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"{"result": [
        {"Zipcode": "90210", "State": "California", "County": "LOS ANGELES"},
        {"Zipcode": "90211", "State": "CA", "County": "Los Angeles"},
        {"Zipcode": "10001", "State": "New York", "County": "New York"},
        {"Zipcode": "96799", "State": "American Samoa", "County": ""},
        {"Zipcode": "  ", "State": "Nowhere", "County": "Nothing"}
    ]}"#;

    #[test]
    fn test_resolve_known_codes() {
        let lookup = ZipLookup::from_json(TABLE.as_bytes()).unwrap();
        assert_eq!(lookup.len(), 4);
        assert_eq!(lookup.resolve_state("90210"), Some("California"));
        assert_eq!(lookup.resolve_county("90210"), Some("California, Los Angeles"));
        // Different spellings collapse to one key
        assert_eq!(lookup.resolve_county("90211"), lookup.resolve_county("90210"));
    }

    #[test]
    fn test_every_table_code_resolves() {
        let lookup = ZipLookup::from_json(TABLE.as_bytes()).unwrap();
        for code in lookup.postal_codes() {
            assert!(lookup.resolve_state(code).is_some(), "{} did not resolve", code);
        }
    }

    #[test]
    fn test_unknown_code_is_none() {
        let lookup = ZipLookup::from_json(TABLE.as_bytes()).unwrap();
        assert_eq!(lookup.resolve_state("00000"), None);
        assert_eq!(lookup.resolve_county("00000"), None);
        assert_eq!(lookup.resolve_state(""), None);
    }

    #[test]
    fn test_state_without_county() {
        let lookup = ZipLookup::from_json(TABLE.as_bytes()).unwrap();
        assert_eq!(lookup.resolve_state("96799"), Some("American Samoa"));
        assert_eq!(lookup.resolve_county("96799"), None);
    }

    #[test]
    fn test_csv_table() {
        let csv = "zipcode,state,county\n60601, IL ,cook\n60602,Illinois,COOK\n";
        let lookup = ZipLookup::from_csv(csv.as_bytes()).unwrap();
        assert_eq!(lookup.resolve_state("60601"), Some("Illinois"));
        assert_eq!(lookup.resolve_county("60602"), Some("Illinois, Cook"));
        assert_eq!(lookup.resolve_county("60601"), lookup.resolve_county("60602"));
    }

    #[test]
    fn test_numeric_postal_codes_are_padded() {
        let table = br#"{"result": [
            {"Zipcode": 2134, "State": "MA", "County": "Suffolk"},
            {"Zipcode": 90210, "State": "California", "County": "Los Angeles"},
            {"Zipcode": "00501", "State": "NY", "County": "Suffolk"}
        ]}"#;
        let lookup = ZipLookup::from_json(table).unwrap();
        assert_eq!(lookup.len(), 3);
        assert_eq!(lookup.resolve_state("02134"), Some("Massachusetts"));
        assert_eq!(lookup.resolve_state("90210"), Some("California"));
        assert_eq!(lookup.resolve_state("00501"), Some("New York"));

        let csv = "zipcode,state,county\n2134,MA,Suffolk\n";
        let lookup = ZipLookup::from_csv(csv.as_bytes()).unwrap();
        assert_eq!(lookup.resolve_county("02134"), Some("Massachusetts, Suffolk"));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(TableFormat::from_location("data/zips.csv"), TableFormat::Csv);
        assert_eq!(TableFormat::from_location("http://h/zips.CSV?v=2"), TableFormat::Csv);
        assert_eq!(TableFormat::from_location("/us-state-county-zips.min.json"), TableFormat::Json);
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = ZipLookup::from_json(b"{not json").unwrap_err();
        assert!(matches!(err, GeoError::Parse { .. }));
    }
}
