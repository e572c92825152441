//! Region name normalization
//!
//! Lookup tables and boundary files spell the same region differently
//! (FIPS codes, USPS abbreviations, upper-case county names). Every name is
//! passed through here before it becomes a map key, so averages never split
//! across two spellings of one region.

use std::collections::HashMap;
use std::sync::LazyLock;

/// State info: (fips, usps, name)
type StateRow = (&'static str, &'static str, &'static str);

static STATES: &[StateRow] = &[
    ("01", "AL", "Alabama"),
    ("02", "AK", "Alaska"),
    ("04", "AZ", "Arizona"),
    ("05", "AR", "Arkansas"),
    ("06", "CA", "California"),
    ("08", "CO", "Colorado"),
    ("09", "CT", "Connecticut"),
    ("10", "DE", "Delaware"),
    ("11", "DC", "District Of Columbia"),
    ("12", "FL", "Florida"),
    ("13", "GA", "Georgia"),
    ("15", "HI", "Hawaii"),
    ("16", "ID", "Idaho"),
    ("17", "IL", "Illinois"),
    ("18", "IN", "Indiana"),
    ("19", "IA", "Iowa"),
    ("20", "KS", "Kansas"),
    ("21", "KY", "Kentucky"),
    ("22", "LA", "Louisiana"),
    ("23", "ME", "Maine"),
    ("24", "MD", "Maryland"),
    ("25", "MA", "Massachusetts"),
    ("26", "MI", "Michigan"),
    ("27", "MN", "Minnesota"),
    ("28", "MS", "Mississippi"),
    ("29", "MO", "Missouri"),
    ("30", "MT", "Montana"),
    ("31", "NE", "Nebraska"),
    ("32", "NV", "Nevada"),
    ("33", "NH", "New Hampshire"),
    ("34", "NJ", "New Jersey"),
    ("35", "NM", "New Mexico"),
    ("36", "NY", "New York"),
    ("37", "NC", "North Carolina"),
    ("38", "ND", "North Dakota"),
    ("39", "OH", "Ohio"),
    ("40", "OK", "Oklahoma"),
    ("41", "OR", "Oregon"),
    ("42", "PA", "Pennsylvania"),
    ("44", "RI", "Rhode Island"),
    ("45", "SC", "South Carolina"),
    ("46", "SD", "South Dakota"),
    ("47", "TN", "Tennessee"),
    ("48", "TX", "Texas"),
    ("49", "UT", "Utah"),
    ("50", "VT", "Vermont"),
    ("51", "VA", "Virginia"),
    ("53", "WA", "Washington"),
    ("54", "WV", "West Virginia"),
    ("55", "WI", "Wisconsin"),
    ("56", "WY", "Wyoming"),
    ("60", "AS", "American Samoa"),
    ("66", "GU", "Guam"),
    ("69", "MP", "Northern Mariana Islands"),
    ("72", "PR", "Puerto Rico"),
    ("78", "VI", "Virgin Islands"),
];

/// FIPS state code -> state name
pub static FIPS_STATES: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| STATES.iter().map(|(fips, _, name)| (*fips, *name)).collect());

/// USPS abbreviation -> state name
pub static USPS_STATES: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| STATES.iter().map(|(_, usps, name)| (*usps, *name)).collect());

/// Title-case every word: the first word character goes upper, the rest of
/// the word lower. Leading punctuation stays as is ("(bay" -> "(Bay").
/// Whitespace runs collapse to a single space.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, word) in s.split_whitespace().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let mut started = false;
        for c in word.chars() {
            if started {
                out.extend(c.to_lowercase());
            } else if c.is_alphanumeric() || c == '_' {
                out.extend(c.to_uppercase());
                started = true;
            } else {
                out.push(c);
            }
        }
    }
    out
}

/// Canonical state name: expands FIPS codes and USPS abbreviations, then
/// title-cases.
pub fn normalize_state(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(name) = FIPS_STATES.get(trimmed) {
        return name.to_string();
    }
    let upper = trimmed.to_ascii_uppercase();
    if let Some(name) = USPS_STATES.get(upper.as_str()) {
        return name.to_string();
    }
    title_case(trimmed)
}

/// Canonical county key: `"State, County"`
pub fn county_key(state: &str, county: &str) -> String {
    format!("{}, {}", normalize_state(state), title_case(county))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("LOS ANGELES"), "Los Angeles");
        assert_eq!(title_case("st. louis"), "St. Louis");
        assert_eq!(title_case("miami-DADE"), "Miami-dade");
        assert_eq!(title_case("  prince   george's "), "Prince George's");
        assert_eq!(title_case("(bay)"), "(Bay)");
    }

    #[test]
    fn test_normalize_state() {
        assert_eq!(normalize_state("06"), "California");
        assert_eq!(normalize_state("ca"), "California");
        assert_eq!(normalize_state("CALIFORNIA"), "California");
        assert_eq!(normalize_state("new  york"), "New York");
        assert_eq!(normalize_state("District of Columbia"), "District Of Columbia");
    }

    #[test]
    fn test_county_key_spellings_agree() {
        let from_lookup = county_key("California", "Los Angeles");
        let from_boundaries = county_key("06", "LOS ANGELES");
        assert_eq!(from_lookup, "California, Los Angeles");
        assert_eq!(from_lookup, from_boundaries);
    }

    #[test]
    fn test_unknown_state_passes_through() {
        assert_eq!(normalize_state("atlantis"), "Atlantis");
        assert_eq!(normalize_state("99"), "99");
    }
}
