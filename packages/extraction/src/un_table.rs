//! Offline UN number lookup table.
//!
//! Maps UN numbers to hazard class, packing group and description, letting
//! the pipeline fill transport fields without any network call. The table
//! ships embedded in the crate and is parsed once on first use.

use std::collections::HashMap;
use std::sync::OnceLock;

const TABLE_CSV: &str = include_str!("../data/un_table.csv");

/// One row of the UN table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnEntry {
    pub un_number: u32,
    pub hazard_class: Option<String>,
    /// Roman-numeral packing group; gases and articles have none.
    pub packing_group: Option<String>,
    pub description: String,
}

fn table() -> &'static HashMap<u32, UnEntry> {
    static TABLE: OnceLock<HashMap<u32, UnEntry>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map = HashMap::new();
        for line in TABLE_CSV.lines().skip(1) {
            let mut fields = line.splitn(4, ',');
            let (Some(number), Some(class), Some(group), Some(description)) = (
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
            ) else {
                continue;
            };
            let Ok(un_number) = number.trim().parse::<u32>() else {
                continue;
            };
            let non_empty = |s: &str| {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            };
            map.insert(
                un_number,
                UnEntry {
                    un_number,
                    hazard_class: non_empty(class),
                    packing_group: non_empty(group),
                    description: description.trim().to_string(),
                },
            );
        }
        map
    })
}

/// Normalize a digit string (`"1090"`, `" UN 1090 "`, `"090"`) to its number.
fn normalize_un(value: &str) -> Option<u32> {
    let trimmed = value.trim().trim_start_matches("UN").trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// Look up the table entry for a UN number given as text.
pub fn lookup_un(value: &str) -> Option<&'static UnEntry> {
    table().get(&normalize_un(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_numbers_resolve() {
        let acetone = lookup_un("1090").unwrap();
        assert_eq!(acetone.hazard_class.as_deref(), Some("3"));
        assert_eq!(acetone.packing_group.as_deref(), Some("II"));

        let sulfuric = lookup_un("1830").unwrap();
        assert_eq!(sulfuric.hazard_class.as_deref(), Some("8"));
    }

    #[test]
    fn gases_have_no_packing_group() {
        let ammonia = lookup_un("1005").unwrap();
        assert_eq!(ammonia.hazard_class.as_deref(), Some("2.3"));
        assert!(ammonia.packing_group.is_none());
    }

    #[test]
    fn prefix_and_whitespace_are_tolerated() {
        assert!(lookup_un(" UN 1203 ").is_some());
        assert!(lookup_un("UN1203").is_some());
    }

    #[test]
    fn unknown_or_malformed_input_misses() {
        assert!(lookup_un("0001").is_none());
        assert!(lookup_un("abc").is_none());
        assert!(lookup_un("").is_none());
    }
}
