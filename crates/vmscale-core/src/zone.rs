//! Zone naming.
//!
//! Zones follow the `<region>-<letter>` convention (`us-east1-c` lives in
//! region `us-east1`). Anything else is considered malformed.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static ZONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<region>[a-z][a-z0-9]*(?:-[a-z0-9]+)+)-(?P<letter>[a-z])$")
        .expect("zone regex is valid")
});

/// A well-formed zone name and the region it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Zone {
    pub name: String,
    pub region: String,
}

impl Zone {
    /// Parse a zone name, returning `None` if it is malformed.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        region_of(name).map(|region| Self {
            name: name.to_string(),
            region: region.to_string(),
        })
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Region part of a `<region>-<letter>` zone name.
pub fn region_of(zone: &str) -> Option<&str> {
    ZONE_RE
        .captures(zone)
        .and_then(|caps| caps.name("region"))
        .map(|m| m.as_str())
}

/// Split a comma-separated zone list, trimming whitespace and dropping
/// empty entries. Order is preserved; well-formedness is not checked.
pub fn parse_zone_list(zones: &str) -> Vec<String> {
    zones
        .split(',')
        .map(str::trim)
        .filter(|z| !z.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_of_strips_zone_letter() {
        assert_eq!(region_of("us-east1-c"), Some("us-east1"));
        assert_eq!(region_of("northamerica-northeast1-a"), Some("northamerica-northeast1"));
        assert_eq!(region_of("europe-west4-b"), Some("europe-west4"));
    }

    #[test]
    fn region_of_rejects_malformed() {
        assert_eq!(region_of("us-east1"), None);
        assert_eq!(region_of("useast1c"), None);
        assert_eq!(region_of("us-east1-cc"), None);
        assert_eq!(region_of(""), None);
        assert_eq!(region_of("-a"), None);
    }

    #[test]
    fn zone_list_preserves_order() {
        assert_eq!(
            parse_zone_list(" us-east1-c, ,us-west1-a,"),
            vec!["us-east1-c".to_string(), "us-west1-a".to_string()]
        );
    }

    #[test]
    fn zone_parse_carries_region() {
        let zone = Zone::parse("us-central1-a").unwrap();
        assert_eq!(zone.region, "us-central1");
        assert!(Zone::parse("central").is_none());
    }
}
