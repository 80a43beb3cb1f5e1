//! Approximate geolocation seam.
//!
//! Resolution quality is the caller's concern; a resolver backed by a real
//! database plugs in behind the trait. The bundled implementation serves
//! static mappings, which is enough for allow-listed office ranges and tests.

use std::collections::HashMap;

/// Coarse location for risk scoring. Country is an ISO 3166-1 alpha-2 code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub country: String,
    pub region: Option<String>,
    pub city: Option<String>,
}

impl Location {
    #[must_use]
    pub fn country(code: impl Into<String>) -> Self {
        Self {
            country: code.into(),
            region: None,
            city: None,
        }
    }
}

pub trait GeoResolver: Send + Sync {
    /// `None` when the address cannot be placed; unknown locations never
    /// contribute to the risk score.
    fn resolve(&self, ip: &str) -> Option<Location>;
}

/// Resolver over a fixed address table.
#[derive(Default)]
pub struct StaticGeoResolver {
    entries: HashMap<String, Location>,
}

impl StaticGeoResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entry(mut self, ip: impl Into<String>, location: Location) -> Self {
        self.entries.insert(ip.into(), location);
        self
    }
}

impl GeoResolver for StaticGeoResolver {
    fn resolve(&self, ip: &str) -> Option<Location> {
        self.entries.get(ip).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::{GeoResolver, Location, StaticGeoResolver};

    #[test]
    fn static_resolver_maps_known_addresses() {
        let resolver = StaticGeoResolver::new()
            .with_entry("203.0.113.9", Location::country("NL"))
            .with_entry("198.51.100.4", Location::country("US"));

        assert_eq!(
            resolver.resolve("203.0.113.9").map(|l| l.country),
            Some("NL".to_string())
        );
        assert!(resolver.resolve("192.0.2.1").is_none());
    }
}
