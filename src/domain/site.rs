use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference key into the external asset registry.
///
/// The engine never owns site identity; it only carries the key and the
/// slice of metadata it needs for scheduling and output validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteKey(pub String);

impl SiteKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SiteKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SiteKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Generation technology of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SiteKind {
    Solar,
    Wind,
}

/// Operational status of a site as mirrored from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SiteStatus {
    Active,
    Decommissioned,
}

impl Default for SiteStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// A managed generation asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub key: SiteKey,
    pub name: String,
    pub kind: SiteKind,
    /// Nameplate capacity in kW; upper bound for plausible output.
    pub capacity_kw: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Number of generation units (turbines or inverter strings).
    #[serde(default = "default_unit_count")]
    pub unit_count: u32,
    #[serde(default)]
    pub status: SiteStatus,
}

fn default_unit_count() -> u32 {
    1
}

impl Site {
    pub fn is_active(&self) -> bool {
        self.status == SiteStatus::Active
    }
}

/// In-process stand-in for the external asset registry.
///
/// Holds the site slice the engine was configured with; lookups are by
/// reference key only.
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: Vec<Site>,
}

impl SiteRegistry {
    pub fn new(sites: Vec<Site>) -> Self {
        Self { sites }
    }

    pub fn get(&self, key: &SiteKey) -> Option<&Site> {
        self.sites.iter().find(|s| &s.key == key)
    }

    /// Sites eligible for scheduling.
    pub fn active_sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter().filter(|s| s.is_active())
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_site(key: &str, kind: SiteKind, capacity_kw: f64) -> Site {
        Site {
            key: SiteKey::from(key),
            name: format!("site {key}"),
            kind,
            capacity_kw,
            latitude: 57.7,
            longitude: 11.9,
            unit_count: 4,
            status: SiteStatus::Active,
        }
    }

    #[test]
    fn registry_filters_inactive_sites() {
        let mut decommissioned = test_site("S2", SiteKind::Solar, 500.0);
        decommissioned.status = SiteStatus::Decommissioned;
        let registry =
            SiteRegistry::new(vec![test_site("S1", SiteKind::Wind, 2000.0), decommissioned]);

        assert_eq!(registry.len(), 2);
        let active: Vec<_> = registry.active_sites().collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].key.as_str(), "S1");
    }

    #[test]
    fn registry_lookup_by_key() {
        let registry = SiteRegistry::new(vec![test_site("S1", SiteKind::Wind, 2000.0)]);
        assert!(registry.get(&SiteKey::from("S1")).is_some());
        assert!(registry.get(&SiteKey::from("missing")).is_none());
    }

    #[test]
    fn site_kind_round_trips_through_serde() {
        let kind: SiteKind = serde_json::from_str("\"wind\"").unwrap();
        assert_eq!(kind, SiteKind::Wind);
        assert_eq!(serde_json::to_string(&SiteKind::Solar).unwrap(), "\"solar\"");
    }
}
