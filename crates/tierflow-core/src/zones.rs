//! Availability-zone selection

use crate::error::TopologyError;
use std::collections::HashSet;

pub use tierflow_cloud::Zone;

/// Zones used when the configuration does not set a cap
pub const DEFAULT_ZONE_CAP: usize = 3;

/// How the working set is chosen from the zones a backend reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ZoneOrdering {
    /// Keep the order the backend reported
    Provider,
    /// Sort by identifier first, so backend ordering cannot move subnets
    #[default]
    Sorted,
}

impl ZoneOrdering {
    pub fn from_sorted(sorted: bool) -> Self {
        if sorted {
            ZoneOrdering::Sorted
        } else {
            ZoneOrdering::Provider
        }
    }
}

/// First `min(len, cap)` distinct zones of `available`
pub fn select(
    available: &[Zone],
    cap: usize,
    ordering: ZoneOrdering,
) -> Result<Vec<Zone>, TopologyError> {
    if cap == 0 {
        return Err(TopologyError::InvalidZoneCap);
    }

    let mut seen = HashSet::new();
    let mut zones: Vec<Zone> = available
        .iter()
        .filter(|zone| seen.insert(zone.as_str()))
        .cloned()
        .collect();

    if zones.is_empty() {
        return Err(TopologyError::NoZonesAvailable);
    }

    if ordering == ZoneOrdering::Sorted {
        zones.sort();
    }
    zones.truncate(cap);

    tracing::debug!(
        selected = zones.len(),
        available = available.len(),
        ?ordering,
        "Selected availability zones"
    );
    Ok(zones)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zones(ids: &[&str]) -> Vec<Zone> {
        ids.iter().map(|id| Zone::from(*id)).collect()
    }

    #[test]
    fn test_cap_truncates_preserving_order() {
        let available = zones(&[
            "us-east-1c",
            "us-east-1a",
            "us-east-1e",
            "us-east-1b",
            "us-east-1d",
        ]);
        let selected = select(&available, 3, ZoneOrdering::Provider).unwrap();
        assert_eq!(selected, zones(&["us-east-1c", "us-east-1a", "us-east-1e"]));
    }

    #[test]
    fn test_fewer_zones_than_cap() {
        let available = zones(&["eu-west-1a", "eu-west-1b"]);
        let selected = select(&available, DEFAULT_ZONE_CAP, ZoneOrdering::Provider).unwrap();
        assert_eq!(selected, available);
    }

    #[test]
    fn test_sorted_ordering_is_stable() {
        let first = zones(&["ap-1c", "ap-1a", "ap-1d", "ap-1b"]);
        let second = zones(&["ap-1b", "ap-1d", "ap-1a", "ap-1c"]);

        let a = select(&first, 3, ZoneOrdering::Sorted).unwrap();
        let b = select(&second, 3, ZoneOrdering::Sorted).unwrap();
        assert_eq!(a, zones(&["ap-1a", "ap-1b", "ap-1c"]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicates_collapsed() {
        let available = zones(&["z-b", "z-a", "z-b", "z-c"]);
        let selected = select(&available, 3, ZoneOrdering::Provider).unwrap();
        assert_eq!(selected, zones(&["z-b", "z-a", "z-c"]));
    }

    #[test]
    fn test_no_zones() {
        assert_eq!(
            select(&[], 3, ZoneOrdering::Sorted),
            Err(TopologyError::NoZonesAvailable)
        );
    }

    #[test]
    fn test_zero_cap() {
        let available = zones(&["z-a"]);
        assert_eq!(
            select(&available, 0, ZoneOrdering::Sorted),
            Err(TopologyError::InvalidZoneCap)
        );
    }

    #[test]
    fn test_from_sorted() {
        assert_eq!(ZoneOrdering::from_sorted(true), ZoneOrdering::Sorted);
        assert_eq!(ZoneOrdering::from_sorted(false), ZoneOrdering::Provider);
    }
}
