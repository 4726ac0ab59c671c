//! # Places Module
//!
//! Named circular areas (geofences) that stored records are tagged with.
//!
//! A place is a centre point plus a radius in metres. A position lies inside
//! a place when its great-circle distance to the centre is at most the radius.

use std::f64::consts::PI;

use crate::codec8::protocol::Position;
use crate::config::{PlaceConfig, PlacesConfig};

/// Mean Earth radius in metres
const EARTH_RADIUS_M: f64 = 6_371_008.8;

const DEG_TO_RAD: f64 = PI / 180.0;

/// One named area
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub internal_id: String,
    pub center: Position,

    /// Radius in metres
    pub radius: f64,
}

impl Place {
    pub fn contains(&self, position: &Position) -> bool {
        distance_m(&self.center, position) <= self.radius
    }
}

impl From<&PlaceConfig> for Place {
    fn from(config: &PlaceConfig) -> Self {
        Self {
            internal_id: config.internal_id.clone(),
            center: Position {
                longitude: config.longitude,
                latitude: config.latitude,
            },
            radius: config.radius,
        }
    }
}

/// Great-circle distance between two positions in metres
///
/// Uses the haversine formula.
pub fn distance_m(from: &Position, to: &Position) -> f64 {
    let lat1 = from.latitude * DEG_TO_RAD;
    let lat2 = to.latitude * DEG_TO_RAD;
    let delta_lat = (to.latitude - from.latitude) * DEG_TO_RAD;
    let delta_lon = (to.longitude - from.longitude) * DEG_TO_RAD;

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push `a` just past 1 for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Configured places, in definition order
#[derive(Debug, Clone, Default)]
pub struct PlaceRegistry {
    places: Vec<Place>,
}

impl PlaceRegistry {
    pub fn new(config: &PlacesConfig) -> Self {
        Self {
            places: config.entries.iter().map(Place::from).collect(),
        }
    }

    pub fn get(&self, internal_id: &str) -> Option<&Place> {
        self.places.iter().find(|place| place.internal_id == internal_id)
    }

    /// Places whose area includes `position`
    pub fn containing<'a, 'p>(&'a self, position: &'p Position) -> impl Iterator<Item = &'a Place> + 'p
    where
        'a: 'p,
    {
        self.places.iter().filter(move |place| place.contains(position))
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(longitude: f64, latitude: f64) -> Position {
        Position {
            longitude,
            latitude,
        }
    }

    fn registry() -> PlaceRegistry {
        PlaceRegistry::new(&PlacesConfig {
            entries: vec![
                PlaceConfig {
                    internal_id: "depot".to_string(),
                    longitude: 25.0,
                    latitude: 54.5,
                    radius: 500.0,
                },
                PlaceConfig {
                    internal_id: "city".to_string(),
                    longitude: 25.0,
                    latitude: 54.5,
                    radius: 20_000.0,
                },
                PlaceConfig {
                    internal_id: "harbour".to_string(),
                    longitude: 21.1,
                    latitude: 55.7,
                    radius: 1_000.0,
                },
            ],
        })
    }

    #[test]
    fn test_distance_one_degree_of_latitude() {
        let distance = distance_m(&position(0.0, 0.0), &position(0.0, 1.0));
        assert!((distance - 111_195.0).abs() < 10.0, "got {}", distance);
    }

    #[test]
    fn test_distance_is_zero_for_same_point() {
        let p = position(25.0, 54.5);
        assert_eq!(distance_m(&p, &p), 0.0);
    }

    #[test]
    fn test_distance_across_antimeridian() {
        let distance = distance_m(&position(179.999, 0.0), &position(-179.999, 0.0));
        assert!(distance < 250.0, "got {}", distance);
    }

    #[test]
    fn test_distance_antipodal_points() {
        let distance = distance_m(&position(0.0, 0.0), &position(180.0, 0.0));
        assert!((distance - PI * EARTH_RADIUS_M).abs() < 1.0);
    }

    #[test]
    fn test_containing_nested_places() {
        let registry = registry();

        // ~110 m north of the depot centre
        let near = position(25.0, 54.501);
        let ids: Vec<&str> = registry
            .containing(&near)
            .map(|place| place.internal_id.as_str())
            .collect();
        assert_eq!(ids, vec!["depot", "city"]);

        // ~5.5 km north: inside the city only
        let town = position(25.0, 54.55);
        let ids: Vec<&str> = registry
            .containing(&town)
            .map(|place| place.internal_id.as_str())
            .collect();
        assert_eq!(ids, vec!["city"]);
    }

    #[test]
    fn test_containing_nothing() {
        let registry = registry();
        assert_eq!(registry.containing(&position(0.0, 0.0)).count(), 0);
    }

    #[test]
    fn test_zero_radius_contains_only_center() {
        let place = Place {
            internal_id: "pin".to_string(),
            center: position(-3.7, 40.4),
            radius: 0.0,
        };
        assert!(place.contains(&position(-3.7, 40.4)));
        assert!(!place.contains(&position(-3.7, 40.4001)));
    }

    #[test]
    fn test_get_by_internal_id() {
        let registry = registry();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("harbour").unwrap().radius, 1_000.0);
        assert!(registry.get("airport").is_none());
    }

    #[test]
    fn test_empty_registry() {
        let registry = PlaceRegistry::default();
        assert!(registry.is_empty());
        assert_eq!(registry.containing(&position(25.0, 54.5)).count(), 0);
    }
}
