//! Named proj4 definitions and coordinate transformation.

use std::collections::HashMap;

use parking_lot::RwLock;
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use super::CrsError;
use crate::tile::Extent;

/// WGS 84 geographic coordinates.
pub const EPSG_4326: &str = "EPSG:4326";

/// Web Mercator.
pub const EPSG_3857: &str = "EPSG:3857";

const WGS84_DEFINITION: &str = "+proj=longlat +datum=WGS84 +no_defs";
const WEB_MERCATOR_DEFINITION: &str =
    "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs";

#[derive(Debug, Clone)]
struct Definition {
    proj4: String,
    geographic: bool,
}

impl Definition {
    fn parse(name: &str, proj4: &str) -> Result<Self, CrsError> {
        Proj::from_proj_string(proj4).map_err(|e| CrsError::InvalidDefinition {
            name: name.to_string(),
            message: format!("{:?}", e),
        })?;
        Ok(Self {
            proj4: proj4.trim().to_string(),
            geographic: is_geographic(proj4),
        })
    }

    fn proj(&self, name: &str) -> Result<Proj, CrsError> {
        Proj::from_proj_string(&self.proj4).map_err(|e| CrsError::InvalidDefinition {
            name: name.to_string(),
            message: format!("{:?}", e),
        })
    }
}

/// Whether a proj4 string describes geographic (degree) coordinates.
fn is_geographic(proj4: &str) -> bool {
    proj4
        .split_whitespace()
        .any(|token| matches!(token, "+proj=longlat" | "+proj=latlong" | "+proj=lonlat"))
}

/// Normalise a projection name to `EPSG:<code>` form.
fn normalize(name: &str) -> String {
    let trimmed = name.trim();
    match trimmed.split_once(':') {
        Some((authority, code)) => format!("{}:{}", authority.to_ascii_uppercase(), code),
        None => trimmed.to_string(),
    }
}

/// Projection name for an EPSG code.
pub fn epsg_name(code: u16) -> String {
    format!("EPSG:{}", code)
}

/// Session registry of named projections, seeded with EPSG:4326 and
/// EPSG:3857.
#[derive(Debug)]
pub struct ProjectionRegistry {
    definitions: RwLock<HashMap<String, Definition>>,
}

impl ProjectionRegistry {
    pub fn new() -> Self {
        let mut definitions = HashMap::new();
        definitions.insert(
            EPSG_4326.to_string(),
            Definition {
                proj4: WGS84_DEFINITION.to_string(),
                geographic: true,
            },
        );
        definitions.insert(
            EPSG_3857.to_string(),
            Definition {
                proj4: WEB_MERCATOR_DEFINITION.to_string(),
                geographic: false,
            },
        );
        Self {
            definitions: RwLock::new(definitions),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.read().contains_key(&normalize(name))
    }

    /// Register (or replace) a definition after validating it.
    pub fn register(&self, name: &str, proj4: &str) -> Result<(), CrsError> {
        let name = normalize(name);
        let definition = Definition::parse(&name, proj4)?;
        tracing::debug!(projection = %name, geographic = definition.geographic, "Registered projection");
        self.definitions.write().insert(name, definition);
        Ok(())
    }

    /// The proj4 string registered under `name`.
    pub fn definition(&self, name: &str) -> Option<String> {
        self.definitions
            .read()
            .get(&normalize(name))
            .map(|d| d.proj4.clone())
    }

    fn lookup(&self, name: &str) -> Result<Definition, CrsError> {
        self.definitions
            .read()
            .get(&normalize(name))
            .cloned()
            .ok_or_else(|| CrsError::UnknownProjection(name.to_string()))
    }

    /// Transform one point. Geographic coordinates are in degrees.
    pub fn transform_point(&self, from: &str, to: &str, x: f64, y: f64) -> Result<(f64, f64), CrsError> {
        let mut points = [(x, y)];
        self.transform_points(from, to, &mut points)?;
        Ok(points[0])
    }

    /// Transform points in place.
    pub fn transform_points(&self, from: &str, to: &str, points: &mut [(f64, f64)]) -> Result<(), CrsError> {
        if normalize(from) == normalize(to) {
            return Ok(());
        }
        let source = self.lookup(from)?;
        let target = self.lookup(to)?;
        let source_proj = source.proj(from)?;
        let target_proj = target.proj(to)?;

        for point in points.iter_mut() {
            let (x, y) = *point;
            let mut p = if source.geographic {
                (x.to_radians(), y.to_radians(), 0.0)
            } else {
                (x, y, 0.0)
            };
            transform(&source_proj, &target_proj, &mut p).map_err(|e| CrsError::Transform {
                from: from.to_string(),
                to: to.to_string(),
                message: format!("{:?}", e),
            })?;
            *point = if target.geographic {
                (p.0.to_degrees(), p.1.to_degrees())
            } else {
                (p.0, p.1)
            };
        }
        Ok(())
    }

    /// Transform an extent, returning the box enclosing its corners and edge
    /// midpoints.
    pub fn transform_extent(&self, extent: &Extent, from: &str, to: &str) -> Result<Extent, CrsError> {
        let (cx, cy) = extent.center();
        let mut points = [
            (extent.min_x, extent.min_y),
            (extent.min_x, extent.max_y),
            (extent.max_x, extent.min_y),
            (extent.max_x, extent.max_y),
            (cx, extent.min_y),
            (cx, extent.max_y),
            (extent.min_x, cy),
            (extent.max_x, cy),
        ];
        self.transform_points(from, to, &mut points)?;

        let finite: Vec<(f64, f64)> = points
            .into_iter()
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect();
        Extent::enclosing(&finite).ok_or_else(|| CrsError::Transform {
            from: from.to_string(),
            to: to.to_string(),
            message: format!("extent {} has no finite image", extent),
        })
    }
}

impl Default for ProjectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UTM_33N: &str = "+proj=utm +zone=33 +datum=WGS84 +units=m +no_defs";

    #[test]
    fn test_seeded_projections() {
        let registry = ProjectionRegistry::new();
        assert!(registry.contains("EPSG:4326"));
        assert!(registry.contains("epsg:3857"));
        assert!(!registry.contains("EPSG:32633"));
    }

    #[test]
    fn test_register_validates() {
        let registry = ProjectionRegistry::new();
        assert!(registry.register("EPSG:32633", UTM_33N).is_ok());
        assert!(registry.contains("EPSG:32633"));
        assert!(matches!(
            registry.register("EPSG:1", "+proj=nonsense"),
            Err(CrsError::InvalidDefinition { .. })
        ));
        assert!(!registry.contains("EPSG:1"));
    }

    #[test]
    fn test_geographic_to_mercator() {
        let registry = ProjectionRegistry::new();
        let (x, y) = registry
            .transform_point(EPSG_4326, EPSG_3857, 180.0, 0.0)
            .unwrap();
        assert!((x - 20_037_508.342789244).abs() < 1e-3);
        assert!(y.abs() < 1e-6);
    }

    #[test]
    fn test_utm_extent_to_geographic() {
        let registry = ProjectionRegistry::new();
        registry.register("EPSG:32633", UTM_33N).unwrap();

        // Around the zone's central meridian (15E) at the equator
        let extent = Extent::new(400_000.0, 0.0, 600_000.0, 100_000.0);
        let geo = registry
            .transform_extent(&extent, "EPSG:32633", EPSG_4326)
            .unwrap();

        assert!(geo.min_x < 15.0 && geo.max_x > 15.0);
        assert!(geo.min_y.abs() < 1e-6);
        assert!(geo.max_y > 0.8 && geo.max_y < 1.0);
    }

    #[test]
    fn test_identity_and_unknown() {
        let registry = ProjectionRegistry::new();
        assert_eq!(
            registry.transform_point("EPSG:9999", "epsg:9999", 1.0, 2.0).unwrap(),
            (1.0, 2.0)
        );
        assert!(matches!(
            registry.transform_point("EPSG:9999", EPSG_4326, 1.0, 2.0),
            Err(CrsError::UnknownProjection(_))
        ));
    }
}
