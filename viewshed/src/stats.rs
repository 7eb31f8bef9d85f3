//! Coverage statistics for a viewshed response.

use geo::{GeodesicArea, LineString, Polygon};
use geojson::Value as GeoJsonValue;
use serde::Serialize;

use crate::response::{Units, ViewshedResponse};

/// Summary of how much of the analysis circle is visible.
///
/// Areas are in square DSM units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoverageStats {
    /// Number of visible regions in the response.
    pub visible_regions: usize,
    /// Total geodesic area of the visible regions.
    pub visible_area: f64,
    /// Area of the analysis circle, π·r².
    pub analysis_area: f64,
    /// Visible share of the analysis circle, clamped to `[0, 100]`.
    pub coverage_percent: f64,
    /// Analysis radius the statistics were computed for.
    pub radius: f64,
    pub units: Units,
}

impl CoverageStats {
    /// Compute coverage for a response.
    ///
    /// The radius comes from the `analysis_range` feature when present and
    /// falls back to `max_distance`. Returns `None` when the response carries
    /// no unit, since areas cannot be expressed without one.
    pub fn from_response(response: &ViewshedResponse, max_distance: f64) -> Option<Self> {
        let units = response.units()?;
        let radius = response
            .analysis_range()
            .map(|r| r.radius)
            .unwrap_or(max_distance);

        let square_meters_per_unit = units.meters_per_unit().powi(2);
        let mut visible_regions = 0;
        let mut visible_m2 = 0.0;
        for area in response.visible_areas().filter(|a| a.visible) {
            visible_regions += 1;
            visible_m2 += geodesic_area_m2(&area.geometry);
        }

        let visible_area = visible_m2 / square_meters_per_unit;
        let analysis_area = std::f64::consts::PI * radius * radius;
        let coverage_percent = if analysis_area > 0.0 {
            (visible_area / analysis_area * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        Some(Self {
            visible_regions,
            visible_area,
            analysis_area,
            coverage_percent,
            radius,
            units,
        })
    }
}

fn geodesic_area_m2(geometry: &GeoJsonValue) -> f64 {
    match geometry {
        GeoJsonValue::Polygon(rings) => to_polygon(rings)
            .map(|p| p.geodesic_area_unsigned())
            .unwrap_or(0.0),
        GeoJsonValue::MultiPolygon(polygons) => polygons
            .iter()
            .filter_map(|rings| to_polygon(rings))
            .map(|p| p.geodesic_area_unsigned())
            .sum(),
        _ => 0.0,
    }
}

fn to_polygon(rings: &[Vec<Vec<f64>>]) -> Option<Polygon<f64>> {
    let mut rings = rings.iter().map(|ring| {
        LineString::from(
            ring.iter()
                .filter(|p| p.len() >= 2)
                .map(|p| (p[0], p[1]))
                .collect::<Vec<_>>(),
        )
    });
    let exterior = rings.next()?;
    Some(Polygon::new(exterior, rings.collect()))
}
