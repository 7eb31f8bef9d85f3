//! Typed viewshed response model.
//!
//! The engine emits a GeoJSON FeatureCollection whose features are
//! distinguished by `properties.type`. This module turns that loosely typed
//! collection into a closed union, [`ViewshedFeature`], with one variant per
//! tag carrying only the fields that tag requires. Display hints such as
//! `marker-color` or `fill-opacity` are not interpreted; they are kept
//! verbatim and written back on serialization. Numeric properties also stay in
//! that map as received, so `500` is not re-emitted as `500.0`. Only `type`
//! and `units` are rewritten, `units` in its canonical spelling.
//!
//! # Feature tags
//!
//! | `properties.type` | Geometry | Required properties |
//! |-------------------|----------|---------------------|
//! | `observer` | Point | `elevation`, `units` |
//! | `viewshed` | Polygon, MultiPolygon | `visible`, `latitude`, `longitude` (`units` optional) |
//! | `analysis_range` | LineString, Polygon | `radius`, `units` |

use std::fmt;

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue, Value as GeoJsonValue};
use serde::{Serialize, Serializer};

/// Linear unit of the DSM, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Feet,
    Meters,
}

impl Units {
    /// Parse a unit name, accepting the common spellings GIS tools print.
    ///
    /// ```ignore
    /// assert_eq!(Units::parse("US survey foot"), Some(Units::Feet));
    /// assert_eq!(Units::parse("metre"), Some(Units::Meters));
    /// ```
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_lowercase();
        match normalized.as_str() {
            "feet" | "foot" | "ft" | "us survey foot" | "us_survey_foot" | "ftus" => {
                Some(Units::Feet)
            }
            "meters" | "meter" | "metres" | "metre" | "m" => Some(Units::Meters),
            _ => None,
        }
    }

    /// Canonical name used in responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Feet => "feet",
            Units::Meters => "meters",
        }
    }

    /// Length of one unit in meters (international foot).
    pub fn meters_per_unit(&self) -> f64 {
        match self {
            Units::Feet => 0.3048,
            Units::Meters => 1.0,
        }
    }

    /// Convert a length in this unit to meters.
    pub fn to_meters(&self, value: f64) -> f64 {
        value * self.meters_per_unit()
    }

    /// Convert a length in meters to this unit.
    pub fn from_meters(&self, meters: f64) -> f64 {
        meters / self.meters_per_unit()
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The observer's position and absolute elevation.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverFeature {
    /// `[longitude, latitude]`, optionally with altitude.
    pub position: Vec<f64>,
    /// Surface elevation plus mount height.
    pub elevation: f64,
    pub units: Units,
    /// Marker display hints and the raw `elevation` value.
    pub display: JsonObject,
}

/// A region visible from the observer.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleAreaFeature {
    /// Polygon or MultiPolygon geometry.
    pub geometry: GeoJsonValue,
    pub visible: bool,
    /// Centroid latitude of the region's outer ring.
    pub latitude: f64,
    /// Centroid longitude of the region's outer ring.
    pub longitude: f64,
    /// Unit of the region, when the engine tags it with one.
    pub units: Option<Units>,
    /// Fill and stroke styling plus the raw numeric properties.
    pub style: JsonObject,
}

/// The boundary of the analysis radius.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRangeFeature {
    /// LineString or Polygon tracing the boundary circle.
    pub boundary: GeoJsonValue,
    pub radius: f64,
    pub units: Units,
    /// Stroke styling and the raw `radius` value.
    pub style: JsonObject,
}

/// One feature of a viewshed response, keyed by `properties.type`.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewshedFeature {
    Observer(ObserverFeature),
    Viewshed(VisibleAreaFeature),
    AnalysisRange(AnalysisRangeFeature),
}

impl ViewshedFeature {
    /// The `properties.type` tag of this feature.
    pub fn tag(&self) -> &'static str {
        match self {
            ViewshedFeature::Observer(_) => "observer",
            ViewshedFeature::Viewshed(_) => "viewshed",
            ViewshedFeature::AnalysisRange(_) => "analysis_range",
        }
    }

    /// Units carried by this feature, if its tag has any.
    pub fn units(&self) -> Option<Units> {
        match self {
            ViewshedFeature::Observer(o) => Some(o.units),
            ViewshedFeature::AnalysisRange(r) => Some(r.units),
            ViewshedFeature::Viewshed(v) => v.units,
        }
    }
}

impl TryFrom<Feature> for ViewshedFeature {
    type Error = String;

    fn try_from(feature: Feature) -> Result<Self, Self::Error> {
        let mut props = feature
            .properties
            .ok_or_else(|| "feature has no properties".to_string())?;

        let tag = match props.remove("type") {
            Some(JsonValue::String(tag)) => tag,
            Some(_) => return Err("properties.type is not a string".to_string()),
            None => return Err("properties.type is missing".to_string()),
        };

        let geometry = feature
            .geometry
            .map(|g| g.value)
            .ok_or_else(|| format!("{} feature has no geometry", tag))?;

        match tag.as_str() {
            "observer" => {
                let position = match geometry {
                    GeoJsonValue::Point(position) if position.len() >= 2 => position,
                    other => return Err(wrong_geometry(&tag, &other)),
                };
                Ok(ViewshedFeature::Observer(ObserverFeature {
                    position,
                    elevation: read_number(&props, "elevation", &tag)?,
                    units: take_units(&mut props, &tag)?,
                    display: props,
                }))
            }
            "viewshed" => {
                if !matches!(
                    geometry,
                    GeoJsonValue::Polygon(_) | GeoJsonValue::MultiPolygon(_)
                ) {
                    return Err(wrong_geometry(&tag, &geometry));
                }
                Ok(ViewshedFeature::Viewshed(VisibleAreaFeature {
                    geometry,
                    visible: take_bool(&mut props, "visible", &tag)?,
                    latitude: read_number(&props, "latitude", &tag)?,
                    longitude: read_number(&props, "longitude", &tag)?,
                    units: if props.contains_key("units") {
                        Some(take_units(&mut props, &tag)?)
                    } else {
                        None
                    },
                    style: props,
                }))
            }
            "analysis_range" => {
                if !matches!(
                    geometry,
                    GeoJsonValue::LineString(_) | GeoJsonValue::Polygon(_)
                ) {
                    return Err(wrong_geometry(&tag, &geometry));
                }
                Ok(ViewshedFeature::AnalysisRange(AnalysisRangeFeature {
                    boundary: geometry,
                    radius: read_number(&props, "radius", &tag)?,
                    units: take_units(&mut props, &tag)?,
                    style: props,
                }))
            }
            other => Err(format!("unknown feature type '{}'", other)),
        }
    }
}

impl From<ViewshedFeature> for Feature {
    fn from(feature: ViewshedFeature) -> Self {
        let tag = feature.tag();
        let mut props = JsonObject::new();
        let geometry = match feature {
            ViewshedFeature::Observer(o) => {
                props.extend(o.display);
                write_number(&mut props, "elevation", o.elevation);
                write_units(&mut props, Some(o.units));
                GeoJsonValue::Point(o.position)
            }
            ViewshedFeature::Viewshed(v) => {
                props.extend(v.style);
                props.insert("visible".to_string(), JsonValue::from(v.visible));
                write_number(&mut props, "latitude", v.latitude);
                write_number(&mut props, "longitude", v.longitude);
                write_units(&mut props, v.units);
                v.geometry
            }
            ViewshedFeature::AnalysisRange(r) => {
                props.extend(r.style);
                write_number(&mut props, "radius", r.radius);
                write_units(&mut props, Some(r.units));
                r.boundary
            }
        };
        props.insert("type".to_string(), JsonValue::from(tag));

        Feature {
            bbox: None,
            geometry: Some(Geometry::new(geometry)),
            id: None,
            properties: Some(props),
            foreign_members: None,
        }
    }
}

fn wrong_geometry(tag: &str, geometry: &GeoJsonValue) -> String {
    format!("{} feature has unexpected {} geometry", tag, geometry.type_name())
}

fn read_number(props: &JsonObject, key: &str, tag: &str) -> Result<f64, String> {
    match props.get(key) {
        Some(value) => value
            .as_f64()
            .ok_or_else(|| format!("{} property '{}' is not a number", tag, key)),
        None => Err(format!("{} feature is missing '{}'", tag, key)),
    }
}

/// Keep the received number unless the typed value has changed.
fn write_number(props: &mut JsonObject, key: &str, value: f64) {
    if props.get(key).and_then(JsonValue::as_f64) != Some(value) {
        props.insert(key.to_string(), JsonValue::from(value));
    }
}

fn write_units(props: &mut JsonObject, units: Option<Units>) {
    match units {
        Some(units) => props.insert("units".to_string(), JsonValue::from(units.as_str())),
        None => props.remove("units"),
    };
}

fn take_bool(props: &mut JsonObject, key: &str, tag: &str) -> Result<bool, String> {
    match props.remove(key) {
        Some(JsonValue::Bool(value)) => Ok(value),
        Some(_) => Err(format!("{} property '{}' is not a boolean", tag, key)),
        None => Err(format!("{} feature is missing '{}'", tag, key)),
    }
}

fn take_units(props: &mut JsonObject, tag: &str) -> Result<Units, String> {
    match props.remove("units") {
        Some(JsonValue::String(name)) => {
            Units::parse(&name).ok_or_else(|| format!("{} has unknown units '{}'", tag, name))
        }
        Some(_) => Err(format!("{} property 'units' is not a string", tag)),
        None => Err(format!("{} feature is missing 'units'", tag)),
    }
}

/// A validated viewshed FeatureCollection.
///
/// Feature order is preserved. All unit-bearing features agree on one unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewshedResponse {
    pub features: Vec<ViewshedFeature>,
}

impl ViewshedResponse {
    /// The observer feature, if the engine emitted one.
    pub fn observer(&self) -> Option<&ObserverFeature> {
        self.features.iter().find_map(|f| match f {
            ViewshedFeature::Observer(o) => Some(o),
            _ => None,
        })
    }

    /// The analysis range boundary, if the engine emitted one.
    pub fn analysis_range(&self) -> Option<&AnalysisRangeFeature> {
        self.features.iter().find_map(|f| match f {
            ViewshedFeature::AnalysisRange(r) => Some(r),
            _ => None,
        })
    }

    /// Iterate over the visible regions.
    pub fn visible_areas(&self) -> impl Iterator<Item = &VisibleAreaFeature> {
        self.features.iter().filter_map(|f| match f {
            ViewshedFeature::Viewshed(v) => Some(v),
            _ => None,
        })
    }

    /// The response's unit, or `None` when no feature carries one.
    pub fn units(&self) -> Option<Units> {
        self.features.iter().find_map(ViewshedFeature::units)
    }

    /// Convert back into a GeoJSON FeatureCollection.
    pub fn to_feature_collection(&self) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features: self.features.iter().cloned().map(Feature::from).collect(),
            foreign_members: None,
        }
    }
}

impl TryFrom<FeatureCollection> for ViewshedResponse {
    type Error = String;

    /// Decode every feature and check unit consistency.
    fn try_from(collection: FeatureCollection) -> Result<Self, Self::Error> {
        let features = collection
            .features
            .into_iter()
            .enumerate()
            .map(|(i, f)| ViewshedFeature::try_from(f).map_err(|e| format!("feature {}: {}", i, e)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut units = features.iter().filter_map(ViewshedFeature::units);
        if let Some(first) = units.next() {
            if let Some(other) = units.find(|u| *u != first) {
                return Err(format!("inconsistent units: {} and {}", first, other));
            }
        }

        Ok(Self { features })
    }
}

impl Serialize for ViewshedResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_feature_collection().serialize(serializer)
    }
}
