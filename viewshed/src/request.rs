//! Viewshed request validation.
//!
//! Raw requests arrive with every field optional so that a missing value is
//! reported as [`ViewshedError::InvalidInput`] instead of a deserialization
//! failure. [`RawViewshedRequest::validate`] is the only way to obtain a
//! [`ViewshedRequest`], so a request that reaches the engine has always been
//! checked.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ViewshedError};

/// Analysis radius used when the request does not provide one, in DSM units.
pub const DEFAULT_MAX_DISTANCE: f64 = 500.0;

/// A viewshed request as received from a caller, before validation.
///
/// `viewshed-service` mirrors this shape in its OpenAPI body type.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawViewshedRequest {
    /// Observer longitude in decimal degrees.
    #[serde(default)]
    pub lng: Option<f64>,
    /// Observer latitude in decimal degrees.
    #[serde(default)]
    pub lat: Option<f64>,
    /// Equipment height above the DSM surface.
    #[serde(default, rename = "mountHeight")]
    pub mount_height: Option<f64>,
    /// Analysis radius.
    #[serde(default, rename = "maxDistance", skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<f64>,
}

/// A validated viewshed request.
///
/// Heights and distances are in the DSM's native unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewshedRequest {
    pub longitude: f64,
    pub latitude: f64,
    pub mount_height: f64,
    pub max_distance: f64,
}

impl RawViewshedRequest {
    /// Create a raw request from its required fields.
    pub fn new(lng: f64, lat: f64, mount_height: f64) -> Self {
        Self {
            lng: Some(lng),
            lat: Some(lat),
            mount_height: Some(mount_height),
            max_distance: None,
        }
    }

    /// Set the analysis radius.
    pub fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = Some(max_distance);
        self
    }

    /// Validate the request.
    ///
    /// Checks presence first, then ranges. A mount height of zero is rejected
    /// rather than defaulted. When `maxDistance` is absent,
    /// `default_max_distance` is substituted.
    ///
    /// # Errors
    ///
    /// Returns [`ViewshedError::InvalidInput`] describing the first failed check.
    pub fn validate(&self, default_max_distance: f64) -> Result<ViewshedRequest> {
        let (lng, lat, mount_height) = match (self.lng, self.lat, self.mount_height) {
            (Some(lng), Some(lat), Some(height)) => (lng, lat, height),
            _ => {
                return Err(ViewshedError::invalid_input(
                    "Missing required parameters: lng, lat, mountHeight",
                ))
            }
        };

        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(ViewshedError::invalid_input(format!(
                "Longitude out of range: {} (valid: -180 to 180)",
                lng
            )));
        }

        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(ViewshedError::invalid_input(format!(
                "Latitude out of range: {} (valid: -90 to 90)",
                lat
            )));
        }

        if !mount_height.is_finite() || mount_height <= 0.0 {
            return Err(ViewshedError::invalid_input(format!(
                "Mount height must be a positive number, got {}",
                mount_height
            )));
        }

        let max_distance = match self.max_distance {
            Some(distance) if !distance.is_finite() || distance <= 0.0 => {
                return Err(ViewshedError::invalid_input(format!(
                    "Max distance must be a positive number, got {}",
                    distance
                )));
            }
            Some(distance) => distance,
            None => default_max_distance,
        };

        Ok(ViewshedRequest {
            longitude: lng,
            latitude: lat,
            mount_height,
            max_distance,
        })
    }
}
