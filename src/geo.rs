//! Bounding-box geometry for proximity search.
//!
//! The search radius is approximated by an axis-aligned latitude/longitude
//! rectangle. Latitude degrees have a fixed length; longitude degrees shrink
//! with `cos(latitude)`, so the longitude half-width is widened accordingly and
//! capped at 180° near the poles.

use crate::error::ShopError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// Kilometers spanned by one degree of latitude.
pub const KM_PER_DEGREE: f64 = 111.045;

/// Mean earth radius used by [`GeoPoint::distance_km`].
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Decimal digits kept when bounds are bound as NUMERIC parameters.
pub const BOUND_SCALE: u32 = 12;

const POLE_COS_EPSILON: f64 = 1e-12;
const MAX_LON_DELTA: f64 = 180.0;

/// A validated WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// # Errors
    ///
    /// Returns `InvalidArgument` for non-finite values, `|lat| > 90` or
    /// `|lon| > 180`.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ShopError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ShopError::InvalidArgument(format!(
                "latitude must be within [-90, 90], got {latitude}"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ShopError::InvalidArgument(format!(
                "longitude must be within [-180, 180], got {longitude}"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Great-circle distance (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
    }
}

/// Latitude/longitude rectangle around a center.
///
/// Longitude bounds are kept unnormalized (they may pass ±180°), so
/// `lon_min <= center.longitude <= lon_max` always holds; use
/// [`GeoBox::lon_ranges`] for the normalized ranges to query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

/// Bounds rounded outward to [`BOUND_SCALE`] digits, ready for binding.
#[derive(Debug, Clone, PartialEq)]
pub struct DecimalBounds {
    pub lat: (Decimal, Decimal),
    pub lon_ranges: Vec<(Decimal, Decimal)>,
}

impl GeoBox {
    /// Compute the box enclosing `radius_km` around `center`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the radius is not a positive finite
    /// number.
    pub fn compute(center: GeoPoint, radius_km: f64) -> Result<Self, ShopError> {
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(ShopError::InvalidArgument(format!(
                "radius must be a positive number of kilometers, got {radius_km}"
            )));
        }

        let lat_delta = radius_km / KM_PER_DEGREE;
        let cos_lat = center.latitude.to_radians().cos();
        let lon_delta = if cos_lat.abs() < POLE_COS_EPSILON {
            MAX_LON_DELTA
        } else {
            (lat_delta / cos_lat.abs()).min(MAX_LON_DELTA)
        };

        Ok(Self {
            lat_min: (center.latitude - lat_delta).max(-90.0),
            lat_max: (center.latitude + lat_delta).min(90.0),
            lon_min: center.longitude - lon_delta,
            lon_max: center.longitude + lon_delta,
        })
    }

    /// Longitude ranges within [-180, 180] covered by the box: one range
    /// normally, two when the box crosses the antimeridian.
    pub fn lon_ranges(&self) -> Vec<(f64, f64)> {
        if self.lon_max - self.lon_min >= 360.0 {
            vec![(-180.0, 180.0)]
        } else if self.lon_min < -180.0 {
            vec![(self.lon_min + 360.0, 180.0), (-180.0, self.lon_max)]
        } else if self.lon_max > 180.0 {
            vec![(self.lon_min, 180.0), (-180.0, self.lon_max - 360.0)]
        } else {
            vec![(self.lon_min, self.lon_max)]
        }
    }

    /// Inclusive containment test, wraparound aware.
    pub fn contains(&self, point: GeoPoint) -> bool {
        if point.latitude < self.lat_min || point.latitude > self.lat_max {
            return false;
        }
        self.lon_ranges()
            .iter()
            .any(|(min, max)| point.longitude >= *min && point.longitude <= *max)
    }

    /// Bounds as decimals, minima rounded toward -∞ and maxima toward +∞ so
    /// rounding never shrinks the box.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a bound is not representable as a decimal.
    pub fn decimal_bounds(&self) -> Result<DecimalBounds, ShopError> {
        let lat = (floor_decimal(self.lat_min)?, ceil_decimal(self.lat_max)?);
        let lon_ranges = self
            .lon_ranges()
            .into_iter()
            .map(|(min, max)| Ok((floor_decimal(min)?, ceil_decimal(max)?)))
            .collect::<Result<Vec<_>, ShopError>>()?;
        Ok(DecimalBounds { lat, lon_ranges })
    }
}

fn to_decimal(value: f64) -> Result<Decimal, ShopError> {
    Decimal::from_f64_retain(value)
        .ok_or_else(|| ShopError::InvalidArgument(format!("bound {value} is not representable")))
}

fn floor_decimal(value: f64) -> Result<Decimal, ShopError> {
    Ok(to_decimal(value)?.round_dp_with_strategy(BOUND_SCALE, RoundingStrategy::ToNegativeInfinity))
}

fn ceil_decimal(value: f64) -> Result<Decimal, ShopError> {
    Ok(to_decimal(value)?.round_dp_with_strategy(BOUND_SCALE, RoundingStrategy::ToPositiveInfinity))
}

/// Shorthand for `GeoBox::compute(GeoPoint::new(lat, lon)?, radius_km)`.
pub fn bounding_box(latitude: f64, longitude: f64, radius_km: f64) -> Result<GeoBox, ShopError> {
    GeoBox::compute(GeoPoint::new(latitude, longitude)?, radius_km)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_colombo_box_deltas() {
        let center = GeoPoint::new(6.9271, 79.8612).unwrap();
        let bbox = GeoBox::compute(center, 5.0).unwrap();

        let d1 = 5.0 / KM_PER_DEGREE;
        let d2 = d1 / 6.9271f64.to_radians().cos();
        assert!(close(center.latitude - bbox.lat_min, d1));
        assert!(close(bbox.lat_max - center.latitude, d1));
        assert!(close(center.longitude - bbox.lon_min, d2));
        assert!(close(bbox.lon_max - center.longitude, d2));
        assert!(bbox.contains(GeoPoint::new(6.93, 79.86).unwrap()));
    }

    #[test]
    fn test_pole_does_not_diverge() {
        let bbox = bounding_box(90.0, 10.0, 25.0).unwrap();
        assert!(bbox.lon_max - bbox.lon_min <= 360.0);
        assert_eq!(bbox.lat_max, 90.0);
        assert_eq!(bbox.lon_ranges(), vec![(-180.0, 180.0)]);
    }

    #[test]
    fn test_antimeridian_splits_into_two_ranges() {
        let bbox = bounding_box(0.0, 179.99, 10.0).unwrap();
        let ranges = bbox.lon_ranges();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].1, 180.0);
        assert_eq!(ranges[1].0, -180.0);
        assert!(bbox.contains(GeoPoint::new(0.0, -179.99).unwrap()));
        assert!(!bbox.contains(GeoPoint::new(0.0, 0.0).unwrap()));
    }

    #[test]
    fn test_point_exactly_on_radius_is_inside() {
        let center = GeoPoint::new(10.0, 20.0).unwrap();
        let bbox = GeoBox::compute(center, 7.5).unwrap();
        let north = GeoPoint::new(10.0 + 7.5 / KM_PER_DEGREE, 20.0).unwrap();
        assert!(bbox.contains(north));

        let bounds = bbox.decimal_bounds().unwrap();
        let north_lat = Decimal::from_f64_retain(north.latitude)
            .unwrap()
            .round_dp(BOUND_SCALE);
        assert!(bounds.lat.1 >= north_lat);
        assert!(bounds.lat.0.scale() <= BOUND_SCALE);
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -180.5).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
        assert!(bounding_box(0.0, 0.0, 0.0).is_err());
        assert!(bounding_box(0.0, 0.0, -3.0).is_err());
        assert!(bounding_box(0.0, 0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_haversine_one_degree_at_equator() {
        let a = GeoPoint::new(0.0, 0.0).unwrap();
        let b = GeoPoint::new(1.0, 0.0).unwrap();
        let d = a.distance_km(&b);
        assert!((d - 111.19).abs() < 0.1, "got {d}");
        assert_eq!(a.distance_km(&a), 0.0);
    }
}
