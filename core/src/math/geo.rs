use serde::{Deserialize, Serialize};

/// Mean earth radius used by every geodesic helper, in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

const MPS_TO_MPH: f64 = 2.236_936;

/// A WGS84 latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// True when both components are finite and inside the geographic range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.lat.abs() <= 90.0
            && self.lon.abs() <= 180.0
    }
}

/// Great-circle distance in kilometres (haversine).
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Initial bearing from `a` towards `b`, degrees clockwise from north in [0, 360).
pub fn bearing_deg(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    normalize_bearing(y.atan2(x).to_degrees())
}

/// Point reached travelling `distance_km` along `bearing` on the sphere.
pub fn destination(origin: GeoPoint, bearing: f64, distance_km: f64) -> GeoPoint {
    let delta = distance_km / EARTH_RADIUS_KM;
    let theta = bearing.to_radians();
    let lat1 = origin.lat.to_radians();
    let lon1 = origin.lon.to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lon2 = lon1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    GeoPoint::new(lat2.to_degrees(), normalize_longitude(lon2.to_degrees()))
}

/// Local east/north displacement from `from` to `to` in kilometres.
///
/// Equirectangular approximation around the mean latitude; accurate at
/// storm-tracking scales and exactly inverted by [`offset`].
pub fn east_north_km(from: GeoPoint, to: GeoPoint) -> (f64, f64) {
    let mean_lat = ((from.lat + to.lat) / 2.0).to_radians();
    let east = (to.lon - from.lon).to_radians() * EARTH_RADIUS_KM * mean_lat.cos();
    let north = (to.lat - from.lat).to_radians() * EARTH_RADIUS_KM;
    (east, north)
}

/// Applies a local east/north displacement (kilometres) to `origin`.
pub fn offset(origin: GeoPoint, east_km: f64, north_km: f64) -> GeoPoint {
    let lat = origin.lat + (north_km / EARTH_RADIUS_KM).to_degrees();
    let mean_lat = ((origin.lat + lat) / 2.0).to_radians();
    let lon = origin.lon + (east_km / (EARTH_RADIUS_KM * mean_lat.cos())).to_degrees();
    GeoPoint::new(lat, normalize_longitude(lon))
}

pub fn normalize_bearing(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

fn normalize_longitude(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}

pub fn mps_to_mph(speed_mps: f64) -> f64 {
    speed_mps * MPS_TO_MPH
}
