use stormcore::math::geo::{self, GeoPoint};

/// A WSR-88D site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Station {
    pub code: &'static str,
    pub name: &'static str,
    pub state: &'static str,
    pub lat: f64,
    pub lon: f64,
}

impl Station {
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

const fn site(code: &'static str, name: &'static str, state: &'static str, lat: f64, lon: f64) -> Station {
    Station {
        code,
        name,
        state,
        lat,
        lon,
    }
}

pub const STATIONS: &[Station] = &[
    site("KTLX", "Oklahoma City", "OK", 35.3331, -97.2778),
    site("KOUN", "Norman", "OK", 35.2361, -97.4625),
    site("KINX", "Tulsa", "OK", 36.1750, -95.5644),
    site("KVNX", "Vance AFB", "OK", 36.7406, -98.1278),
    site("KFDR", "Frederick", "OK", 34.3622, -98.9764),
    site("KICT", "Wichita", "KS", 37.6544, -97.4431),
    site("KDDC", "Dodge City", "KS", 37.7608, -99.9689),
    site("KTWX", "Topeka", "KS", 38.9969, -96.2325),
    site("KGLD", "Goodland", "KS", 39.3667, -101.7003),
    site("KAMA", "Amarillo", "TX", 35.2333, -101.7092),
    site("KLBB", "Lubbock", "TX", 33.6542, -101.8139),
    site("KMAF", "Midland", "TX", 31.9433, -102.1894),
    site("KDYX", "Dyess AFB", "TX", 32.5386, -99.2542),
    site("KFWS", "Dallas/Ft Worth", "TX", 32.5731, -97.3031),
    site("KEWX", "Austin/San Antonio", "TX", 29.7039, -98.0286),
    site("KGRK", "Central Texas", "TX", 30.7217, -97.3831),
    site("KHGX", "Houston/Galveston", "TX", 29.4719, -95.0792),
    site("KLZK", "Little Rock", "AR", 34.8364, -92.2622),
    site("KSRX", "Fort Smith", "AR", 35.2906, -94.3619),
    site("KNQA", "Memphis", "TN", 35.3447, -89.8736),
    site("KOHX", "Nashville", "TN", 36.2472, -86.5625),
    site("KEAX", "Kansas City", "MO", 38.8103, -94.2644),
    site("KSGF", "Springfield", "MO", 37.2350, -93.4006),
    site("KLSX", "St Louis", "MO", 38.6989, -90.6828),
    site("KILX", "Central Illinois", "IL", 40.1506, -89.3369),
    site("KLOT", "Chicago", "IL", 41.6044, -88.0844),
    site("KDMX", "Des Moines", "IA", 41.7311, -93.7228),
    site("KOAX", "Omaha", "NE", 41.3203, -96.3667),
    site("KUEX", "Hastings", "NE", 40.3208, -98.4419),
    site("KFSD", "Sioux Falls", "SD", 43.5878, -96.7294),
    site("KBMX", "Birmingham", "AL", 33.1722, -86.7697),
    site("KHTX", "Huntsville", "AL", 34.9306, -86.0833),
    site("KDGX", "Jackson", "MS", 32.2800, -89.9844),
    site("KSHV", "Shreveport", "LA", 32.4508, -93.8414),
    site("KLIX", "New Orleans", "LA", 30.3367, -89.8256),
];

pub fn find(code: &str) -> Option<&'static Station> {
    STATIONS
        .iter()
        .find(|station| station.code.eq_ignore_ascii_case(code))
}

/// Closest site to `point` with its distance in km.
pub fn nearest(point: GeoPoint) -> Option<(&'static Station, f64)> {
    STATIONS
        .iter()
        .map(|station| (station, geo::haversine_km(point, station.location())))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(find("ktlx").map(|s| s.name), Some("Oklahoma City"));
        assert!(find("XXXX").is_none());
    }

    #[test]
    fn nearest_site_to_moore() {
        let (station, distance) = nearest(GeoPoint::new(35.34, -97.49)).unwrap();
        assert_eq!(station.code, "KOUN");
        assert!(distance < 15.0);
    }
}
