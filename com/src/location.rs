use mavlink::ardupilotmega::GLOBAL_POSITION_INT_DATA;

/// Meters per degree of latitude, flat-earth approximation.
pub const METERS_PER_DEGREE: f64 = 1.113195e5;

/// Latitude/longitude in degrees, altitude in meters above home.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocationGlobalRelative {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl LocationGlobalRelative {
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }

    pub fn from_global_position_int(data: &GLOBAL_POSITION_INT_DATA) -> Self {
        Self {
            lat: data.lat as f64 / 1e7,
            lon: data.lon as f64 / 1e7,
            alt: data.relative_alt as f64 / 1000.,
        }
    }

    /// Ground distance in meters, good enough over a few kilometers.
    pub fn ground_distance_m(&self, other: &Self) -> f64 {
        let (north, east) = self.offset_m(other);
        north.hypot(east)
    }

    /// North/east offset in meters from `self` to `other`.
    pub fn offset_m(&self, other: &Self) -> (f64, f64) {
        let north = (other.lat - self.lat) * METERS_PER_DEGREE;
        let east = (other.lon - self.lon) * METERS_PER_DEGREE * self.lat.to_radians().cos();
        (north, east)
    }

    /// Moves horizontally towards `target` by at most `step_m` meters. Altitude is untouched.
    pub fn stepped_towards(&self, target: &Self, step_m: f64) -> Self {
        let distance = self.ground_distance_m(target);
        if distance <= step_m || distance == 0. {
            return Self { lat: target.lat, lon: target.lon, alt: self.alt };
        }
        let ratio = step_m / distance;
        Self {
            lat: self.lat + (target.lat - self.lat) * ratio,
            lon: self.lon + (target.lon - self.lon) * ratio,
            alt: self.alt,
        }
    }

    pub(crate) fn lat_int(&self) -> i32 {
        (self.lat * 1e7).round() as i32
    }

    pub(crate) fn lon_int(&self) -> i32 {
        (self.lon * 1e7).round() as i32
    }
}
