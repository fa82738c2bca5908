use std::f64::consts::TAU;

use com::LocationGlobalRelative;

/// Fraction of the target altitude that counts as arrived after takeoff.
pub const TAKEOFF_THRESHOLD: f64 = 0.95;

/// `count` points evenly spaced on a circle of `radius` degrees around `center`, starting due
/// east and turning counter-clockwise, all at `altitude`.
pub fn circle(center: LocationGlobalRelative,
              radius: f64,
              altitude: f64,
              count: usize) -> impl Iterator<Item = LocationGlobalRelative> {
    (0..count).map(move |i| {
        let angle = bearing(i, count);
        LocationGlobalRelative::new(
            center.lat + radius * angle.sin(),
            center.lon + radius * angle.cos(),
            altitude,
        )
    })
}

/// Angle of point `i` out of `count`, in radians.
pub fn bearing(i: usize, count: usize) -> f64 {
    (i as f64 / count as f64 * 360.).to_radians()
}

pub fn altitude_reached(altitude: f64, target: f64) -> bool {
    altitude >= target * TAKEOFF_THRESHOLD
}
