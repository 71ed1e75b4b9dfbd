//! Geographic utilities: great-circle distance, spherical weighted averaging
//! and time-bounded interpolation between fixes.

use chrono::{DateTime, Utc};
use geo::{Distance, Haversine, Point};

use crate::{offset_seconds, seconds_between, GeoPoint};

/// Calculate haversine distance between two points in meters.
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Total length of a path in meters.
pub fn polyline_length(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Weighted average of two fixes on the unit sphere.
///
/// `origin_weight` is the weight of `origin`; `target` gets the complement.
/// Both positions are turned into unit vectors, summed with their weights and
/// projected back to latitude/longitude. Altitude is blended linearly.
/// Accuracy, course and speed are taken from `target`, and so is the
/// timestamp unless `timestamp` overrides it.
///
/// # Panics
/// If `origin_weight` is outside `[0, 1]`.
pub fn weighted_average(
    origin: &GeoPoint,
    target: &GeoPoint,
    origin_weight: f64,
    timestamp: Option<DateTime<Utc>>,
) -> GeoPoint {
    assert!(
        (0.0..=1.0).contains(&origin_weight),
        "origin weight must be in 0...1, got {}",
        origin_weight
    );

    let mut x = 0.0;
    let mut y = 0.0;
    let mut z = 0.0;
    let mut altitude = 0.0;

    for (p, weight) in [(origin, origin_weight), (target, 1.0 - origin_weight)] {
        let lat = p.latitude.to_radians();
        let lon = p.longitude.to_radians();
        x += lat.cos() * lon.cos() * weight;
        y += lat.cos() * lon.sin() * weight;
        z += lat.sin() * weight;
        altitude += p.altitude * weight;
    }

    // Weights already sum to 1
    let lon = y.atan2(x);
    let lat = z.atan2((x * x + y * y).sqrt());

    GeoPoint {
        latitude: lat.to_degrees(),
        longitude: lon.to_degrees(),
        altitude,
        horizontal_accuracy: target.horizontal_accuracy,
        vertical_accuracy: target.vertical_accuracy,
        course: target.course,
        speed: target.speed,
        timestamp: timestamp.unwrap_or(target.timestamp),
    }
}

/// Insert positions between `from` and `to` so that consecutive fixes are at
/// most `max_interval` seconds apart.
///
/// Returns `[from, to]` when the gap is already small enough. Otherwise a
/// point is placed at every multiple of `max_interval` after `from` (except
/// one landing exactly on `to`), each on the great circle between the two.
/// The first and last elements are always `from` and `to` unchanged.
///
/// # Panics
/// If `to` is not strictly after `from`, or `max_interval` is not positive.
pub fn interpolate(from: &GeoPoint, to: &GeoPoint, max_interval: f64) -> Vec<GeoPoint> {
    let total = seconds_between(from.timestamp, to.timestamp);
    assert!(
        total > 0.0,
        "interpolation target must be after the origin ({}s)",
        total
    );
    assert!(
        max_interval > 0.0,
        "interpolation interval must be positive ({}s)",
        max_interval
    );

    if total <= max_interval {
        return vec![*from, *to];
    }

    let steps = (total / max_interval).floor() as u64;
    let mut route = Vec::with_capacity(steps as usize + 2);
    route.push(*from);
    for inc in 1..=steps {
        let elapsed = inc as f64 * max_interval;
        if elapsed == total {
            continue;
        }
        let weight = 1.0 - elapsed / total;
        let at = offset_seconds(from.timestamp, elapsed);
        route.push(weighted_average(from, to, weight, Some(at)));
    }
    route.push(*to);
    route
}

/// Convert meters to approximate degrees of latitude.
pub fn meters_to_degrees(meters: f64) -> f64 {
    meters / 111_195.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_546_800 + secs, 0).unwrap()
    }

    fn pair() -> (GeoPoint, GeoPoint) {
        let a = GeoPoint::new(51.5074, -0.1278, at(0))
            .with_altitude(10.0)
            .with_accuracy(4.0, 2.0);
        let b = GeoPoint::new(51.5080, -0.1290, at(9))
            .with_altitude(20.0)
            .with_accuracy(8.0, 6.0)
            .with_motion(300.0, 3.0);
        (a, b)
    }

    #[test]
    fn test_haversine_known_distance() {
        let london = GeoPoint::new(51.5074, -0.1278, at(0));
        let paris = GeoPoint::new(48.8566, 2.3522, at(0));
        let d = haversine_distance(&london, &paris);
        assert!((d - 343_500.0).abs() < 2_000.0, "got {}", d);
    }

    #[test]
    fn test_weighted_average_extremes() {
        let (a, b) = pair();

        let full_origin = weighted_average(&a, &b, 1.0, None);
        assert!((full_origin.latitude - a.latitude).abs() < 1e-9);
        assert!((full_origin.longitude - a.longitude).abs() < 1e-9);
        assert!((full_origin.altitude - a.altitude).abs() < 1e-9);

        let full_target = weighted_average(&a, &b, 0.0, None);
        assert!((full_target.latitude - b.latitude).abs() < 1e-9);
        assert!((full_target.longitude - b.longitude).abs() < 1e-9);
        assert_eq!(full_target.timestamp, b.timestamp);
    }

    #[test]
    fn test_weighted_average_copies_target_metadata() {
        let (a, b) = pair();
        let mid = weighted_average(&a, &b, 0.5, None);
        assert_eq!(mid.horizontal_accuracy, 8.0);
        assert_eq!(mid.vertical_accuracy, 6.0);
        assert_eq!(mid.course, 300.0);
        assert_eq!(mid.speed, 3.0);
        assert_eq!(mid.timestamp, b.timestamp);
        assert!((mid.altitude - 15.0).abs() < 1e-9);

        let d_a = haversine_distance(&a, &mid);
        let d_b = haversine_distance(&mid, &b);
        assert!((d_a - d_b).abs() < 0.01);

        let stamped = weighted_average(&a, &b, 0.5, Some(at(4)));
        assert_eq!(stamped.timestamp, at(4));
    }

    #[test]
    #[should_panic(expected = "origin weight")]
    fn test_weighted_average_rejects_bad_weight() {
        let (a, b) = pair();
        weighted_average(&a, &b, 1.2, None);
    }

    #[test]
    fn test_interpolate_short_gap() {
        let (a, mut b) = pair();
        b.timestamp = at(2);
        let route = interpolate(&a, &b, 2.0);
        assert_eq!(route, vec![a, b]);
    }

    #[test]
    fn test_interpolate_fills_gap() {
        let (a, b) = pair();
        // 9s gap at 2s spacing: 2, 4, 6, 8
        let route = interpolate(&a, &b, 2.0);
        assert_eq!(route.len(), 6);
        assert_eq!(route[0], a);
        assert_eq!(*route.last().unwrap(), b);
        assert_eq!(route[1].timestamp, at(2));
        assert_eq!(route[4].timestamp, at(8));
        for w in route.windows(2) {
            assert!(w[0].timestamp < w[1].timestamp);
        }
    }

    #[test]
    fn test_interpolate_skips_exact_end() {
        let (a, mut b) = pair();
        b.timestamp = at(6);
        // Multiples 2, 4 inserted; 6 lands on the end
        let route = interpolate(&a, &b, 2.0);
        assert_eq!(route.len(), 4);
        assert_eq!(route[2].timestamp, at(4));
    }

    #[test]
    #[should_panic(expected = "after the origin")]
    fn test_interpolate_rejects_backwards_time() {
        let (a, b) = pair();
        interpolate(&b, &a, 2.0);
    }

    #[test]
    #[should_panic(expected = "interval must be positive")]
    fn test_interpolate_rejects_zero_interval() {
        let (a, b) = pair();
        interpolate(&a, &b, 0.0);
    }

    #[test]
    fn test_polyline_length() {
        let (a, b) = pair();
        let mid = weighted_average(&a, &b, 0.5, None);
        let direct = haversine_distance(&a, &b);
        assert!((polyline_length(&[a, mid, b]) - direct).abs() < 0.01);
        assert_eq!(polyline_length(&[a]), 0.0);
    }
}
