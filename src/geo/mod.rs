use crate::models::position::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Great-circle distance between two points.
pub fn distance_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * central_angle
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSchedule {
    pub base_fee: f64,
    pub per_km_fee: f64,
    pub free_distance_km: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            base_fee: 40.0,
            per_km_fee: 5.0,
            free_distance_km: 2.0,
        }
    }
}

/// Base fee plus a per-km charge past the free distance, rounded half-up to a
/// whole currency unit.
pub fn delivery_fee(distance_km: f64, schedule: &FeeSchedule) -> f64 {
    let chargeable_km = (distance_km - schedule.free_distance_km).max(0.0);
    let raw = schedule.base_fee + chargeable_km * schedule.per_km_fee;

    // f64::round rounds half away from zero, which is half-up for fees >= 0.
    raw.max(0.0).round()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtaModel {
    pub base_minutes: f64,
    pub avg_speed_kmh: f64,
}

impl Default for EtaModel {
    fn default() -> Self {
        Self {
            base_minutes: 10.0,
            avg_speed_kmh: 25.0,
        }
    }
}

/// Travel estimate, always rounded up.
pub fn estimated_minutes(distance_km: f64, base_minutes: f64, avg_speed_kmh: f64) -> u32 {
    let travel = if avg_speed_kmh > 0.0 {
        distance_km.max(0.0) / avg_speed_kmh * 60.0
    } else {
        0.0
    };

    (base_minutes.max(0.0) + travel).ceil() as u32
}

impl EtaModel {
    pub fn minutes_for(&self, distance_km: f64) -> u32 {
        estimated_minutes(distance_km, self.base_minutes, self.avg_speed_kmh)
    }
}

#[cfg(test)]
mod tests {
    use super::{delivery_fee, distance_km, estimated_minutes, FeeSchedule};
    use crate::models::position::GeoPoint;

    fn point(lng: f64, lat: f64) -> GeoPoint {
        GeoPoint { lng, lat }
    }

    #[test]
    fn zero_distance_for_same_point() {
        let p = point(9.9937, 53.5511);
        let distance = distance_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = point(77.5946, 12.9716);
        let b = point(-0.1278, 51.5074);
        assert_eq!(distance_km(&a, &b), distance_km(&b, &a));
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = point(-0.1278, 51.5074);
        let paris = point(2.3522, 48.8566);
        let distance = distance_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn bangalore_pair_is_about_four_km_and_fee_follows() {
        let a = point(77.5946, 12.9716);
        let b = point(77.6033, 12.9352);
        let distance = distance_km(&a, &b);
        assert!((distance - 4.1).abs() <= 0.2, "distance was {distance}");

        let fee = delivery_fee(distance, &FeeSchedule::default());
        let expected = (40.0 + (distance - 2.0_f64).max(0.0) * 5.0).round();
        assert_eq!(fee, expected);
    }

    #[test]
    fn fee_within_free_distance_is_base() {
        assert_eq!(delivery_fee(0.0, &FeeSchedule::default()), 40.0);
        assert_eq!(delivery_fee(1.99, &FeeSchedule::default()), 40.0);
    }

    #[test]
    fn fee_rounds_half_up() {
        // 2.5 km past the free distance -> 40 + 12.5
        assert_eq!(delivery_fee(4.5, &FeeSchedule::default()), 53.0);
    }

    #[test]
    fn eta_never_rounds_down() {
        assert_eq!(estimated_minutes(0.0, 10.0, 30.0), 10);
        // 1 km at 30 km/h is 2 minutes exactly
        assert_eq!(estimated_minutes(1.0, 10.0, 30.0), 12);
        assert_eq!(estimated_minutes(1.01, 10.0, 30.0), 13);
    }
}
