//! Astronomical fields: moon illumination, sunrise and sunset.
//!
//! Pure functions of (hour, reference location); no I/O. Sunrise and sunset
//! use the NOAA General Solar Position equations
//! (<https://gml.noaa.gov/grad/solcalc/solareqns.PDF>), taking the
//! spreadsheet's "offset from solar noon" form which agrees better with
//! other sources. Times are rendered as `HH:MM` UTC.
//!
//! Moon illumination is the fraction of the disc lit, derived from the age
//! of the moon since a reference new moon.

use std::f64::consts::PI;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};

use crate::config::ReferenceLocation;
use crate::model::{FieldName, HourKey, PartialRecord};

/// Mean synodic month, in days.
const SYNODIC_MONTH_DAYS: f64 = 29.530588853;

/// New moon of 2000-01-06 18:14 UTC, as a Unix timestamp.
const REFERENCE_NEW_MOON_UNIX: i64 = 947_182_440;

/// Astronomical fields for one hour at the reference location.
#[derive(Debug, Clone, PartialEq)]
pub struct AstroFields {
    /// Illuminated fraction of the moon, 0–100.
    pub moon_phase_pct: f64,
    /// `None` during polar day or night.
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
}

impl AstroFields {
    /// Computes all fields for `hour`, evaluated at the start of the bucket.
    pub fn compute(hour: HourKey, location: &ReferenceLocation) -> Self {
        let instant = hour.start();
        let (sunrise, sunset) = match sun_rise_set(instant, location.latitude, location.longitude) {
            Some((rise, set)) => (Some(rise), Some(set)),
            None => (None, None),
        };
        AstroFields {
            moon_phase_pct: moon_illumination_pct(instant),
            sunrise,
            sunset,
        }
    }

    /// The three astronomical canonical fields, ready to merge.
    pub fn to_partial(&self) -> PartialRecord {
        let render = |t: &DateTime<Utc>| t.format("%H:%M").to_string();
        let mut record = PartialRecord::new();
        record.set_number(FieldName::MoonPhasePct, Some((self.moon_phase_pct * 10.0).round() / 10.0));
        record.set_text(FieldName::SunriseTime, self.sunrise.as_ref().map(render));
        record.set_text(FieldName::SunsetTime, self.sunset.as_ref().map(render));
        record
    }
}

/// Percentage of the lunar disc illuminated at `instant`.
pub fn moon_illumination_pct(instant: DateTime<Utc>) -> f64 {
    let days = (instant.timestamp() - REFERENCE_NEW_MOON_UNIX) as f64 / 86_400.0;
    let age = days.rem_euclid(SYNODIC_MONTH_DAYS);
    let phase_angle = 2.0 * PI * age / SYNODIC_MONTH_DAYS;
    (1.0 - phase_angle.cos()) / 2.0 * 100.0
}

/// Sunrise and sunset (UTC) on the UTC calendar day of `instant`.
///
/// Returns `None` when the sun does not cross the horizon that day.
pub fn sun_rise_set(
    instant: DateTime<Utc>,
    latitude: f64,
    longitude: f64,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let date = instant.date_naive();
    let days_in_year = NaiveDate::from_ymd_opt(date.year(), 12, 31)
        .map(|d| d.ordinal() as f64)
        .unwrap_or(365.0);

    // Fractional year in radians, evaluated at local-ish noon.
    let gamma = 2.0 * PI / days_in_year * (date.ordinal0() as f64 + 0.5);

    // equation of time (minutes)
    let eqtime = 229.18
        * (0.000075 + 0.001868 * gamma.cos()
            - 0.032077 * gamma.sin()
            - 0.014615 * (2.0 * gamma).cos()
            - 0.040849 * (2.0 * gamma).sin());

    // solar declination (radians)
    let decl = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
        - 0.006758 * (2.0 * gamma).cos()
        + 0.000907 * (2.0 * gamma).sin()
        - 0.002697 * (3.0 * gamma).cos()
        + 0.00148 * (3.0 * gamma).sin();

    // hour angle of sunrise, zenith 90.833° for refraction and disc size
    let zenith = 90.833f64.to_radians();
    let lat = latitude.to_radians();
    let cos_ha = zenith.cos() / (lat.cos() * decl.cos()) - lat.tan() * decl.tan();
    if !(-1.0..=1.0).contains(&cos_ha) {
        return None;
    }
    let ha = cos_ha.acos().to_degrees();

    // minutes past UTC midnight
    let solar_noon = 720.0 - 4.0 * longitude - eqtime;
    let rise = solar_noon - 4.0 * ha;
    let set = solar_noon + 4.0 * ha;

    let midnight = date.and_time(NaiveTime::MIN).and_utc();
    let at = |minutes: f64| midnight + Duration::seconds((minutes * 60.0).round() as i64);
    Some((at(rise), at(set)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldValue;
    use chrono::{TimeZone, Timelike};

    fn boston() -> ReferenceLocation {
        ReferenceLocation {
            name: "Boston".to_string(),
            latitude: 42.3601,
            longitude: -71.0589,
        }
    }

    #[test]
    fn test_moon_dark_at_reference_new_moon() {
        let instant = Utc.timestamp_opt(REFERENCE_NEW_MOON_UNIX, 0).unwrap();
        assert!(moon_illumination_pct(instant) < 0.1);
    }

    #[test]
    fn test_moon_full_half_a_cycle_later() {
        let half = (SYNODIC_MONTH_DAYS / 2.0 * 86_400.0) as i64;
        let instant = Utc.timestamp_opt(REFERENCE_NEW_MOON_UNIX + half, 0).unwrap();
        assert!(moon_illumination_pct(instant) > 99.9);
    }

    #[test]
    fn test_moon_illumination_stays_in_range_for_a_year() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for day in 0..366 {
            let pct = moon_illumination_pct(start + Duration::days(day));
            assert!((0.0..=100.0).contains(&pct), "day {} gave {}", day, pct);
        }
    }

    #[test]
    fn test_boston_summer_solstice_rise_and_set() {
        // Boston, 2024-06-20: sunrise ~09:07Z, sunset ~00:25Z next day
        let instant = Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap();
        let (rise, set) = sun_rise_set(instant, 42.3601, -71.0589).unwrap();
        let rise_min = rise.hour() * 60 + rise.minute();
        assert!((537..=557).contains(&rise_min), "sunrise at {}", rise);
        assert!(set > rise);
        let day_length = set - rise;
        assert!(day_length > Duration::hours(15) && day_length < Duration::hours(15) + Duration::minutes(30));
    }

    #[test]
    fn test_polar_night_has_no_sunrise() {
        let instant = Utc.with_ymd_and_hms(2024, 12, 21, 12, 0, 0).unwrap();
        assert!(sun_rise_set(instant, 78.22, 15.65).is_none());
    }

    #[test]
    fn test_compute_is_deterministic_and_hour_independent_for_sun() {
        let a = AstroFields::compute(HourKey::new(2024, 5, 1, 0).unwrap(), &boston());
        let b = AstroFields::compute(HourKey::new(2024, 5, 1, 0).unwrap(), &boston());
        let c = AstroFields::compute(HourKey::new(2024, 5, 1, 13).unwrap(), &boston());
        assert_eq!(a, b);
        assert_eq!(a.sunrise, c.sunrise);
        assert_ne!(a.moon_phase_pct, c.moon_phase_pct);
    }

    #[test]
    fn test_partial_holds_exactly_the_astronomical_fields() {
        let fields = AstroFields::compute(HourKey::new(2024, 5, 1, 0).unwrap(), &boston()).to_partial();
        assert_eq!(fields.len(), 3);
        for field in FieldName::ASTRONOMICAL {
            assert!(fields.contains(field));
        }
        match fields.get(FieldName::SunriseTime) {
            Some(FieldValue::Text(t)) => assert_eq!(t.len(), 5),
            other => panic!("unexpected sunrise value {:?}", other),
        }
    }
}
