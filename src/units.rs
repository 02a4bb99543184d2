//! Unit conversion and intra-hour aggregation helpers.
//!
//! Everything an adapter emits goes through here, so the aggregator only
//! ever sees feet, knots, degrees, statute miles and percent.

use crate::model::FieldName;

/// Metres per second to knots.
pub const MS_TO_KTS: f64 = 1.94384;
/// Metres to feet.
pub const M_TO_FT: f64 = 3.28084;
/// Nautical miles to statute miles.
pub const NM_TO_MI: f64 = 1.15078;
/// Kilometres to statute miles.
pub const KM_TO_MI: f64 = 0.62137;

pub fn ms_to_kts(v: f64) -> f64 {
    v * MS_TO_KTS
}

pub fn m_to_ft(v: f64) -> f64 {
    v * M_TO_FT
}

pub fn nm_to_mi(v: f64) -> f64 {
    v * NM_TO_MI
}

pub fn km_to_mi(v: f64) -> f64 {
    v * KM_TO_MI
}

/// Arithmetic mean, `None` for an empty input.
///
/// Also used for directions: averaging degrees this way is wrong across the
/// 0/360 wrap, and that behaviour is kept on purpose (see DESIGN.md).
pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Parses an upstream numeric token. Empty strings, sentinels and
/// non-finite numbers are missing values, never zero.
pub fn parse_measure(token: &str, sentinels: &[&str]) -> Option<f64> {
    let token = token.trim();
    if token.is_empty() || sentinels.contains(&token) {
        return None;
    }
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Final guard applied to every converted value before it leaves an
/// adapter: directions are folded into [0, 360), physically impossible
/// magnitudes become null.
pub fn sanitize(field: FieldName, value: Option<f64>) -> Option<f64> {
    let v = value.filter(|v| v.is_finite())?;
    if field.is_direction() {
        let folded = round(v.rem_euclid(360.0));
        // rounding can carry 359.9996 up to 360.0
        return Some(if folded >= 360.0 { 0.0 } else { folded });
    }
    match field {
        FieldName::TideSpeedKts
        | FieldName::WindSpdKts
        | FieldName::WaveHtFt
        | FieldName::VisibilityMi
            if v < 0.0 =>
        {
            None
        }
        FieldName::CloudPct | FieldName::MoonPhasePct if !(0.0..=100.0).contains(&v) => None,
        _ => Some(round(v)),
    }
}

/// Three decimals is well below any of the upstream sensors' resolution.
fn round(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_conversion_constants() {
        assert!(close(ms_to_kts(1.0), 1.94384));
        assert!(close(m_to_ft(1.0), 3.28084));
        assert!(close(nm_to_mi(1.0), 1.15078));
        assert!(close(km_to_mi(1.0), 0.62137));
    }

    #[test]
    fn test_mean_of_empty_is_none() {
        assert_eq!(mean(Vec::<f64>::new()), None);
        assert_eq!(mean(vec![1.0, 2.0, 3.0, 6.0]), Some(3.0));
    }

    #[test]
    fn test_direction_mean_is_naive_across_wrap() {
        // 350 and 10 straddle north; the naive mean is south
        assert_eq!(mean(vec![350.0, 10.0]), Some(180.0));
    }

    #[test]
    fn test_sentinels_are_missing_not_zero() {
        assert_eq!(parse_measure("MM", &["MM"]), None);
        assert_eq!(parse_measure("", &[]), None);
        assert_eq!(parse_measure("NaN", &[]), None);
        assert_eq!(parse_measure(" 4.5 ", &["MM"]), Some(4.5));
        assert_eq!(parse_measure("0.0", &["MM"]), Some(0.0));
    }

    #[test]
    fn test_sanitize_folds_directions() {
        assert_eq!(sanitize(FieldName::WindDirDeg, Some(360.0)), Some(0.0));
        assert_eq!(sanitize(FieldName::TideDirDeg, Some(-10.0)), Some(350.0));
        assert_eq!(sanitize(FieldName::WindDirDeg, Some(359.9999)), Some(0.0));
        assert_eq!(sanitize(FieldName::WindDirDeg, Some(45.0)), Some(45.0));
    }

    #[test]
    fn test_only_directions_wrap_at_360() {
        assert_eq!(sanitize(FieldName::WindDirDeg, Some(359.9996)), Some(0.0));
        assert_eq!(sanitize(FieldName::TideHeightFt, Some(359.9996)), Some(360.0));
        assert_eq!(sanitize(FieldName::VisibilityMi, Some(359.9996)), Some(360.0));
    }

    #[test]
    fn test_sanitize_rejects_impossible_magnitudes() {
        assert_eq!(sanitize(FieldName::VisibilityMi, Some(-1.0)), None);
        assert_eq!(sanitize(FieldName::WindSpdKts, Some(-0.5)), None);
        assert_eq!(sanitize(FieldName::CloudPct, Some(120.0)), None);
        assert_eq!(sanitize(FieldName::TideHeightFt, Some(-2.5)), Some(-2.5));
        assert_eq!(sanitize(FieldName::WaveHtFt, Some(f64::NAN)), None);
    }
}
