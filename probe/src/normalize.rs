//! Locale-neutral normalization of raw counter text

use crate::error::SourceError;

/// Parses counter output into a value rounded to two decimals.
///
/// Surrounding whitespace is stripped and the first comma is read as a
/// decimal separator. Non-finite results are rejected. Rounding is half away
/// from zero.
pub fn normalize(raw: &str) -> Result<f64, SourceError> {
    let text = raw.trim().replacen(',', ".", 1);
    let value: f64 = text.parse().map_err(|_| SourceError::ParseError {
        raw: raw.trim().to_string(),
    })?;
    if !value.is_finite() {
        return Err(SourceError::ParseError {
            raw: raw.trim().to_string(),
        });
    }
    Ok(round2(value))
}

/// Rounds half away from zero on the decimal reading rather than on the
/// binary double, so `1.005` becomes `1.01` even though `1.005 * 100.0` is
/// slightly below `100.5`.
pub fn round2(value: f64) -> f64 {
    const SCALE: f64 = 100.0;
    let mut scaled = (value * SCALE).round();
    if value > 0.0 && (scaled + 0.5) / SCALE <= value {
        scaled += 1.0;
    } else if value < 0.0 && (scaled - 0.5) / SCALE >= value {
        scaled -= 1.0;
    }
    scaled / SCALE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_is_a_decimal_separator() {
        assert_eq!(normalize("12,5").unwrap(), 12.5);
        assert_eq!(normalize(" 0,126\r\n").unwrap(), 0.13);
    }

    #[test]
    fn only_first_comma_is_replaced() {
        assert!(normalize("1,234,5").is_err());
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(normalize("2.5").unwrap(), 2.5);
        assert_eq!(normalize("1.125").unwrap(), 1.13);
        assert_eq!(normalize("-1.125").unwrap(), -1.13);
        assert_eq!(normalize("42").unwrap(), 42.0);
    }

    #[test]
    fn decimal_half_cases_round_up() {
        assert_eq!(normalize("1,005").unwrap(), 1.01);
        assert_eq!(normalize("0.145").unwrap(), 0.15);
        assert_eq!(normalize("1.015").unwrap(), 1.02);
        assert_eq!(normalize("-1,005").unwrap(), -1.01);
        assert_eq!(normalize("1.0049").unwrap(), 1.0);
        assert_eq!(normalize("0.126").unwrap(), 0.13);
    }

    #[test]
    fn rejects_garbage_and_non_finite() {
        for raw in ["N/A", "", "   ", "inf", "NaN", "-infinity", "12abc"] {
            assert!(
                matches!(normalize(raw), Err(SourceError::ParseError { .. })),
                "{raw:?} should not parse"
            );
        }
    }

    #[test]
    fn parse_error_carries_trimmed_input() {
        let err = normalize("  N/A\n").unwrap_err();
        assert_eq!(err, SourceError::ParseError { raw: "N/A".to_string() });
    }
}
