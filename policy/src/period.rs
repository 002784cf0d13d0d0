//! Parsing of period strings such as `1h`, `30m` or `1h30m`.
//!
//! The same string is handed to the time-series database as a `GROUP BY
//! time(...)` interval, so the accepted syntax follows the database's duration
//! literals: a sequence of decimal numbers, each with a unit suffix.

use std::time::Duration;

/// Client polling interval when the configured period cannot be parsed.
pub const DEFAULT_REQUEST_INTERVAL_MINUTES: u64 = 60;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PeriodError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration {0:?}")]
    Invalid(String),
    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),
    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },
}

pub fn parse_period(input: &str) -> Result<Duration, PeriodError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(PeriodError::Empty);
    }
    let s = s.strip_prefix('+').unwrap_or(s);
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = s;
    let mut total = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..number_len];
        if number.is_empty() || number == "." {
            return Err(PeriodError::Invalid(input.to_string()));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| PeriodError::Invalid(input.to_string()))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let nanos_per_unit = match unit {
            "" => return Err(PeriodError::MissingUnit(input.to_string())),
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => {
                return Err(PeriodError::UnknownUnit {
                    unit: unit.to_string(),
                    input: input.to_string(),
                });
            }
        };
        total += value * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(PeriodError::Invalid(input.to_string()));
    }
    Ok(Duration::from_nanos(total as u64))
}

/// Whole minutes between client checks for the configured period.
pub fn request_interval_minutes(period: &str) -> u64 {
    match parse_period(period) {
        Ok(duration) => duration.as_secs() / 60,
        Err(e) => {
            tracing::error!(
                period,
                error = %e,
                "Failed to parse query period, using default request interval"
            );
            DEFAULT_REQUEST_INTERVAL_MINUTES
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_period("30m"), Ok(Duration::from_secs(1800)));
        assert_eq!(parse_period("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_period("1.5h"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_period("90s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_period("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_period("0"), Ok(Duration::ZERO));
        assert_eq!(parse_period("+2h"), Ok(Duration::from_secs(7200)));
    }

    #[test]
    fn test_parse_period_errors() {
        assert_eq!(parse_period(""), Err(PeriodError::Empty));
        assert!(matches!(parse_period("60"), Err(PeriodError::MissingUnit(_))));
        assert!(matches!(
            parse_period("1d"),
            Err(PeriodError::UnknownUnit { .. })
        ));
        assert!(matches!(parse_period("h"), Err(PeriodError::Invalid(_))));
        assert!(matches!(parse_period("-1h"), Err(PeriodError::Invalid(_))));
        assert!(matches!(parse_period("1..5h"), Err(PeriodError::Invalid(_))));
    }

    #[test]
    fn test_request_interval_minutes() {
        assert_eq!(request_interval_minutes("1h"), 60);
        assert_eq!(request_interval_minutes("2h30m"), 150);
        assert_eq!(request_interval_minutes("90s"), 1);
        assert_eq!(request_interval_minutes("bogus"), DEFAULT_REQUEST_INTERVAL_MINUTES);
    }
}
