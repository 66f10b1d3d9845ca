use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Offset, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimeInputError {
    #[error("Unrecognised date/time '{0}', expected YYYY-MM-DDTHH:MM")]
    Unparseable(String),
    #[error("Unrecognised UTC offset '{0}', expected ±HH:MM")]
    BadOffset(String),
    #[error("'{0}' does not exist in the given offset")]
    NonexistentLocalTime(String),
}

const LOCAL_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Offset of the machine's local time zone right now.
pub fn local_offset() -> FixedOffset {
    Local::now().offset().fix()
}

/// Parses `+05:30`, `-0800`, `Z` or `UTC`.
pub fn parse_utc_offset(input: &str) -> Result<FixedOffset, TimeInputError> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }

    let bad = || TimeInputError::BadOffset(input.to_string());
    let (sign, rest) = match trimmed.chars().next() {
        Some('+') => (1, &trimmed[1..]),
        Some('-') => (-1, &trimmed[1..]),
        _ => return Err(bad()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| bad())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| bad())?;
    if minutes >= 60 {
        return Err(bad());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(bad)
}

pub fn parse_local_datetime(input: &str) -> Result<NaiveDateTime, TimeInputError> {
    let trimmed = input.trim();
    LOCAL_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| TimeInputError::Unparseable(input.to_string()))
}

/// Interprets a wall-clock reading in `offset` as an absolute instant.
pub fn local_to_utc(local: NaiveDateTime, offset: FixedOffset) -> Result<DateTime<Utc>, TimeInputError> {
    offset
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| TimeInputError::NonexistentLocalTime(local.to_string()))
}

/// Accepts an RFC 3339 instant as-is, or a wall-clock reading interpreted in `offset`.
pub fn parse_instant(input: &str, offset: FixedOffset) -> Result<DateTime<Utc>, TimeInputError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(input.trim()) {
        return Ok(instant.with_timezone(&Utc));
    }
    local_to_utc(parse_local_datetime(input)?, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets() {
        assert_eq!(parse_utc_offset("+05:30").unwrap().local_minus_utc(), 19800);
        assert_eq!(parse_utc_offset("-0800").unwrap().local_minus_utc(), -28800);
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("05:30").is_err());
        assert!(parse_utc_offset("+5").is_err());
        assert!(parse_utc_offset("+01:75").is_err());
    }

    #[test]
    fn test_local_reading_normalised_to_utc() {
        let offset = parse_utc_offset("+02:00").unwrap();
        let instant = parse_instant("2026-03-01T10:30", offset).unwrap();
        assert_eq!(instant.to_rfc3339(), "2026-03-01T08:30:00+00:00");
    }

    #[test]
    fn test_rfc3339_input_ignores_offset_argument() {
        let offset = parse_utc_offset("+09:00").unwrap();
        let instant = parse_instant("2026-03-01T10:30:00-05:00", offset).unwrap();
        assert_eq!(instant.to_rfc3339(), "2026-03-01T15:30:00+00:00");
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            parse_local_datetime("tomorrow at noon"),
            Err(TimeInputError::Unparseable(_))
        ));
    }
}
