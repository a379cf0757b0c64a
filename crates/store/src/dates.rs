//! Timestamp conversions.
//!
//! The database stores UTC timestamps as `YYYY-MM-DD HH:MM:SS` text, which
//! sorts and compares correctly as plain strings. Imported data is more
//! varied, so [`parse_iso`] accepts the common ISO-8601 shapes.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcDateTime, UtcOffset};

const SQL_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const SPACE_SEPARATED: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute][optional [:[second][optional [.[subsecond]]]]]");
const T_SEPARATED: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute][optional [:[second][optional [.[subsecond]]]]]");
const DATE_ONLY: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]");

/// Format a timestamp the way the database stores it.
pub fn to_sql(date: UtcDateTime) -> String {
    // The format only has fixed-width numeric components, it cannot fail.
    date.format(SQL_FORMAT).unwrap_or_default()
}

/// Parse a timestamp as written by [`to_sql`] or any other ISO-8601 variant.
///
/// Values without an offset are taken to be UTC. Returns `None` when the
/// input isn't recognisable; callers decide what an unknown date means.
pub fn parse_iso(input: &str) -> Option<UtcDateTime> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(date) = OffsetDateTime::parse(input, &Rfc3339) {
        let date = date.to_offset(UtcOffset::UTC);
        return Some(PrimitiveDateTime::new(date.date(), date.time()).as_utc());
    }
    [SPACE_SEPARATED, T_SEPARATED]
        .into_iter()
        .find_map(|format| PrimitiveDateTime::parse(input, format).ok())
        .or_else(|| Date::parse(input, DATE_ONLY).ok().map(Date::midnight))
        .map(PrimitiveDateTime::as_utc)
}

/// Now, truncated to whole seconds so it survives a round-trip through the database.
pub fn now() -> UtcDateTime {
    let now = UtcDateTime::now();
    now.replace_nanosecond(0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::utc_datetime;

    #[rstest]
    #[case("2024-03-01 10:20:30", utc_datetime!(2024-03-01 10:20:30))]
    #[case("2024-03-01T10:20:30", utc_datetime!(2024-03-01 10:20:30))]
    #[case("2024-03-01T10:20:30Z", utc_datetime!(2024-03-01 10:20:30))]
    #[case("2024-03-01T12:20:30+02:00", utc_datetime!(2024-03-01 10:20:30))]
    #[case("2024-03-01 10:20", utc_datetime!(2024-03-01 10:20:00))]
    #[case("2024-03-01 10:20:30.250", utc_datetime!(2024-03-01 10:20:30.25))]
    #[case("2024-03-01", utc_datetime!(2024-03-01 00:00:00))]
    fn test_parse_iso(#[case] input: &str, #[case] expected: UtcDateTime) {
        assert_eq!(parse_iso(input), Some(expected));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("yesterday")]
    #[case("2024-13-01")]
    #[case("01/03/2024")]
    fn test_parse_iso_rejects(#[case] input: &str) {
        assert_eq!(parse_iso(input), None);
    }

    #[test]
    fn test_sql_round_trip() {
        let date = utc_datetime!(2023-12-31 23:59:59);
        assert_eq!(to_sql(date), "2023-12-31 23:59:59");
        assert_eq!(parse_iso(&to_sql(date)), Some(date));
    }

    #[test]
    fn test_now_has_no_subseconds() {
        assert_eq!(now().nanosecond(), 0);
    }
}
