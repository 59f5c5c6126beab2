//! Document numbers: `{PREFIX}-{YYYYMMDD}-{NNN}`.

use chrono::NaiveDate;

/// Prefix for stock check numbers.
pub const CHECK_PREFIX: &str = "SC";

/// Format a document number. The sequence is zero-padded to three digits and
/// grows wider past 999.
pub fn format_number(prefix: &str, date: NaiveDate, sequence: u32) -> String {
    format!("{prefix}-{}-{sequence:03}", date.format("%Y%m%d"))
}

/// Split a document number back into `(prefix, date, sequence)`.
pub fn parse_number(number: &str) -> Option<(&str, NaiveDate, u32)> {
    let mut parts = number.splitn(3, '-');
    let prefix = parts.next().filter(|p| !p.is_empty())?;
    let date = NaiveDate::parse_from_str(parts.next()?, "%Y%m%d").ok()?;
    let sequence = parts.next()?.parse().ok()?;
    Some((prefix, date, sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_padding() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(format_number("INB", date, 1), "INB-20260307-001");
        assert_eq!(format_number("SC", date, 1234), "SC-20260307-1234");
    }

    #[test]
    fn parses_what_it_formats() {
        let date = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        let number = format_number("OUT", date, 42);
        assert_eq!(parse_number(&number), Some(("OUT", date, 42)));
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert_eq!(parse_number("OUT-2026-001"), None);
        assert_eq!(parse_number("-20260101-001"), None);
        assert_eq!(parse_number("OUT-20260101"), None);
        assert_eq!(parse_number("OUT-20260101-abc"), None);
    }
}
