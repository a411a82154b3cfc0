/// Utility functions for formatting and SQL identifiers
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};

const DISPLAY_FORMAT: &[FormatItem<'static>] =
    format_description!("[day].[month].[year] - [hour]:[minute]:[second]");

const EXPORT_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6][offset_hour sign:mandatory]:[offset_minute]"
);

/// Format a timestamp for the dashboard
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    dt.format(DISPLAY_FORMAT).unwrap_or_else(|_| dt.to_string())
}

/// Timestamp layout used in CSV exports, e.g. `2019-03-26 17:50:30.000000+00:00`
pub fn format_export_timestamp(dt: &OffsetDateTime) -> String {
    dt.format(EXPORT_FORMAT).unwrap_or_else(|_| dt.to_string())
}

/// Quote a PostgreSQL identifier, doubling embedded quotes
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// "<value> <unit>"
pub fn format_value(value: f64, unit: &str) -> String {
    format!("{} {}", value, unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SENTINEL_VALUE;
    use time::macros::datetime;

    #[test]
    fn test_format_datetime() {
        let dt = datetime!(2019-03-26 17:50:30 UTC);
        assert_eq!(format_datetime(&dt), "26.03.2019 - 17:50:30");
    }

    #[test]
    fn test_format_export_timestamp() {
        let dt = datetime!(2019-03-26 17:50:30.25 +02:00);
        assert_eq!(format_export_timestamp(&dt), "2019-03-26 17:50:30.250000+02:00");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("rfm95"), "\"rfm95\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(12.5, "V"), "12.5 V");
        assert_eq!(format_value(SENTINEL_VALUE, "V"), "-9999 V");
    }
}
