//! Wire formats: push channel messages, command bodies and input validation.

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod command;
pub mod validation;
pub mod ws;

/// Render a server timestamp (seconds since epoch) for log output.
pub fn format_unix_seconds(secs: i64) -> String {
    OffsetDateTime::from_unix_timestamp(secs)
        .ok()
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_epoch_seconds() {
        assert_eq!(format_unix_seconds(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_unix_seconds(i64::MAX), "invalid-timestamp");
    }
}
