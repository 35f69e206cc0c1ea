use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod admin;
/// Session and team projections shared by several surfaces.
pub mod common;
/// Health check payload.
pub mod health;
pub mod player;
/// Server-Sent Events payloads.
pub mod sse;
pub mod validation;
/// Player WebSocket messages.
pub mod ws;

pub(crate) fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

/// Parse an RFC 3339 timestamp received from a client.
pub(crate) fn parse_system_time(value: &str) -> Option<SystemTime> {
    OffsetDateTime::parse(value, &Rfc3339)
        .ok()
        .map(SystemTime::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn timestamps_round_trip_through_rfc3339() {
        let at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let formatted = format_system_time(at);
        assert_eq!(formatted, "2023-11-14T22:13:20Z");
        assert_eq!(parse_system_time(&formatted), Some(at));
        assert_eq!(parse_system_time("yesterday"), None);
    }
}
