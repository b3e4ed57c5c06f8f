use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

/// Next UTC top-of-hour boundary strictly after `now`.
pub fn next_hour_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("zeroing minute/second/nanosecond never fails");
    truncated + Duration::hours(1)
}

/// Canonical hour-boundary timestamp for a rollup row: always `HH:00:00Z`.
/// `at` must already be hour-aligned; this just truncates any residual
/// sub-hour component defensively.
pub fn canonical_hour(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), at.hour(), 0, 0)
        .single()
        .expect("valid calendar date produces exactly one UTC instant")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_hour_boundary_rounds_up() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 13, 42, 7).unwrap();
        let boundary = next_hour_boundary(now);
        assert_eq!(boundary, Utc.with_ymd_and_hms(2026, 1, 1, 14, 0, 0).unwrap());
    }

    #[test]
    fn next_hour_boundary_crosses_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 23, 59, 59).unwrap();
        let boundary = next_hour_boundary(now);
        assert_eq!(boundary, Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn canonical_hour_truncates_minutes() {
        let at = Utc.with_ymd_and_hms(2026, 3, 5, 9, 0, 0).unwrap();
        assert_eq!(canonical_hour(at), at);
    }
}
