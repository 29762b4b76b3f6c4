/// Teaching days. Sunday is not a schedulable day.
pub const DAYS_OF_WEEK: &[&str] = &[
    "MONDAY",
    "TUESDAY",
    "WEDNESDAY",
    "THURSDAY",
    "FRIDAY",
    "SATURDAY",
];

pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// Half-open interval overlap: [a1, a2) and [b1, b2).
/// Back-to-back bookings (a2 == b1) do not conflict.
pub fn intervals_overlap(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> bool {
    a_start < b_end && b_start < a_end
}

pub fn normalize_day(raw: &str) -> Option<String> {
    let day = raw.trim().to_ascii_uppercase();
    if DAYS_OF_WEEK.contains(&day.as_str()) {
        Some(day)
    } else {
        None
    }
}

/// Validates a minutes-from-midnight range; start must precede end and both
/// must fall within one day.
pub fn validate_time_range(start_minute: i64, end_minute: i64) -> bool {
    start_minute >= 0 && end_minute <= MINUTES_PER_DAY && start_minute < end_minute
}
