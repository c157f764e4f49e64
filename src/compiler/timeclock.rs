use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::Branding;
use crate::document::{Align, Document, TextStyle};
use crate::error::{BridgeError, BridgeResult};
use crate::models::ClockEntry;

const MS_PER_HOUR: i64 = 60 * 60 * 1000;
const MS_PER_MINUTE: i64 = 60 * 1000;

/// Compile the slip printed when an employee clocks in or out.
///
/// The entry with the highest id is the one being reported; timestamps render
/// in `branding.time_zone` no matter where the process runs.
pub fn compile_timeclock_receipt(
    name: &str,
    entries: &[ClockEntry],
    branding: &Branding,
    printed_at: DateTime<Utc>,
) -> BridgeResult<Document> {
    let current = entries
        .iter()
        .max_by_key(|e| e.id)
        .ok_or(BridgeError::NoClockEntries)?;
    let tz = branding.time_zone;

    let heading = if current.clock_out.is_some() {
        "Clock Out Receipt"
    } else {
        "Clock In Receipt"
    };
    let mut span = clock_time(current.clock_in, tz);
    if let Some(out) = current.clock_out {
        span.push_str(" - ");
        span.push_str(&clock_time(out, tz));
    }
    let duration = current
        .clock_out
        .map(|out| format_duration(current.clock_in, out))
        .unwrap_or_default();

    let mut doc = Document::new();
    doc.image(&branding.logo_path, Some("80vw"))
        .text(heading, TextStyle::new(Align::Center, 20).bold())
        .text(name, TextStyle::new(Align::Center, 18))
        .text(span, TextStyle::new(Align::Center, 25))
        .text(duration, TextStyle::new(Align::Center, 16))
        .text(
            printed_at
                .with_timezone(&tz)
                .format("%B %-d, %Y, %I:%M:%S %p")
                .to_string(),
            TextStyle::new(Align::Center, 12).bold(),
        );
    Ok(doc)
}

fn clock_time(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%I:%M %p").to_string()
}

/// Worked time as `"8h 5m"`, or `"45m"` when under an hour. A clock-out
/// before the clock-in counts as no time worked.
pub fn format_duration(clock_in: DateTime<Utc>, clock_out: DateTime<Utc>) -> String {
    let diff = (clock_out - clock_in).num_milliseconds().max(0);
    let hours = diff / MS_PER_HOUR;
    let minutes = (diff % MS_PER_HOUR) / MS_PER_MINUTE;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_timestamp;

    fn at(raw: &str) -> DateTime<Utc> {
        parse_timestamp(raw).unwrap()
    }

    fn entry(id: i64, clock_in: &str, clock_out: Option<&str>) -> ClockEntry {
        ClockEntry {
            id,
            clock_in: at(clock_in),
            clock_out: clock_out.map(at),
        }
    }

    #[test]
    fn test_highest_id_is_current() {
        let entries = vec![
            entry(1, "2026-10-19T14:00:00Z", None),
            entry(2, "2026-10-19T15:30:00Z", None),
        ];
        let doc = compile_timeclock_receipt(
            "Sam Ortiz",
            &entries,
            &Branding::default(),
            at("2026-10-19T15:30:05Z"),
        )
        .unwrap();
        let texts = doc.texts();
        assert_eq!(texts[0], "Clock In Receipt");
        assert_eq!(texts[1], "Sam Ortiz");
        // 15:30Z is 10:30 in Chicago (CDT)
        assert_eq!(texts[2], "10:30 AM");
        assert_eq!(texts[3], "");
        assert_eq!(texts[4], "October 19, 2026, 10:30:05 AM");
    }

    #[test]
    fn test_ordering_is_by_id_not_timestamp() {
        let entries = vec![
            entry(9, "2026-10-18T13:00:00Z", Some("2026-10-18T21:10:00Z")),
            entry(3, "2026-10-19T13:00:00Z", None),
        ];
        let doc = compile_timeclock_receipt(
            "Lee",
            &entries,
            &Branding::default(),
            at("2026-10-19T13:00:00Z"),
        )
        .unwrap();
        let texts = doc.texts();
        assert_eq!(texts[0], "Clock Out Receipt");
        assert_eq!(texts[2], "08:00 AM - 04:10 PM");
        assert_eq!(texts[3], "8h 10m");
    }

    #[test]
    fn test_empty_entries_is_an_error() {
        let result = compile_timeclock_receipt("Nobody", &[], &Branding::default(), Utc::now());
        assert!(matches!(result, Err(BridgeError::NoClockEntries)));
    }

    #[test]
    fn test_format_duration() {
        let start = at("2026-10-19T08:00:00Z");
        assert_eq!(format_duration(start, at("2026-10-19T08:45:59Z")), "45m");
        assert_eq!(format_duration(start, at("2026-10-19T09:00:00Z")), "1h 0m");
        assert_eq!(format_duration(start, at("2026-10-19T17:05:30Z")), "9h 5m");
        assert_eq!(format_duration(start, start), "0m");
        assert_eq!(format_duration(start, at("2026-10-19T06:30:00Z")), "0m");
    }
}
