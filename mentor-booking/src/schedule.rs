//! Conversion of a requested session slot into the instant and each
//! party's wall-clock time.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use mentor_core::{MentorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimes {
    pub date: DateTime<Utc>,
    pub expert_local: NaiveDateTime,
    pub student_local: NaiveDateTime,
}

/// Parses an IANA zone name supplied by a client. Empty means UTC.
pub fn parse_timezone(name: Option<&str>) -> Result<Tz> {
    match name.map(str::trim) {
        None | Some("") => Ok(Tz::UTC),
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| MentorError::Validation(format!("Unknown timezone: {}", name))),
    }
}

/// Zone stored on a profile. Unknown names fall back to UTC.
pub fn profile_timezone(name: Option<&str>) -> Tz {
    parse_timezone(name).unwrap_or_else(|_| {
        tracing::warn!("Ignoring unknown profile timezone {:?}", name);
        Tz::UTC
    })
}

fn parse_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| MentorError::Validation(format!("Invalid date (expected YYYY-MM-DD): {}", date)))
}

fn parse_time(time: &str) -> Result<NaiveTime> {
    let time = time.trim();
    NaiveTime::parse_from_str(time, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
        .map_err(|_| MentorError::Validation(format!("Invalid time (expected HH:MM): {}", time)))
}

/// Resolves `date` + `time` in `request_tz` to an instant, then renders it
/// in the expert's and the student's zone.
pub fn resolve_session_times(
    date: &str,
    time: &str,
    request_tz: Tz,
    expert_tz: Tz,
    student_tz: Tz,
) -> Result<SessionTimes> {
    let naive = parse_date(date)?.and_time(parse_time(time)?);

    let local = match request_tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        // Repeated wall-clock hour: take the first occurrence.
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            return Err(MentorError::Validation(format!(
                "{} does not exist in {}",
                naive, request_tz
            )))
        }
    };
    let instant = local.with_timezone(&Utc);

    Ok(SessionTimes {
        date: instant,
        expert_local: instant.with_timezone(&expert_tz).naive_local(),
        student_local: instant.with_timezone(&student_tz).naive_local(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn test_each_party_sees_own_wall_clock() {
        let times = resolve_session_times(
            "2030-01-15",
            "15:00",
            Tz::UTC,
            "America/New_York".parse().unwrap(),
            "Asia/Kolkata".parse().unwrap(),
        )
        .unwrap();

        assert_eq!(times.date, Utc.with_ymd_and_hms(2030, 1, 15, 15, 0, 0).unwrap());
        assert_eq!(times.expert_local, naive("2030-01-15 10:00"));
        assert_eq!(times.student_local, naive("2030-01-15 20:30"));
    }

    #[test]
    fn test_request_timezone_sets_the_instant() {
        let berlin: Tz = "Europe/Berlin".parse().unwrap();
        let times = resolve_session_times("2030-07-01", "09:30", berlin, Tz::UTC, berlin).unwrap();
        assert_eq!(times.date, Utc.with_ymd_and_hms(2030, 7, 1, 7, 30, 0).unwrap());
        assert_eq!(times.student_local, naive("2030-07-01 09:30"));
    }

    #[test]
    fn test_nonexistent_local_time_is_rejected() {
        let new_york: Tz = "America/New_York".parse().unwrap();
        let err = resolve_session_times("2030-03-10", "02:30", new_york, Tz::UTC, Tz::UTC).unwrap_err();
        assert!(matches!(err, MentorError::Validation(_)));
    }

    #[test]
    fn test_timezone_parsing() {
        assert_eq!(parse_timezone(None).unwrap(), Tz::UTC);
        assert_eq!(parse_timezone(Some(" ")).unwrap(), Tz::UTC);
        assert!(parse_timezone(Some("Mars/Olympus")).is_err());
        assert_eq!(profile_timezone(Some("Mars/Olympus")), Tz::UTC);
    }

    #[test]
    fn test_malformed_date_and_time() {
        assert!(resolve_session_times("15/01/2030", "15:00", Tz::UTC, Tz::UTC, Tz::UTC).is_err());
        assert!(resolve_session_times("2030-01-15", "3pm", Tz::UTC, Tz::UTC, Tz::UTC).is_err());
        assert!(resolve_session_times("2030-01-15", "15:00:30", Tz::UTC, Tz::UTC, Tz::UTC).is_ok());
    }
}
