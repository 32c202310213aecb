//! `$util.time`: clock access and date formatting.
//!
//! Patterns follow the Java `DateTimeFormatter` letters that templates are
//! usually written against (`yyyy-MM-dd'T'HH:mm:ss.SSSZ` and friends). All
//! values are rendered in UTC.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use super::UtilError;

const ISO8601_MILLIS: &str = "yyyy-MM-dd'T'HH:mm:ss.SSS'Z'";
const ISO8601_SECONDS: &str = "yyyy-MM-dd'T'HH:mm:ssXXX";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeUtil {
    now: OffsetDateTime,
}

impl TimeUtil {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: now.to_offset(UtcOffset::UTC),
        }
    }

    pub fn now_iso8601(&self) -> String {
        // ISO8601_MILLIS only uses supported letters.
        format_pattern(self.now, ISO8601_MILLIS).unwrap_or_default()
    }

    pub fn now_epoch_seconds(&self) -> i64 {
        self.now.unix_timestamp()
    }

    pub fn now_epoch_milli_seconds(&self) -> i64 {
        (self.now.unix_timestamp_nanos() / 1_000_000) as i64
    }

    pub fn now_formatted(&self, pattern: &str, timezone: Option<&str>) -> Result<String, UtilError> {
        if timezone.is_some() {
            return Err(UtilError::Unsupported("setting a timezone"));
        }
        format_pattern(self.now, pattern)
    }

    pub fn parse_formatted_to_epoch_milli_seconds(&self) -> Result<i64, UtilError> {
        Err(UtilError::NotImplemented("parseFormattedToEpochMilliSeconds"))
    }

    /// Accepts RFC 3339 timestamps as well as bare dates and offset-less
    /// date-times, both read as UTC.
    pub fn parse_iso8601_to_epoch_milli_seconds(&self, value: &str) -> Result<i64, UtilError> {
        let parsed = OffsetDateTime::parse(value, &Rfc3339)
            .ok()
            .or_else(|| {
                PrimitiveDateTime::parse(
                    value,
                    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
                )
                .ok()
                .map(PrimitiveDateTime::assume_utc)
            })
            .or_else(|| {
                Date::parse(value, format_description!("[year]-[month]-[day]"))
                    .ok()
                    .map(|d| d.midnight().assume_utc())
            })
            .ok_or_else(|| UtilError::Invalid(format!("invalid ISO 8601 date: {}", value)))?;
        Ok((parsed.unix_timestamp_nanos() / 1_000_000) as i64)
    }

    pub fn epoch_milli_seconds_to_seconds(&self, millis: i64) -> i64 {
        millis / 1000
    }

    pub fn epoch_milli_seconds_to_iso8601(&self, millis: i64) -> Result<String, UtilError> {
        format_pattern(from_epoch_millis(millis)?, ISO8601_SECONDS)
    }

    pub fn epoch_milli_seconds_to_formatted(
        &self,
        millis: i64,
        pattern: &str,
    ) -> Result<String, UtilError> {
        format_pattern(from_epoch_millis(millis)?, pattern)
    }
}

fn from_epoch_millis(millis: i64) -> Result<OffsetDateTime, UtilError> {
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
        .map_err(|e| UtilError::Invalid(format!("invalid epoch timestamp {}: {}", millis, e)))
}

/// Formats a date-time with a Java-style pattern.
pub fn format_pattern(dt: OffsetDateTime, pattern: &str) -> Result<String, UtilError> {
    let mut out = String::new();
    let chars = pattern.chars().collect::<Vec<char>>();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            // Quoted literal; '' is an escaped quote.
            i += 1;
            if i < chars.len() && chars[i] == '\'' {
                out.push('\'');
                i += 1;
                continue;
            }
            while i < chars.len() {
                if chars[i] == '\'' {
                    if i + 1 < chars.len() && chars[i + 1] == '\'' {
                        out.push('\'');
                        i += 2;
                        continue;
                    }
                    break;
                }
                out.push(chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        if !c.is_ascii_alphabetic() {
            out.push(c);
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && chars[i] == c {
            i += 1;
        }
        format_field(&mut out, dt, c, i - start)?;
    }
    Ok(out)
}

fn format_field(out: &mut String, dt: OffsetDateTime, letter: char, count: usize) -> Result<(), UtilError> {
    let padded = |n: i64, width: usize| format!("{:0width$}", n, width = width);
    let text = match letter {
        'y' | 'u' => match count {
            2 => padded(i64::from(dt.year()).rem_euclid(100), 2),
            _ => padded(i64::from(dt.year()), count.max(1)),
        },
        'M' | 'L' => match count {
            1 | 2 => padded(i64::from(u8::from(dt.month())), count),
            3 => dt.month().to_string()[..3].to_string(),
            _ => dt.month().to_string(),
        },
        'd' => padded(i64::from(dt.day()), count),
        'D' => padded(i64::from(dt.ordinal()), count),
        'H' => padded(i64::from(dt.hour()), count),
        'h' => padded(i64::from((dt.hour() + 11) % 12 + 1), count),
        'm' => padded(i64::from(dt.minute()), count),
        's' => padded(i64::from(dt.second()), count),
        'S' => {
            let nanos = format!("{:09}", dt.nanosecond());
            nanos[..count.min(9)].to_string()
        }
        'a' => (if dt.hour() < 12 { "AM" } else { "PM" }).to_string(),
        'E' => match count {
            1..=3 => dt.weekday().to_string()[..3].to_string(),
            _ => dt.weekday().to_string(),
        },
        'Z' => offset(dt.offset(), false),
        'X' if dt.offset().is_utc() => "Z".to_string(),
        'X' | 'x' => offset(dt.offset(), count >= 3),
        'z' if dt.offset().is_utc() => "UTC".to_string(),
        'z' => offset(dt.offset(), true),
        other => {
            return Err(UtilError::Invalid(format!(
                "unsupported pattern letter '{}'",
                other
            )))
        }
    };
    out.push_str(&text);
    Ok(())
}

fn offset(offset: UtcOffset, colon: bool) -> String {
    let sign = if offset.is_negative() { '-' } else { '+' };
    let hours = offset.whole_hours().abs();
    let minutes = offset.minutes_past_hour().abs();
    if colon {
        format!("{}{:02}:{:02}", sign, hours, minutes)
    } else {
        format!("{}{:02}{:02}", sign, hours, minutes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // 2021-03-04T05:06:07.089Z
    const STAMP: i64 = 1_614_834_367_089;

    fn fixed() -> TimeUtil {
        TimeUtil::new(from_epoch_millis(STAMP).unwrap())
    }

    #[test]
    fn now_accessors() {
        let t = fixed();
        assert_eq!(t.now_iso8601(), "2021-03-04T05:06:07.089Z");
        assert_eq!(t.now_epoch_seconds(), 1_614_834_367);
        assert_eq!(t.now_epoch_milli_seconds(), STAMP);
        assert_eq!(t.now_formatted("dd/MM/yy HH:mm", None).unwrap(), "04/03/21 05:06");
    }

    #[test]
    fn unsupported_operations_fail() {
        let t = fixed();
        assert_eq!(
            t.now_formatted("yyyy", Some("Europe/Berlin")),
            Err(UtilError::Unsupported("setting a timezone"))
        );
        assert!(t.parse_formatted_to_epoch_milli_seconds().is_err());
        assert!(t.now_formatted("yyyy Q", None).is_err());
    }

    #[test]
    fn parse_iso8601() {
        let t = fixed();
        assert_eq!(
            t.parse_iso8601_to_epoch_milli_seconds("2021-03-04T05:06:07.089Z").unwrap(),
            STAMP
        );
        assert_eq!(
            t.parse_iso8601_to_epoch_milli_seconds("2021-03-04T06:06:07.089+01:00").unwrap(),
            STAMP
        );
        assert_eq!(
            t.parse_iso8601_to_epoch_milli_seconds("1970-01-02").unwrap(),
            86_400_000
        );
        assert_eq!(
            t.parse_iso8601_to_epoch_milli_seconds("1970-01-02T00:00:01").unwrap(),
            86_401_000
        );
        assert!(t.parse_iso8601_to_epoch_milli_seconds("yesterday").is_err());
    }

    #[test]
    fn epoch_conversions() {
        let t = fixed();
        assert_eq!(t.epoch_milli_seconds_to_seconds(STAMP), 1_614_834_367);
        assert_eq!(
            t.epoch_milli_seconds_to_iso8601(STAMP).unwrap(),
            "2021-03-04T05:06:07Z"
        );
        assert_eq!(
            t.epoch_milli_seconds_to_formatted(STAMP, "EEE, MMM d yyyy h:mm a 'at' Z")
                .unwrap(),
            "Thu, Mar 4 2021 5:06 AM at +0000"
        );
        assert_eq!(
            t.epoch_milli_seconds_to_formatted(STAMP, "HH 'o''clock'").unwrap(),
            "05 o'clock"
        );
    }
}
