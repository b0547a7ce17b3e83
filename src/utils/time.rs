use std::fmt::Write;

use chrono::{DateTime, Utc};

pub fn time_millis() -> i64 {
    let time: DateTime<chrono::Utc> = Utc::now();
    time.timestamp_millis()
}

/// Current time as an RFC 3339 string, or formatted with a strftime pattern.
/// Fails on an invalid pattern.
pub fn format_now(pattern: Option<&str>) -> Result<String, std::fmt::Error> {
    let time: DateTime<chrono::Utc> = Utc::now();
    match pattern {
        Some(p) => {
            let mut out = String::new();
            write!(out, "{}", time.format(p))?;
            Ok(out)
        }
        None => Ok(time.to_rfc3339()),
    }
}
