//! Parsing of the `timeout` parameter.
//!
//! Accepted forms:
//! - ISO-8601 durations: `PT10M`, `P1DT2H30M`, `PT0.5S`, `P2W`
//! - plain seconds: `600`, `1.5`
//! - clock style: `00:10:00`, `1 day, 02:00:00`, `1 days 02:00:00`

use std::time::Duration;

use crate::ConfigError;

const MINUTE: f64 = 60.0;
const HOUR: f64 = 60.0 * MINUTE;
const DAY: f64 = 24.0 * HOUR;
const WEEK: f64 = 7.0 * DAY;

pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let text = input.trim();
    let invalid = || ConfigError::InvalidValue {
        field: "duration".to_string(),
        value: input.to_string(),
    };

    let seconds = if text.starts_with(['P', 'p']) {
        parse_iso8601(text).ok_or_else(invalid)?
    } else if text.contains(':') {
        parse_clock(text).ok_or_else(invalid)?
    } else {
        text.parse::<f64>().map_err(|_| invalid())?
    };

    if seconds < 0.0 {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| invalid())
}

fn parse_iso8601(text: &str) -> Option<f64> {
    let body = &text[1..];
    let (date_part, time_part) = match body.find(['T', 't']) {
        Some(idx) => (&body[..idx], Some(&body[idx + 1..])),
        None => (body, None),
    };

    let mut total = 0.0;
    let mut saw_component = false;

    for (value, unit) in components(date_part)? {
        total += value
            * match unit.to_ascii_uppercase() {
                'W' => WEEK,
                'D' => DAY,
                // Months and years have no fixed length; reject them.
                _ => return None,
            };
        saw_component = true;
    }

    if let Some(time_part) = time_part {
        let time_components = components(time_part)?;
        if time_components.is_empty() {
            return None;
        }
        for (value, unit) in time_components {
            total += value
                * match unit.to_ascii_uppercase() {
                    'H' => HOUR,
                    'M' => MINUTE,
                    'S' => 1.0,
                    _ => return None,
                };
            saw_component = true;
        }
    }

    saw_component.then_some(total)
}

/// Splits `1H30M` into `[(1.0, 'H'), (30.0, 'M')]`.
fn components(part: &str) -> Option<Vec<(f64, char)>> {
    let mut out = Vec::new();
    let mut number = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            number.push(if c == ',' { '.' } else { c });
        } else if c.is_ascii_alphabetic() {
            if number.is_empty() {
                return None;
            }
            out.push((number.parse::<f64>().ok()?, c));
            number.clear();
        } else {
            return None;
        }
    }
    number.is_empty().then_some(out)
}

fn parse_clock(text: &str) -> Option<f64> {
    let (days, clock) = match text.rsplit_once(|c: char| c == ',' || c.is_whitespace()) {
        Some((day_part, clock)) => {
            let day_str = day_part
                .trim()
                .trim_end_matches(',')
                .trim_end_matches("days")
                .trim_end_matches("day")
                .trim();
            (day_str.parse::<f64>().ok()?, clock.trim())
        }
        None => (0.0, text),
    };

    let fields: Vec<&str> = clock.split(':').collect();
    let (h, m, s) = match fields.as_slice() {
        [h, m, s] => (h.parse::<f64>().ok()?, m.parse::<f64>().ok()?, s.parse::<f64>().ok()?),
        [m, s] => (0.0, m.parse::<f64>().ok()?, s.parse::<f64>().ok()?),
        _ => return None,
    };
    if m >= 60.0 || s >= 60.0 {
        return None;
    }
    Some(days * DAY + h * HOUR + m * MINUTE + s)
}
