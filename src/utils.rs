use chrono::{DateTime, Utc};

/// Normalize a location name into an identifier fragment.
///
/// Lowercases, splits camel case, and turns every run of spaces or punctuation
/// into a single underscore, so the result is stable across restarts.
///
/// # Examples
///
/// ```
/// use arpansa_uv::utils::underscore;
///
/// assert_eq!(underscore("Alice Springs"), "alice_springs");
/// assert_eq!(underscore("Kingston (Tas.)"), "kingston_tas");
/// ```
#[must_use]
pub fn underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;

    for c in name.chars() {
        if c.is_alphanumeric() {
            let boundary = c.is_uppercase()
                && prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit());
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
        prev = Some(c);
    }

    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Format an update time for display, e.g. `19:21 UTC`.
#[must_use]
pub fn format_update_time(time: DateTime<Utc>) -> String {
    time.format("%H:%M UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_underscore_spaces_and_case() {
        assert_eq!(underscore("Brisbane"), "brisbane");
        assert_eq!(underscore("Gold Coast"), "gold_coast");
        assert_eq!(underscore("Alice Springs"), "alice_springs");
    }

    #[test]
    fn test_underscore_camel_case() {
        assert_eq!(underscore("AliceSprings"), "alice_springs");
        assert_eq!(underscore("McMurdo"), "mc_murdo");
    }

    #[test]
    fn test_underscore_punctuation_collapses() {
        assert_eq!(underscore("Kingston (Tas.)"), "kingston_tas");
        assert_eq!(underscore("  Davis -- Station "), "davis_station");
        assert_eq!(underscore("Emerald-Qld"), "emerald_qld");
    }

    #[test]
    fn test_underscore_empty() {
        assert_eq!(underscore(""), "");
        assert_eq!(underscore("!!"), "");
    }

    #[test]
    fn test_format_update_time() {
        let time = Utc.with_ymd_and_hms(2023, 1, 13, 19, 21, 5).unwrap();
        assert_eq!(format_update_time(time), "19:21 UTC");
    }
}
