//! Duration parsing for plan documents.

use std::time::Duration;

/// Parse durations like `10s`, `2m`, or `90` (bare numbers mean seconds).
///
/// Returns `None` for anything else; callers decide whether that is an
/// authoring error or a cue to fall back to a default.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let last = trimmed.chars().last()?;
    if last.is_ascii_alphabetic() {
        let value: u64 = trimmed[..trimmed.len() - 1].parse().ok()?;
        return match last {
            's' | 'S' => Some(Duration::from_secs(value)),
            'm' | 'M' => Some(Duration::from_secs(value * 60)),
            'h' | 'H' => Some(Duration::from_secs(value * 3600)),
            _ => None,
        };
    }
    let value: u64 = trimmed.parse().ok()?;
    Some(Duration::from_secs(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_and_bare_values() {
        assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
    }

    #[test]
    fn rejects_unknown_suffixes_and_garbage() {
        assert_eq!(parse_duration("10x"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
    }
}
