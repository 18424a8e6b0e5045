use chrono::DateTime;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Human readable duration, e.g. `2h 5m 10s`.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Unix timestamp as `YYYY-MM-DD HH:MM UTC`.
pub fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Replace `&` formatting codes with `§` when followed by a valid code character.
pub fn translate_color_codes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match chars.peek() {
            Some(next) if c == '&' && is_format_code(*next) => out.push('§'),
            _ => out.push(c),
        }
    }
    out
}

fn is_format_code(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), '0'..='9' | 'a'..='f' | 'k'..='o' | 'r')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(61), "1m 1s");
        assert_eq!(format_duration(7325), "2h 2m 5s");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1700000000), "2023-11-14 22:13 UTC");
    }

    #[test]
    fn test_translate_color_codes() {
        assert_eq!(translate_color_codes("&aWelcome &lback"), "§aWelcome §lback");
        assert_eq!(translate_color_codes("fish & chips"), "fish & chips");
        assert_eq!(translate_color_codes("&"), "&");
        assert_eq!(translate_color_codes("&&6gold"), "&§6gold");
    }
}
