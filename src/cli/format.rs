//! Argument parsing and terminal formatting helpers

use chrono::{DateTime, Local, Utc};

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

/// Timestamp in the local time zone
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Single-line preview of clipboard content
pub fn preview(data: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(data);
    let flat: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    if flat.chars().count() > max_chars {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

/// `key=value` pairs given with `--meta`
pub fn parse_key_value(arg: &str) -> Result<(String, String), String> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", arg))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", arg));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Comma-separated transform chain, e.g. `strip-ansi,pretty-json`
pub fn parse_chain(arg: &str) -> Vec<String> {
    arg.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview(b"line one\nline two", 100), "line one line two");
        assert_eq!(preview(b"abcdefgh", 3), "abc...");
        assert_eq!(preview(&[0xff, b'a'], 10), "\u{fffd}a");
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("source=term=1").unwrap(),
            ("source".to_string(), "term=1".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_parse_chain() {
        assert_eq!(parse_chain("a, b,,c"), vec!["a", "b", "c"]);
        assert!(parse_chain("").is_empty());
    }
}
