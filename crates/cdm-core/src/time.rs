//! Duration formatting for status lines and log messages.

use std::time::Duration;

/// Render a duration the way an operator reads it: `850ms`, `12s`, `2m05s`,
/// `1h03m`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    if total_secs == 0 {
        return format!("{}ms", elapsed.as_millis());
    }
    if total_secs < 60 {
        return format!("{total_secs}s");
    }
    if total_secs < 3600 {
        return format!("{}m{:02}s", total_secs / 60, total_secs % 60);
    }
    format!("{}h{:02}m", total_secs / 3600, (total_secs % 3600) / 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_second() {
        assert_eq!(format_elapsed(Duration::from_millis(850)), "850ms");
        assert_eq!(format_elapsed(Duration::ZERO), "0ms");
    }

    #[test]
    fn test_seconds() {
        assert_eq!(format_elapsed(Duration::from_secs(12)), "12s");
        assert_eq!(format_elapsed(Duration::from_secs(59)), "59s");
    }

    #[test]
    fn test_minutes() {
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m05s");
        assert_eq!(format_elapsed(Duration::from_secs(60)), "1m00s");
    }

    #[test]
    fn test_hours() {
        assert_eq!(format_elapsed(Duration::from_secs(3780)), "1h03m");
    }
}
