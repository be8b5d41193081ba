use std::time::Duration;

/// Human form used in log lines, truncated to whole milliseconds.
pub fn format_duration(duration: Duration) -> String {
    let millis = Duration::from_millis(duration.as_millis() as u64);
    humantime::format_duration(millis).to_string()
}
