/// Render a millisecond duration as `"1H 2M 3S"`
///
/// Hours and minutes are omitted when zero, seconds are always present.
/// Negative, NaN and infinite inputs have no rendering.
pub fn format_duration(ms: f64) -> Option<String> {
    if !ms.is_finite() || ms < 0.0 {
        return None;
    }

    let mut seconds = (ms / 1000.0).floor() as u64;
    let hours = seconds / 3600;
    seconds %= 3600;
    let minutes = seconds / 60;
    seconds %= 60;

    let mut parts = Vec::with_capacity(3);
    if hours > 0 {
        parts.push(format!("{hours}H"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}M"));
    }
    parts.push(format!("{seconds}S"));

    Some(parts.join(" "))
}
