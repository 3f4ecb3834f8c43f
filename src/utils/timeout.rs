//! Timeout validation utilities for watch operations

use std::time::Duration;

use tracing::warn;

/// Maximum deadline for a watch request (5 minutes)
/// Covers slow-loading sites, heavy SPAs, and network delays
pub const MAX_WATCH_TIMEOUT_MS: u64 = 300_000; // 5 minutes

/// Maximum timeout for live page waits (30 seconds)
/// Covers dynamic element loading and animations
pub const MAX_PAGE_WAIT_TIMEOUT_MS: u64 = 30_000; // 30 seconds

/// Clamp a watch request deadline
///
/// Watch requests never fail on bad options, so an oversized deadline is
/// capped at `MAX_WATCH_TIMEOUT_MS` with a warning instead of rejected.
pub fn clamp_watch_timeout(timeout_ms: u64) -> Duration {
    if timeout_ms > MAX_WATCH_TIMEOUT_MS {
        warn!(
            "Watch timeout cannot exceed {}ms ({} minutes). Received: {}ms, clamping",
            MAX_WATCH_TIMEOUT_MS,
            MAX_WATCH_TIMEOUT_MS / 60_000,
            timeout_ms
        );
        return Duration::from_millis(MAX_WATCH_TIMEOUT_MS);
    }

    Duration::from_millis(timeout_ms)
}

/// Validate timeout for live page waits (wait_for_element, wait_for_stable_element)
///
/// # Arguments
/// * `timeout_ms` - Optional timeout in milliseconds
/// * `default_ms` - Default timeout if None provided
///
/// # Returns
/// * `Ok(Duration)` - Validated Duration object
/// * `Err(anyhow::Error)` - If timeout exceeds MAX_PAGE_WAIT_TIMEOUT_MS
pub fn validate_page_wait_timeout(
    timeout_ms: Option<u64>,
    default_ms: u64,
) -> anyhow::Result<Duration> {
    let ms = timeout_ms.unwrap_or(default_ms);

    if ms > MAX_PAGE_WAIT_TIMEOUT_MS {
        anyhow::bail!(
            "Timeout cannot exceed {}ms ({} seconds). Received: {}ms ({} seconds)",
            MAX_PAGE_WAIT_TIMEOUT_MS,
            MAX_PAGE_WAIT_TIMEOUT_MS / 1000,
            ms,
            ms / 1000
        );
    }

    Ok(Duration::from_millis(ms))
}
