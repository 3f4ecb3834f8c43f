//! Shared configuration constants
//!
//! Default values used by the browser launcher and the session helpers.

/// Desktop Chrome user agent passed to the launched browser
///
/// Chrome releases a new stable version roughly every 4 weeks; bump this
/// quarterly to stay within a believable version window.
///
/// Reference: https://chromiumdash.appspot.com/schedule
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

/// Session static-videos endpoint; requests append `/{event}/{session}`
pub const DEFAULT_DURATION_ENDPOINT: &str = "https://api-hv.brandlive.com/e3-get-session-static-videos";

/// Default page wait when neither the CLI nor the config sets one
pub const DEFAULT_PAGE_WAIT_MS: u64 = 10_000;
