mod errors;
pub mod constants;
mod timeout;

pub use errors::{SessionError, WatchError};
pub use timeout::{
    MAX_PAGE_WAIT_TIMEOUT_MS, MAX_WATCH_TIMEOUT_MS, clamp_watch_timeout,
    validate_page_wait_timeout,
};
