//! Element appearance and stability watching
//!
//! [`Watcher`] waits for the first node matching a selector to exist under
//! a root container and, optionally, for its content to stop changing. It
//! runs against any [`Environment`]; [`sandbox::Sandbox`] is the in-memory
//! one, and [`page`] offers the same waits against a live browser page.

pub mod browser;
pub mod device;
pub mod env;
pub mod page;
pub mod sandbox;
pub mod selector;
pub mod session;
mod utils;
pub mod watcher;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use browser::{BrowserError, BrowserResult, BrowserWrapper};
pub use env::{Environment, Event, MutationKind, MutationRecord, ObserveScope, SubscriptionId, TimerId};
pub use selector::{Selector, SelectorError, SelectorTarget};
pub use session::{DurationClient, EventBundle, SessionConfig, format_duration, uuid_by_title};
pub use utils::constants;
pub use utils::{
    MAX_PAGE_WAIT_TIMEOUT_MS, MAX_WATCH_TIMEOUT_MS, SessionError, WatchError,
    validate_page_wait_timeout,
};
pub use watcher::{CancelHandle, WatchOptions, Watcher};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Defaults for watch requests that do not override them
    #[serde(default)]
    pub watch: WatchOptions,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// Browser launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    #[serde(default = "default_headless")]
    pub headless: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Window dimensions
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

fn default_headless() -> bool {
    true
}

fn default_user_agent() -> String {
    constants::CHROME_USER_AGENT.to_string()
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            user_agent: default_user_agent(),
            window: WindowConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

/// `<config dir>/kodegen-dom-watch/config.yaml`, if the platform has one
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("kodegen-dom-watch").join("config.yaml"))
}

/// Load config from a YAML file; a missing file yields the defaults
pub fn load_yaml_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}
