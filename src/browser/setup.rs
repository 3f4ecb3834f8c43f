//! Locating, downloading and launching Chrome/Chromium

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as LaunchConfig, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use tokio::task::{self, JoinHandle};
use tracing::{error, info, trace, warn};

use super::{BrowserError, BrowserResult};
use crate::BrowserConfig;
use crate::device::is_mobile_user_agent;

/// Removes the profile directory on drop unless released
struct ProfileDirGuard {
    path: PathBuf,
    keep: bool,
}

impl ProfileDirGuard {
    fn create(path: PathBuf) -> BrowserResult<Self> {
        std::fs::create_dir_all(&path).map_err(|e| {
            BrowserError::IoError(format!("Failed to create {}: {}", path.display(), e))
        })?;
        Ok(Self { path, keep: false })
    }

    fn release(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for ProfileDirGuard {
    fn drop(&mut self) {
        if !self.keep {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!("Failed to clean up profile dir {}: {}", self.path.display(), e);
            } else {
                info!("Cleaned up profile dir after launch failure: {}", self.path.display());
            }
        }
    }
}

/// Find a Chrome/Chromium executable, honouring `CHROMIUM_PATH` first
pub fn find_browser_executable() -> BrowserResult<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("Using browser from CHROMIUM_PATH: {}", path.display());
            return Ok(path);
        }
        warn!("CHROMIUM_PATH points to a missing file: {}", path.display());
    }

    let candidates: &[&str] = if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "~/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "~/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for candidate in candidates {
        let path = match candidate.strip_prefix("~/") {
            Some(rest) => match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => continue,
            },
            None => PathBuf::from(candidate),
        };

        if path.exists() {
            info!("Found browser at: {}", path.display());
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in ["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = Command::new("which").arg(cmd).output()
                && output.status.success()
            {
                let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !found.is_empty() {
                    info!("Found browser using 'which': {}", found);
                    return Ok(PathBuf::from(found));
                }
            }
        }
    }

    Err(BrowserError::NotFound(
        "no Chrome/Chromium executable on this system".to_string(),
    ))
}

/// Download a managed Chromium into the user cache directory
pub async fn download_managed_browser() -> BrowserResult<PathBuf> {
    info!("Downloading managed Chromium browser...");

    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(|| std::env::temp_dir().join(".cache"))
        .join("kodegen-dom-watch/chromium");
    std::fs::create_dir_all(&cache_dir)
        .map_err(|e| BrowserError::IoError(format!("Failed to create cache dir: {e}")))?;

    let options = BrowserFetcherOptions::builder()
        .with_path(&cache_dir)
        .build()
        .map_err(|e| BrowserError::NotFound(format!("Failed to build fetcher options: {e}")))?;
    let revision = BrowserFetcher::new(options)
        .fetch()
        .await
        .map_err(|e| BrowserError::NotFound(format!("Failed to fetch browser: {e}")))?;

    info!("Downloaded Chromium to: {}", revision.folder_path.display());
    Ok(revision.executable_path)
}

/// Launch a browser with the configured window and user agent
///
/// The returned handler task drives the CDP connection and must be aborted
/// once the browser is no longer needed.
pub async fn launch(
    config: &BrowserConfig,
    profile_dir: PathBuf,
) -> BrowserResult<(Browser, JoinHandle<()>, PathBuf)> {
    let executable = match find_browser_executable() {
        Ok(path) => path,
        Err(e) => {
            warn!("{}, falling back to a managed download", e);
            download_managed_browser().await?
        }
    };

    let guard = ProfileDirGuard::create(profile_dir)?;

    let mut builder = LaunchConfig::builder()
        .request_timeout(Duration::from_secs(30))
        .window_size(config.window.width, config.window.height)
        .user_data_dir(&guard.path)
        .chrome_executable(executable);

    builder = if config.headless {
        builder.headless_mode(HeadlessMode::default())
    } else {
        builder.with_head()
    };

    if is_mobile_user_agent(&config.user_agent) {
        info!("Configured user agent is a mobile device");
    }

    builder = builder
        .arg(format!("--user-agent={}", config.user_agent))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-notifications")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-extensions")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-backgrounding-occluded-windows")
        .arg("--hide-scrollbars")
        .arg("--mute-audio");

    if in_container() {
        info!("Detected containerized environment, disabling sandbox");
        builder = builder.arg("--no-sandbox").arg("--disable-setuid-sandbox");
    }

    let launch_config = builder.build().map_err(BrowserError::LaunchFailed)?;

    info!("Launching browser with config: {:?}", launch_config);
    let (browser, mut handler) = Browser::launch(launch_config)
        .await
        .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

    let handler_task = task::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                let message = e.to_string();
                // Chrome emits CDP events chromiumoxide has no type for
                if message.contains("data did not match any variant of untagged enum Message")
                    || message.contains("Failed to deserialize WS response")
                {
                    trace!("Suppressed benign CDP serialization error: {}", message);
                } else {
                    error!("Browser handler error: {:?}", e);
                }
            }
        }
        info!("Browser handler task completed");
    });

    Ok((browser, handler_task, guard.release()))
}

/// Setuid sandboxing does not work inside containers
fn in_container() -> bool {
    Path::new("/.dockerenv").exists()
        || std::env::var("container").is_ok()
        || std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
}
