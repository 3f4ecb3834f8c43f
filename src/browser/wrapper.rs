//! Browser lifecycle: launch, open pages, shut down

use std::path::PathBuf;

use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{BrowserError, BrowserResult, setup};
use crate::BrowserConfig;

/// Browser plus the task driving its CDP connection
///
/// The handler is aborted on drop; otherwise it would keep running after
/// the browser is gone. Prefer [`BrowserWrapper::shutdown`], which also
/// removes the profile directory once Chrome has released it.
pub struct BrowserWrapper {
    browser: Browser,
    handler: JoinHandle<()>,
    profile_dir: Option<PathBuf>,
}

impl BrowserWrapper {
    /// Launch a browser with a per-process profile directory
    pub async fn launch(config: &BrowserConfig) -> BrowserResult<Self> {
        info!("Launching browser instance");
        let profile_dir =
            std::env::temp_dir().join(format!("kodegen_dom_watch_{}", std::process::id()));
        let (browser, handler, profile_dir) = setup::launch(config, profile_dir).await?;

        Ok(Self {
            browser,
            handler,
            profile_dir: Some(profile_dir),
        })
    }

    /// Open `url` in a new tab and wait for the navigation to finish
    pub async fn open(&self, url: &str) -> BrowserResult<Page> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))?;

        page.goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed(format!("{url}: {e}")))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| BrowserError::NavigationFailed(format!("{url}: {e}")))?;

        info!("Navigated to {}", url);
        Ok(page)
    }

    /// Close the browser, wait for the process, then remove the profile
    pub async fn shutdown(mut self) -> BrowserResult<()> {
        if let Err(e) = self.browser.close().await {
            warn!("Browser close failed: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Waiting for browser exit failed: {}", e);
        }
        self.cleanup_profile_dir();
        Ok(())
    }

    fn cleanup_profile_dir(&mut self) {
        if let Some(path) = self.profile_dir.take() {
            info!("Cleaning up profile directory: {}", path.display());
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    "Failed to clean up profile directory {}: {}. Manual cleanup may be required.",
                    path.display(),
                    e
                );
            }
        }
    }
}

impl Drop for BrowserWrapper {
    fn drop(&mut self) {
        self.handler.abort();
        if let Some(path) = &self.profile_dir {
            warn!(
                "BrowserWrapper dropped without shutdown(), profile directory orphaned: {}",
                path.display()
            );
        }
    }
}
