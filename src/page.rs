//! Element polling against a live chromiumoxide page
//!
//! Remote pages cannot hand out change notifications the way an in-process
//! tree does, so these waits poll instead: appearance with exponential
//! backoff, stability by sampling the element's inner HTML once per debounce
//! window and feeding the samples to the same [`Quiescence`] evaluator the
//! event-driven watcher uses.

use std::time::{Duration, Instant};

use chromiumoxide::Page;
use chromiumoxide::element::Element;
use tracing::{debug, trace};

use crate::session::EventBundle;
use crate::utils::WatchError;
use crate::watcher::{Quiescence, Verdict, WatchOptions};

const INITIAL_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Wait for an element to appear using exponential backoff polling
///
/// # Polling Strategy
/// - Starts at 100ms intervals
/// - Doubles each retry
/// - Caps at 1 second
/// - Total duration limited by `timeout`
pub async fn wait_for_element(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Result<Element, WatchError> {
    wait_for_element_within(page, None, selector, timeout).await
}

/// Like [`wait_for_element`], but only matches below the first element
/// matching `root` (when given). A missing root counts as no match yet.
pub async fn wait_for_element_within(
    page: &Page,
    root: Option<&str>,
    selector: &str,
    timeout: Duration,
) -> Result<Element, WatchError> {
    let start = Instant::now();
    let mut poll_interval = INITIAL_POLL_INTERVAL;

    loop {
        if let Some(element) = find(page, root, selector).await {
            debug!(
                "Element '{}' found after {}ms",
                selector,
                start.elapsed().as_millis()
            );
            return Ok(element);
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(WatchError::SelectorNeverMatched {
                selector: selector.to_string(),
                waited_ms: elapsed.as_millis() as u64,
            });
        }

        tokio::time::sleep(poll_interval.min(timeout - elapsed)).await;
        poll_interval = (poll_interval * 2).min(MAX_POLL_INTERVAL);
    }
}

/// Wait for an element to appear and then stop changing
///
/// Returns the element's inner HTML once `required_stable_checks`
/// consecutive samples, `debounce_ms` apart, came back identical. The
/// element is re-queried on every sample, so a node swapped out by the page
/// counts as a change rather than an error.
pub async fn wait_for_stable_element(
    page: &Page,
    selector: &str,
    options: &WatchOptions,
    timeout: Duration,
) -> Result<String, WatchError> {
    let settings = options.normalize();
    let start = Instant::now();
    let root = settings.root.as_deref();

    let element = wait_for_element_within(page, root, selector, timeout).await?;
    if !settings.stable {
        return inner_html(&element).await;
    }

    let mut quiescence = Quiescence::new(settings.required_stable_checks);
    quiescence.rebaseline(inner_html(&element).await?, 0);

    loop {
        if start.elapsed() + settings.debounce > timeout {
            return Err(WatchError::NeverSettled {
                selector: selector.to_string(),
                waited_ms: start.elapsed().as_millis() as u64,
            });
        }
        tokio::time::sleep(settings.debounce).await;

        // Detached or replaced: sample as empty until it is back
        let sample = match find(page, root, selector).await {
            Some(current) => inner_html(&current).await?,
            None => String::new(),
        };

        match quiescence.check(&sample, 0) {
            Verdict::Settled => {
                debug!(
                    "Element '{}' stable after {}ms",
                    selector,
                    start.elapsed().as_millis()
                );
                return Ok(sample);
            }
            Verdict::Pending => trace!(
                "Element '{}' quiet ({}/{})",
                selector,
                quiescence.consecutive(),
                settings.required_stable_checks
            ),
            Verdict::Changed => trace!("Element '{}' changed, restarting window", selector),
        }
    }
}

/// The page's `window.eventBundle`, if it has one
pub async fn read_event_bundle(page: &Page) -> Result<Option<EventBundle>, WatchError> {
    let value = page.evaluate("window.eventBundle ?? null").await?;
    value
        .into_value::<Option<EventBundle>>()
        .map_err(|e| WatchError::BrowserError(format!("Malformed eventBundle: {e}")))
}

async fn find(page: &Page, root: Option<&str>, selector: &str) -> Option<Element> {
    match root {
        Some(root) => {
            let container = page.find_element(root).await.ok()?;
            container.find_element(selector).await.ok()
        }
        None => page.find_element(selector).await.ok(),
    }
}

async fn inner_html(element: &Element) -> Result<String, WatchError> {
    Ok(element.inner_html().await?.unwrap_or_default())
}
