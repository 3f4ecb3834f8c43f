// kodegen-dom-watch
//
// Opens a page in a browser, waits for an element to appear (and optionally
// settle), then prints its HTML. With --session-title it also prints the
// session's video duration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kodegen_tools_dom_watch::constants::DEFAULT_PAGE_WAIT_MS;
use kodegen_tools_dom_watch::{
    BrowserWrapper, DurationClient, SessionConfig, WatchOptions, default_config_path,
    load_yaml_config, page, validate_page_wait_timeout,
};

#[derive(Parser, Debug)]
#[command(
    name = "kodegen-dom-watch",
    version,
    about = "Wait for an element on a live page to appear and settle",
    long_about = None,
)]
struct Cli {
    /// Page to open
    url: String,

    /// Selector of the element to wait for
    selector: String,

    /// Only match below the first element matching this selector
    #[arg(long)]
    root: Option<String>,

    /// Wait until the element's content stops changing
    #[arg(long)]
    stable: bool,

    /// Quiet window between samples, in milliseconds
    #[arg(long)]
    debounce_ms: Option<i64>,

    /// Consecutive quiet samples required
    #[arg(long)]
    checks: Option<i64>,

    /// Give up after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Also print the duration of the session with this title
    #[arg(long)]
    session_title: Option<String>,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match cli.config.clone().or_else(default_config_path) {
        Some(path) => load_yaml_config(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Default::default(),
    };

    let mut options = config.watch.clone();
    options.stable |= cli.stable;
    if let Some(ms) = cli.debounce_ms {
        options.debounce_ms = ms;
    }
    if let Some(checks) = cli.checks {
        options.required_stable_checks = checks;
    }
    if cli.root.is_some() {
        options.root = cli.root.clone();
    }
    let timeout = validate_page_wait_timeout(
        cli.timeout_ms.or(options.timeout_ms),
        DEFAULT_PAGE_WAIT_MS,
    )?;

    let browser = BrowserWrapper::launch(&config.browser).await?;
    let outcome = run(&browser, &cli, &options, timeout, &config.session).await;
    browser.shutdown().await?;
    outcome
}

async fn run(
    browser: &BrowserWrapper,
    cli: &Cli,
    options: &WatchOptions,
    timeout: Duration,
    session: &SessionConfig,
) -> Result<()> {
    let tab = browser.open(&cli.url).await?;

    let html = page::wait_for_stable_element(&tab, &cli.selector, options, timeout).await?;
    info!("'{}' ready", cli.selector);
    println!("{html}");

    if let Some(title) = &cli.session_title {
        let Some(bundle) = page::read_event_bundle(&tab).await? else {
            warn!("Page has no event bundle");
            return Ok(());
        };
        let client = DurationClient::for_bundle(session.clone(), &bundle);
        match client.duration_label_by_title(&bundle, title).await {
            Some(label) => println!("{title}: {label}"),
            None => warn!("No duration for session '{}'", title),
        }
    }

    Ok(())
}
