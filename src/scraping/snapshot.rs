//! Render a live page with headless Chromium and keep the settled HTML, so a
//! comment-heavy article can be expanded and inspected offline.

use anyhow::{anyhow, Context, Result};
use chromiumoxide::Browser;
use futures::StreamExt;
use tracing::{info, warn};

use super::browser_manager::{auto_scroll, build_headless_config, find_chrome_executable, wait_until_stable};

#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    pub width: u32,
    pub height: u32,
    pub quiet_ms: u64,
    pub timeout_ms: u64,
    /// Scroll the page before capture so lazy widgets mount.
    pub scroll: bool,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
            quiet_ms: 1_000,
            timeout_ms: 15_000,
            scroll: true,
        }
    }
}

/// Navigate to `url`, wait for it to settle and return `document` HTML.
pub async fn render(url: &str, options: &SnapshotOptions) -> Result<String> {
    let parsed = url::Url::parse(url).with_context(|| format!("invalid url: {url}"))?;
    let exe = find_chrome_executable().ok_or_else(|| {
        anyhow!("no Chromium-family browser found; set CHROME_EXECUTABLE to its path")
    })?;
    info!("📸 snapshot {} (browser: {})", parsed, exe);

    let config = build_headless_config(&exe, options.width, options.height)?;
    let (mut browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| anyhow!("failed to launch browser ({}): {}", exe, e))?;
    let driver = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!("CDP handler error: {}", e);
            }
        }
    });

    let result: Result<String> = async {
        let page = browser
            .new_page(parsed.as_str())
            .await
            .map_err(|e| anyhow!("failed to open page: {}", e))?;
        wait_until_stable(&page, options.quiet_ms, options.timeout_ms).await?;
        if options.scroll {
            auto_scroll(&page, u64::from(options.height), 20).await?;
            wait_until_stable(&page, options.quiet_ms, options.timeout_ms).await?;
        }
        page.content()
            .await
            .map_err(|e| anyhow!("failed to read page content: {}", e))
    }
    .await;

    if let Err(e) = browser.close().await {
        warn!("browser close error (ignored): {}", e);
    }
    driver.abort();

    let html = result?;
    info!("snapshot captured: {} bytes", html.len());
    Ok(html)
}
