//! Headless Chromium plumbing for page snapshots (`chromiumoxide`).
//!
//! * Locating a Chromium-family executable.
//! * A headless `BrowserConfig` sized to the engine's default viewport.
//! * Settling helpers: `wait_until_stable` and `auto_scroll`.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use tracing::{debug, info, warn};

pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";

const PATH_NAMES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
    "brave-browser",
];

#[cfg(target_os = "linux")]
const WELL_KNOWN: &[&str] = &[
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/usr/bin/google-chrome",
    "/snap/bin/chromium",
    "/usr/local/bin/chromium",
];

#[cfg(target_os = "macos")]
const WELL_KNOWN: &[&str] = &[
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
];

#[cfg(target_os = "windows")]
const WELL_KNOWN: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
];

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const WELL_KNOWN: &[&str] = &[];

/// Find a Chromium-family executable.
///
/// Resolution order: `CHROME_EXECUTABLE`, then `PATH`, then per-OS install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(explicit) = std::env::var(ENV_CHROME_EXECUTABLE) {
        if Path::new(&explicit).exists() {
            return Some(explicit);
        }
        warn!("{} points to a missing file: {}", ENV_CHROME_EXECUTABLE, explicit);
    }

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            if let Some(found) = PATH_NAMES.iter().map(|exe| dir.join(exe)).find(|p| p.exists()) {
                return Some(found.to_string_lossy().to_string());
            }
        }
    }

    WELL_KNOWN
        .iter()
        .find(|p| Path::new(p).exists())
        .map(|p| p.to_string())
}

/// Headless config with a desktop viewport. Audio is muted so media never
/// starts playing while the page settles.
pub fn build_headless_config(exe: &str, width: u32, height: u32) -> Result<BrowserConfig> {
    BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width,
            height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(width, height)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        .build()
        .map_err(|e| anyhow!("failed to build browser config: {}", e))
}

async fn eval_json(page: &Page, script: &str) -> Option<serde_json::Value> {
    page.evaluate(script)
        .await
        .ok()
        .and_then(|v| v.into_value::<serde_json::Value>().ok())
}

/// Wait until `document.readyState` is complete and the resource count has not
/// changed for `quiet_ms`, or until `timeout_ms` elapses.
pub async fn wait_until_stable(page: &Page, quiet_ms: u64, timeout_ms: u64) -> Result<()> {
    let poll = Duration::from_millis(250);
    let start = std::time::Instant::now();
    let mut last_count = 0u64;
    let mut stable_since = std::time::Instant::now();

    while start.elapsed() < Duration::from_millis(timeout_ms) {
        let count = eval_json(page, "performance.getEntriesByType('resource').length")
            .await
            .and_then(|j| j.as_u64())
            .unwrap_or(0);
        let complete = eval_json(page, "document.readyState")
            .await
            .is_some_and(|j| j.as_str() == Some("complete"));

        if !complete || count != last_count {
            last_count = count;
            stable_since = std::time::Instant::now();
        } else if stable_since.elapsed() >= Duration::from_millis(quiet_ms) {
            debug!("page settled after {:?} ({} resources)", start.elapsed(), count);
            return Ok(());
        }
        tokio::time::sleep(poll).await;
    }
    info!("wait_until_stable: gave up after {}ms", timeout_ms);
    Ok(())
}

/// Scroll through the page in viewport-sized steps so lazy comment widgets
/// mount before the HTML is captured. Capped at `max_steps`.
pub async fn auto_scroll(page: &Page, step_px: u64, max_steps: u64) -> Result<()> {
    let height = eval_json(
        page,
        "Math.max(document.body.scrollHeight, document.documentElement.scrollHeight)",
    )
    .await
    .and_then(|j| j.as_u64())
    .unwrap_or(step_px);

    let steps = (height / step_px.max(1)).min(max_steps);
    for i in 0..=steps {
        let script = format!("window.scrollTo(0, {});", i * step_px);
        if let Err(e) = page.evaluate(script).await {
            warn!("auto_scroll: step {} failed: {}", i, e);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    if let Err(e) = page.evaluate("window.scrollTo(0, 0);").await {
        warn!("auto_scroll: reset failed: {}", e);
    }
    Ok(())
}
