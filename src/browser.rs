use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tracing::{debug, info};

use crate::target::ensure_scriptable_url;

/// Attach to Chrome, either a fresh headless instance or one already
/// listening for CDP on `port` (started with `--remote-debugging-port`).
pub async fn connect_or_launch(launch_browser: bool, port: u16) -> Result<Browser> {
    let (browser, mut handler) = if launch_browser {
        info!("launching headless Chrome");
        let config = BrowserConfig::builder()
            .no_sandbox()
            .args(["--disable-gpu", "--disable-dev-shm-usage"])
            .build()
            .map_err(|e| anyhow::anyhow!("Invalid browser config: {e}"))?;
        Browser::launch(config)
            .await
            .context("Could not launch Chrome; is Chrome or Chromium installed?")?
    } else {
        let endpoint = format!("http://127.0.0.1:{port}");
        info!(port = port, "attaching to Chrome over CDP");
        Browser::connect(&endpoint).await.with_context(|| {
            format!("No Chrome answered on port {port}; start it with --remote-debugging-port={port}")
        })?
    };

    // The handler stream drives every CDP round trip and must be polled.
    tokio::spawn(async move { while handler.next().await.is_some() {} });

    info!(launched = launch_browser, "browser ready");
    Ok(browser)
}

/// A navigated tab together with the markup it rendered.
pub struct LoadedPage {
    pub page: Page,
    pub html: String,
    pub url: String,
}

/// Navigate a new tab to `url` and capture its rendered HTML and final URL.
pub async fn open_page(browser: &Browser, url: &str) -> Result<LoadedPage> {
    ensure_scriptable_url(url)?;
    debug!(url = %url, "fetching page");
    let page = browser
        .new_page(url)
        .await
        .with_context(|| format!("Failed to navigate to {url}"))?;

    page.wait_for_navigation().await.ok();

    let html = page.content().await.context("Failed to get page content")?;

    let final_url = page
        .url()
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| url.to_string());

    debug!(final_url = %final_url, html_len = html.len(), "page fetched");
    Ok(LoadedPage {
        page,
        html,
        url: final_url,
    })
}

/// JS that counts the nodes an XPath selects in the live DOM. Any in-page
/// failure (bad expression, detached document) yields 0.
pub fn count_xpath_js(xpath: &str) -> String {
    let literal = serde_json::to_string(xpath).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "(() => {{ try {{ \
           return document.evaluate({literal}, document, null, \
             XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null).snapshotLength; \
         }} catch (e) {{ return 0; }} }})()"
    )
}

/// Number of nodes `xpath` selects in the page's current DOM.
pub async fn count_in_page(page: &Page, xpath: &str) -> Result<usize> {
    let js = count_xpath_js(xpath);
    let count = page
        .evaluate(js.as_str())
        .await
        .with_context(|| format!("Failed to evaluate XPath in page: {xpath}"))?
        .into_value::<u64>()
        .context("XPath count was not a number")?;
    debug!(xpath = %xpath, count = count, "live match count");
    Ok(count as usize)
}
