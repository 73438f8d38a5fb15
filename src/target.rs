//! Locating the element to generate for, and deciding which pages can be fetched.

use anyhow::{bail, Result};
use scraper::{ElementRef, Html, Selector};

/// Pages where scripts cannot run, so no element can be picked from them.
const RESTRICTED_URL_PREFIXES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "edge://",
    "about:",
    "view-source:",
    "devtools://",
    "https://chromewebstore.google.com/",
];

pub fn is_restricted_url(url: &str) -> bool {
    url.is_empty() || RESTRICTED_URL_PREFIXES.iter().any(|p| url.starts_with(p))
}

/// Fail with a user-facing message for pages scripts cannot run in.
pub fn ensure_scriptable_url(url: &str) -> Result<()> {
    if is_restricted_url(url) {
        bail!("This page does not allow page scripts ({url:?}). Try a normal website URL.");
    }
    Ok(())
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// The `nth` (0-based) element matching the CSS selector `css`.
pub fn resolve<'a>(doc: &'a Html, css: &str, nth: usize) -> Result<ElementRef<'a>> {
    let selector =
        Selector::parse(css).map_err(|e| anyhow::anyhow!("Invalid target selector {css:?}: {e:?}"))?;
    let mut matches = doc.select(&selector);
    match matches.nth(nth) {
        Some(el) => Ok(el),
        None => {
            let total = doc.select(&selector).count();
            if total == 0 {
                bail!("No element matches target selector {css:?}");
            }
            bail!("Target selector {css:?} matched {total} element(s); index {nth} is out of range");
        }
    }
}
