use scraper::ElementRef;

use crate::dom::{contains, tag_name, RelativeStep};
use crate::matcher::test_attr;
use crate::syntax::quote_xpath;

/// Prefix of every path produced by [`relative_xpath`] for a contained target.
pub const RELATIVE_PREFIX: &str = ".//";

/// Decide how `target` is expressed below `anchor`.
pub fn relative_step(anchor: &ElementRef<'_>, target: &ElementRef<'_>) -> RelativeStep {
    if !contains(anchor, target) {
        return RelativeStep::FollowingOfTag;
    }
    if let Some(hit) = test_attr(target) {
        return RelativeStep::TestAttr(hit);
    }
    let el = target.value();
    if let Some(id) = el.attr("id").filter(|v| !v.is_empty()) {
        return RelativeStep::Id(id.to_string());
    }
    if let Some(name) = el.attr("name").filter(|v| !v.is_empty()) {
        return RelativeStep::Name(name.to_string());
    }
    RelativeStep::FirstOfTag
}

/// Render a step for a target of tag `tag` as an XPath relative to the anchor.
pub fn render_step(step: &RelativeStep, tag: &str) -> String {
    match step {
        RelativeStep::TestAttr(hit) => {
            format!(".//{tag}[@{}={}]", hit.name, quote_xpath(&hit.value))
        }
        RelativeStep::Id(id) => format!(".//{tag}[@id={}]", quote_xpath(id)),
        RelativeStep::Name(name) => format!(".//{tag}[@name={}]", quote_xpath(name)),
        RelativeStep::FirstOfTag => format!(".//{tag}[1]"),
        RelativeStep::FollowingOfTag => format!(".//following::{tag}[1]"),
    }
}

pub fn relative_xpath(anchor: &ElementRef<'_>, target: &ElementRef<'_>) -> String {
    render_step(&relative_step(anchor, target), &tag_name(target))
}

/// Splice a relative path under an absolute anchor path.
pub fn join_under_anchor(anchor_xpath: &str, relative: &str, target_tag: &str) -> String {
    match relative.strip_prefix('.') {
        Some(rest) if relative.starts_with(RELATIVE_PREFIX) => format!("{anchor_xpath}{rest}"),
        _ => format!("{anchor_xpath}//{target_tag}[1]"),
    }
}
