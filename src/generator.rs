use scraper::{ElementRef, Html};
use tracing::debug;

use crate::dom::{tag_name, OutputMode, SelectorDebug, SelectorResult, Strategy};
use crate::matcher::{nearest_anchor, test_attr};
use crate::relative::{join_under_anchor, relative_xpath};
use crate::syntax::{
    css_by_attr, with_button_ancestor, xpath_by_attr, xpath_text_contains, xpath_text_exact,
};
use crate::target;
use crate::text::text_candidate;
use crate::validate::{first_matching, LiveDocument};

/// Synthesize a locator for `target`.
///
/// Rungs are tried in order: a test attribute on the target, a test attribute
/// on one of the three nearest ancestors, the element's short label text
/// validated against `doc`, and finally the bare tag name. The last rung
/// always succeeds, so every call yields a result.
pub fn generate(
    target: ElementRef<'_>,
    mode: OutputMode,
    doc: &(impl LiveDocument + ?Sized),
) -> SelectorResult {
    let target_tag = tag_name(&target);

    let result = direct_attr(&target, &target_tag, mode)
        .or_else(|| nearby_anchor(&target, &target_tag, mode))
        .or_else(|| text_fallback(&target, &target_tag, mode, doc))
        .unwrap_or_else(|| tag_only(&target_tag, mode));

    debug!(
        strategy = %result.debug.strategy,
        target_tag = %target_tag,
        mode = %mode,
        preferred = %result.preferred,
        "selector generated"
    );
    result
}

/// Parse `html`, pick the `nth` element matching `target_css`, and generate
/// for it, validating text candidates against the same document.
pub fn generate_in_html(
    html: &str,
    target_css: &str,
    nth: usize,
    mode: OutputMode,
) -> anyhow::Result<SelectorResult> {
    let doc = Html::parse_document(html);
    let element = target::resolve(&doc, target_css, nth)?;
    Ok(generate(element, mode, &doc))
}

fn direct_attr(target: &ElementRef<'_>, target_tag: &str, mode: OutputMode) -> Option<SelectorResult> {
    let hit = test_attr(target)?;
    let xpath = xpath_by_attr(target_tag, hit.name, &hit.value);
    let css = css_by_attr(hit.name, &hit.value);
    Some(SelectorResult::paired(
        mode,
        xpath,
        css,
        SelectorDebug {
            strategy: Strategy::TargetTestAttr,
            anchor: Some(hit.to_string()),
            target_tag: target_tag.to_string(),
        },
    ))
}

fn nearby_anchor(target: &ElementRef<'_>, target_tag: &str, mode: OutputMode) -> Option<SelectorResult> {
    let anchor = nearest_anchor(*target)?;
    debug!(hops = anchor.hops, anchor = %anchor.attr, "anchor found");

    let anchor_xpath = xpath_by_attr(&tag_name(&anchor.element), anchor.attr.name, &anchor.attr.value);
    let relative = relative_xpath(&anchor.element, target);
    let xpath = join_under_anchor(&anchor_xpath, &relative, target_tag);
    // Descendant combinator on the bare tag: looser than the XPath form.
    let css = format!("{} {target_tag}", css_by_attr(anchor.attr.name, &anchor.attr.value));

    Some(SelectorResult::paired(
        mode,
        xpath,
        css,
        SelectorDebug {
            strategy: Strategy::NearbyAnchor,
            anchor: Some(anchor.attr.to_string()),
            target_tag: target_tag.to_string(),
        },
    ))
}

fn text_fallback(
    target: &ElementRef<'_>,
    target_tag: &str,
    mode: OutputMode,
    doc: &(impl LiveDocument + ?Sized),
) -> Option<SelectorResult> {
    let text = text_candidate(target)?;
    let tiers = [
        (Strategy::TextFallbackExact, xpath_text_exact(&text)),
        (Strategy::TextFallbackContains, xpath_text_contains(&text)),
    ];

    for (strategy, plain) in tiers {
        let in_button = with_button_ancestor(&plain);
        if let Some(chosen) = first_matching(doc, &[in_button.as_str(), plain.as_str()]) {
            return Some(SelectorResult::xpath_only(
                mode,
                chosen.to_string(),
                SelectorDebug {
                    strategy,
                    anchor: Some(text),
                    target_tag: target_tag.to_string(),
                },
            ));
        }
    }

    debug!(label = %text, "label text matched nothing in the document");
    None
}

fn tag_only(target_tag: &str, mode: OutputMode) -> SelectorResult {
    SelectorResult::paired(
        mode,
        format!("//{target_tag}"),
        target_tag.to_string(),
        SelectorDebug {
            strategy: Strategy::TagOnly,
            anchor: None,
            target_tag: target_tag.to_string(),
        },
    )
}
