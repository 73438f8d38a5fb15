use locator_synth::dom::{OutputMode, SelectorResult, Strategy};
use locator_synth::generator::{generate, generate_in_html};
use locator_synth::serialize;
use locator_synth::xpath;
use scraper::{ElementRef, Html, Selector};

// ── Test Fixtures ───────────────────────────────────────────────────────────

const CHECKOUT: &str = include_str!("fixtures/checkout.html");

fn gen_for(html: &str, css: &str, mode: OutputMode) -> SelectorResult {
    generate_in_html(html, css, 0, mode).unwrap()
}

fn checkout(css: &str, mode: OutputMode) -> SelectorResult {
    gen_for(CHECKOUT, css, mode)
}

fn count(html: &str, expr: &str) -> usize {
    xpath::count(&Html::parse_document(html), expr).unwrap()
}

// ── Ladder scenarios ────────────────────────────────────────────────────────

#[test]
fn test_attr_on_target() {
    let r = gen_for(
        r#"<button data-testid="submit-btn">Go</button>"#,
        "button",
        OutputMode::XPath,
    );
    assert_eq!(r.preferred, "//button[@data-testid='submit-btn']");
    assert_eq!(r.alternate.as_deref(), Some(r#"[data-testid="submit-btn"]"#));
    assert_eq!(r.debug.strategy, Strategy::TargetTestAttr);
}

#[test]
fn anchor_on_parent_css_mode() {
    let r = gen_for(
        r#"<div data-qa="dialog"><span>OK</span></div>"#,
        "span",
        OutputMode::Css,
    );
    assert_eq!(r.debug.strategy, Strategy::NearbyAnchor);
    assert_eq!(r.preferred, r#"[data-qa="dialog"] span"#);
    assert_eq!(r.alternate.as_deref(), Some("//div[@data-qa='dialog']//span[1]"));
}

#[test]
fn exact_text_fallback() {
    let r = checkout("section.summary > div:last-child", OutputMode::XPath);
    assert_eq!(r.debug.strategy, Strategy::TextFallbackExact);
    assert_eq!(r.preferred, "//*[normalize-space(.)='Submit Order']");
    assert_eq!(r.alternate, None);
    assert_eq!(r.debug.target_tag, "div");
}

#[test]
fn long_text_everywhere_gives_tag_only() {
    let xp = checkout("footer p", OutputMode::XPath);
    assert_eq!(xp.debug.strategy, Strategy::TagOnly);
    assert_eq!(xp.preferred, "//p");
    assert_eq!(xp.debug.anchor, None);

    let css = checkout("footer p", OutputMode::Css);
    assert_eq!(css.preferred, "p");
    assert_eq!(css.alternate.as_deref(), Some("//p"));
}

#[test]
fn contains_tier_when_exact_misses() {
    // An em space survives XPath normalize-space but not label extraction,
    // so only the substring form finds the element.
    let r = gen_for("<div>\u{2003}Checkout</div>", "div", OutputMode::XPath);
    assert_eq!(r.debug.strategy, Strategy::TextFallbackContains);
    assert_eq!(r.preferred, "//*[contains(normalize-space(.),'Checkout')]");
}

// ── Checkout page ───────────────────────────────────────────────────────────

#[test]
fn checkout_direct_attr() {
    let r = checkout("a[data-cy]", OutputMode::XPath);
    assert_eq!(r.preferred, "//a[@data-cy='cart-link']");
    assert_eq!(r.debug.anchor.as_deref(), Some("data-cy=cart-link"));
}

#[test]
fn checkout_anchor_two_hops_up() {
    let r = checkout("nav a", OutputMode::XPath);
    assert_eq!(r.debug.strategy, Strategy::NearbyAnchor);
    assert_eq!(r.preferred, "//header[@data-test='site-header']//a[1]");
    assert_eq!(r.alternate.as_deref(), Some(r#"[data-test="site-header"] a"#));
}

#[test]
fn checkout_anchor_three_hops_up_with_id_and_name() {
    let r = checkout("#full-name", OutputMode::XPath);
    assert_eq!(
        r.preferred,
        "//section[@data-testid='shipping']//input[@id='full-name']"
    );

    let r = checkout("input[name=postcode]", OutputMode::XPath);
    assert_eq!(
        r.preferred,
        "//section[@data-testid='shipping']//input[@name='postcode']"
    );

    let r = checkout("select", OutputMode::XPath);
    assert_eq!(r.preferred, "//section[@data-testid='shipping']//select[1]");
}

#[test]
fn checkout_button_label_prefers_button() {
    let r = checkout("button[type=submit]", OutputMode::XPath);
    assert_eq!(r.debug.strategy, Strategy::TextFallbackExact);
    assert_eq!(
        r.preferred,
        "//*[normalize-space(.)='Place order']/ancestor::button[1]"
    );
    assert_eq!(count(CHECKOUT, &r.preferred), 1);
}

#[test]
fn apostrophe_text_is_concat_quoted_and_matches() {
    let r = checkout(".contact", OutputMode::XPath);
    assert_eq!(r.debug.strategy, Strategy::TextFallbackExact);
    assert_eq!(
        r.preferred,
        r#"//*[normalize-space(.)=concat('Ask O', "'", 'Brien')]"#
    );
    assert_eq!(count(CHECKOUT, &r.preferred), 1);
}

#[test]
fn long_text_without_anchor_is_tag_only() {
    let r = checkout(".fine-print", OutputMode::XPath);
    assert_eq!(r.debug.strategy, Strategy::TagOnly);
    assert_eq!(r.preferred, "//p");
}

// ── Properties ──────────────────────────────────────────────────────────────

#[test]
fn attribute_priority_beats_markup_order() {
    let r = gen_for(
        r#"<a data-cy="c" data-qa="q" data-test-id="ti" data-testid="t" data-test="top">x</a>"#,
        "a",
        OutputMode::XPath,
    );
    assert_eq!(r.preferred, "//a[@data-test='top']");

    let r = gen_for(r#"<a data-cy="c" data-qa="q">x</a>"#, "a", OutputMode::XPath);
    assert_eq!(r.preferred, "//a[@data-qa='q']");
}

#[test]
fn anchor_search_stops_after_three_ancestors() {
    let in_reach = r#"<div data-test="near"><div><div><span>OK</span></div></div></div>"#;
    let r = gen_for(in_reach, "span", OutputMode::XPath);
    assert_eq!(r.debug.strategy, Strategy::NearbyAnchor);
    assert_eq!(r.preferred, "//div[@data-test='near']//span[1]");

    let too_far = r#"<div data-test="far"><div><div><div><span>OK</span></div></div></div></div>"#;
    let r = gen_for(too_far, "span", OutputMode::XPath);
    assert_eq!(r.debug.strategy, Strategy::TextFallbackExact);
    assert_eq!(r.preferred, "//*[normalize-space(.)='OK']");
}

#[test]
fn generation_is_deterministic() {
    let doc = Html::parse_document(CHECKOUT);
    let sel = Selector::parse("body *").unwrap();
    for el in doc.select(&sel) {
        for mode in [OutputMode::XPath, OutputMode::Css] {
            assert_eq!(generate(el, mode, &doc), generate(el, mode, &doc));
        }
    }
}

#[test]
fn modes_swap_slots_for_attribute_rungs() {
    let doc = Html::parse_document(CHECKOUT);
    let sel = Selector::parse("body *").unwrap();
    for el in doc.select(&sel) {
        let xp = generate(el, OutputMode::XPath, &doc);
        let css = generate(el, OutputMode::Css, &doc);
        assert_eq!(xp.debug, css.debug);
        assert_eq!(xp.xpath(), css.xpath());
        assert_eq!(xp.css(), css.css());
        if xp.debug.strategy.is_text() {
            assert_eq!(xp.alternate, None);
            assert_eq!(css.preferred, "");
            assert_eq!(css.alternate.as_deref(), Some(xp.preferred.as_str()));
        } else {
            assert_eq!(xp.alternate.as_deref(), Some(css.preferred.as_str()));
            assert_eq!(css.alternate.as_deref(), Some(xp.preferred.as_str()));
        }
    }
}

#[test]
fn every_generated_locator_matches_something() {
    let doc = Html::parse_document(CHECKOUT);
    let sel = Selector::parse("body *").unwrap();
    for el in doc.select(&sel) {
        let r = generate(el, OutputMode::XPath, &doc);
        let n = xpath::count(&doc, &r.preferred).unwrap();
        assert!(n >= 1, "{} for <{}> matched nothing", r.preferred, r.debug.target_tag);

        if let Some(css) = r.alternate.as_deref() {
            let css_sel = Selector::parse(css).unwrap();
            assert!(doc.select(&css_sel).next().is_some(), "{css} matched nothing");
        }
    }
}

#[test]
fn direct_attr_locators_select_the_target() {
    let doc = Html::parse_document(CHECKOUT);
    let sel = Selector::parse("body *").unwrap();
    for el in doc.select(&sel) {
        let r = generate(el, OutputMode::XPath, &doc);
        if r.debug.strategy != Strategy::TargetTestAttr {
            continue;
        }
        let found = xpath::select(&doc, &r.preferred).unwrap();
        assert_eq!(found.len(), 1, "{}", r.preferred);
        assert!(matches!(
            &found[0],
            xpath::Match::Node(node) if node.id() == el.id()
        ));
    }
}

fn first<'a>(doc: &'a Html, css: &str) -> ElementRef<'a> {
    doc.select(&Selector::parse(css).unwrap()).next().unwrap()
}

#[test]
fn anchor_locators_land_inside_the_anchor() {
    let doc = Html::parse_document(CHECKOUT);
    let target = first(&doc, "#full-name");
    let r = generate(target, OutputMode::XPath, &doc);
    let found = xpath::select(&doc, &r.preferred).unwrap();
    assert_eq!(found.len(), 1);
    assert!(matches!(&found[0], xpath::Match::Node(node) if node.id() == target.id()));
}

// ── Output ──────────────────────────────────────────────────────────────────

#[test]
fn compact_text_for_checkout() {
    let r = checkout("[data-qa=cancel-order]", OutputMode::Css);
    assert_eq!(
        serialize::to_compact_text(&r),
        "preferred: [data-qa=\"cancel-order\"]\n\
         alternate: //button[@data-qa='cancel-order']\n\
         strategy: target_test_attr (data-qa=cancel-order)\n\
         target: button\n"
    );
}

#[test]
fn json_shape_is_stable() {
    let r = checkout("footer p", OutputMode::XPath);
    let v = serde_json::to_value(&r).unwrap();
    assert_eq!(v["preferred"], "//p");
    assert_eq!(v["alternate"], "p");
    assert_eq!(v["mode"], "xpath");
    assert_eq!(v["debug"]["strategy"], "tag_only");
    assert_eq!(v["debug"]["target_tag"], "p");
    assert!(v["debug"].get("anchor").is_none());
}
