//! Test-identifier detection and the nearest-anchor walk.

use scraper::ElementRef;

use crate::dom::{parent_element, AnchorHit, TestAttr, MAX_ANCHOR_HOPS, TEST_ATTRS};

/// First test-identifier attribute on `el` with a non-blank value, in priority order.
pub fn test_attr(el: &ElementRef<'_>) -> Option<TestAttr> {
    let element = el.value();
    TEST_ATTRS.iter().find_map(|&name| {
        let value = element.attr(name)?.trim();
        (!value.is_empty()).then(|| TestAttr {
            name,
            value: value.to_string(),
        })
    })
}

/// Walk from `target` (hop 0) up to `max_hops` ancestors and return the
/// closest element carrying a test identifier.
pub fn find_anchor<'a>(target: ElementRef<'a>, max_hops: usize) -> Option<AnchorHit<'a>> {
    let mut current = Some(target);
    for hops in 0..=max_hops {
        let el = current?;
        if let Some(attr) = test_attr(&el) {
            return Some(AnchorHit {
                element: el,
                hops,
                attr,
            });
        }
        current = parent_element(&el);
    }
    None
}

/// [`find_anchor`] with the default hop bound.
pub fn nearest_anchor(target: ElementRef<'_>) -> Option<AnchorHit<'_>> {
    find_anchor(target, MAX_ANCHOR_HOPS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn first<'a>(doc: &'a Html, css: &str) -> ElementRef<'a> {
        doc.select(&Selector::parse(css).unwrap()).next().unwrap()
    }

    #[test]
    fn priority_order_wins_over_document_order() {
        let doc = Html::parse_document(r#"<div id="t" data-cy="b" data-test="a"></div>"#);
        let hit = test_attr(&first(&doc, "#t")).unwrap();
        assert_eq!(hit.name, "data-test");
        assert_eq!(hit.value, "a");
    }

    #[test]
    fn blank_values_are_skipped() {
        let doc = Html::parse_document(r#"<div id="t" data-test="   " data-qa=" panel "></div>"#);
        let hit = test_attr(&first(&doc, "#t")).unwrap();
        assert_eq!(hit.name, "data-qa");
        assert_eq!(hit.value, "panel");
    }

    #[test]
    fn no_attrs_no_match() {
        let doc = Html::parse_document(r#"<div id="t" data-other="x"></div>"#);
        assert!(test_attr(&first(&doc, "#t")).is_none());
    }

    #[test]
    fn anchor_on_target_is_hop_zero() {
        let doc = Html::parse_document(r#"<div data-qa="outer"><p id="t" data-cy="x">hi</p></div>"#);
        let hit = nearest_anchor(first(&doc, "#t")).unwrap();
        assert_eq!(hit.hops, 0);
        assert_eq!(hit.attr.to_string(), "data-cy=x");
    }

    #[test]
    fn closest_ancestor_wins() {
        let doc = Html::parse_document(
            r#"<div data-qa="far"><section data-test="near"><p><b id="t">x</b></p></section></div>"#,
        );
        let hit = nearest_anchor(first(&doc, "#t")).unwrap();
        assert_eq!(hit.hops, 2);
        assert_eq!(hit.attr.value, "near");
        assert_eq!(hit.element.value().name(), "section");
    }

    #[test]
    fn third_ancestor_is_in_reach() {
        let doc = Html::parse_document(
            r#"<div data-qa="a"><div><div><span id="t">x</span></div></div></div>"#,
        );
        let hit = nearest_anchor(first(&doc, "#t")).unwrap();
        assert_eq!(hit.hops, 3);
    }

    #[test]
    fn fourth_ancestor_is_out_of_reach() {
        let doc = Html::parse_document(
            r#"<div data-qa="a"><div><div><div><span id="t">x</span></div></div></div></div>"#,
        );
        assert!(nearest_anchor(first(&doc, "#t")).is_none());
    }

    #[test]
    fn walk_stops_at_document_root() {
        let doc = Html::parse_document("<p>x</p>");
        // html is the outermost element; asking for more hops than exist is fine.
        assert!(find_anchor(first(&doc, "html"), 10).is_none());
    }
}
