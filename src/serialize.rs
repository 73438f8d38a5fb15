use crate::dom::SelectorResult;

/// Serialize a SelectorResult into the compact text format.
///
/// Example output:
/// ```text
/// preferred: //button[@data-testid='submit-btn']
/// alternate: [data-testid="submit-btn"]
/// strategy: target_test_attr (data-testid=submit-btn)
/// target: button
/// ```
pub fn to_compact_text(result: &SelectorResult) -> String {
    let mut output = String::new();

    if result.preferred.is_empty() {
        output.push_str("preferred: (none)\n");
    } else {
        output.push_str(&format!("preferred: {}\n", result.preferred));
    }

    if let Some(alt) = &result.alternate {
        output.push_str(&format!("alternate: {alt}\n"));
    }

    output.push_str(&format!("strategy: {}", result.debug.strategy));
    if let Some(anchor) = &result.debug.anchor {
        output.push_str(&format!(" ({anchor})"));
    }
    output.push('\n');

    output.push_str(&format!("target: {}\n", result.debug.target_tag));
    output
}

/// Compact text plus the match count of the XPath form in a live page.
pub fn with_live_count(result: &SelectorResult, live_count: Option<usize>) -> String {
    let mut output = to_compact_text(result);
    match live_count {
        Some(n) => output.push_str(&format!("live matches: {n}\n")),
        None => output.push_str("live matches: (not checked)\n"),
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{OutputMode, SelectorDebug, Strategy};

    #[test]
    fn paired_result() {
        let r = SelectorResult::paired(
            OutputMode::XPath,
            "//button[@data-testid='submit-btn']".into(),
            r#"[data-testid="submit-btn"]"#.into(),
            SelectorDebug {
                strategy: Strategy::TargetTestAttr,
                anchor: Some("data-testid=submit-btn".into()),
                target_tag: "button".into(),
            },
        );
        assert_eq!(
            to_compact_text(&r),
            "preferred: //button[@data-testid='submit-btn']\n\
             alternate: [data-testid=\"submit-btn\"]\n\
             strategy: target_test_attr (data-testid=submit-btn)\n\
             target: button\n"
        );
    }

    #[test]
    fn text_result_in_css_mode() {
        let r = SelectorResult::xpath_only(
            OutputMode::Css,
            "//*[normalize-space(.)='Go']".into(),
            SelectorDebug {
                strategy: Strategy::TextFallbackExact,
                anchor: Some("Go".into()),
                target_tag: "span".into(),
            },
        );
        let text = to_compact_text(&r);
        assert!(text.starts_with("preferred: (none)\nalternate: //*[normalize-space(.)='Go']\n"));
    }

    #[test]
    fn tag_only_has_no_anchor_suffix() {
        let r = SelectorResult::paired(
            OutputMode::Css,
            "//p".into(),
            "p".into(),
            SelectorDebug {
                strategy: Strategy::TagOnly,
                anchor: None,
                target_tag: "p".into(),
            },
        );
        let text = with_live_count(&r, Some(4));
        assert!(text.contains("strategy: tag_only\n"));
        assert!(text.ends_with("live matches: 4\n"));
    }
}
