use scraper::Html;
use tracing::debug;

use crate::xpath::{XPath, XPathResult};

/// A document that candidate locators can be checked against.
pub trait LiveDocument {
    /// Number of nodes `xpath` selects, in ordered-snapshot semantics.
    fn evaluate_count(&self, xpath: &str) -> XPathResult<usize>;
}

impl LiveDocument for Html {
    fn evaluate_count(&self, xpath: &str) -> XPathResult<usize> {
        XPath::parse(xpath)?.count(self)
    }
}

/// Match count of a generated candidate. Candidates are machine-built, so an
/// expression the document cannot evaluate simply counts as no match.
pub fn match_count(doc: &(impl LiveDocument + ?Sized), xpath: &str) -> usize {
    match doc.evaluate_count(xpath) {
        Ok(n) => n,
        Err(e) => {
            debug!(xpath = %xpath, error = %e, "candidate did not evaluate; counting as no match");
            0
        }
    }
}

/// First candidate that matches at least one node.
pub fn first_matching<'c>(
    doc: &(impl LiveDocument + ?Sized),
    candidates: &[&'c str],
) -> Option<&'c str> {
    candidates.iter().copied().find(|c| match_count(doc, c) > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xpath::XPathError;

    struct Broken;

    impl LiveDocument for Broken {
        fn evaluate_count(&self, _xpath: &str) -> XPathResult<usize> {
            Err(XPathError::Unsupported("detached context".into()))
        }
    }

    #[test]
    fn counts_matches() {
        let doc = Html::parse_document("<p>a</p><p>b</p>");
        assert_eq!(match_count(&doc, "//p"), 2);
        assert_eq!(match_count(&doc, "//div"), 0);
    }

    #[test]
    fn malformed_expression_counts_as_zero() {
        let doc = Html::parse_document("<p>a</p>");
        assert_eq!(match_count(&doc, "//p[@"), 0);
        assert_eq!(match_count(&doc, "count(//p)"), 0);
    }

    #[test]
    fn evaluator_failure_counts_as_zero() {
        assert_eq!(match_count(&Broken, "//p"), 0);
        assert_eq!(first_matching(&Broken, &["//p", "//div"]), None);
    }

    #[test]
    fn first_matching_respects_order() {
        let doc = Html::parse_document("<p>a</p><div>b</div>");
        assert_eq!(first_matching(&doc, &["//span", "//div", "//p"]), Some("//div"));
    }
}
