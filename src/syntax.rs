//! String builders for the locator expressions.

/// Quote a value as an XPath string literal.
///
/// XPath 1.0 literals cannot escape their delimiter, so text containing an
/// apostrophe is rebuilt with `concat()`:
/// `O'Brien` becomes `concat('O', "'", 'Brien')`.
pub fn quote_xpath(text: &str) -> String {
    if !text.contains('\'') {
        return format!("'{text}'");
    }
    let parts: Vec<String> = text.split('\'').map(|p| format!("'{p}'")).collect();
    format!("concat({})", parts.join(", \"'\", "))
}

/// `//tag[@attr='value']`, with `*` accepted as the tag.
pub fn xpath_by_attr(tag: &str, attr: &str, value: &str) -> String {
    format!("//{tag}[@{attr}={}]", quote_xpath(value))
}

/// `[attr="value"]` with backslashes escaped before double quotes.
pub fn css_by_attr(attr: &str, value: &str) -> String {
    let safe = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("[{attr}=\"{safe}\"]")
}

/// Exact normalized-text match on any element.
pub fn xpath_text_exact(text: &str) -> String {
    format!("//*[normalize-space(.)={}]", quote_xpath(text))
}

/// Substring normalized-text match on any element.
pub fn xpath_text_contains(text: &str) -> String {
    format!("//*[contains(normalize-space(.),{})]", quote_xpath(text))
}

/// The nearest `button` ancestor of whatever `xpath` selects.
pub fn with_button_ancestor(xpath: &str) -> String {
    format!("{xpath}/ancestor::button[1]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_literal_single_quoted() {
        assert_eq!(quote_xpath("Submit Order"), "'Submit Order'");
        assert_eq!(quote_xpath(""), "''");
    }

    #[test]
    fn apostrophe_uses_concat() {
        assert_eq!(quote_xpath("O'Brien"), r#"concat('O', "'", 'Brien')"#);
        assert_eq!(quote_xpath("'"), r#"concat('', "'", '')"#);
        assert_eq!(
            quote_xpath("it's Bob's"),
            r#"concat('it', "'", 's Bob', "'", 's')"#
        );
    }

    #[test]
    fn attr_xpath() {
        assert_eq!(
            xpath_by_attr("button", "data-testid", "submit-btn"),
            "//button[@data-testid='submit-btn']"
        );
    }

    #[test]
    fn css_escapes_backslash_then_quote() {
        assert_eq!(css_by_attr("data-qa", "dialog"), r#"[data-qa="dialog"]"#);
        assert_eq!(css_by_attr("data-qa", r#"a"b"#), r#"[data-qa="a\"b"]"#);
        assert_eq!(css_by_attr("data-qa", r"a\b"), r#"[data-qa="a\\b"]"#);
        assert_eq!(css_by_attr("data-qa", r#"\""#), r#"[data-qa="\\\""]"#);
    }

    #[test]
    fn text_candidates() {
        assert_eq!(xpath_text_exact("Go"), "//*[normalize-space(.)='Go']");
        assert_eq!(
            xpath_text_contains("Go"),
            "//*[contains(normalize-space(.),'Go')]"
        );
        assert_eq!(
            with_button_ancestor("//*[normalize-space(.)='Go']"),
            "//*[normalize-space(.)='Go']/ancestor::button[1]"
        );
    }
}
