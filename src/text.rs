use scraper::ElementRef;

use crate::dom::{parent_element, MAX_LABEL_CHARS};

/// Collapse whitespace runs to single spaces and trim.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Label length in UTF-16 code units, the unit DOM string lengths use.
pub fn label_len(text: &str) -> usize {
    text.encode_utf16().count()
}

fn accept(raw: String) -> Option<String> {
    let text = normalize_text(&raw);
    (!text.is_empty() && label_len(&text) <= MAX_LABEL_CHARS).then_some(text)
}

/// Label from the element's own text, else from its first descendant `span`.
pub fn label_candidate(el: &ElementRef<'_>) -> Option<String> {
    if let Some(text) = accept(el.text().collect()) {
        return Some(text);
    }
    let span = el
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .find(|d| d.value().name().eq_ignore_ascii_case("span"))?;
    accept(span.text().collect())
}

/// [`label_candidate`] on the target, then once on its parent.
pub fn text_candidate(target: &ElementRef<'_>) -> Option<String> {
    label_candidate(target).or_else(|| {
        let parent = parent_element(target).unwrap_or(*target);
        label_candidate(&parent)
    })
}
