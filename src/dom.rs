use std::fmt;
use std::str::FromStr;

use scraper::ElementRef;
use serde::{Deserialize, Serialize};

/// Test-identifier attributes, highest priority first.
pub const TEST_ATTRS: &[&str] = &["data-test", "data-testid", "data-test-id", "data-qa", "data-cy"];

/// Ancestors inspected above the target during anchor search (hop 0 is the target).
pub const MAX_ANCHOR_HOPS: usize = 3;

/// Longest label, in UTF-16 code units, accepted as a text locator.
pub const MAX_LABEL_CHARS: usize = 40;

/// Which of the two generated expressions the caller wants as `preferred`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    XPath,
    Css,
}

impl OutputMode {
    /// Lenient conversion for untyped input: anything other than `css` is XPath.
    pub fn normalize(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("css") {
            Self::Css
        } else {
            Self::XPath
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::XPath => "xpath",
            Self::Css => "css",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xpath" => Ok(Self::XPath),
            "css" => Ok(Self::Css),
            other => anyhow::bail!("unknown output mode '{other}' (expected 'xpath' or 'css')"),
        }
    }
}

/// The ladder rung that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    TargetTestAttr,
    NearbyAnchor,
    TextFallbackExact,
    TextFallbackContains,
    TagOnly,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TargetTestAttr => "target_test_attr",
            Self::NearbyAnchor => "nearby_anchor",
            Self::TextFallbackExact => "text_fallback_exact",
            Self::TextFallbackContains => "text_fallback_contains",
            Self::TagOnly => "tag_only",
        }
    }

    /// Text rungs carry no CSS form.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::TextFallbackExact | Self::TextFallbackContains)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorDebug {
    pub strategy: Strategy,
    /// `attr=value` for attribute rungs, the label for text rungs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    pub target_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorResult {
    pub preferred: String,
    pub alternate: Option<String>,
    /// The mode the slots were assigned for.
    pub mode: OutputMode,
    pub debug: SelectorDebug,
}

impl SelectorResult {
    /// Assign an XPath/CSS pair according to the requested mode.
    pub fn paired(mode: OutputMode, xpath: String, css: String, debug: SelectorDebug) -> Self {
        let (preferred, alternate) = match mode {
            OutputMode::XPath => (xpath, css),
            OutputMode::Css => (css, xpath),
        };
        Self {
            preferred,
            alternate: Some(alternate),
            mode,
            debug,
        }
    }

    /// Text rungs have no CSS form: in CSS mode `preferred` is left empty and
    /// the XPath travels as `alternate`.
    pub fn xpath_only(mode: OutputMode, xpath: String, debug: SelectorDebug) -> Self {
        match mode {
            OutputMode::XPath => Self {
                preferred: xpath,
                alternate: None,
                mode,
                debug,
            },
            OutputMode::Css => Self {
                preferred: String::new(),
                alternate: Some(xpath),
                mode,
                debug,
            },
        }
    }

    /// The XPath form of this result. Every rung produces one; it is
    /// `preferred` in XPath mode and `alternate` in CSS mode.
    pub fn xpath(&self) -> &str {
        match self.mode {
            OutputMode::XPath => &self.preferred,
            OutputMode::Css => self.alternate.as_deref().unwrap_or_default(),
        }
    }

    /// The CSS form, absent for text rungs.
    pub fn css(&self) -> Option<&str> {
        if self.debug.strategy.is_text() {
            return None;
        }
        match self.mode {
            OutputMode::XPath => self.alternate.as_deref(),
            OutputMode::Css => Some(&self.preferred),
        }
    }
}

/// A recognized test-identifier attribute with its trimmed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestAttr {
    pub name: &'static str,
    pub value: String,
}

impl fmt::Display for TestAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Nearest element (target or ancestor) carrying a test identifier.
#[derive(Debug, Clone)]
pub struct AnchorHit<'a> {
    pub element: ElementRef<'a>,
    pub hops: usize,
    pub attr: TestAttr,
}

/// How the target is expressed below its anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelativeStep {
    TestAttr(TestAttr),
    Id(String),
    Name(String),
    FirstOfTag,
    /// The anchor does not contain the target.
    FollowingOfTag,
}

/// Lowercase tag name of an element.
pub fn tag_name(el: &ElementRef<'_>) -> String {
    el.value().name().to_ascii_lowercase()
}

/// Parent element, `None` at the document root.
pub fn parent_element<'a>(el: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.parent().and_then(ElementRef::wrap)
}

/// DOM `contains`: true for the element itself and all its descendants.
pub fn contains(ancestor: &ElementRef<'_>, node: &ElementRef<'_>) -> bool {
    let id = node.id();
    ancestor.descendants().any(|d| d.id() == id)
}
