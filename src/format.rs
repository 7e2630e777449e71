//! HTML to plain-text conversion for outbound messages.

use std::sync::LazyLock;

use regex::Regex;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("HTML tag pattern compiles"));

/// Derives the plain `body` of a message from its HTML `formatted_body`.
pub trait PlainTextFormatter: Send + Sync {
    fn to_plain(&self, html: &str) -> String;
}

impl<F> PlainTextFormatter for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn to_plain(&self, html: &str) -> String {
        self(html)
    }
}

/// Removes every `<...>` tag and keeps the text between them.
///
/// Entities such as `&amp;` are left untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct StripTags;

impl PlainTextFormatter for StripTags {
    fn to_plain(&self, html: &str) -> String {
        HTML_TAG.replace_all(html, "").into_owned()
    }
}
