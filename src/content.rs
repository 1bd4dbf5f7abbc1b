use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static BLOCK_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(p|div|h[1-6]|ul|ol|pre|blockquote)(\s[^>]*)?>").expect("block regex")
});
static LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("br regex"));
static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<li(\s[^>]*)?>").expect("li regex"));
static QUOTE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<blockquote(?:\s[^>]*)?>(.*?)</blockquote>").expect("blockquote regex")
});
static ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#).expect("anchor regex")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank regex"));

/// Flattens sanitized HTML into plain text lines for the terminal.
///
/// Block quotes are prefixed with `> `, list items with `• ` and links keep
/// their target in brackets when it differs from the label.
pub fn html_to_text(html: &str) -> String {
    let quoted = QUOTE_BLOCK.replace_all(html, |caps: &Captures| {
        let inner = html_to_text(&caps[1]);
        let prefixed: Vec<String> = inner.lines().map(|line| format!("> {line}")).collect();
        format!("\n{}\n", prefixed.join("\n"))
    });
    let linked = ANCHOR.replace_all(&quoted, |caps: &Captures| {
        let href = caps[1].trim();
        let label = TAG.replace_all(&caps[2], "");
        let label = label.trim();
        if label.is_empty() {
            href.to_string()
        } else if href.is_empty() || label == href {
            label.to_string()
        } else {
            format!("{label} [{href}]")
        }
    });
    let text = LINE_BREAK.replace_all(&linked, "\n");
    let text = LIST_ITEM.replace_all(&text, "\n• ");
    let text = BLOCK_BREAK.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    let text = html_escape::decode_html_entities(&text);

    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let joined = lines.join("\n");
    BLANK_RUN
        .replace_all(joined.trim_matches('\n'), "\n\n")
        .trim()
        .to_string()
}

/// Wraps plain text typed in the terminal as minimal HTML for the API.
pub fn text_to_html(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .map(|paragraph| {
            let lines: Vec<_> = paragraph.lines().map(html_escape::encode_text).collect();
            format!("<p>{}</p>", lines.join("<br>"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_become_separate_lines() {
        assert_eq!(html_to_text("<p>one</p><p>two</p>"), "one\n\ntwo");
    }

    #[test]
    fn line_breaks_and_inline_tags() {
        assert_eq!(
            html_to_text("<p>a<br/>b <strong>bold</strong></p>"),
            "a\nb bold"
        );
    }

    #[test]
    fn block_quotes_are_prefixed() {
        assert_eq!(
            html_to_text("<blockquote><p>quoted</p></blockquote><p>reply</p>"),
            "> quoted\n\nreply"
        );
    }

    #[test]
    fn list_items_get_bullets() {
        assert_eq!(html_to_text("<ul><li>x</li><li>y</li></ul>"), "• x\n• y");
    }

    #[test]
    fn links_keep_targets() {
        assert_eq!(
            html_to_text(r#"<a href="https://example.com">site</a>"#),
            "site [https://example.com]"
        );
        assert_eq!(
            html_to_text(r#"<a href="https://example.com">https://example.com</a>"#),
            "https://example.com"
        );
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(
            html_to_text("<p>1 &lt; 2 &amp;&amp; &#x1F980; &#39;ok&#39; &bogus;</p>"),
            "1 < 2 && 🦀 'ok' &bogus;"
        );
        assert_eq!(
            html_to_text("<p>wait&hellip; &mdash; &eacute;t&eacute;</p>"),
            "wait… — été"
        );
    }

    #[test]
    fn typed_text_is_escaped_into_paragraphs() {
        assert_eq!(
            text_to_html("a < b\nnext line\n\n  \n\nsecond & last"),
            "<p>a &lt; b<br>next line</p><p>second &amp; last</p>"
        );
        assert_eq!(text_to_html("   "), "");
        assert_eq!(text_to_html("\"quoted\""), "<p>\"quoted\"</p>");
        assert_eq!(html_to_text(&text_to_html("x & y")), "x & y");
    }
}
