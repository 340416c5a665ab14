//! Text extraction and cleanup for ingested passages.

use crate::types::MetadataValue;

/// Strip tags from an HTML fragment, dropping `<script>` and `<style>`
/// contents, decoding the common entities and collapsing whitespace.
pub fn clean_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;

    // ASCII lowercasing keeps byte offsets aligned with `html`
    let lower = html.to_ascii_lowercase();

    for (i, ch) in html.char_indices() {
        if ch == '<' {
            in_tag = true;

            let rest = &lower[i..];
            if rest.starts_with("<script") {
                in_script = true;
            } else if rest.starts_with("</script") {
                in_script = false;
            } else if rest.starts_with("<style") {
                in_style = true;
            } else if rest.starts_with("</style") {
                in_style = false;
            }
        } else if in_tag {
            if ch == '>' {
                in_tag = false;
                // "<p>a</p><p>b</p>" reads "a b"
                result.push(' ');
            }
        } else if !in_script && !in_style {
            result.push(ch);
        }
    }

    normalize_whitespace(&decode_entities(&result))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Inner HTML of every `<tag>` element in `html`, in document order.
///
/// Matching is by tag name only and case-insensitive. Nested elements of
/// the same name end at the first closing tag.
pub fn extract_tag<'a>(html: &'a str, tag: &str) -> Vec<&'a str> {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{}", tag.to_ascii_lowercase());
    let close = format!("</{}", tag.to_ascii_lowercase());

    let mut fragments = Vec::new();
    let mut cursor = 0;
    while let Some(found) = lower[cursor..].find(&open) {
        let start = cursor + found;
        let after_name = start + open.len();

        // `<p` must not match `<pre>`
        let boundary = lower[after_name..].chars().next();
        if !matches!(boundary, Some(c) if c == '>' || c == '/' || c.is_ascii_whitespace()) {
            cursor = after_name;
            continue;
        }

        let Some(open_end) = lower[after_name..].find('>') else {
            break;
        };
        let content_start = after_name + open_end + 1;
        let content_end = lower[content_start..]
            .find(&close)
            .map(|offset| content_start + offset)
            .unwrap_or(html.len());

        fragments.push(&html[content_start..content_end]);
        cursor = content_end;
    }

    fragments
}

/// Readable text of the `selector` elements of a page, falling back to
/// `<body>` and then to the whole document when they hold no text.
pub fn html_to_text(html: &str, selector: &str) -> String {
    for tag in [selector, "body"] {
        let text = extract_tag(html, tag)
            .into_iter()
            .map(clean_html)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !text.is_empty() {
            return text;
        }
    }
    clean_html(html)
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep ASCII letters, digits, whitespace and `.,!?-`.
pub fn remove_special_characters(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || ".,!?-".contains(*c))
        .collect()
}

/// Strip special characters and normalize whitespace.
pub fn clean_text(text: &str) -> String {
    normalize_whitespace(&remove_special_characters(text))
}

/// Parse figures such as `$1,200`, `(350)`, `2.5B` or `-40K`.
///
/// Parentheses mean negative; `K`, `M` and `B` scale by thousands,
/// millions and billions. Returns `None` for anything else.
pub fn clean_financial_number(raw: &str) -> Option<f64> {
    let mut text = raw.trim();
    let mut sign = 1.0;
    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        sign = -1.0;
        text = inner.trim();
    }

    let mut digits: String = text.chars().filter(|c| *c != '$' && *c != ',').collect();
    let multiplier = match digits.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => 1e3,
        Some('M') => 1e6,
        Some('B') => 1e9,
        _ => 1.0,
    };
    if multiplier != 1.0 {
        digits.pop();
    }

    let digits = digits.trim();
    if !digits.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    digits
        .parse::<f64>()
        .ok()
        .map(|v| sign * v * multiplier)
        .filter(|v| v.is_finite())
}

/// Typed metadata value from command-line text: booleans, integers and
/// financial figures are recognized, anything else stays text.
pub fn parse_metadata_value(raw: &str) -> MetadataValue {
    let trimmed = raw.trim();
    match trimmed {
        "true" => return MetadataValue::Bool(true),
        "false" => return MetadataValue::Bool(false),
        _ => {}
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return MetadataValue::Integer(value);
    }
    match clean_financial_number(trimmed) {
        Some(value) => MetadataValue::Float(value),
        None => MetadataValue::Text(raw.to_string()),
    }
}
