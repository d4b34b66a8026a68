use std::borrow::Cow;

/// Strip control characters from scraped text.
///
/// The source is hostile, so anything that ends up in logs or a terminal
/// goes through here first. Tab, newline and carriage return survive and
/// are folded into spaces later by [`normalize_text`].
///
/// Returns `Cow::Borrowed` when the input contains no control characters.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let needs_strip = s
        .bytes()
        .any(|b| b == 0x7f || (b < 0x20 && b != 0x09 && b != 0x0a && b != 0x0d));

    if !needs_strip {
        return Cow::Borrowed(s);
    }

    Cow::Owned(
        s.chars()
            .filter(|&c| c == '\t' || c == '\n' || c == '\r' || !c.is_control())
            .collect(),
    )
}

/// Normalizes the text of one table cell.
///
/// NBSP becomes a plain space, control characters are dropped and any run
/// of whitespace collapses to a single space. The result is trimmed.
pub fn normalize_text(s: &str) -> String {
    let cleaned = strip_control_chars(s);
    let mut out = String::with_capacity(cleaned.len());
    let mut pending_space = false;

    for c in cleaned.chars() {
        if c.is_whitespace() || c == '\u{a0}' {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }

    out
}
