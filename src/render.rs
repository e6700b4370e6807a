//! Scroll text rendering
//!
//! Pure: the same items always render to the same text, so re-posting an
//! unchanged scroll reproduces it exactly.

/// Header line shown on every scroll
pub const HEADER: &str = "💀 *Blighted Scroll*";

const BULLET: &str = "• ";

/// Sent alongside the scroll on `/start`
pub const HELP_TEXT: &str = "*Scroll awakened.*\n\
Reply to it to stain new words.\n\
`/list`  — drag scroll down\n\
`/clear` — purge ink";

/// Reply to a `/clear` command
pub const PURGE_ACK: &str = "Scroll wiped 🩸";

/// Render the scroll body for the given items, in stored order.
///
/// Items are user text; their Markdown control characters are escaped so a
/// stray `_` or `*` can't make the whole scroll unsendable.
pub fn render<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        return format!("{HEADER}\n");
    }

    let body = items
        .iter()
        .map(|item| format!("{BULLET}{}", escape_markdown(item.as_ref())))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{HEADER}\n{body}")
}

/// Escape the characters Telegram's legacy Markdown treats as entity markers
fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
