//! Colour/style markup helpers.
//!
//! Templates use `&` as an informal prefix for formatting codes (`&6`, `&l`,
//! `&r`, ...). Clients understand the section sign `§` instead, so every line
//! is translated before it reaches a surface.

/// Prefix the templates use for formatting codes.
pub const ALT_CODE_CHAR: char = '&';
/// Prefix the display surface understands.
pub const CODE_CHAR: char = '§';
/// Formatting reset. Renders as nothing, so it doubles as a uniqueness suffix.
pub const RESET_MARKER: &str = "§r";
/// Longest entry a surface accepts, in characters.
pub const MAX_ENTRY_LEN: usize = 40;

const VALID_CODES: &str = "0123456789AaBbCcDdEeFfKkLlMmNnOoRrXx";

/// Replaces `&<code>` with `§<code>` for every recognised formatting code.
///
/// An `&` that is not followed by a known code is left alone, so text such as
/// `Tom & Jerry` survives untouched.
pub fn translate_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == ALT_CODE_CHAR {
            if let Some(&next) = chars.peek() {
                if VALID_CODES.contains(next) {
                    out.push(CODE_CHAR);
                    out.push(next.to_ascii_lowercase());
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }

    out
}

/// Cuts `text` down to at most [`MAX_ENTRY_LEN`] characters.
pub fn truncate_entry(text: &str) -> String {
    match text.char_indices().nth(MAX_ENTRY_LEN) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
