//! Generated-output parsing.
//!
//! The model is prompted to speak as the bot but frequently keeps going and
//! starts writing the other participants' turns. This module extracts the
//! bot's own line(s) and discards everything at and after the impersonation
//! boundary.

/// Stand-in reply when the model produced nothing usable.
pub const PLACEHOLDER_REPLY: &str = "...";

/// Extract the bot's reply line(s) from raw generated text.
///
/// The first line is always accepted (an empty one becomes the literal
/// placeholder). Each following line is accepted, prefix-stripped, only
/// while it still carries the `<name>: ` prefix; the first line without it
/// terminates parsing permanently. A later line that happens to match the
/// prefix again is never examined.
///
/// The result is always non-empty.
pub fn parse_replies(name: &str, raw: &str) -> Vec<String> {
    let prefix = format!("{name}: ");
    let mut lines = raw.trim().lines().map(str::trim);

    let first = match lines.next() {
        Some(line) if !line.is_empty() => line.to_string(),
        _ => PLACEHOLDER_REPLY.to_string(),
    };

    let mut replies = vec![first];
    for line in lines {
        match line.strip_prefix(&prefix) {
            Some(rest) => replies.push(rest.trim().to_string()),
            None => break,
        }
    }
    replies
}
