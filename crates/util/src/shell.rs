//! Shell quoting for remote command construction.
//!
//! Remote commands are built from structured arguments, never by pasting
//! raw values into command text. Each argument is quoted so the remote
//! shell sees it as a single word. Plans may still opt into verbatim
//! `run:` scripts; that path carries a documented injection risk and is
//! the author's responsibility.

/// Quote a single argument for POSIX `sh`.
///
/// Plain words pass through untouched; anything else is wrapped in single
/// quotes, with embedded single quotes escaped via the `'\''` idiom.
///
/// # Example
/// ```rust
/// use rigger_util::shell::quote_arg;
///
/// assert_eq!(quote_arg("plain-word_1.txt"), "plain-word_1.txt");
/// assert_eq!(quote_arg("two words"), "'two words'");
/// assert_eq!(quote_arg("it's"), r#"'it'\''s'"#);
/// ```
pub fn quote_arg(argument: &str) -> String {
    if !argument.is_empty() && argument.bytes().all(is_safe_byte) {
        return argument.to_string();
    }
    let escaped = argument.replace('\'', r"'\''");
    format!("'{escaped}'")
}

/// Join a program and its arguments into one shell line, quoting each part.
pub fn shell_line(program: &str, arguments: &[String]) -> String {
    let mut line = quote_arg(program);
    for argument in arguments {
        line.push(' ');
        line.push_str(&quote_arg(argument));
    }
    line
}

fn is_safe_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.' | b'/' | b':' | b'=' | b'@' | b'~')
}
